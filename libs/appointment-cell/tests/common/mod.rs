#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use appointment_cell::models::{BlockSlotRequest, BlockSlotResponse, ConsultationRecord};
use appointment_cell::services::pricing::PaymentRequirement;
use appointment_cell::services::{
    AvailabilityProvider, BookingBackend, ConsentProvider, NotificationBus, PaymentCollaborator,
};
use appointment_cell::{
    ClientEvent, ConsultationId, ConsultationScheduler, ConsultationService, ConsultationStatus,
    Reservation, SchedulerCollaborators, Slot, SlotReservationService,
};
use shared_config::{AppConfig, ClientContext};
use shared_models::AppError;
use shared_utils::test_utils::{at, test_context};
use shared_utils::FixedClock;

pub const PROVIDER: &str = "provider-1";

/// In-memory booking backend with server-side dedup of confirmations.
#[derive(Default)]
pub struct FakeBookingBackend {
    next_id: Mutex<i64>,
    holds: Mutex<HashMap<ConsultationId, BlockSlotRequest>>,
    confirmed: Mutex<HashMap<ConsultationId, ConsultationRecord>>,
    pub cancelled: Mutex<Vec<ConsultationId>>,
    pub block_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub fail_next_block: Mutex<Option<AppError>>,
    pub fail_next_confirm: Mutex<Option<AppError>>,
    pub fail_next_cancel: Mutex<Option<AppError>>,
    pub block_gate: Mutex<Option<Arc<Notify>>>,
    pub confirm_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBookingBackend {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            ..Self::default()
        }
    }

    pub fn with_next_id(self, id: i64) -> Self {
        *self.next_id.lock().unwrap() = id;
        self
    }

    /// Another user already holds `slot`.
    pub fn hold_elsewhere(&self, slot: &Slot) {
        let request = BlockSlotRequest {
            provider_id: slot.provider_id.clone(),
            time: slot.start,
            campaign_id: None,
        };
        self.holds.lock().unwrap().insert(ConsultationId(-1), request);
    }

    pub fn gate_blocking(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.block_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_confirming(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.confirm_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.lock().unwrap().len()
    }

    pub fn insert_confirmed(&self, record: ConsultationRecord) {
        self.confirmed.lock().unwrap().insert(record.id, record);
    }

    fn record_for(&self, id: ConsultationId, status: ConsultationStatus) -> Result<ConsultationRecord, AppError> {
        let holds = self.holds.lock().unwrap();
        let hold = holds
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("consultation {}", id)))?;
        Ok(ConsultationRecord {
            id,
            provider_id: hold.provider_id.clone(),
            provider_name: "Dr. Test".to_string(),
            start: hold.time,
            end: None,
            chat_id: Some(format!("chat-{}", id)),
            status,
        })
    }
}

#[async_trait]
impl BookingBackend for FakeBookingBackend {
    async fn block_slot(
        &self,
        request: &BlockSlotRequest,
        _context: &ClientContext,
    ) -> Result<BlockSlotResponse, AppError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.block_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(err) = self.fail_next_block.lock().unwrap().take() {
            return Err(err);
        }

        let mut holds = self.holds.lock().unwrap();
        if holds
            .values()
            .any(|h| h.provider_id == request.provider_id && h.time == request.time)
        {
            return Err(AppError::Conflict("slot already blocked".to_string()));
        }

        let mut next_id = self.next_id.lock().unwrap();
        let id = ConsultationId(*next_id);
        *next_id += 1;
        holds.insert(id, request.clone());

        Ok(BlockSlotResponse { consultation_id: id })
    }

    async fn confirm_consultation(
        &self,
        id: ConsultationId,
        _context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.confirm_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(err) = self.fail_next_confirm.lock().unwrap().take() {
            return Err(err);
        }

        if let Some(existing) = self.confirmed.lock().unwrap().get(&id) {
            return Ok(existing.clone());
        }

        let record = self.record_for(id, ConsultationStatus::Scheduled)?;
        self.confirmed.lock().unwrap().insert(id, record.clone());
        Ok(record)
    }

    async fn cancel_consultation(&self, id: ConsultationId, _context: &ClientContext) -> Result<(), AppError> {
        if let Some(err) = self.fail_next_cancel.lock().unwrap().take() {
            return Err(err);
        }
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }

    async fn accept_consultation(
        &self,
        id: ConsultationId,
        _context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError> {
        let mut confirmed = self.confirmed.lock().unwrap();
        let record = confirmed
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("consultation {}", id)))?;
        record.status = ConsultationStatus::Scheduled;
        Ok(record.clone())
    }

    async fn reject_consultation(&self, id: ConsultationId, _context: &ClientContext) -> Result<(), AppError> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAvailability {
    pub slots: Mutex<Vec<Slot>>,
    pub fetch_count: AtomicUsize,
    pub fail: Mutex<Option<AppError>>,
}

impl FakeAvailability {
    pub fn with_slots(slots: Vec<Slot>) -> Self {
        Self {
            slots: Mutex::new(slots),
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilityProvider for FakeAvailability {
    async fn available_slots(&self, provider_id: &str, _context: &ClientContext) -> Result<Vec<Slot>, AppError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self
            .slots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakePayments {
    pub begun: Mutex<Vec<(ConsultationId, PaymentRequirement)>>,
    pub fail: Mutex<Option<AppError>>,
}

#[async_trait]
impl PaymentCollaborator for FakePayments {
    async fn begin_payment(
        &self,
        reservation: &Reservation,
        requirement: &PaymentRequirement,
    ) -> Result<(), AppError> {
        if let Some(err) = self.fail.lock().unwrap().take() {
            return Err(err);
        }
        self.begun
            .lock()
            .unwrap()
            .push((reservation.consultation_id, requirement.clone()));
        Ok(())
    }
}

pub struct FakeConsent {
    pub granted: Mutex<bool>,
    pub answer: bool,
    pub requests: AtomicUsize,
}

impl FakeConsent {
    pub fn granted() -> Self {
        Self { granted: Mutex::new(true), answer: true, requests: AtomicUsize::new(0) }
    }

    pub fn will_answer(answer: bool) -> Self {
        Self { granted: Mutex::new(false), answer, requests: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ConsentProvider for FakeConsent {
    async fn has_consent(&self) -> Result<bool, AppError> {
        Ok(*self.granted.lock().unwrap())
    }

    async fn request_consent(&self) -> Result<bool, AppError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.granted.lock().unwrap() = self.answer;
        Ok(self.answer)
    }
}

#[derive(Default)]
pub struct RecordingBus {
    pub events: Mutex<Vec<ClientEvent>>,
}

impl NotificationBus for RecordingBus {
    fn publish(&self, event: ClientEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn now() -> DateTime<Utc> {
    at("2024-06-01T09:00:00Z")
}

pub fn slot(time: &str, price: f64) -> Slot {
    Slot::new(PROVIDER, at(time), price)
}

pub struct Harness {
    pub scheduler: Arc<ConsultationScheduler>,
    pub reservations: Arc<SlotReservationService>,
    pub backend: Arc<FakeBookingBackend>,
    pub availability: Arc<FakeAvailability>,
    pub payments: Arc<FakePayments>,
    pub consent: Arc<FakeConsent>,
    pub bus: Arc<RecordingBus>,
}

impl Harness {
    pub fn new(backend: FakeBookingBackend, slots: Vec<Slot>) -> Self {
        Self::with_consent(backend, slots, FakeConsent::granted())
    }

    pub fn with_consent(backend: FakeBookingBackend, slots: Vec<Slot>, consent: FakeConsent) -> Self {
        shared_utils::test_utils::init_test_tracing();

        let config = AppConfig::default();
        let context = test_context();
        let backend = Arc::new(backend);
        let availability = Arc::new(FakeAvailability::with_slots(slots));
        let payments = Arc::new(FakePayments::default());
        let consent = Arc::new(consent);
        let bus = Arc::new(RecordingBus::default());

        let reservations = Arc::new(
            SlotReservationService::new(backend.clone(), context.clone(), &config)
                .with_clock(Arc::new(FixedClock::new(now()))),
        );
        let consultations = Arc::new(ConsultationService::new(
            backend.clone(),
            bus.clone(),
            context,
            &config,
        ));

        let scheduler = Arc::new(ConsultationScheduler::new(
            SchedulerCollaborators {
                reservations: reservations.clone(),
                availability: availability.clone(),
                payments: payments.clone(),
                consent: consent.clone(),
                notifications: bus.clone(),
                consultations,
            },
            &config,
        ));

        Self { scheduler, reservations, backend, availability, payments, consent, bus }
    }
}
