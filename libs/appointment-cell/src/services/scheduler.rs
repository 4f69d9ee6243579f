// libs/appointment-cell/src/services/scheduler.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_models::{AppError, ErrorNotice};

use crate::models::{
    BookingFailure, ClientEvent, ConsultationId, ConsultationStatus, ConsultationSummary,
    ConfirmError, FailureReason, PaymentOutcome, Reservation, ReservationError, ReservationState,
    RetryAction, SchedulerError, SchedulerState, Slot,
};
use crate::services::backend::AvailabilityProvider;
use crate::services::collaborators::{
    signal_auth_failure, ConsentProvider, NotificationBus, PaymentCollaborator,
};
use crate::services::consultations::ConsultationService;
use crate::services::pricing::PaymentPolicy;
use crate::services::reservation::SlotReservationService;

/// External collaborators the scheduler drives.
pub struct SchedulerCollaborators {
    pub reservations: Arc<SlotReservationService>,
    pub availability: Arc<dyn AvailabilityProvider>,
    pub payments: Arc<dyn PaymentCollaborator>,
    pub consent: Arc<dyn ConsentProvider>,
    pub notifications: Arc<dyn NotificationBus>,
    pub consultations: Arc<ConsultationService>,
}

#[derive(Default)]
struct SchedulerInner {
    provider_id: Option<String>,
    slots: Vec<Slot>,
    rescheduling: Option<ConsultationSummary>,
    reservation: Option<Reservation>,
}

/// Drives one booking attempt from slot selection to a confirmed consultation.
///
/// Every user-initiated entry point starts a new *attempt*. Results of an
/// attempt that was cancelled or reset while its request was in flight are
/// discarded rather than applied.
pub struct ConsultationScheduler {
    reservations: Arc<SlotReservationService>,
    availability: Arc<dyn AvailabilityProvider>,
    payments: Arc<dyn PaymentCollaborator>,
    consent: Arc<dyn ConsentProvider>,
    notifications: Arc<dyn NotificationBus>,
    consultations: Arc<ConsultationService>,
    policy: PaymentPolicy,
    state: watch::Sender<SchedulerState>,
    attempt: AtomicU64,
    inner: Mutex<SchedulerInner>,
}

impl ConsultationScheduler {
    pub fn new(collaborators: SchedulerCollaborators, config: &AppConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            reservations: collaborators.reservations,
            availability: collaborators.availability,
            payments: collaborators.payments,
            consent: collaborators.consent,
            notifications: collaborators.notifications,
            consultations: collaborators.consultations,
            policy: PaymentPolicy::new(config),
            state,
            attempt: AtomicU64::new(0),
            inner: Mutex::new(SchedulerInner::default()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn offered_slots(&self) -> Vec<Slot> {
        self.inner().slots.clone()
    }

    /// Hold taken by the latest attempt, in its last known state.
    pub fn reservation(&self) -> Option<Reservation> {
        self.inner().reservation.clone()
    }

    /// Open the slot picker for `provider_id`, acquiring consent first if needed.
    pub async fn start(&self, provider_id: &str) -> Result<SchedulerState, SchedulerError> {
        let attempt = self.transition(
            "start booking",
            |s| matches!(s, SchedulerState::Idle | SchedulerState::Cancelled | SchedulerState::Confirmed { .. }),
            SchedulerState::AwaitingConsent,
        )?;

        {
            let mut inner = self.inner();
            inner.provider_id = Some(provider_id.to_string());
            inner.slots.clear();
            inner.reservation = None;
        }

        match self.ensure_consent().await {
            Ok(true) => {}
            Ok(false) => {
                info!("Consent declined, booking halted");
                self.settle(attempt, SchedulerState::Idle)?;
                return Err(SchedulerError::ConsentDenied);
            }
            Err(e) => {
                warn!("Consent check failed: {}", e);
                signal_auth_failure(self.notifications.as_ref(), &e);
                self.settle(attempt, SchedulerState::Idle)?;
                return Err(SchedulerError::Collaborator(e));
            }
        }

        match self.fetch_slots(provider_id).await {
            Ok(_) => self.settle(attempt, SchedulerState::SlotSelecting)?,
            Err(e) => {
                self.settle(attempt, failed_from_app_error(&e))?;
                return Err(SchedulerError::Collaborator(e));
            }
        }

        Ok(self.state())
    }

    /// Start booking a replacement for `existing`; the old consultation is
    /// cancelled once the new one is confirmed.
    pub async fn reschedule(
        &self,
        existing: ConsultationSummary,
    ) -> Result<SchedulerState, SchedulerError> {
        if existing.status != ConsultationStatus::Scheduled {
            return Err(SchedulerError::InvalidTransition {
                state: "not scheduled",
                action: "reschedule",
            });
        }

        let provider_id = existing.provider_id.clone();
        info!("Rescheduling consultation {}", existing.id);
        let result = self.start(&provider_id).await;
        if result.is_ok() {
            self.inner().rescheduling = Some(existing);
        }
        result
    }

    /// Re-fetch offered slots while the picker is open.
    pub async fn refresh_slots(&self) -> Result<Vec<Slot>, SchedulerError> {
        if !self.state.borrow().accepts_slot_pick() {
            return Err(self.rejection("refresh slots"));
        }

        let provider_id = self
            .inner()
            .provider_id
            .clone()
            .ok_or(SchedulerError::InvalidTransition {
                state: "no provider",
                action: "refresh slots",
            })?;

        Ok(self.fetch_slots(&provider_id).await?)
    }

    /// User picked `slot`. Further picks are refused until this resolves.
    pub async fn select_slot(&self, slot: Slot) -> Result<SchedulerState, SchedulerError> {
        if !self.state.borrow().accepts_slot_pick() {
            return Err(self.rejection("select slot"));
        }
        if !self.inner().slots.iter().any(|offered| offered.same_offer(&slot)) {
            return Err(SchedulerError::SlotNotOffered(slot.start));
        }

        let attempt = self.transition(
            "select slot",
            SchedulerState::accepts_slot_pick,
            SchedulerState::SlotBlocking { slot: slot.clone() },
        )?;

        self.run_block(slot, attempt).await
    }

    /// Terminal outcome from the payment collaborator for the held reservation.
    pub async fn on_payment_outcome(
        &self,
        consultation_id: ConsultationId,
        outcome: PaymentOutcome,
    ) -> Result<SchedulerState, SchedulerError> {
        let reservation = match &*self.state.borrow() {
            SchedulerState::AwaitingPayment { reservation }
                if reservation.consultation_id == consultation_id =>
            {
                reservation.clone()
            }
            other => {
                return Err(SchedulerError::InvalidTransition {
                    state: other.name(),
                    action: "apply payment outcome",
                })
            }
        };

        match outcome {
            PaymentOutcome::Succeeded => {
                info!("Payment for consultation {} succeeded", consultation_id);
                let attempt = self.transition(
                    "confirm paid reservation",
                    |s| matches!(s, SchedulerState::AwaitingPayment { .. }),
                    SchedulerState::Confirming { reservation: reservation.clone() },
                )?;
                self.run_confirm(reservation, attempt).await
            }
            PaymentOutcome::Failed { reason } => {
                self.fail_payment(consultation_id, format!("Payment failed: {}", reason))
            }
            PaymentOutcome::Cancelled => {
                self.fail_payment(consultation_id, "Payment was cancelled".to_string())
            }
        }
    }

    /// Re-invoke the last failed transition with the same input.
    pub async fn retry(&self) -> Result<SchedulerState, SchedulerError> {
        let action = match &*self.state.borrow() {
            SchedulerState::Failed { failure } => failure.retry.clone(),
            _ => None,
        }
        .ok_or(SchedulerError::NothingToRetry)?;

        match action {
            RetryAction::Block(slot) => {
                let attempt = self.transition(
                    "retry slot hold",
                    |s| matches!(s, SchedulerState::Failed { .. }),
                    SchedulerState::SlotBlocking { slot: slot.clone() },
                )?;
                self.run_block(slot, attempt).await
            }
            RetryAction::Confirm(reservation) => {
                let attempt = self.transition(
                    "retry confirmation",
                    |s| matches!(s, SchedulerState::Failed { .. }),
                    SchedulerState::Confirming { reservation: reservation.clone() },
                )?;
                self.run_confirm(reservation, attempt).await
            }
        }
    }

    /// Close the inline error and return to the picker.
    pub fn dismiss_error(&self) -> Result<SchedulerState, SchedulerError> {
        self.transition(
            "dismiss error",
            |s| matches!(s, SchedulerState::Failed { .. }),
            SchedulerState::SlotSelecting,
        )?;
        Ok(self.state())
    }

    /// User abandoned the flow, possibly with a hold request in flight. Any
    /// hold already taken is left to expire. Refused with `Busy` while a
    /// confirmation is in flight, since the backend may already have booked it.
    pub fn cancel(&self) -> Result<SchedulerState, SchedulerError> {
        let previous = self.state();
        self.transition(
            "cancel",
            |s| {
                !matches!(
                    s,
                    SchedulerState::Idle
                        | SchedulerState::Cancelled
                        | SchedulerState::Confirming { .. }
                        | SchedulerState::Confirmed { .. }
                )
            },
            SchedulerState::Cancelled,
        )?;

        if let SchedulerState::AwaitingPayment { reservation } = &previous {
            info!(
                "Booking abandoned with consultation {} held; hold left to expire server-side",
                reservation.consultation_id
            );
        }
        self.inner().rescheduling = None;

        Ok(self.state())
    }

    /// Back to `Idle`, dropping provider, slots and any in-flight result.
    pub fn reset(&self) {
        self.force_state(SchedulerState::Idle);
        *self.inner() = SchedulerInner::default();
    }

    // ==========================================================================
    // ATTEMPT STEPS
    // ==========================================================================

    async fn run_block(&self, slot: Slot, attempt: u64) -> Result<SchedulerState, SchedulerError> {
        let provider_id = slot.provider_id.clone();

        match self.reservations.block_slot(&slot, &provider_id).await {
            Ok(reservation) => self.route_reservation(reservation, attempt).await,
            Err(ReservationError::SlotAlreadyTaken) => {
                info!("Slot {} was taken concurrently, refreshing offered slots", slot.start);
                if let Err(e) = self.fetch_slots(&provider_id).await {
                    warn!("Refreshing slots after contention failed: {}", e);
                    self.inner().slots.retain(|offered| !offered.same_offer(&slot));
                }
                self.settle(
                    attempt,
                    SchedulerState::Failed {
                        failure: BookingFailure {
                            reason: FailureReason::SlotAlreadyTaken,
                            message: ReservationError::SlotAlreadyTaken.to_string(),
                            retry: None,
                        },
                    },
                )?;
                Err(ReservationError::SlotAlreadyTaken.into())
            }
            Err(e) => {
                self.settle(
                    attempt,
                    SchedulerState::Failed {
                        failure: BookingFailure {
                            reason: e.failure_reason(),
                            message: e.to_string(),
                            retry: Some(RetryAction::Block(slot)),
                        },
                    },
                )?;
                Err(e.into())
            }
        }
    }

    async fn route_reservation(
        &self,
        mut reservation: Reservation,
        attempt: u64,
    ) -> Result<SchedulerState, SchedulerError> {
        let requirement = self.policy.requirement_for(&reservation);

        if !requirement.requires_payment() {
            self.settle(attempt, SchedulerState::Confirming { reservation: reservation.clone() })?;
            self.inner().reservation = Some(reservation.clone());
            return self.run_confirm(reservation, attempt).await;
        }

        reservation.advance(ReservationState::PaidPending);
        self.settle(attempt, SchedulerState::AwaitingPayment { reservation: reservation.clone() })?;
        self.inner().reservation = Some(reservation.clone());

        info!(
            "Consultation {} requires payment, handing off to payment provider",
            reservation.consultation_id
        );

        if let Err(e) = self.payments.begin_payment(&reservation, &requirement).await {
            warn!("Payment hand-off failed for {}: {}", reservation.consultation_id, e);
            self.settle_if_awaiting(
                reservation.consultation_id,
                attempt,
                payment_failure(format!("Payment could not be started: {}", e)),
            )?;
            return Err(SchedulerError::Payment(e.to_string()));
        }

        Ok(self.state())
    }

    async fn run_confirm(
        &self,
        mut reservation: Reservation,
        attempt: u64,
    ) -> Result<SchedulerState, SchedulerError> {
        match self.reservations.confirm_reservation(reservation.consultation_id).await {
            Ok(consultation) => {
                self.settle(attempt, SchedulerState::Confirmed { consultation: consultation.clone() })?;
                reservation.advance(ReservationState::Confirmed);
                self.inner().reservation = Some(reservation);

                info!("Consultation {} confirmed for {}", consultation.id, consultation.start);
                self.notifications.publish(ClientEvent::NewNotification);
                self.finish_reschedule(&consultation).await;

                Ok(self.state())
            }
            Err(e) => {
                let retry = match e {
                    ConfirmError::NetworkError(_) => Some(RetryAction::Confirm(reservation.clone())),
                    _ => {
                        reservation.advance(ReservationState::Rejected);
                        None
                    }
                };
                self.settle(
                    attempt,
                    SchedulerState::Failed {
                        failure: BookingFailure {
                            reason: e.failure_reason(),
                            message: e.to_string(),
                            retry,
                        },
                    },
                )?;
                self.inner().reservation = Some(reservation);
                Err(e.into())
            }
        }
    }

    async fn finish_reschedule(&self, replacement: &ConsultationSummary) {
        let previous = self.inner().rescheduling.take();
        let Some(previous) = previous else {
            return;
        };

        match self.consultations.cancel(&previous).await {
            Ok(_) => info!("Consultation {} replaced by {}", previous.id, replacement.id),
            Err(e) => warn!(
                "Replacement {} booked but cancelling {} failed: {}",
                replacement.id, previous.id, e
            ),
        }
    }

    fn fail_payment(
        &self,
        consultation_id: ConsultationId,
        message: String,
    ) -> Result<SchedulerState, SchedulerError> {
        info!(
            "{} for consultation {}; hold left to expire server-side",
            message, consultation_id
        );
        self.transition(
            "fail payment",
            |s| matches!(s, SchedulerState::AwaitingPayment { .. }),
            payment_failure(message),
        )?;
        Ok(self.state())
    }

    async fn ensure_consent(&self) -> Result<bool, AppError> {
        if self.consent.has_consent().await? {
            return Ok(true);
        }
        self.consent.request_consent().await
    }

    async fn fetch_slots(&self, provider_id: &str) -> Result<Vec<Slot>, AppError> {
        let slots = self
            .availability
            .available_slots(provider_id, self.reservations.context())
            .await
            .inspect_err(|e| signal_auth_failure(self.notifications.as_ref(), e))?;
        debug!("Fetched {} slots for provider {}", slots.len(), provider_id);
        self.inner().slots = slots.clone();
        Ok(slots)
    }

    // ==========================================================================
    // STATE PLUMBING
    // ==========================================================================

    /// Check-and-set from a user action; starts a new attempt.
    fn transition<F>(
        &self,
        action: &'static str,
        allowed: F,
        next: SchedulerState,
    ) -> Result<u64, SchedulerError>
    where
        F: FnOnce(&SchedulerState) -> bool,
    {
        let mut outcome = Err(SchedulerError::Busy);
        self.state.send_if_modified(|current| {
            if allowed(current) {
                info!("Scheduler {} -> {} ({})", current.name(), next.name(), action);
                *current = next;
                outcome = Ok(self.attempt.fetch_add(1, Ordering::SeqCst) + 1);
                true
            } else {
                if !current.is_busy() {
                    outcome = Err(SchedulerError::InvalidTransition {
                        state: current.name(),
                        action,
                    });
                }
                false
            }
        });
        outcome
    }

    /// Apply the result of `attempt` unless a newer attempt superseded it.
    fn settle(&self, attempt: u64, next: SchedulerState) -> Result<(), SchedulerError> {
        let mut applied = false;
        self.state.send_if_modified(|current| {
            if self.attempt.load(Ordering::SeqCst) != attempt {
                return false;
            }
            debug!("Scheduler {} -> {}", current.name(), next.name());
            *current = next;
            applied = true;
            true
        });

        if applied {
            Ok(())
        } else {
            warn!("Discarding result of superseded booking attempt {}", attempt);
            Err(SchedulerError::Superseded)
        }
    }

    /// Like `settle`, but only while still waiting on this reservation's payment.
    fn settle_if_awaiting(
        &self,
        consultation_id: ConsultationId,
        attempt: u64,
        next: SchedulerState,
    ) -> Result<(), SchedulerError> {
        let awaiting = matches!(
            &*self.state.borrow(),
            SchedulerState::AwaitingPayment { reservation } if reservation.consultation_id == consultation_id
        );
        if awaiting {
            self.settle(attempt, next)
        } else {
            Ok(())
        }
    }

    fn force_state(&self, next: SchedulerState) {
        self.state.send_modify(|current| {
            info!("Scheduler {} -> {} (forced)", current.name(), next.name());
            *current = next;
            self.attempt.fetch_add(1, Ordering::SeqCst);
        });
    }

    fn rejection(&self, action: &'static str) -> SchedulerError {
        let state = self.state.borrow();
        if state.is_busy() {
            SchedulerError::Busy
        } else {
            SchedulerError::InvalidTransition {
                state: state.name(),
                action,
            }
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn payment_failure(message: String) -> SchedulerState {
    SchedulerState::Failed {
        failure: BookingFailure {
            reason: FailureReason::PaymentFailed,
            message,
            retry: None,
        },
    }
}

fn failed_from_app_error(err: &AppError) -> SchedulerState {
    let notice = ErrorNotice::from(err);
    SchedulerState::Failed {
        failure: BookingFailure {
            reason: if notice.retryable {
                FailureReason::Network
            } else {
                FailureReason::Rejected
            },
            message: notice.message,
            retry: None,
        },
    }
}
