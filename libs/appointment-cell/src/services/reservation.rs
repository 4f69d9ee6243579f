// libs/appointment-cell/src/services/reservation.rs
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shared_config::{AppConfig, ClientContext};
use shared_utils::{Clock, SystemClock};

use crate::models::{
    BlockSlotRequest, ConfirmError, ConsultationId, ConsultationSummary, Reservation,
    ReservationError, Slot,
};
use crate::services::backend::BookingBackend;

/// Turns an offered slot into a server-side hold and finalizes holds into
/// consultations. Does not decide between payment and confirmation.
pub struct SlotReservationService {
    backend: Arc<dyn BookingBackend>,
    context: ClientContext,
    clock: Arc<dyn Clock>,
    consultation_duration: Duration,
    confirmed: Mutex<HashMap<ConsultationId, ConsultationSummary>>,
}

impl SlotReservationService {
    pub fn new(backend: Arc<dyn BookingBackend>, context: ClientContext, config: &AppConfig) -> Self {
        Self {
            backend,
            context,
            clock: Arc::new(SystemClock),
            consultation_duration: Duration::minutes(config.consultation_duration_minutes),
            confirmed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Hold `slot` for `provider_id`. `SlotAlreadyTaken` means the caller
    /// must pick again, never resubmit the same request.
    pub async fn block_slot(
        &self,
        slot: &Slot,
        provider_id: &str,
    ) -> Result<Reservation, ReservationError> {
        self.validate_slot(slot, provider_id)?;

        info!("Blocking slot {} with provider {}", slot.start, provider_id);

        let request = BlockSlotRequest {
            provider_id: provider_id.to_string(),
            time: slot.start,
            campaign_id: slot.campaign_id.clone(),
        };

        let response = self
            .backend
            .block_slot(&request, &self.context)
            .await
            .map_err(|e| {
                warn!("Blocking slot {} failed: {}", slot.start, e);
                ReservationError::from(e)
            })?;

        info!("Slot {} held as consultation {}", slot.start, response.consultation_id);
        Ok(Reservation::from_slot(slot, response.consultation_id))
    }

    /// Finalize a hold. Repeated calls with the same id return the first
    /// confirmed consultation without another backend round trip.
    pub async fn confirm_reservation(
        &self,
        consultation_id: ConsultationId,
    ) -> Result<ConsultationSummary, ConfirmError> {
        let mut confirmed = self.confirmed.lock().await;

        if let Some(existing) = confirmed.get(&consultation_id) {
            debug!("Consultation {} already confirmed", consultation_id);
            return Ok(existing.clone());
        }

        info!("Confirming consultation {}", consultation_id);

        let record = self
            .backend
            .confirm_consultation(consultation_id, &self.context)
            .await
            .map_err(|e| {
                warn!("Confirming consultation {} failed: {}", consultation_id, e);
                ConfirmError::from_app_error(consultation_id, e)
            })?;

        let summary = record.into_summary(self.consultation_duration);
        confirmed.insert(consultation_id, summary.clone());

        Ok(summary)
    }

    fn validate_slot(&self, slot: &Slot, provider_id: &str) -> Result<(), ReservationError> {
        if provider_id.trim().is_empty() {
            return Err(ReservationError::InvalidSlot("provider id is empty".to_string()));
        }
        if slot.provider_id != provider_id {
            return Err(ReservationError::InvalidSlot(format!(
                "slot belongs to provider {}, not {}",
                slot.provider_id, provider_id
            )));
        }
        if slot.start <= self.clock.now() {
            return Err(ReservationError::InvalidSlot(format!(
                "slot {} is not in the future",
                slot.start
            )));
        }
        if slot.price < 0.0 {
            return Err(ReservationError::InvalidSlot("negative price".to_string()));
        }
        Ok(())
    }
}
