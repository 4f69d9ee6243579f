// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{ConsultationStatus, ConsultationSummary, LifecycleError};

pub struct ConsultationLifecycleService {
    join_early: Duration,
}

impl ConsultationLifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            join_early: Duration::minutes(config.session_join_early_minutes),
        }
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: ConsultationStatus,
        new_status: ConsultationStatus,
    ) -> Result<(), LifecycleError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(LifecycleError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: ConsultationStatus) -> Vec<ConsultationStatus> {
        match current_status {
            ConsultationStatus::Suggested => vec![
                ConsultationStatus::Scheduled,
                ConsultationStatus::Cancelled,
            ],
            ConsultationStatus::Scheduled => vec![
                ConsultationStatus::Cancelled,
                ConsultationStatus::Finished,
            ],
            // Terminal states
            ConsultationStatus::Finished => vec![],
            ConsultationStatus::Cancelled => vec![],
        }
    }

    /// Status after accounting for time elapsed past the end timestamp.
    pub fn effective_status(
        &self,
        consultation: &ConsultationSummary,
        current_time: DateTime<Utc>,
    ) -> ConsultationStatus {
        match consultation.status {
            ConsultationStatus::Scheduled if current_time >= consultation.end => {
                ConsultationStatus::Finished
            }
            status => status,
        }
    }

    /// Whether the live session may be opened at `current_time`.
    pub fn can_join(&self, consultation: &ConsultationSummary, current_time: DateTime<Utc>) -> bool {
        if self.effective_status(consultation, current_time) != ConsultationStatus::Scheduled {
            return false;
        }

        let earliest = consultation.start - self.join_early;
        current_time >= earliest && current_time < consultation.end
    }
}
