// libs/appointment-cell/src/services/consultations.rs
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

use shared_config::{AppConfig, ClientContext};

use crate::models::{ClientEvent, ConsultationStatus, ConsultationSummary, LifecycleError};
use crate::services::backend::BookingBackend;
use crate::services::collaborators::{signal_auth_failure, NotificationBus};
use crate::services::lifecycle::ConsultationLifecycleService;

/// Patient-side mutations on an existing consultation.
pub struct ConsultationService {
    backend: Arc<dyn BookingBackend>,
    notifications: Arc<dyn NotificationBus>,
    lifecycle: ConsultationLifecycleService,
    context: ClientContext,
    consultation_duration: Duration,
}

impl ConsultationService {
    pub fn new(
        backend: Arc<dyn BookingBackend>,
        notifications: Arc<dyn NotificationBus>,
        context: ClientContext,
        config: &AppConfig,
    ) -> Self {
        Self {
            backend,
            notifications,
            lifecycle: ConsultationLifecycleService::new(config),
            context,
            consultation_duration: Duration::minutes(config.consultation_duration_minutes),
        }
    }

    /// Accept a time the provider suggested.
    pub async fn accept_suggestion(
        &self,
        consultation: &ConsultationSummary,
    ) -> Result<ConsultationSummary, LifecycleError> {
        self.lifecycle
            .validate_status_transition(consultation.status, ConsultationStatus::Scheduled)?;

        let record = self
            .backend
            .accept_consultation(consultation.id, &self.context)
            .await
            .inspect_err(|e| signal_auth_failure(self.notifications.as_ref(), e))?;

        info!("Accepted suggested consultation {}", consultation.id);
        self.notifications.publish(ClientEvent::NewNotification);
        Ok(record.into_summary(self.consultation_duration))
    }

    pub async fn reject_suggestion(
        &self,
        consultation: &ConsultationSummary,
    ) -> Result<ConsultationSummary, LifecycleError> {
        self.lifecycle
            .validate_status_transition(consultation.status, ConsultationStatus::Cancelled)?;

        self.backend
            .reject_consultation(consultation.id, &self.context)
            .await
            .inspect_err(|e| signal_auth_failure(self.notifications.as_ref(), e))?;

        info!("Rejected suggested consultation {}", consultation.id);
        self.notifications.publish(ClientEvent::NewNotification);
        Ok(ConsultationSummary {
            status: ConsultationStatus::Cancelled,
            ..consultation.clone()
        })
    }

    pub async fn cancel(
        &self,
        consultation: &ConsultationSummary,
    ) -> Result<ConsultationSummary, LifecycleError> {
        if consultation.status != ConsultationStatus::Scheduled {
            return Err(LifecycleError::InvalidStatusTransition {
                from: consultation.status,
                to: ConsultationStatus::Cancelled,
            });
        }

        self.backend
            .cancel_consultation(consultation.id, &self.context)
            .await
            .inspect_err(|e| signal_auth_failure(self.notifications.as_ref(), e))?;

        info!("Cancelled consultation {}", consultation.id);
        self.notifications.publish(ClientEvent::NewNotification);
        Ok(ConsultationSummary {
            status: ConsultationStatus::Cancelled,
            ..consultation.clone()
        })
    }

    pub fn lifecycle(&self) -> &ConsultationLifecycleService {
        &self.lifecycle
    }
}
