// libs/appointment-cell/src/services/collaborators.rs
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use shared_models::AppError;

use crate::models::{ClientEvent, Reservation};
use crate::services::pricing::PaymentRequirement;

/// Hands a priced reservation to the payment provider. The terminal outcome
/// comes back later through `ConsultationScheduler::on_payment_outcome`.
#[async_trait]
pub trait PaymentCollaborator: Send + Sync {
    async fn begin_payment(
        &self,
        reservation: &Reservation,
        requirement: &PaymentRequirement,
    ) -> Result<(), AppError>;
}

/// Data-processing consent step that gates slot selection.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    async fn has_consent(&self) -> Result<bool, AppError>;

    /// Ask the user; `Ok(false)` means they declined.
    async fn request_consent(&self) -> Result<bool, AppError>;
}

pub trait NotificationBus: Send + Sync {
    fn publish(&self, event: ClientEvent);
}

/// Tell the host the session token was refused, so it can log the user in again.
pub fn signal_auth_failure(bus: &dyn NotificationBus, err: &AppError) {
    if let AppError::Auth(msg) = err {
        warn!("Backend refused session token: {}", msg);
        bus.publish(ClientEvent::TokenChanged);
    }
}

/// In-process bus other views subscribe to for refresh signals.
#[derive(Clone)]
pub struct BroadcastNotificationBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl BroadcastNotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus for BroadcastNotificationBus {
    fn publish(&self, event: ClientEvent) {
        if let Err(e) = self.sender.send(event) {
            // nobody listening
            debug!("Notification dropped: {}", e);
        }
    }
}
