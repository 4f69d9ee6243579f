// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use shared_models::AppError;

// ==============================================================================
// SLOT / RESERVATION / CONSULTATION
// ==============================================================================

/// Identifier the booking backend assigns once a slot hold succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsultationId(pub i64);

impl fmt::Display for ConsultationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An offered, not-yet-reserved appointment time. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub provider_id: String,
    #[serde(rename = "time")]
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

impl Slot {
    pub fn new(provider_id: impl Into<String>, start: DateTime<Utc>, price: f64) -> Self {
        Self {
            provider_id: provider_id.into(),
            start,
            price,
            campaign_id: None,
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Two slots denote the same offer when provider and start time match.
    pub fn same_offer(&self, other: &Slot) -> bool {
        self.provider_id == other.provider_id && self.start == other.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    PaidPending,
    Confirmed,
    Rejected,
}

impl ReservationState {
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        use ReservationState::*;
        matches!(
            (self, next),
            (Pending, PaidPending)
                | (Pending, Confirmed)
                | (PaidPending, Confirmed)
                | (Pending, Rejected)
                | (PaidPending, Rejected)
        )
    }
}

/// Provisional hold on a slot ("blocked slot").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub consultation_id: ConsultationId,
    pub provider_id: String,
    pub start: DateTime<Utc>,
    pub price: f64,
    pub campaign_id: Option<String>,
    pub state: ReservationState,
}

impl Reservation {
    pub fn from_slot(slot: &Slot, consultation_id: ConsultationId) -> Self {
        Self {
            consultation_id,
            provider_id: slot.provider_id.clone(),
            start: slot.start,
            price: slot.price,
            campaign_id: slot.campaign_id.clone(),
            state: ReservationState::Pending,
        }
    }

    /// Move to `next` if the hold allows it; returns whether the state changed.
    pub fn advance(&mut self, next: ReservationState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Scheduled,
    Suggested,
    Finished,
    Cancelled,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::Scheduled => write!(f, "scheduled"),
            ConsultationStatus::Suggested => write!(f, "suggested"),
            ConsultationStatus::Finished => write!(f, "finished"),
            ConsultationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Durable booked session once a reservation is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationSummary {
    pub id: ConsultationId,
    pub provider_id: String,
    pub provider_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub chat_id: String,
    pub status: ConsultationStatus,
}

/// Consultation as the backend returns it; `end` may be omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsultationRecord {
    pub id: ConsultationId,
    pub provider_id: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(rename = "time")]
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub status: ConsultationStatus,
}

impl ConsultationRecord {
    pub fn into_summary(self, duration: Duration) -> ConsultationSummary {
        let chat_id = self.chat_id.unwrap_or_else(|| self.id.to_string());
        ConsultationSummary {
            end: self.end.unwrap_or(self.start + duration),
            id: self.id,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            start: self.start,
            chat_id,
            status: self.status,
        }
    }
}

// ==============================================================================
// BACKEND REQUEST / RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BlockSlotRequest {
    pub provider_id: String,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockSlotResponse {
    pub consultation_id: ConsultationId,
}

// ==============================================================================
// SCHEDULER STATE MACHINE
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    Idle,
    /// Waiting on the data-processing consent step.
    AwaitingConsent,
    SlotSelecting,
    SlotBlocking { slot: Slot },
    AwaitingPayment { reservation: Reservation },
    Confirming { reservation: Reservation },
    Confirmed { consultation: ConsultationSummary },
    Cancelled,
    Failed { failure: BookingFailure },
}

impl SchedulerState {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::AwaitingConsent => "awaiting_consent",
            SchedulerState::SlotSelecting => "slot_selecting",
            SchedulerState::SlotBlocking { .. } => "slot_blocking",
            SchedulerState::AwaitingPayment { .. } => "awaiting_payment",
            SchedulerState::Confirming { .. } => "confirming",
            SchedulerState::Confirmed { .. } => "confirmed",
            SchedulerState::Cancelled => "cancelled",
            SchedulerState::Failed { .. } => "failed",
        }
    }

    /// A request is in flight; the triggering control must stay disabled.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SchedulerState::AwaitingConsent
                | SchedulerState::SlotBlocking { .. }
                | SchedulerState::Confirming { .. }
        )
    }

    pub fn accepts_slot_pick(&self) -> bool {
        matches!(self, SchedulerState::SlotSelecting | SchedulerState::Failed { .. })
    }

    pub fn view(&self) -> SchedulerView {
        match self {
            SchedulerState::Idle | SchedulerState::Cancelled => SchedulerView::None,
            SchedulerState::AwaitingConsent => SchedulerView::Consent,
            SchedulerState::SlotSelecting
            | SchedulerState::SlotBlocking { .. }
            | SchedulerState::Confirming { .. }
            | SchedulerState::Failed { .. } => SchedulerView::SlotPicker,
            SchedulerState::AwaitingPayment { .. } => SchedulerView::Payment,
            SchedulerState::Confirmed { .. } => SchedulerView::Confirmation,
        }
    }
}

/// Which modal the booking flow currently shows over the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerView {
    None,
    Consent,
    SlotPicker,
    Payment,
    Confirmation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingFailure {
    pub reason: FailureReason,
    pub message: String,
    /// What `retry` re-invokes; `None` means the user must pick again.
    pub retry: Option<RetryAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    SlotAlreadyTaken,
    ProviderUnavailable,
    Network,
    PaymentFailed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    Block(Slot),
    Confirm(Reservation),
}

/// Terminal outcome reported by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

/// Fire-and-forget signals for unrelated views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    NewNotification,
    /// The backend refused the session token; the host should re-authenticate.
    TokenChanged,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReservationError {
    #[error("Slot was already taken by someone else")]
    SlotAlreadyTaken,

    #[error("Provider is not available for this slot")]
    ProviderUnavailable,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Reservation rejected: {0}")]
    Rejected(String),
}

impl From<AppError> for ReservationError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conflict(_) => ReservationError::SlotAlreadyTaken,
            AppError::NotFound(_) | AppError::Gone(_) => ReservationError::ProviderUnavailable,
            AppError::Network(msg) => ReservationError::NetworkError(msg),
            AppError::ValidationError(msg) | AppError::BadRequest(msg) => {
                ReservationError::InvalidSlot(msg)
            }
            other => ReservationError::Rejected(other.to_string()),
        }
    }
}

impl ReservationError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ReservationError::SlotAlreadyTaken => FailureReason::SlotAlreadyTaken,
            ReservationError::ProviderUnavailable => FailureReason::ProviderUnavailable,
            ReservationError::NetworkError(_) => FailureReason::Network,
            ReservationError::InvalidSlot(_) | ReservationError::Rejected(_) => FailureReason::Rejected,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfirmError {
    #[error("Reservation {0} not found")]
    ReservationNotFound(ConsultationId),

    #[error("Reservation {0} has expired")]
    ReservationExpired(ConsultationId),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Confirmation rejected: {0}")]
    Rejected(String),
}

impl ConfirmError {
    pub fn from_app_error(id: ConsultationId, err: AppError) -> Self {
        match err {
            AppError::NotFound(_) => ConfirmError::ReservationNotFound(id),
            AppError::Gone(_) => ConfirmError::ReservationExpired(id),
            AppError::Network(msg) => ConfirmError::NetworkError(msg),
            other => ConfirmError::Rejected(other.to_string()),
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ConfirmError::NetworkError(_) => FailureReason::Network,
            _ => FailureReason::Rejected,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: ConsultationStatus,
        to: ConsultationStatus,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] AppError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: &'static str, action: &'static str },

    #[error("A booking request is already in progress")]
    Busy,

    #[error("Data-processing consent was not granted")]
    ConsentDenied,

    #[error("Slot at {0} is not currently offered")]
    SlotNotOffered(DateTime<Utc>),

    #[error("Nothing to retry")]
    NothingToRetry,

    #[error("Booking attempt superseded")]
    Superseded,

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Confirm(#[from] ConfirmError),

    #[error("Payment failed: {0}")]
    Payment(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] AppError),
}
