// libs/appointment-cell/src/lib.rs
//! # Appointment Cell
//!
//! Patient-side booking of consultations with a provider.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------+
//! |                   Appointment Cell                        |
//! +-----------------------------------------------------------+
//! |  models.rs        |  Slot, Reservation, Consultation,     |
//! |                   |  scheduler states and errors          |
//! |  services/        |                                       |
//! |    backend.rs     |  Booking + availability API seams     |
//! |    reservation.rs |  SlotReservationService (hold/confirm)|
//! |    scheduler.rs   |  ConsultationScheduler state machine  |
//! |    pricing.rs     |  Payment vs. direct confirmation      |
//! |    lifecycle.rs   |  Consultation status rules            |
//! |    consultations.rs| Accept / reject / cancel            |
//! |    collaborators.rs| Payment, consent, notification seams|
//! +-----------------------------------------------------------+
//! ```
//!
//! ## Booking flow
//!
//! `Idle → SlotSelecting → SlotBlocking → {AwaitingPayment | Confirming} → Confirmed`,
//! with side exits to `Cancelled` and `Failed`. A priced slot without a
//! waiving campaign always goes through `AwaitingPayment` and only confirms
//! after the payment collaborator reports success.

pub mod models;
pub mod services;

pub use models::{
    BookingFailure, ClientEvent, ConfirmError, ConsultationId, ConsultationStatus,
    ConsultationSummary, FailureReason, PaymentOutcome, Reservation, ReservationError,
    ReservationState, RetryAction, SchedulerError, SchedulerState, SchedulerView, Slot,
};

pub use services::{
    ConsultationLifecycleService, ConsultationScheduler, ConsultationService,
    SchedulerCollaborators, SlotReservationService,
};
