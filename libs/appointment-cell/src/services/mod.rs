// libs/appointment-cell/src/services/mod.rs

pub mod backend;
pub mod collaborators;
pub mod consultations;
pub mod lifecycle;
pub mod pricing;
pub mod reservation;
pub mod scheduler;

pub use backend::{AvailabilityProvider, BookingBackend, RestAvailabilityProvider, RestBookingBackend};
pub use collaborators::{BroadcastNotificationBus, ConsentProvider, NotificationBus, PaymentCollaborator};
pub use consultations::ConsultationService;
pub use lifecycle::ConsultationLifecycleService;
pub use pricing::{PaymentPolicy, PaymentRequirement};
pub use reservation::SlotReservationService;
pub use scheduler::{ConsultationScheduler, SchedulerCollaborators};
