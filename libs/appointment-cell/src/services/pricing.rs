// libs/appointment-cell/src/services/pricing.rs
use serde::Serialize;
use tracing::debug;

use shared_config::AppConfig;

use crate::models::Reservation;

/// What the patient owes before a held slot can be confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentRequirement {
    Free,
    Waived { campaign_id: String },
    Required { amount: f64, currency: String },
}

impl PaymentRequirement {
    pub fn requires_payment(&self) -> bool {
        matches!(self, PaymentRequirement::Required { .. })
    }
}

pub struct PaymentPolicy {
    currency: String,
}

impl PaymentPolicy {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            currency: config.payment_currency.clone(),
        }
    }

    /// A non-zero price routes to payment unless a campaign waives it.
    pub fn requirement_for(&self, reservation: &Reservation) -> PaymentRequirement {
        let requirement = if reservation.price <= 0.0 {
            PaymentRequirement::Free
        } else if let Some(campaign_id) = reservation
            .campaign_id
            .as_ref()
            .filter(|id| !id.is_empty())
        {
            PaymentRequirement::Waived {
                campaign_id: campaign_id.clone(),
            }
        } else {
            PaymentRequirement::Required {
                amount: reservation.price,
                currency: self.currency.clone(),
            }
        };

        debug!(
            "Payment requirement for consultation {}: {:?}",
            reservation.consultation_id, requirement
        );
        requirement
    }
}
