// libs/appointment-cell/src/services/backend.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use shared_config::{AppConfig, ClientContext};
use shared_http::RestClient;
use shared_models::AppError;

use crate::models::{
    BlockSlotRequest, BlockSlotResponse, ConsultationId, ConsultationRecord, Slot,
};

/// Remote booking API as seen by the patient client.
#[async_trait]
pub trait BookingBackend: Send + Sync {
    async fn block_slot(
        &self,
        request: &BlockSlotRequest,
        context: &ClientContext,
    ) -> Result<BlockSlotResponse, AppError>;

    async fn confirm_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError>;

    async fn cancel_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<(), AppError>;

    async fn accept_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError>;

    async fn reject_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<(), AppError>;
}

/// Provider-availability query, read-only.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    async fn available_slots(
        &self,
        provider_id: &str,
        context: &ClientContext,
    ) -> Result<Vec<Slot>, AppError>;
}

pub struct RestBookingBackend {
    client: RestClient,
}

impl RestBookingBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::new(config),
        }
    }

    async fn put_action(
        &self,
        id: ConsultationId,
        action: &str,
        context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError> {
        let path = format!("/consultations/{}/{}", id, action);
        self.client.request(Method::PUT, &path, context, None).await
    }
}

#[async_trait]
impl BookingBackend for RestBookingBackend {
    async fn block_slot(
        &self,
        request: &BlockSlotRequest,
        context: &ClientContext,
    ) -> Result<BlockSlotResponse, AppError> {
        debug!("Blocking slot {} for provider {}", request.time, request.provider_id);
        let body = serde_json::to_value(request)?;
        self.client
            .request(Method::POST, "/consultations/block-slot", context, Some(body))
            .await
    }

    async fn confirm_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError> {
        let path = format!("/consultations/{}/confirm", id);
        self.client
            .request(Method::POST, &path, context, Some(json!({ "consultation_id": id })))
            .await
    }

    async fn cancel_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<(), AppError> {
        let path = format!("/consultations/{}/cancel", id);
        self.client.send(Method::PUT, &path, context, None).await
    }

    async fn accept_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<ConsultationRecord, AppError> {
        self.put_action(id, "accept", context).await
    }

    async fn reject_consultation(
        &self,
        id: ConsultationId,
        context: &ClientContext,
    ) -> Result<(), AppError> {
        let path = format!("/consultations/{}/reject", id);
        self.client.send(Method::PUT, &path, context, None).await
    }
}

#[derive(Debug, Deserialize)]
struct SlotRecord {
    time: DateTime<Utc>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    campaign_id: Option<String>,
}

pub struct RestAvailabilityProvider {
    client: RestClient,
}

impl RestAvailabilityProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::new(config),
        }
    }
}

#[async_trait]
impl AvailabilityProvider for RestAvailabilityProvider {
    async fn available_slots(
        &self,
        provider_id: &str,
        context: &ClientContext,
    ) -> Result<Vec<Slot>, AppError> {
        let path = format!("/providers/{}/slots", urlencoding::encode(provider_id));
        let records: Vec<SlotRecord> = self.client.request(Method::GET, &path, context, None).await?;

        debug!("Provider {} offers {} slots", provider_id, records.len());

        Ok(records
            .into_iter()
            .map(|record| Slot {
                provider_id: provider_id.to_string(),
                start: record.time,
                price: record.price,
                campaign_id: record.campaign_id,
            })
            .collect())
    }
}
