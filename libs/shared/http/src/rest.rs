use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::{AppConfig, ClientContext};
use shared_models::AppError;

const COUNTRY_HEADER: HeaderName = HeaderName::from_static("x-country");
const API_KEY_HEADER: HeaderName = HeaderName::from_static("apikey");

/// JSON client for the patient API. Every request carries the caller's
/// locale, country and bearer token taken from the injected [`ClientContext`].
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn get_headers(&self, context: &ClientContext) -> Result<HeaderMap, AppError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            headers.insert(API_KEY_HEADER, header_value(&self.api_key)?);
        }
        headers.insert(ACCEPT_LANGUAGE, header_value(context.locale())?);
        headers.insert(COUNTRY_HEADER, header_value(context.country())?);

        if let Some(token) = context.auth_token() {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        Ok(headers)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        context: &ClientContext,
        body: Option<Value>,
    ) -> Result<reqwest::Response, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url)
            .headers(self.get_headers(context)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(AppError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        context: &ClientContext,
        body: Option<Value>,
    ) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(method, path, context, body).await?;
        let text = response.text().await.map_err(transport_error)?;
        let data = serde_json::from_str::<T>(&text)?;
        Ok(data)
    }

    /// Same as [`RestClient::request`] for endpoints whose body is irrelevant.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        context: &ClientContext,
        body: Option<Value>,
    ) -> Result<(), AppError> {
        self.execute(method, path, context, body).await.map(|_| ())
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::BadRequest(format!("Invalid header value: {}", e)))
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        AppError::Network(err.to_string())
    } else {
        AppError::ExternalService(err.to_string())
    }
}
