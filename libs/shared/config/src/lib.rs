use std::env;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_CONSULTATION_DURATION_MINUTES: i64 = 60;
const DEFAULT_CHAT_JOIN_ANNOUNCE_DELAY_MS: u64 = 1500;
const DEFAULT_PRESENCE_GRACE_PERIOD_MS: u64 = 5000;
const DEFAULT_SESSION_JOIN_EARLY_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub payment_currency: String,
    pub consultation_duration_minutes: i64,
    pub chat_join_announce_delay_ms: u64,
    pub presence_grace_period_ms: u64,
    pub session_join_early_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            api_base_url: env::var("PATIENT_API_URL")
                .unwrap_or_else(|_| {
                    warn!("PATIENT_API_URL not set, using empty value");
                    String::new()
                }),
            api_key: env::var("PATIENT_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("PATIENT_API_KEY not set, using empty value");
                    String::new()
                }),
            payment_currency: env::var("PAYMENT_CURRENCY")
                .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string()),
            consultation_duration_minutes: parse_or_default(
                "CONSULTATION_DURATION_MINUTES",
                DEFAULT_CONSULTATION_DURATION_MINUTES,
            ),
            chat_join_announce_delay_ms: parse_or_default(
                "CHAT_JOIN_ANNOUNCE_DELAY_MS",
                DEFAULT_CHAT_JOIN_ANNOUNCE_DELAY_MS,
            ),
            presence_grace_period_ms: parse_or_default(
                "PRESENCE_GRACE_PERIOD_MS",
                DEFAULT_PRESENCE_GRACE_PERIOD_MS,
            ),
            session_join_early_minutes: parse_or_default(
                "SESSION_JOIN_EARLY_MINUTES",
                DEFAULT_SESSION_JOIN_EARLY_MINUTES,
            ),
        };

        if !config.is_configured() {
            warn!("Patient client not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.api_base_url.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            api_key: String::new(),
            payment_currency: DEFAULT_CURRENCY.to_string(),
            consultation_duration_minutes: DEFAULT_CONSULTATION_DURATION_MINUTES,
            chat_join_announce_delay_ms: DEFAULT_CHAT_JOIN_ANNOUNCE_DELAY_MS,
            presence_grace_period_ms: DEFAULT_PRESENCE_GRACE_PERIOD_MS,
            session_join_early_minutes: DEFAULT_SESSION_JOIN_EARLY_MINUTES,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Read-only view of the persisted client state (locale, country, auth token).
///
/// Built once by the embedding application and handed to every service that
/// talks to the backend, instead of being read from ambient storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    locale: String,
    country: String,
    auth_token: Option<String>,
}

impl ClientContext {
    pub fn new(locale: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            country: country.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}
