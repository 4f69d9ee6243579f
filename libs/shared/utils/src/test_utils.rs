use std::sync::Once;

use chrono::{DateTime, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shared_config::{AppConfig, ClientContext};

static TRACING: Once = Once::new();

/// Install a fmt subscriber for test output, honouring `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
            ))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

pub struct TestConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub chat_join_announce_delay_ms: u64,
    pub presence_grace_period_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:54321".to_string(),
            api_key: "test-anon-key".to_string(),
            chat_join_announce_delay_ms: 1500,
            presence_grace_period_ms: 5000,
        }
    }
}

impl TestConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            api_base_url: self.api_base_url.clone(),
            api_key: self.api_key.clone(),
            chat_join_announce_delay_ms: self.chat_join_announce_delay_ms,
            presence_grace_period_ms: self.presence_grace_period_ms,
            ..AppConfig::default()
        }
    }
}

pub fn test_context() -> ClientContext {
    ClientContext::new("en", "KZ").with_auth_token("test-token")
}

/// Parse an RFC 3339 timestamp; panics on malformed input, test use only.
pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| panic!("invalid test timestamp {}: {}", rfc3339, e))
}
