use serde::Serialize;
use thiserror::Error;

/// Failure of a call to the remote patient API, classified by what the
/// caller can do about it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build the error for a non-success HTTP status and its body text.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => AppError::Auth(body),
            404 => AppError::NotFound(body),
            409 => AppError::Conflict(body),
            410 => AppError::Gone(body),
            400 => AppError::BadRequest(body),
            422 => AppError::ValidationError(body),
            _ => AppError::ExternalService(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Only transport failures are worth another attempt by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", err))
    }
}

/// Inline error payload shown next to the control that triggered it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for ErrorNotice {
    fn from(err: &AppError) -> Self {
        Self {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
