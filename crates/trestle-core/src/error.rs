use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation finding, addressed to the wizard form field
/// that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Registration runtime errors.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Validation failed: {}", summarize_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Gateway '{provider}' failed: {message}")]
    Gateway { provider: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RegistrationError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Field errors carried by a validation failure; empty for other variants.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }

    /// Gateway and persistence failures are safe for the caller to retry;
    /// the completion flow never leaves a half-charged draft behind them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway { .. } | Self::Persistence(_))
    }
}

fn summarize_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
