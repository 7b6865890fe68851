//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing credential, unknown backend or other setup problem
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Whether retrying the same request could help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

/// Check if an HTTP status code is transient
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

impl LlmError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => is_retryable_status(*status),
            // A request that could not even be built or decoded will fail the same way again
            LlmError::Network(e) => !(e.is_builder() || e.is_decode()),
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
            LlmError::Configuration(_) => false,
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        if self.is_retryable() {
            ProviderErrorKind::Transient
        } else {
            ProviderErrorKind::Permanent
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short message suitable for showing to a caller
    pub fn describe(&self) -> String {
        match self {
            LlmError::ApiError { status: 401, .. } | LlmError::ApiError { status: 403, .. } => {
                "invalid or unauthorized API key for the model provider".to_string()
            }
            LlmError::ApiError { status: 404, .. } => "model not found or not accessible".to_string(),
            LlmError::RateLimited { .. } => "rate limit or quota exceeded at the model provider".to_string(),
            LlmError::ApiError { status, .. } => format!("model provider returned HTTP {}", status),
            LlmError::Network(_) => "could not reach the model provider".to_string(),
            LlmError::Timeout(d) => format!("model request timed out after {:?}", d),
            LlmError::InvalidResponse(msg) => format!("malformed response from model provider: {}", msg),
            LlmError::Json(e) => format!("malformed response from model provider: {}", e),
            LlmError::Configuration(msg) => msg.clone(),
        }
    }
}
