//! Backend capability abstractions.
//!
//! A backend is anything that can execute one request for an operation and
//! answer with a payload or an error: a cloud model API, a local model, a
//! sync service. The engine only needs the success/error/latency signal; it
//! never looks inside the payload.

use async_trait::async_trait;
use bulwark_core::{ErrorKind, ExecutionError};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod registry;
mod scripted;

pub use registry::{BackendFactory, BackendRegistry};
pub use scripted::{ScriptedBackend, ScriptedBackendFactory, ScriptedOutcome};

/// Errors reported by a backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Wrap a free-text failure, classifying it by its message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorKind::classify_message(&message) {
            ErrorKind::NetworkError => BackendError::Network(message),
            ErrorKind::RateLimitExceeded => BackendError::RateLimited { retry_after: None },
            ErrorKind::AuthenticationError => BackendError::Auth(message),
            ErrorKind::ValidationError => BackendError::Validation(message),
            ErrorKind::DatabaseError => BackendError::Database(message),
            // A message that merely mentions a timeout is still the provider's own failure
            _ => BackendError::Provider(message),
        }
    }

    /// Classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Network(_) => ErrorKind::NetworkError,
            BackendError::RateLimited { .. } => ErrorKind::RateLimitExceeded,
            BackendError::Auth(_) => ErrorKind::AuthenticationError,
            BackendError::Timeout(_) => ErrorKind::ProviderTimeout,
            BackendError::Validation(_) => ErrorKind::ValidationError,
            BackendError::Database(_) => ErrorKind::DatabaseError,
            BackendError::Provider(_) | BackendError::NotConfigured(_) => ErrorKind::ProviderError,
        }
    }

    /// Convert into the caller-facing error, tagged with the provider.
    pub fn into_execution_error(self, provider: &str) -> ExecutionError {
        ExecutionError::new(self.kind(), self.to_string()).with_provider(provider)
    }
}

/// Capability that executes requests for one provider.
///
/// # Contract
/// - `invoke` may be cancelled at any await point; the router drops the
///   future when the attempt deadline passes.
/// - Implementations must not record health themselves; the router does.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one request.
    async fn invoke(&self, operation: &str, params: &JsonValue) -> Result<JsonValue, BackendError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool {
        true
    }

    /// Provider identifier, for logs.
    fn name(&self) -> &str;
}
