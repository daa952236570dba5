//! Error taxonomy shared by every component.
//!
//! Two independent classifications hang off [`ErrorKind`]:
//! - **Routing**: does this failure affect every provider alike? If so the
//!   fallback chain is abandoned instead of trying the next provider.
//! - **Reporting**: how severe is it for the user? See [`assess_severity`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::patterns;

/// Kind of failure observed while executing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No fallback chain is registered for the operation
    UnknownOperation,

    /// The provider did not answer before the attempt deadline
    ProviderTimeout,

    /// The provider reported a failure of its own
    ProviderError,

    /// The network path to the provider is down
    NetworkError,

    /// Credentials were rejected
    AuthenticationError,

    /// The credential set or service is being throttled
    RateLimitExceeded,

    /// The request itself is malformed
    ValidationError,

    /// Local persistence failed
    DatabaseError,
}

/// How the router reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingClass {
    /// Try the next provider in the chain
    Local,

    /// Abandon the remaining chain
    Critical,
}

impl ErrorKind {
    /// Routing classification of this kind.
    pub fn routing_class(self) -> RoutingClass {
        match self {
            ErrorKind::NetworkError
            | ErrorKind::AuthenticationError
            | ErrorKind::RateLimitExceeded => RoutingClass::Critical,
            _ => RoutingClass::Local,
        }
    }

    /// True if the remaining fallback chain should be skipped.
    pub fn is_critical_for_routing(self) -> bool {
        self.routing_class() == RoutingClass::Critical
    }

    /// Network-classified failures, for severity assessment.
    pub fn is_network(self) -> bool {
        matches!(self, ErrorKind::NetworkError | ErrorKind::ProviderTimeout)
    }

    /// Validation-classified failures, for severity assessment.
    pub fn is_validation(self) -> bool {
        matches!(self, ErrorKind::ValidationError)
    }

    /// Whether re-running the same request can plausibly succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::UnknownOperation | ErrorKind::ValidationError | ErrorKind::AuthenticationError
        )
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::DatabaseError => "database_error",
        }
    }

    /// Classify a free-text error message reported by a backend.
    ///
    /// Falls back to [`ErrorKind::ProviderError`] when nothing matches.
    pub fn classify_message(message: &str) -> Self {
        if patterns::RATE_LIMIT_PATTERN.is_match(message) {
            ErrorKind::RateLimitExceeded
        } else if patterns::AUTH_PATTERN.is_match(message) {
            ErrorKind::AuthenticationError
        } else if patterns::TIMEOUT_PATTERN.is_match(message) {
            ErrorKind::ProviderTimeout
        } else if patterns::NETWORK_PATTERN.is_match(message) {
            ErrorKind::NetworkError
        } else if patterns::DATABASE_PATTERN.is_match(message) {
            ErrorKind::DatabaseError
        } else if patterns::VALIDATION_PATTERN.is_match(message) {
            ErrorKind::ValidationError
        } else {
            ErrorKind::ProviderError
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporting severity of a handled error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Component name that always yields [`Severity::Critical`].
pub const DATABASE_COMPONENT: &str = "database";

/// Determine the severity of a failure.
///
/// Precedence, first match wins:
/// 1. `component == "database"` (or a database error) → Critical
/// 2. online-required operation with a network-classified error → High
/// 3. validation-classified error → Medium
/// 4. everything else → Low
pub fn assess_severity(kind: ErrorKind, component: &str, online_required: bool) -> Severity {
    if component.eq_ignore_ascii_case(DATABASE_COMPONENT) || kind == ErrorKind::DatabaseError {
        Severity::Critical
    } else if online_required && kind.is_network() {
        Severity::High
    } else if kind.is_validation() {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A failure as seen by callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Classified kind
    pub kind: ErrorKind,

    /// Human-readable detail
    pub message: String,

    /// Provider that produced the failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
        }
    }

    /// Attach the provider that failed.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Shorthand for a missing chain.
    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(
            ErrorKind::UnknownOperation,
            format!("No fallback chain registered for operation '{}'", operation),
        )
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{} ({}): {}", self.kind, provider, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ExecutionError {}
