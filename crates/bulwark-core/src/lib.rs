//! # bulwark-core
//!
//! Deterministic building blocks for the Bulwark resilience engine.
//!
//! This crate holds everything that does not need an async runtime:
//! - The shared data model (provider health, chains, queued operations,
//!   error log entries, connectivity and health snapshots)
//! - The error taxonomy and its two classifications (routing and severity)
//! - Plain-language messages for handled errors
//! - Engine configuration, validated against an embedded JSON Schema
//!
//! The stateful engine lives in `bulwark-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{EngineConfig, ErrorKind};
//!
//! let config = EngineConfig::from_file("bulwark.yaml")?;
//! assert!(ErrorKind::RateLimitExceeded.is_critical_for_routing());
//! ```

pub mod config;
pub mod duration;
pub mod errors;
pub mod message;
pub mod patterns;
pub mod types;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig};
pub use errors::{assess_severity, ErrorKind, ExecutionError, RoutingClass, Severity};
pub use message::{user_message, MessageFacts, UserMessage};
pub use types::{
    ComponentHealth, ComponentStatus, Connectivity, ConnectivityEvent, ErrorContext,
    ErrorLogEntry, ExecutionResult, FallbackChain, HealthSnapshot, HealthStatus,
    OfflineCapability, OperationStatus, Priority, ProviderHealth, ProviderId, QueuedOperation,
    RecoveryAction, RecoveryAttempt, RecoveryStep, SystemHealth,
};
