//! Engine configuration parsing and validation.
//!
//! Configuration is structured data validated against JSON Schema first,
//! then parsed into typed sections with defaults, then checked semantically.

mod parser;
mod schema;

pub use parser::{
    BackoffConfig, ChainConfig, ConfigError, ConnectivityConfig, EngineConfig, HealthConfig,
    OfflineQueueConfig, RecoveryConfig, SystemHealthConfig, Thresholds,
};
pub use schema::validate_config_schema;
