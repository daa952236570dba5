//! Engine configuration parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::validate_config_schema;
use crate::duration::humantime_str;
use crate::types::{FallbackChain, OfflineCapability, RecoveryStep};

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

// ============================================================================
// Sections
// ============================================================================

fn default_max_failures() -> u32 {
    3
}

fn default_chain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

/// One fallback chain as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Providers in attempt order
    pub providers: Vec<String>,

    /// Failure budget before a Failed provider is skipped
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Deadline per attempt
    #[serde(default = "default_chain_timeout", with = "humantime_str")]
    pub timeout: Duration,

    /// Minimum retry wait, and the trial-call window for locked-out providers
    #[serde(default = "default_retry_delay", with = "humantime_str")]
    pub retry_delay: Duration,
}

impl ChainConfig {
    /// Build the runtime chain for an operation.
    pub fn to_chain(&self, operation: &str) -> FallbackChain {
        FallbackChain::new(operation, self.providers.clone())
            .with_max_failures(self.max_failures)
            .with_timeout(self.timeout)
            .with_retry_delay(self.retry_delay)
    }
}

/// Provider health bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Successful calls slower than this are labelled Degraded
    #[serde(with = "humantime_str")]
    pub slow_threshold: Duration,

    /// Consecutive failures that label a provider Failed
    pub failure_threshold: u32,

    /// EWMA weight of a new latency sample
    pub latency_weight: f64,

    /// EWMA weight of a new availability sample
    pub availability_weight: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_secs(10),
            failure_threshold: 3,
            latency_weight: 0.2,
            availability_weight: 0.1,
        }
    }
}

/// Reachability probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Independent endpoints; the host is online if any answers
    pub endpoints: Vec<String>,

    /// Probe period
    #[serde(with = "humantime_str")]
    pub interval: Duration,

    /// Deadline per endpoint
    #[serde(with = "humantime_str")]
    pub probe_timeout: Duration,

    /// Transitions kept in history
    pub history_capacity: usize,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "1.1.1.1:53".to_string(),
                "8.8.8.8:53".to_string(),
                "9.9.9.9:53".to_string(),
            ],
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            history_capacity: 100,
        }
    }
}

/// Offline queue behaviour and the capability table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineQueueConfig {
    /// Attempts allowed per queued operation unless overridden
    pub default_max_retries: u32,

    /// Terminal operations kept for inspection
    pub history_capacity: usize,

    /// Operation types that run entirely locally. Anything else is online-required.
    pub offline_capable: Vec<String>,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            history_capacity: 500,
            offline_capable: vec![
                "local-edit".to_string(),
                "local-save".to_string(),
                "export-document".to_string(),
            ],
        }
    }
}

impl OfflineQueueConfig {
    /// Capability tag of an operation type.
    pub fn capability(&self, operation: &str) -> OfflineCapability {
        if self.offline_capable.iter().any(|op| op == operation) {
            OfflineCapability::OfflineCapable
        } else {
            OfflineCapability::OnlineRequired
        }
    }

    /// Shorthand for `capability(op) == OnlineRequired`.
    pub fn is_online_required(&self, operation: &str) -> bool {
        self.capability(operation) == OfflineCapability::OnlineRequired
    }
}

/// Exponential backoff for the retry recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "humantime_str")]
    pub min_delay: Duration,

    #[serde(with = "humantime_str")]
    pub max_delay: Duration,

    pub max_retries: usize,

    pub factor: f32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
            factor: 2.0,
        }
    }
}

/// Error recovery strategies and log retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Ordered steps per operation
    pub strategies: BTreeMap<String, Vec<RecoveryStep>>,

    /// Steps for operations without their own strategy
    pub default_strategy: Vec<RecoveryStep>,

    pub backoff: BackoffConfig,

    /// How long a last-known-good result stays restorable
    #[serde(with = "humantime_str")]
    pub backup_ttl: Duration,

    /// Maximum restorable results
    pub backup_capacity: u64,

    /// Error log entries kept
    pub log_capacity: usize,

    /// Length of the most-frequent-errors list
    pub top_errors: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert(
            "generate".to_string(),
            vec![
                RecoveryStep::RetryWithBackoff,
                RecoveryStep::SwitchFallbackProvider,
                RecoveryStep::EnableOfflineMode,
            ],
        );
        strategies.insert(
            "analyze".to_string(),
            vec![
                RecoveryStep::SwitchFallbackProvider,
                RecoveryStep::EnableOfflineMode,
                RecoveryStep::RestoreFromBackup,
            ],
        );
        strategies.insert(
            "save".to_string(),
            vec![RecoveryStep::RetryWithBackoff, RecoveryStep::RestoreFromBackup],
        );

        Self {
            strategies,
            default_strategy: vec![RecoveryStep::RetryWithBackoff],
            backoff: BackoffConfig::default(),
            backup_ttl: Duration::from_secs(3600),
            backup_capacity: 1_000,
            log_capacity: 1_000,
            top_errors: 10,
        }
    }
}

impl RecoveryConfig {
    /// Steps for an operation, falling back to the default strategy.
    pub fn strategy_for(&self, operation: &str) -> &[RecoveryStep] {
        self.strategies
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_strategy)
    }
}

/// Warning/critical percentages for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// System health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemHealthConfig {
    /// Check period
    #[serde(with = "humantime_str")]
    pub interval: Duration,

    /// Deadline per check
    #[serde(with = "humantime_str")]
    pub check_timeout: Duration,

    pub cpu: Thresholds,
    pub memory: Thresholds,
    pub disk: Thresholds,

    /// Queued operations above which the queue check warns
    pub queue_backlog_warning: usize,

    /// Snapshots kept for trend queries
    pub history_capacity: usize,
}

impl Default for SystemHealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(10),
            cpu: Thresholds::new(80.0, 95.0),
            memory: Thresholds::new(85.0, 95.0),
            disk: Thresholds::new(85.0, 95.0),
            queue_backlog_warning: 50,
            history_capacity: 1_000,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback chains keyed by operation name
    pub chains: BTreeMap<String, ChainConfig>,

    /// Opaque per-provider backend settings, interpreted by backend factories
    pub backends: BTreeMap<String, JsonValue>,

    pub health: HealthConfig,
    pub connectivity: ConnectivityConfig,
    pub offline_queue: OfflineQueueConfig,
    pub recovery: RecoveryConfig,
    pub system_health: SystemHealthConfig,
}

impl EngineConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse configuration from a file; `.json` is read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: JsonValue) -> Result<Self, ConfigError> {
        // An empty YAML document parses as null
        let value = if value.is_null() {
            serde_json::json!({})
        } else {
            value
        };
        validate_config_schema(&value).map_err(ConfigError::SchemaError)?;
        let config: EngineConfig = serde_json::from_value(value)?;
        config.validate()?;
        tracing::debug!(
            chains = config.chains.len(),
            backends = config.backends.len(),
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Build every configured chain.
    pub fn fallback_chains(&self) -> Vec<FallbackChain> {
        self.chains
            .iter()
            .map(|(operation, chain)| chain.to_chain(operation))
            .collect()
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (operation, chain) in &self.chains {
            if chain.providers.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Chain '{}' has no providers",
                    operation
                )));
            }

            let mut seen = HashSet::new();
            for provider in &chain.providers {
                if !seen.insert(provider) {
                    return Err(ConfigError::ValidationError(format!(
                        "Chain '{}' lists provider '{}' twice",
                        operation, provider
                    )));
                }
            }

            if chain.timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "Chain '{}' has a zero timeout",
                    operation
                )));
            }
        }

        for weight in [self.health.latency_weight, self.health.availability_weight] {
            if !(weight > 0.0 && weight <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "EWMA weight {} must be in (0, 1]",
                    weight
                )));
            }
        }

        for (name, value) in [
            ("connectivity.interval", self.connectivity.interval),
            ("connectivity.probe_timeout", self.connectivity.probe_timeout),
            ("system_health.interval", self.system_health.interval),
            ("system_health.check_timeout", self.system_health.check_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.connectivity.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one connectivity endpoint is required".to_string(),
            ));
        }

        if self.recovery.backoff.min_delay > self.recovery.backoff.max_delay {
            return Err(ConfigError::ValidationError(
                "recovery.backoff.min_delay exceeds max_delay".to_string(),
            ));
        }

        for (name, t) in [
            ("cpu", self.system_health.cpu),
            ("memory", self.system_health.memory),
            ("disk", self.system_health.disk),
        ] {
            if t.warning > t.critical {
                return Err(ConfigError::ValidationError(format!(
                    "system_health.{}: warning threshold {} exceeds critical {}",
                    name, t.warning, t.critical
                )));
            }
        }

        Ok(())
    }
}
