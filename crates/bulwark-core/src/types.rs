//! Shared data model for the resilience engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::duration;
use crate::errors::{ErrorKind, ExecutionError, Severity};

/// Identifier of a backend provider (e.g. "openai", "ollama").
pub type ProviderId = String;

// ============================================================================
// Provider health
// ============================================================================

/// Health classification of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No outcome recorded yet
    #[default]
    Unknown,

    /// Last call succeeded within the slow threshold
    Healthy,

    /// Slow, or failing below the failure threshold
    Degraded,

    /// Consecutive failures reached the tracker threshold
    Failed,
}

/// Rolling health record for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Current classification
    pub status: HealthStatus,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// EWMA of response latency in milliseconds
    pub average_response_time_ms: f64,

    /// EWMA of the binary outcome, in [0, 1]
    pub availability: f64,

    /// When an outcome was last recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Lifetime success count
    #[serde(default)]
    pub total_successes: u64,

    /// Lifetime failure count
    #[serde(default)]
    pub total_failures: u64,

    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            average_response_time_ms: 0.0,
            availability: 1.0,
            last_checked_at: None,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }
}

impl ProviderHealth {
    /// True if a chain with the given failure budget should skip this provider.
    ///
    /// The tracker's own `Failed` label is not enough on its own: the chain's
    /// `max_failures` decides when to give up on a provider.
    pub fn exceeds_budget(&self, max_failures: u32) -> bool {
        self.status == HealthStatus::Failed && self.consecutive_failures > max_failures
    }

    /// True once `retry_delay` has passed since the last recorded outcome.
    ///
    /// A provider past its budget gets one trial call each time this holds.
    pub fn trial_due(&self, retry_delay: Duration, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .map(|since| since >= retry_delay)
                .unwrap_or(false),
            None => true,
        }
    }
}

// ============================================================================
// Fallback chains and execution
// ============================================================================

/// Ordered list of providers for one operation, plus its thresholds.
///
/// Chains are immutable once registered; updates replace the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackChain {
    /// Operation this chain serves
    pub operation: String,

    /// Providers in attempt order
    pub providers: Vec<ProviderId>,

    /// Consecutive failures tolerated before a Failed provider is skipped
    pub max_failures: u32,

    /// Hard deadline per attempt
    #[serde(with = "duration::millis")]
    pub timeout: Duration,

    /// Minimum wait before re-running the chain, and between trial calls to a
    /// provider past its failure budget
    #[serde(with = "duration::millis")]
    pub retry_delay: Duration,
}

impl FallbackChain {
    /// Create a chain with default thresholds (3 failures, 30s timeout, 1s retry delay).
    pub fn new(operation: impl Into<String>, providers: Vec<ProviderId>) -> Self {
        Self {
            operation: operation.into(),
            providers,
            max_failures: 3,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Set the failure budget.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Operation that was executed
    pub operation: String,

    /// Whether any provider succeeded
    pub success: bool,

    /// Payload returned by the winning provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,

    /// Last error when no provider succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    /// Provider that succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,

    /// Wall-clock time for the whole call
    #[serde(with = "duration::millis")]
    pub elapsed: Duration,

    /// Providers invoked, in order
    pub attempted_providers: Vec<ProviderId>,

    /// Providers passed over because of their health or exclusion
    #[serde(default)]
    pub skipped_providers: Vec<ProviderId>,

    /// True iff more than one provider was attempted
    pub fallback_used: bool,
}

impl ExecutionResult {
    /// A result that failed before any provider was considered.
    pub fn rejected(operation: impl Into<String>, error: ExecutionError) -> Self {
        Self {
            operation: operation.into(),
            success: false,
            output: None,
            error: Some(error),
            provider: None,
            elapsed: Duration::ZERO,
            attempted_providers: Vec::new(),
            skipped_providers: Vec::new(),
            fallback_used: false,
        }
    }

    /// Kind of the final error, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// ============================================================================
// Offline queue
// ============================================================================

/// Queue priority. Ordering is `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Lifecycle of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Completed, Failed and Cancelled operations leave the active queue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// Whether an operation type can run without the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineCapability {
    /// Runs entirely locally (e.g. local document edits)
    OfflineCapable,

    /// Must be deferred while offline (e.g. cloud generation)
    OnlineRequired,
}

/// An operation deferred until connectivity returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier
    pub id: String,

    /// Operation type, used for dispatch only
    pub operation: String,

    /// Opaque parameters handed back to the executor
    pub payload: JsonValue,

    /// Drain order tier
    pub priority: Priority,

    /// When the operation entered the queue
    pub queued_at: DateTime<Utc>,

    /// Arrival order within the queue; unlike `queued_at` it never ties
    #[serde(default)]
    pub sequence: u64,

    /// Failed drain attempts so far
    pub retry_count: u32,

    /// Attempts allowed before the operation is failed permanently
    pub max_retries: u32,

    /// Current lifecycle state
    pub status: OperationStatus,

    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the operation reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Error log
// ============================================================================

/// Where an error happened.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation being performed (e.g. "generate")
    pub operation: String,

    /// Component that reported the error (e.g. "router", "database")
    pub component: String,

    /// Provider involved, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,

    /// Parameters of the failed call, needed to retry or defer it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,

    /// Queue priority if the operation gets deferred
    #[serde(default)]
    pub priority: Priority,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: component.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_params(mut self, params: JsonValue) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Named recovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStep {
    /// Re-run the chain with exponential backoff
    RetryWithBackoff,

    /// Re-run the chain without the provider that failed
    SwitchFallbackProvider,

    /// Defer the operation to the offline queue
    EnableOfflineMode,

    /// Serve the last known good result
    RestoreFromBackup,
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStep::RetryWithBackoff => "retry-with-backoff",
            RecoveryStep::SwitchFallbackProvider => "switch-fallback-provider",
            RecoveryStep::EnableOfflineMode => "enable-offline-mode",
            RecoveryStep::RestoreFromBackup => "restore-from-backup",
        };
        f.write_str(name)
    }
}

/// Record of one recovery step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub step: RecoveryStep,
    pub success: bool,
    pub message: String,
    #[serde(with = "duration::millis")]
    pub elapsed: Duration,
}

/// One pass through a recovery strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub started_at: DateTime<Utc>,
    pub actions: Vec<RecoveryAction>,
    pub succeeded: bool,
}

/// A handled error. Append-only apart from `resolved` and `attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub severity: Severity,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub attempts: Vec<RecoveryAttempt>,
}

impl ErrorLogEntry {
    /// Grouping key for frequency statistics.
    pub fn signature(&self) -> String {
        format!(
            "{}@{}/{}",
            self.kind, self.context.component, self.context.operation
        )
    }
}

// ============================================================================
// Connectivity
// ============================================================================

/// Host connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

/// A connectivity transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    pub timestamp: DateTime<Utc>,

    /// State entered
    pub transition: Connectivity,

    pub reason: String,

    /// How long the previous state lasted
    #[serde(with = "duration::millis")]
    pub previous_state_duration: Duration,
}

// ============================================================================
// System health
// ============================================================================

/// Status of one health check. Ordering is `Healthy < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

/// Result of one named health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Healthy, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Critical, message)
    }

    pub fn new(status: ComponentStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Attach a numeric metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Folded result of every health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub checked_at: DateTime<Utc>,

    /// Worst component status
    pub overall: ComponentStatus,

    pub components: BTreeMap<String, ComponentHealth>,
}

impl SystemHealth {
    /// Fold component results; the overall status is the worst one.
    pub fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let overall = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or_default();
        Self {
            checked_at: Utc::now(),
            overall,
            components,
        }
    }

    /// Number of components in the given status.
    pub fn count(&self, status: ComponentStatus) -> usize {
        self.components.values().filter(|c| c.status == status).count()
    }

    /// Summarize for the trend history.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            timestamp: self.checked_at,
            overall: self.overall,
            warning_count: self.count(ComponentStatus::Warning),
            critical_count: self.count(ComponentStatus::Critical),
        }
    }
}

/// Summarized health for trend queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub overall: ComponentStatus,
    pub warning_count: usize,
    pub critical_count: usize,
}
