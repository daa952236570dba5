//! Error recovery engine.
//!
//! `handle` takes a failure and its context and:
//! 1. Assesses severity (database → Critical, network on an online-required
//!    operation → High, validation → Medium, otherwise Low)
//! 2. Runs the operation's recovery strategy step by step, stopping at the
//!    first step that succeeds (and passes the operation's validator, if any)
//! 3. Logs the entry with every step it tried
//! 4. Returns a plain-language message for the user
//!
//! The log is bounded; statistics are computed over what it retains.

mod stats;
mod strategy;

pub use stats::{ErrorFrequency, ErrorStatistics, WindowStats};
pub use strategy::RecoveryValidator;

use bulwark_core::config::RecoveryConfig;
use bulwark_core::{
    assess_severity, user_message, ErrorContext, ErrorLogEntry, ExecutionError, MessageFacts,
    RecoveryAction, RecoveryAttempt, Severity, UserMessage,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::connectivity::ConnectivityMonitor;
use crate::events::{EngineEvent, EventSink};
use crate::offline_queue::OfflineQueue;
use crate::resilience::BackupStore;
use crate::router::FallbackRouter;
use strategy::StepRunner;

/// What `handle` did with an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlingResult {
    /// Id of the error log entry
    pub entry_id: String,
    pub severity: Severity,
    /// Whether some step recovered the operation
    pub recovered: bool,
    /// Result produced by the recovering step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    /// Queue id when the operation was deferred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_id: Option<String>,
    /// Every step tried, in order
    pub actions: Vec<RecoveryAction>,
    pub message: UserMessage,
}

/// Classifies failures, runs recovery strategies and keeps the error log.
pub struct ErrorRecoveryEngine {
    config: RecoveryConfig,
    router: Arc<FallbackRouter>,
    queue: Arc<OfflineQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    backups: Arc<BackupStore>,
    validators: RwLock<HashMap<String, Arc<dyn RecoveryValidator>>>,
    log: Mutex<VecDeque<ErrorLogEntry>>,
    events: Arc<dyn EventSink>,
}

impl ErrorRecoveryEngine {
    pub fn new(
        config: RecoveryConfig,
        router: Arc<FallbackRouter>,
        queue: Arc<OfflineQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        backups: Arc<BackupStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            router,
            queue,
            connectivity,
            backups,
            validators: RwLock::new(HashMap::new()),
            log: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Require recovered results for `operation` to pass `validator`.
    pub fn set_validator(&self, operation: impl Into<String>, validator: Arc<dyn RecoveryValidator>) {
        self.validators.write().insert(operation.into(), validator);
    }

    /// Handle one failure.
    pub async fn handle(&self, error: &ExecutionError, mut context: ErrorContext) -> HandlingResult {
        if context.provider.is_none() {
            context.provider = error.provider.clone();
        }

        let online_required = self.queue.config().is_online_required(&context.operation);
        let severity = assess_severity(error.kind, &context.component, online_required);
        let steps = self.config.strategy_for(&context.operation).to_vec();
        let validator = self.validators.read().get(&context.operation).cloned();

        tracing::info!(
            operation = %context.operation,
            component = %context.component,
            kind = %error.kind,
            severity = %severity,
            steps = steps.len(),
            "Handling error"
        );

        let runner = StepRunner {
            router: &self.router,
            queue: &self.queue,
            connectivity: &self.connectivity,
            backups: &self.backups,
            backoff: &self.config.backoff,
        };

        let started_at = Utc::now();
        let mut actions = Vec::with_capacity(steps.len());
        let mut output = None;
        let mut queued_id = None;
        let mut recovered = false;

        for step in steps {
            let step_started = Instant::now();
            let mut outcome = runner.run(step, error, &context).await;

            if outcome.success && outcome.queued_id.is_none() {
                if let Some(validator) = &validator {
                    if !validator.validate(&context.operation, outcome.output.as_ref()) {
                        outcome.success = false;
                        outcome.message = format!("{} (rejected by validator)", outcome.message);
                    }
                }
            }

            tracing::debug!(
                step = %step,
                success = outcome.success,
                message = %outcome.message,
                "Recovery step finished"
            );
            actions.push(RecoveryAction {
                step,
                success: outcome.success,
                message: outcome.message,
                elapsed: step_started.elapsed(),
            });

            if outcome.success {
                recovered = true;
                output = outcome.output;
                queued_id = outcome.queued_id;
                break;
            }
        }

        let fallback_available = self
            .router
            .chains()
            .get(&context.operation)
            .map(|chain| chain.providers.len() > 1)
            .unwrap_or(false);
        let message = user_message(
            severity,
            MessageFacts {
                recovered,
                queued_offline: queued_id.is_some(),
                fallback_available,
            },
        );

        let now = Utc::now();
        let entry = ErrorLogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: started_at,
            kind: error.kind,
            message: error.message.clone(),
            context,
            severity,
            resolved: recovered,
            resolved_at: recovered.then_some(now),
            attempts: vec![RecoveryAttempt {
                started_at,
                actions: actions.clone(),
                succeeded: recovered,
            }],
        };
        let entry_id = entry.id.clone();
        self.append(entry);

        if recovered {
            tracing::info!(entry_id = %entry_id, severity = %severity, "Error recovered");
        } else {
            tracing::warn!(entry_id = %entry_id, severity = %severity, "Error not recovered");
        }
        self.events.emit(&EngineEvent::ErrorHandled {
            entry_id: entry_id.clone(),
            severity,
            recovered,
        });

        HandlingResult {
            entry_id,
            severity,
            recovered,
            output,
            queued_id,
            actions,
            message,
        }
    }

    fn append(&self, entry: ErrorLogEntry) {
        let mut log = self.log.lock();
        log.push_back(entry);
        while log.len() > self.config.log_capacity {
            log.pop_front();
        }
    }

    /// Mark an entry resolved. Returns false if it is unknown or already resolved.
    pub fn mark_resolved(&self, id: &str) -> bool {
        let mut log = self.log.lock();
        match log.iter_mut().find(|entry| entry.id == id) {
            Some(entry) if !entry.resolved => {
                entry.resolved = true;
                entry.resolved_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<ErrorLogEntry> {
        self.log.lock().iter().find(|entry| entry.id == id).cloned()
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorLogEntry> {
        self.log.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let log = self.log.lock();
        ErrorStatistics::compute(log.iter(), Utc::now(), self.config.top_errors)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

impl std::fmt::Debug for ErrorRecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryEngine")
            .field("entries", &self.log.lock().len())
            .field("strategies", &self.config.strategies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendRegistry, ScriptedBackend, ScriptedOutcome};
    use crate::connectivity::ReachabilityProbe;
    use crate::events::TracingSink;
    use crate::resilience::{ChainRegistry, HealthTracker};
    use async_trait::async_trait;
    use bulwark_core::config::{ConnectivityConfig, OfflineQueueConfig};
    use bulwark_core::{ErrorKind, FallbackChain, RecoveryStep};
    use proptest::prelude::*;
    use std::time::Duration;

    struct StaticProbe(bool);

    #[async_trait]
    impl ReachabilityProbe for StaticProbe {
        async fn probe(&self, _endpoint: &str) -> bool {
            self.0
        }
    }

    struct Harness {
        engine: ErrorRecoveryEngine,
        backends: Arc<BackendRegistry>,
        queue: Arc<OfflineQueue>,
        backups: Arc<BackupStore>,
        chains: Arc<ChainRegistry>,
    }

    fn harness(online: bool, config: RecoveryConfig) -> Harness {
        let events: Arc<dyn EventSink> = Arc::new(TracingSink);
        let backends = Arc::new(BackendRegistry::new());
        let backups = Arc::new(BackupStore::default());
        let chains = Arc::new(ChainRegistry::with_chains([FallbackChain::new(
            "generate",
            vec!["openai".to_string(), "anthropic".to_string()],
        )]));
        let router = Arc::new(
            FallbackRouter::new(
                chains.clone(),
                Arc::new(HealthTracker::default()),
                backends.clone(),
                events.clone(),
            )
            .with_backups(backups.clone()),
        );
        let queue = Arc::new(OfflineQueue::new(OfflineQueueConfig::default(), events.clone()));
        let connectivity = Arc::new(ConnectivityMonitor::new(
            ConnectivityConfig::default(),
            Arc::new(StaticProbe(online)),
            events.clone(),
        ));

        let engine = ErrorRecoveryEngine::new(
            config,
            router,
            queue.clone(),
            connectivity,
            backups.clone(),
            events,
        );
        Harness {
            engine,
            backends,
            queue,
            backups,
            chains,
        }
    }

    fn strategy(steps: Vec<RecoveryStep>) -> RecoveryConfig {
        let mut config = RecoveryConfig::default();
        config.strategies.insert("generate".to_string(), steps);
        config.backoff.min_delay = Duration::from_millis(10);
        config.backoff.max_delay = Duration::from_millis(100);
        config
    }

    fn params() -> JsonValue {
        serde_json::json!({"prompt": "hello"})
    }

    fn context() -> ErrorContext {
        ErrorContext::new("generate", "router")
            .with_provider("openai")
            .with_params(params())
    }

    fn network_error() -> ExecutionError {
        ExecutionError::new(ErrorKind::NetworkError, "ECONNREFUSED").with_provider("openai")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let h = harness(true, strategy(vec![RecoveryStep::RetryWithBackoff]));
        h.backends.register(
            "openai",
            Arc::new(ScriptedBackend::succeeding("openai").with_script([ScriptedOutcome::Fail(
                BackendError::Network("down".to_string()),
            )])),
        );

        let result = h.engine.handle(&network_error(), context()).await;

        assert!(result.recovered);
        assert_eq!(result.output.unwrap()["provider"], "openai");
        assert_eq!(result.actions.len(), 1);
        assert!(h.engine.get(&result.entry_id).unwrap().resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_at_least_chain_retry_delay() {
        let h = harness(true, strategy(vec![RecoveryStep::RetryWithBackoff]));
        h.chains.register(
            FallbackChain::new("generate", vec!["openai".to_string()])
                .with_retry_delay(Duration::from_secs(3)),
        );
        let openai = Arc::new(ScriptedBackend::succeeding("openai").with_script([
            ScriptedOutcome::Fail(BackendError::Network("down".to_string())),
        ]));
        h.backends.register("openai", openai.clone());

        let started = tokio::time::Instant::now();
        let result = h.engine.handle(&network_error(), context()).await;

        assert!(result.recovered);
        assert_eq!(openai.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order_until_success() {
        let h = harness(
            true,
            strategy(vec![
                RecoveryStep::RestoreFromBackup,
                RecoveryStep::SwitchFallbackProvider,
                RecoveryStep::EnableOfflineMode,
            ]),
        );
        h.backends.register(
            "openai",
            Arc::new(ScriptedBackend::failing("openai", BackendError::Provider("boom".to_string()))),
        );
        let anthropic = Arc::new(ScriptedBackend::succeeding("anthropic"));
        h.backends.register("anthropic", anthropic.clone());

        let result = h
            .engine
            .handle(&ExecutionError::new(ErrorKind::ProviderError, "boom"), context())
            .await;

        assert!(result.recovered);
        let steps: Vec<_> = result.actions.iter().map(|a| (a.step, a.success)).collect();
        assert_eq!(
            steps,
            vec![
                (RecoveryStep::RestoreFromBackup, false),
                (RecoveryStep::SwitchFallbackProvider, true),
            ]
        );
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(result.message.recovery_note, "It was recovered automatically.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_mode_queues_when_offline() {
        let h = harness(false, strategy(vec![RecoveryStep::EnableOfflineMode]));

        let result = h.engine.handle(&network_error(), context()).await;

        assert!(result.recovered);
        let id = result.queued_id.unwrap();
        assert_eq!(h.queue.pending()[0].id, id);
        assert_eq!(result.severity, Severity::High);
        assert!(result.message.recovery_note.contains("offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_mode_does_nothing_when_online() {
        let h = harness(true, strategy(vec![RecoveryStep::EnableOfflineMode]));
        let result = h.engine.handle(&network_error(), context()).await;

        assert!(!result.recovered);
        assert!(h.queue.is_empty());
        assert!(!h.engine.get(&result.entry_id).unwrap().resolved);
    }

    #[tokio::test]
    async fn test_restore_from_backup() {
        let h = harness(true, strategy(vec![RecoveryStep::RestoreFromBackup]));
        h.backups
            .insert("generate", &params(), serde_json::json!({"text": "cached"}))
            .await;

        let result = h.engine.handle(&network_error(), context()).await;
        assert!(result.recovered);
        assert_eq!(result.output.unwrap()["text"], "cached");
    }

    #[tokio::test]
    async fn test_validator_rejects_result() {
        let h = harness(true, strategy(vec![RecoveryStep::RestoreFromBackup]));
        h.backups
            .insert("generate", &params(), serde_json::json!({"text": ""}))
            .await;
        h.engine.set_validator(
            "generate",
            Arc::new(|_: &str, output: Option<&JsonValue>| {
                output
                    .and_then(|o| o["text"].as_str())
                    .map(|t| !t.is_empty())
                    .unwrap_or(false)
            }),
        );

        let result = h.engine.handle(&network_error(), context()).await;
        assert!(!result.recovered);
        assert!(result.actions[0].message.contains("validator"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_retry() {
        let h = harness(true, strategy(vec![RecoveryStep::RetryWithBackoff]));
        let openai = Arc::new(ScriptedBackend::succeeding("openai"));
        h.backends.register("openai", openai.clone());

        let error = ExecutionError::new(ErrorKind::AuthenticationError, "401 Unauthorized");
        let result = h.engine.handle(&error, context()).await;

        assert!(!result.recovered);
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn test_database_error_is_critical() {
        let h = harness(true, strategy(vec![]));
        let error = ExecutionError::new(ErrorKind::DatabaseError, "disk I/O error");
        let result = h.engine.handle(&error, ErrorContext::new("local-save", "editor")).await;

        assert_eq!(result.severity, Severity::Critical);
        assert!(result.message.summary.starts_with("A critical error occurred"));
    }

    #[tokio::test]
    async fn test_log_bounded_and_statistics() {
        let mut config = strategy(vec![]);
        config.log_capacity = 3;
        let h = harness(true, config);

        for _ in 0..5 {
            h.engine
                .handle(&network_error(), ErrorContext::new("generate", "router"))
                .await;
        }

        assert_eq!(h.engine.recent(10).len(), 3);
        let stats = h.engine.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.last_24h.total, 3);
        assert_eq!(stats.top_errors[0].count, 3);

        let id = h.engine.recent(1)[0].id.clone();
        assert!(h.engine.mark_resolved(&id));
        assert!(!h.engine.mark_resolved(&id));
        assert_eq!(h.engine.statistics().unresolved, 2);
    }

    proptest! {
        #[test]
        fn test_database_component_always_critical(
            kind in prop::sample::select(vec![
                ErrorKind::NetworkError,
                ErrorKind::ValidationError,
                ErrorKind::ProviderError,
                ErrorKind::ProviderTimeout,
            ]),
            operation in prop::sample::select(vec!["generate", "local-save", "analyze"]),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            let h = harness(true, strategy(vec![]));
            let error = ExecutionError::new(kind, "failure");
            let result = runtime.block_on(h.engine.handle(&error, ErrorContext::new(operation, "database")));
            prop_assert_eq!(result.severity, Severity::Critical);
        }
    }
}
