//! Fallback router.
//!
//! The router walks an operation's chain in order and returns as soon as one
//! provider answers. It implements:
//! - Budget-based skipping of providers that keep failing, with one trial
//!   call per chain retry delay so a recovered provider is picked up again
//! - A hard deadline per attempt via `tokio::time::timeout`
//! - Health recording for every attempt, done here and nowhere else
//! - Early abort on errors that affect every provider alike

use async_trait::async_trait;
use bulwark_core::{ErrorKind, ExecutionError, ExecutionResult, QueuedOperation};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{BackendError, BackendRegistry};
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::offline_queue::OperationExecutor;
use crate::resilience::{BackupStore, ChainRegistry, HealthTracker};

/// Per-call overrides for [`FallbackRouter::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// Replaces the chain's per-attempt deadline
    pub timeout: Option<Duration>,

    /// Providers not to attempt on this call
    pub excluded_providers: Vec<String>,

    /// Tag for logs (e.g. "recovery", "drain")
    pub caller: Option<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Do not attempt this provider.
    pub fn exclude(mut self, provider: impl Into<String>) -> Self {
        self.excluded_providers.push(provider.into());
        self
    }

    /// Tag the call for logs.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    fn is_excluded(&self, provider: &str) -> bool {
        self.excluded_providers.iter().any(|p| p == provider)
    }
}

/// Routes operations through their fallback chains.
///
/// # Architecture
/// - Chains are read once per call from the copy-on-write registry, so a
///   concurrent chain replacement never changes an in-flight call
/// - Health is read before each attempt and written after it
/// - A timed-out attempt's future is dropped, so a late answer can never be
///   recorded a second time
/// - Successful payloads feed the backup store used by recovery
pub struct FallbackRouter {
    chains: Arc<ChainRegistry>,
    health: Arc<HealthTracker>,
    backends: Arc<BackendRegistry>,
    backups: Option<Arc<BackupStore>>,
    events: Arc<dyn EventSink>,
}

impl FallbackRouter {
    /// Create a new router.
    pub fn new(
        chains: Arc<ChainRegistry>,
        health: Arc<HealthTracker>,
        backends: Arc<BackendRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            chains,
            health,
            backends,
            backups: None,
            events,
        }
    }

    /// Store successful payloads in `backups`.
    pub fn with_backups(mut self, backups: Arc<BackupStore>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Execute an operation through its chain.
    ///
    /// # Execution Flow
    /// 1. Look up the chain; unknown operations are rejected
    /// 2. Skip excluded providers and those past the chain's failure budget,
    ///    unless `retry_delay` has passed and the backend's health check passes
    /// 3. Invoke each remaining provider under the attempt deadline
    /// 4. Record the outcome; stop on success or on a critical-for-routing error
    ///
    /// Never panics and never returns `Err`: failures are described by the
    /// returned [`ExecutionResult`].
    pub async fn execute(
        &self,
        operation: &str,
        params: &JsonValue,
        opts: &ExecutionOptions,
    ) -> ExecutionResult {
        let started = Instant::now();

        let Some(chain) = self.chains.get(operation) else {
            tracing::warn!(operation = %operation, "No fallback chain registered");
            return ExecutionResult::rejected(operation, ExecutionError::unknown_operation(operation));
        };

        let timeout = opts.timeout.unwrap_or(chain.timeout);
        let caller = opts.caller.as_deref().unwrap_or("direct");
        let mut attempted: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut last_error: Option<ExecutionError> = None;

        for provider in &chain.providers {
            if opts.is_excluded(provider) {
                tracing::debug!(operation = %operation, provider = %provider, "Provider excluded for this call");
                skipped.push(provider.clone());
                continue;
            }

            let health = self.health.get(provider);
            let trial = health.exceeds_budget(chain.max_failures);
            if trial && !health.trial_due(chain.retry_delay, Utc::now()) {
                tracing::warn!(
                    operation = %operation,
                    provider = %provider,
                    failures = health.consecutive_failures,
                    max_failures = chain.max_failures,
                    "Skipping provider past its failure budget"
                );
                skipped.push(provider.clone());
                continue;
            }

            let Some(backend) = self.backends.get(provider) else {
                tracing::warn!(operation = %operation, provider = %provider, "No backend registered for provider");
                skipped.push(provider.clone());
                last_error.get_or_insert_with(|| {
                    ExecutionError::new(ErrorKind::ProviderError, "No backend registered")
                        .with_provider(provider.as_str())
                });
                continue;
            };

            if trial {
                let check_started = Instant::now();
                let alive = tokio::time::timeout(timeout, backend.health_check())
                    .await
                    .unwrap_or(false);
                if !alive {
                    tracing::debug!(operation = %operation, provider = %provider, "Trial health check failed");
                    self.health
                        .record_failure(provider, check_started.elapsed(), "Health check failed");
                    skipped.push(provider.clone());
                    continue;
                }
                tracing::info!(
                    operation = %operation,
                    provider = %provider,
                    retry_delay_ms = chain.retry_delay.as_millis() as u64,
                    "Trial call to provider past its failure budget"
                );
            }

            attempted.push(provider.clone());
            self.events.emit(&EngineEvent::FallbackAttempt {
                operation: operation.to_string(),
                provider: provider.clone(),
                attempt: attempted.len(),
            });

            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, backend.invoke(operation, params)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };
            let latency = attempt_started.elapsed();

            match outcome {
                Ok(output) => {
                    self.health.record_success(provider, latency);

                    if let Some(backups) = &self.backups {
                        backups.insert(operation, params, output.clone()).await;
                    }

                    let fallback_used = attempted.len() > 1;
                    tracing::info!(
                        operation = %operation,
                        provider = %provider,
                        caller = %caller,
                        attempts = attempted.len(),
                        latency_ms = latency.as_millis() as u64,
                        "Operation succeeded"
                    );
                    self.events.emit(&EngineEvent::FallbackSuccess {
                        operation: operation.to_string(),
                        provider: provider.clone(),
                        attempts: attempted.len(),
                        fallback_used,
                    });

                    return ExecutionResult {
                        operation: operation.to_string(),
                        success: true,
                        output: Some(output),
                        error: None,
                        provider: Some(provider.clone()),
                        elapsed: started.elapsed(),
                        attempted_providers: attempted,
                        skipped_providers: skipped,
                        fallback_used,
                    };
                }
                Err(err) => {
                    self.health.record_failure(provider, latency, &err.to_string());
                    let error = err.into_execution_error(provider);
                    let abort = error.kind.is_critical_for_routing();

                    tracing::warn!(
                        operation = %operation,
                        provider = %provider,
                        caller = %caller,
                        kind = %error.kind,
                        error = %error.message,
                        "Provider attempt failed"
                    );
                    last_error = Some(error);

                    if abort {
                        tracing::warn!(
                            operation = %operation,
                            provider = %provider,
                            "Error affects every provider, abandoning the chain"
                        );
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            ExecutionError::new(
                ErrorKind::ProviderError,
                format!("No provider available for '{}'", operation),
            )
        });

        self.events.emit(&EngineEvent::FallbackExhausted {
            operation: operation.to_string(),
            attempted: attempted.clone(),
            error: Some(error.kind),
        });

        let fallback_used = attempted.len() > 1;
        ExecutionResult {
            operation: operation.to_string(),
            success: false,
            output: None,
            error: Some(error),
            provider: None,
            elapsed: started.elapsed(),
            attempted_providers: attempted,
            skipped_providers: skipped,
            fallback_used,
        }
    }

    /// Chain registry used by this router.
    pub fn chains(&self) -> &Arc<ChainRegistry> {
        &self.chains
    }

    /// Health tracker updated by this router.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Backend registry consulted by this router.
    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }
}

impl Default for FallbackRouter {
    fn default() -> Self {
        Self::new(
            Arc::new(ChainRegistry::new()),
            Arc::new(HealthTracker::default()),
            Arc::new(BackendRegistry::new()),
            Arc::new(TracingSink),
        )
    }
}

impl std::fmt::Debug for FallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRouter")
            .field("operations", &self.chains.operations())
            .field("backups", &self.backups.is_some())
            .finish()
    }
}

/// Queued operations replay through the same chain they would have used.
#[async_trait]
impl OperationExecutor for FallbackRouter {
    async fn execute_queued(&self, queued: &QueuedOperation) -> Result<JsonValue, ExecutionError> {
        let opts = ExecutionOptions::new().with_caller("drain");
        let result = self.execute(&queued.operation, &queued.payload, &opts).await;
        if result.success {
            Ok(result.output.unwrap_or(JsonValue::Null))
        } else {
            Err(result.error.unwrap_or_else(|| {
                ExecutionError::new(ErrorKind::ProviderError, "Execution failed")
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedOutcome};
    use crate::events::ChannelSink;
    use bulwark_core::{FallbackChain, HealthStatus};
    use proptest::prelude::*;

    struct Fixture {
        router: FallbackRouter,
        backends: Arc<BackendRegistry>,
        health: Arc<HealthTracker>,
    }

    fn fixture(chains: Vec<FallbackChain>) -> Fixture {
        let backends = Arc::new(BackendRegistry::new());
        let health = Arc::new(HealthTracker::default());
        let router = FallbackRouter::new(
            Arc::new(ChainRegistry::with_chains(chains)),
            health.clone(),
            backends.clone(),
            Arc::new(TracingSink),
        );
        Fixture {
            router,
            backends,
            health,
        }
    }

    fn chain(op: &str, providers: &[&str]) -> FallbackChain {
        FallbackChain::new(op, providers.iter().map(|p| p.to_string()).collect())
    }

    fn params() -> JsonValue {
        serde_json::json!({"prompt": "hello"})
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let f = fixture(vec![]);
        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownOperation));
        assert!(result.attempted_providers.is_empty());
    }

    #[tokio::test]
    async fn test_first_provider_success() {
        let f = fixture(vec![chain("generate", &["a", "b"])]);
        let a = Arc::new(ScriptedBackend::succeeding("a"));
        let b = Arc::new(ScriptedBackend::succeeding("b"));
        f.backends.register("a", a.clone());
        f.backends.register("b", b.clone());

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("a"));
        assert_eq!(result.attempted_providers, vec!["a"]);
        assert!(!result.fallback_used);
        assert_eq!(result.output.unwrap()["provider"], "a");
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_to_last_provider() {
        let f = fixture(vec![chain("generate", &["A", "B", "C"])]);
        let provider_error = || BackendError::Provider("model overloaded".to_string());
        f.backends.register("A", Arc::new(ScriptedBackend::failing("A", provider_error())));
        f.backends.register("B", Arc::new(ScriptedBackend::failing("B", provider_error())));
        f.backends.register("C", Arc::new(ScriptedBackend::succeeding("C")));

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("C"));
        assert_eq!(result.attempted_providers, vec!["A", "B", "C"]);
        assert!(result.fallback_used);

        assert_eq!(f.health.get("A").consecutive_failures, 1);
        assert_eq!(f.health.get("B").status, HealthStatus::Degraded);
        assert_eq!(f.health.get("C").status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_provider_past_budget_is_never_invoked() {
        let f = fixture(vec![chain("generate", &["spy", "b"]).with_max_failures(3)]);
        let spy = Arc::new(ScriptedBackend::succeeding("spy"));
        f.backends.register("spy", spy.clone());
        f.backends.register("b", Arc::new(ScriptedBackend::succeeding("b")));

        for _ in 0..4 {
            f.health.record_failure("spy", Duration::from_millis(5), "boom");
        }

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert_eq!(spy.calls(), 0);
        assert!(result.success);
        assert_eq!(result.attempted_providers, vec!["b"]);
        assert_eq!(result.skipped_providers, vec!["spy"]);
        assert!(!result.fallback_used);
    }

    #[tokio::test]
    async fn test_provider_past_budget_recovers_after_retry_delay() {
        let retry_delay = Duration::from_millis(50);
        let f = fixture(vec![chain("generate", &["a"])
            .with_max_failures(3)
            .with_retry_delay(retry_delay)]);
        let a = Arc::new(ScriptedBackend::succeeding("a").with_script(
            (0..4).map(|_| ScriptedOutcome::Fail(BackendError::Provider("overloaded".to_string()))),
        ));
        f.backends.register("a", a.clone());

        for _ in 0..4 {
            let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
            assert!(!result.success);
        }
        assert_eq!(a.calls(), 4);

        // Within the retry delay the provider stays locked out
        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.skipped_providers, vec!["a"]);
        assert_eq!(a.calls(), 4);

        // A failing health check spends the trial without invoking
        a.set_healthy(false);
        tokio::time::sleep(retry_delay * 2).await;
        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
        assert!(!result.success);
        assert_eq!(a.calls(), 4);
        assert_eq!(f.health.get("a").consecutive_failures, 5);

        a.set_healthy(true);
        tokio::time::sleep(retry_delay * 2).await;
        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.attempted_providers, vec!["a"]);
        assert_eq!(f.health.get("a").status, HealthStatus::Healthy);

        for _ in 0..10 {
            let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
            assert!(result.success);
        }
        assert_eq!(a.calls(), 15);
    }

    #[tokio::test]
    async fn test_failed_provider_within_looser_budget_is_still_tried() {
        let f = fixture(vec![chain("generate", &["a"]).with_max_failures(5)]);
        let a = Arc::new(ScriptedBackend::succeeding("a"));
        f.backends.register("a", a.clone());

        for _ in 0..3 {
            f.health.record_failure("a", Duration::from_millis(5), "boom");
        }
        assert_eq!(f.health.get("a").status, HealthStatus::Failed);

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;
        assert!(result.success);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_chain() {
        let f = fixture(vec![chain("generate", &["openai", "anthropic"]).with_max_failures(3)]);
        let openai = Arc::new(ScriptedBackend::failing(
            "openai",
            BackendError::RateLimited { retry_after: None },
        ));
        let anthropic = Arc::new(ScriptedBackend::succeeding("anthropic"));
        f.backends.register("openai", openai.clone());
        f.backends.register("anthropic", anthropic.clone());

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.attempted_providers, vec!["openai"]);
        assert_eq!(result.error_kind(), Some(ErrorKind::RateLimitExceeded));
        assert_eq!(anthropic.calls(), 0);
        assert!(!result.fallback_used);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let f = fixture(vec![chain("generate", &["slow", "fast"]).with_timeout(Duration::from_secs(2))]);
        f.backends.register("slow", Arc::new(ScriptedBackend::hanging("slow")));
        f.backends.register("fast", Arc::new(ScriptedBackend::succeeding("fast")));

        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("fast"));
        assert_eq!(result.attempted_providers, vec!["slow", "fast"]);

        let slow = f.health.get("slow");
        assert_eq!(slow.consecutive_failures, 1);
        assert_eq!(slow.total_failures, 1);
        assert!(slow.last_error.unwrap().contains("Timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_override() {
        let f = fixture(vec![chain("generate", &["slow"]).with_timeout(Duration::from_secs(60))]);
        f.backends.register(
            "slow",
            Arc::new(ScriptedBackend::succeeding("slow").with_latency(Duration::from_secs(5))),
        );

        let opts = ExecutionOptions::new().with_timeout(Duration::from_secs(1));
        let result = f.router.execute("generate", &params(), &opts).await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ProviderTimeout));
    }

    #[tokio::test]
    async fn test_excluded_provider_skipped() {
        let f = fixture(vec![chain("generate", &["a", "b"])]);
        let a = Arc::new(ScriptedBackend::succeeding("a"));
        f.backends.register("a", a.clone());
        f.backends.register("b", Arc::new(ScriptedBackend::succeeding("b")));

        let opts = ExecutionOptions::new().exclude("a");
        let result = f.router.execute("generate", &params(), &opts).await;

        assert_eq!(result.provider.as_deref(), Some("b"));
        assert_eq!(result.skipped_providers, vec!["a"]);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_backend_skipped() {
        let f = fixture(vec![chain("generate", &["ghost"])]);
        let result = f.router.execute("generate", &params(), &ExecutionOptions::default()).await;

        assert!(!result.success);
        assert!(result.attempted_providers.is_empty());
        assert_eq!(result.skipped_providers, vec!["ghost"]);
        assert_eq!(result.error.unwrap().provider.as_deref(), Some("ghost"));
        assert_eq!(f.health.get("ghost").status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_success_feeds_backups() {
        let backups = Arc::new(BackupStore::default());
        let f = fixture(vec![chain("generate", &["a"])]);
        f.backends.register("a", Arc::new(ScriptedBackend::succeeding("a")));
        let router = f.router.with_backups(backups.clone());

        router.execute("generate", &params(), &ExecutionOptions::default()).await;

        let restored = backups.get("generate", &params()).await.unwrap();
        assert_eq!(restored["provider"], "a");
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let backends = Arc::new(BackendRegistry::new());
        let router = FallbackRouter::new(
            Arc::new(ChainRegistry::with_chains([chain("generate", &["a", "b"])])),
            Arc::new(HealthTracker::default()),
            backends.clone(),
            Arc::new(sink),
        );
        backends.register(
            "a",
            Arc::new(ScriptedBackend::succeeding("a").with_script([ScriptedOutcome::Fail(
                BackendError::Provider("boom".to_string()),
            )])),
        );
        backends.register("b", Arc::new(ScriptedBackend::succeeding("b")));

        router.execute("generate", &params(), &ExecutionOptions::default()).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "fallback-attempt",
                "provider-health-updated",
                "fallback-attempt",
                "provider-health-updated",
                "fallback-success",
            ]
        );
    }

    #[tokio::test]
    async fn test_executes_queued_operation() {
        let f = fixture(vec![chain("generate", &["a"])]);
        f.backends.register("a", Arc::new(ScriptedBackend::succeeding("a")));

        let queued = QueuedOperation {
            id: "op-1".to_string(),
            operation: "generate".to_string(),
            payload: params(),
            priority: Default::default(),
            queued_at: chrono::Utc::now(),
            sequence: 0,
            retry_count: 0,
            max_retries: 3,
            status: bulwark_core::OperationStatus::Processing,
            last_error: None,
            finished_at: None,
        };
        let output = f.router.execute_queued(&queued).await.unwrap();
        assert_eq!(output["provider"], "a");
    }

    proptest! {
        #[test]
        fn test_attempts_follow_chain_order(fail_count in 0usize..5) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let names: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let f = fixture(vec![chain("generate", &refs)]);
            for (i, name) in names.iter().enumerate() {
                let backend = if i < fail_count {
                    ScriptedBackend::failing(name.clone(), BackendError::Provider("boom".to_string()))
                } else {
                    ScriptedBackend::succeeding(name.clone())
                };
                f.backends.register(name.clone(), Arc::new(backend));
            }

            let result = runtime.block_on(f.router.execute(
                "generate",
                &params(),
                &ExecutionOptions::default(),
            ));

            prop_assert!(result.success);
            prop_assert_eq!(result.attempted_providers, names[..=fail_count].to_vec());
            prop_assert_eq!(result.fallback_used, fail_count > 0);
        }
    }
}
