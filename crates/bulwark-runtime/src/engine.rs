//! The engine: every component wired together, plus its background tasks.
//!
//! An [`Engine`] owns its components by `Arc` and holds no global state, so
//! several engines can run side by side. Background work (the connectivity
//! probe loop, the health check loop and the drain-on-reconnect watcher)
//! starts on [`Engine::start`] and stops on [`Engine::shutdown`].

use bulwark_core::{
    Connectivity, EngineConfig, ErrorContext, ErrorKind, ExecutionError, ExecutionResult,
    Priority,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendFactory, BackendRegistry, ScriptedBackendFactory};
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe, TcpProbe};
use crate::diagnostics::DiagnosticsReport;
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::health::{
    ConnectivityCheck, HealthCheck, ProviderPoolCheck, QueueBacklogCheck, ResourceCheck,
    SystemHealthAggregator,
};
use crate::offline_queue::{NewOperation, OfflineQueue, QueueError};
use crate::recovery::{ErrorRecoveryEngine, HandlingResult};
use crate::resilience::{BackupStore, ChainRegistry, HealthTracker};
use crate::router::{ExecutionOptions, FallbackRouter};
use crate::EngineError;

/// Error log entries included in a diagnostics export.
const DIAGNOSTIC_ERROR_LIMIT: usize = 100;

/// What [`Engine::execute_or_defer`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredOutcome {
    /// Router result; absent when the operation was queued without an attempt
    pub result: Option<ExecutionResult>,

    /// Recovery outcome when the attempt failed
    pub handling: Option<HandlingResult>,

    /// Queue id when the operation was deferred
    pub queued_id: Option<String>,
}

impl DeferredOutcome {
    /// Result payload, from the router or from a recovery step.
    pub fn output(&self) -> Option<&JsonValue> {
        self.result
            .as_ref()
            .and_then(|r| r.output.as_ref())
            .or_else(|| self.handling.as_ref().and_then(|h| h.output.as_ref()))
    }

    /// True if the caller got a usable result now.
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
            || self.handling.as_ref().is_some_and(|h| h.recovered && h.queued_id.is_none())
    }

    /// True if the operation will run later.
    pub fn is_deferred(&self) -> bool {
        self.queued_id.is_some()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    events: Option<Arc<dyn EventSink>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    backends: Vec<(String, Arc<dyn Backend>)>,
    factories: Vec<Arc<dyn BackendFactory>>,
    checks: Vec<Arc<dyn HealthCheck>>,
    resource_checks: bool,
}

impl EngineBuilder {
    /// Create a builder from configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            events: None,
            probe: None,
            backends: Vec::new(),
            factories: Vec::new(),
            checks: Vec::new(),
            resource_checks: true,
        }
    }

    /// Report events to `sink` instead of only logging them.
    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Use `probe` for connectivity checks.
    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Register a backend directly. Overrides a configured backend of the same id.
    pub fn backend(mut self, provider: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.backends.push((provider.into(), backend));
        self
    }

    /// Make a backend type available to the `backends` config section.
    pub fn factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Add a health check alongside the built-in ones.
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Skip the CPU, memory and disk check.
    pub fn without_resource_checks(mut self) -> Self {
        self.resource_checks = false;
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let config = self.config;
        let events = self.events.unwrap_or_else(|| Arc::new(TracingSink));
        let probe = self.probe.unwrap_or_else(|| Arc::new(TcpProbe));

        let backends = Arc::new(BackendRegistry::new());
        backends.register_factory(Arc::new(ScriptedBackendFactory));
        for factory in self.factories {
            backends.register_factory(factory);
        }
        backends.load(&config.backends)?;
        for (provider, backend) in self.backends {
            backends.register(provider, backend);
        }

        let chains = Arc::new(ChainRegistry::with_chains(config.fallback_chains()));
        let health = Arc::new(HealthTracker::new(config.health.clone(), events.clone()));
        let backups = Arc::new(BackupStore::new(
            config.recovery.backup_capacity,
            config.recovery.backup_ttl,
        ));

        let router = Arc::new(
            FallbackRouter::new(chains.clone(), health.clone(), backends.clone(), events.clone())
                .with_backups(backups.clone()),
        );

        let connectivity = Arc::new(ConnectivityMonitor::new(
            config.connectivity.clone(),
            probe,
            events.clone(),
        ));

        let queue = Arc::new(OfflineQueue::new(config.offline_queue.clone(), events.clone()));
        queue.set_executor(router.clone());

        let recovery = Arc::new(ErrorRecoveryEngine::new(
            config.recovery.clone(),
            router.clone(),
            queue.clone(),
            connectivity.clone(),
            backups.clone(),
            events.clone(),
        ));

        let aggregator = Arc::new(SystemHealthAggregator::new(
            config.system_health.clone(),
            events.clone(),
        ));
        if self.resource_checks {
            let thresholds = &config.system_health;
            aggregator.add_check(Arc::new(ResourceCheck::new(
                thresholds.cpu,
                thresholds.memory,
                thresholds.disk,
            )));
        }
        aggregator.add_check(Arc::new(ConnectivityCheck::new(connectivity.clone())));
        aggregator.add_check(Arc::new(ProviderPoolCheck::new(chains.clone(), health.clone())));
        aggregator.add_check(Arc::new(QueueBacklogCheck::new(
            queue.clone(),
            config.system_health.queue_backlog_warning,
        )));
        for check in self.checks {
            aggregator.add_check(check);
        }

        tracing::info!(
            chains = chains.operations().len(),
            backends = backends.providers().len(),
            "Engine built"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Engine {
            config,
            events,
            backends,
            chains,
            health,
            backups,
            router,
            connectivity,
            queue,
            recovery,
            aggregator,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Resilience engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Engine::from_config(EngineConfig::from_file("bulwark.yaml")?)?;
/// engine.start();
///
/// let outcome = engine
///     .execute_or_defer("generate", json!({"prompt": "hi"}), Priority::Normal)
///     .await?;
/// if outcome.is_deferred() {
///     println!("{}", outcome.handling.unwrap().message.summary);
/// }
///
/// engine.shutdown().await;
/// ```
pub struct Engine {
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    backends: Arc<BackendRegistry>,
    chains: Arc<ChainRegistry>,
    health: Arc<HealthTracker>,
    backups: Arc<BackupStore>,
    router: Arc<FallbackRouter>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<OfflineQueue>,
    recovery: Arc<ErrorRecoveryEngine>,
    aggregator: Arc<SystemHealthAggregator>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine with default probe and event sink.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start the background loops. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::warn!("Engine already started");
            return;
        }
        self.shutdown.send_replace(false);

        // Subscribe before the probe loop can change the state
        let state = self.connectivity.subscribe();

        tasks.push(tokio::spawn(
            self.connectivity.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.aggregator.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(drain_on_reconnect(
            self.queue.clone(),
            state,
            self.shutdown.subscribe(),
        )));

        tracing::info!(tasks = tasks.len(), "Engine started");
    }

    /// True between `start` and `shutdown`.
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Stop the background loops and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Engine stopped");
    }

    /// Execute an operation through its fallback chain.
    pub async fn execute(&self, operation: &str, params: &JsonValue) -> ExecutionResult {
        self.router
            .execute(operation, params, &ExecutionOptions::default())
            .await
    }

    /// Execute with per-call overrides.
    pub async fn execute_with(
        &self,
        operation: &str,
        params: &JsonValue,
        opts: &ExecutionOptions,
    ) -> ExecutionResult {
        self.router.execute(operation, params, opts).await
    }

    /// Execute, deferring or recovering when that fails.
    ///
    /// While offline an online-required operation is queued without being
    /// attempted. Otherwise it runs through its chain and any failure is
    /// handed to the recovery engine, which may retry, switch provider,
    /// queue it or restore a stored result.
    pub async fn execute_or_defer(
        &self,
        operation: &str,
        params: JsonValue,
        priority: Priority,
    ) -> Result<DeferredOutcome, EngineError> {
        if self.connectivity.is_offline() && self.queue.config().is_online_required(operation) {
            let id = self
                .queue
                .enqueue(NewOperation::new(operation, params).with_priority(priority))?;
            tracing::info!(operation = %operation, id = %id, "Offline; operation deferred");
            return Ok(DeferredOutcome {
                result: None,
                handling: None,
                queued_id: Some(id),
            });
        }

        let result = self
            .router
            .execute(operation, &params, &ExecutionOptions::default())
            .await;
        if result.success {
            return Ok(DeferredOutcome {
                result: Some(result),
                handling: None,
                queued_id: None,
            });
        }

        let error = result
            .error
            .clone()
            .unwrap_or_else(|| ExecutionError::new(ErrorKind::ProviderError, "Execution failed"));
        let mut context = ErrorContext::new(operation, "router")
            .with_params(params)
            .with_priority(priority);
        if let Some(provider) = error.provider.as_ref().or(result.attempted_providers.last()) {
            context = context.with_provider(provider.as_str());
        }

        let handling = self.recovery.handle(&error, context).await;
        Ok(DeferredOutcome {
            result: Some(result),
            queued_id: handling.queued_id.clone(),
            handling: Some(handling),
        })
    }

    /// Hand an error from outside the router to the recovery engine.
    pub async fn handle_error(&self, error: &ExecutionError, context: ErrorContext) -> HandlingResult {
        self.recovery.handle(error, context).await
    }

    /// Replay queued operations now.
    pub async fn drain_queue(&self) -> Result<crate::offline_queue::DrainReport, EngineError> {
        Ok(self.queue.drain().await?)
    }

    /// Snapshot the engine for support tooling.
    ///
    /// Runs a fresh health check so the report reflects the moment of export.
    pub async fn diagnostics(&self) -> DiagnosticsReport {
        let system_health = self.aggregator.check_now().await;

        let mut provider_health: BTreeMap<_, _> = self.health.get_all().into_iter().collect();
        for provider in self.chains.providers() {
            if !provider_health.contains_key(&provider) {
                let health = self.health.get(&provider);
                provider_health.insert(provider, health);
            }
        }

        let report = DiagnosticsReport {
            generated_at: chrono::Utc::now(),
            system_health,
            recent_errors: self.recovery.recent(DIAGNOSTIC_ERROR_LIMIT),
            error_stats: self.recovery.statistics(),
            connectivity: self.connectivity.state(),
            connectivity_history: self.connectivity.history(),
            health_history: self.aggregator.history(),
            provider_health,
            queue_stats: self.queue.stats(),
        };

        self.events.emit(&EngineEvent::DiagnosticsExportCompleted {
            errors: report.recent_errors.len(),
            overall: report.system_health.overall,
        });
        report
    }

    /// Snapshot the engine and write the report to `path`.
    pub async fn export_diagnostics(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<DiagnosticsReport, EngineError> {
        let report = self.diagnostics().await;
        report.write_to(path)?;
        Ok(report)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<FallbackRouter> {
        &self.router
    }

    pub fn chains(&self) -> &Arc<ChainRegistry> {
        &self.chains
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }

    pub fn backups(&self) -> &Arc<BackupStore> {
        &self.backups
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryEngine> {
        &self.recovery
    }

    pub fn aggregator(&self) -> &Arc<SystemHealthAggregator> {
        &self.aggregator
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("chains", &self.chains.operations())
            .field("connectivity", &self.connectivity.state())
            .field("queued", &self.queue.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Drain the queue each time connectivity comes back.
async fn drain_on_reconnect(
    queue: Arc<OfflineQueue>,
    mut state: watch::Receiver<Connectivity>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = state.borrow_and_update().is_online();
                if !online || queue.is_empty() {
                    continue;
                }
                match queue.drain().await {
                    Ok(report) => tracing::info!(
                        processed = report.processed,
                        completed = report.completed,
                        failed = report.failed,
                        "Drained offline queue after reconnect"
                    ),
                    Err(QueueError::DrainInProgress) => {
                        tracing::debug!("Drain already running")
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not drain offline queue"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::events::ChannelSink;
    use async_trait::async_trait;
    use bulwark_core::{ComponentStatus, OperationStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct SwitchProbe(AtomicBool);

    impl SwitchProbe {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(reachable)))
        }
    }

    #[async_trait]
    impl ReachabilityProbe for SwitchProbe {
        async fn probe(&self, _endpoint: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    const CONFIG: &str = r#"
chains:
  generate:
    providers: [openai, anthropic, ollama]
    timeout: 2s
  analyze:
    providers: [anthropic]
backends:
  openai: { type: scripted, fail_with: "upstream returned 503 Service Unavailable" }
  anthropic: { type: scripted, response: { text: "from anthropic" } }
  ollama: { type: scripted }
connectivity:
  endpoints: ["probe.test:53"]
recovery:
  backoff: { min_delay: 1ms, max_delay: 5ms, max_retries: 2 }
"#;

    fn engine_with(yaml: &str, probe: Arc<SwitchProbe>) -> Engine {
        EngineBuilder::new(EngineConfig::from_yaml(yaml).unwrap())
            .probe(probe)
            .without_resource_checks()
            .build()
            .unwrap()
    }

    fn engine() -> Engine {
        engine_with(CONFIG, SwitchProbe::new(true))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_falls_back_to_second_provider() {
        let engine = engine();
        let result = engine.execute("generate", &json!({"prompt": "hi"})).await;

        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("anthropic"));
        assert!(result.fallback_used);
        assert_eq!(result.output, Some(json!({"text": "from anthropic"})));
        assert_eq!(engine.health().get("openai").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_success_needs_no_recovery() {
        let engine = engine();
        let outcome = engine
            .execute_or_defer("analyze", json!({}), Priority::Normal)
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.handling.is_none());
        assert!(!outcome.is_deferred());
    }

    #[tokio::test]
    async fn test_offline_defers_without_attempt() {
        let spy = Arc::new(ScriptedBackend::succeeding("anthropic"));
        let engine = EngineBuilder::new(EngineConfig::from_yaml(CONFIG).unwrap())
            .probe(SwitchProbe::new(false))
            .backend("anthropic", spy.clone())
            .without_resource_checks()
            .build()
            .unwrap();
        engine.connectivity().set_state(Connectivity::Offline, "test");

        let outcome = engine
            .execute_or_defer("analyze", json!({"doc": 1}), Priority::High)
            .await
            .unwrap();

        assert!(outcome.is_deferred());
        assert!(outcome.result.is_none());
        assert_eq!(spy.calls(), 0);
        let queued = engine.queue().status(outcome.queued_id.as_deref().unwrap()).unwrap();
        assert_eq!(queued.priority, Priority::High);
    }

    #[tokio::test]
    async fn test_offline_capable_runs_while_offline() {
        let yaml = r#"
chains:
  local-save:
    providers: [disk]
backends:
  disk: { type: scripted }
"#;
        let engine = engine_with(yaml, SwitchProbe::new(false));
        engine.connectivity().set_state(Connectivity::Offline, "test");

        let outcome = engine
            .execute_or_defer("local-save", json!({}), Priority::Normal)
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert!(engine.queue().is_empty());
    }

    #[tokio::test]
    async fn test_failure_recovered_by_retry() {
        let yaml = r#"
chains:
  generate:
    providers: [flaky]
    retry_delay: 5ms
backends:
  flaky: { type: scripted, fail_with: "ECONNRESET", fail_times: 1, response: { ok: true } }
connectivity:
  endpoints: ["probe.test:53"]
recovery:
  backoff: { min_delay: 1ms, max_delay: 5ms, max_retries: 2 }
"#;
        let engine = engine_with(yaml, SwitchProbe::new(true));

        let outcome = engine
            .execute_or_defer("generate", json!({}), Priority::Normal)
            .await
            .unwrap();

        let handling = outcome.handling.as_ref().unwrap();
        assert!(handling.recovered);
        assert!(outcome.succeeded());
        assert_eq!(outcome.output(), Some(&json!({"ok": true})));
        assert_eq!(engine.recovery().recent(10).len(), 1);
    }

    #[tokio::test]
    async fn test_failure_while_unreachable_is_queued_by_recovery() {
        let yaml = r#"
chains:
  generate:
    providers: [remote]
backends:
  remote: { type: scripted, fail_with: "ENOTFOUND api.test" }
connectivity:
  endpoints: ["probe.test:53"]
recovery:
  strategies:
    generate: [enable-offline-mode]
"#;
        let engine = engine_with(yaml, SwitchProbe::new(false));

        let outcome = engine
            .execute_or_defer("generate", json!({"prompt": "hi"}), Priority::Low)
            .await
            .unwrap();

        assert!(outcome.is_deferred());
        assert!(!outcome.succeeded());
        assert!(engine.connectivity().is_offline());
        assert_eq!(engine.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let probe = SwitchProbe::new(false);
        let engine = engine_with(CONFIG, probe.clone());
        engine.connectivity().set_state(Connectivity::Offline, "test");

        let outcome = engine
            .execute_or_defer("analyze", json!({}), Priority::Normal)
            .await
            .unwrap();
        let id = outcome.queued_id.unwrap();

        probe.0.store(true, Ordering::SeqCst);
        engine.start();

        let queue = engine.queue().clone();
        wait_for(|| {
            queue.status(&id).map(|op| op.status) == Some(OperationStatus::Completed)
        })
        .await;
        assert!(queue.is_empty());
        assert!(!engine.connectivity().is_offline());

        engine.shutdown().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_stops() {
        let engine = engine();
        engine.start();
        engine.start();
        assert!(engine.is_running());

        engine.shutdown().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_diagnostics_export() {
        let (sink, mut rx) = ChannelSink::new();
        let engine = EngineBuilder::new(EngineConfig::from_yaml(CONFIG).unwrap())
            .probe(SwitchProbe::new(true))
            .events(Arc::new(sink))
            .without_resource_checks()
            .build()
            .unwrap();

        engine
            .handle_error(
                &ExecutionError::new(ErrorKind::ValidationError, "bad input"),
                ErrorContext::new("local-edit", "editor"),
            )
            .await;

        let path = std::env::temp_dir().join(format!("bulwark-engine-{}.json", uuid::Uuid::new_v4()));
        let report = engine.export_diagnostics(&path).await.unwrap();
        let read_back =
            DiagnosticsReport::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        let fresh = engine.aggregator().check_now().await;
        assert_eq!(read_back.system_health.overall, fresh.overall);
        assert_eq!(read_back.system_health.overall, report.system_health.overall);
        assert_eq!(read_back.recent_errors.len(), 1);
        assert!(read_back.provider_health.contains_key("ollama"));

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"diagnostics-export-completed"));
    }

    #[tokio::test]
    async fn test_custom_health_check() {
        struct AlwaysCritical;

        #[async_trait]
        impl HealthCheck for AlwaysCritical {
            fn name(&self) -> &str {
                "database"
            }

            async fn check(&self) -> bulwark_core::ComponentHealth {
                bulwark_core::ComponentHealth::critical("connection pool exhausted")
            }
        }

        let engine = EngineBuilder::new(EngineConfig::default())
            .health_check(Arc::new(AlwaysCritical))
            .without_resource_checks()
            .build()
            .unwrap();

        let health = engine.aggregator().check_now().await;
        assert_eq!(health.overall, ComponentStatus::Critical);
        assert!(health.components.contains_key("providers"));
    }

    #[tokio::test]
    async fn test_engines_are_independent() {
        let first = engine();
        let second = engine();
        first.connectivity().set_state(Connectivity::Offline, "test");

        first
            .execute_or_defer("analyze", json!({}), Priority::Normal)
            .await
            .unwrap();

        assert_eq!(first.queue().len(), 1);
        assert!(second.queue().is_empty());
        assert!(!second.connectivity().is_offline());
    }

    #[test]
    fn test_unknown_backend_type_fails_build() {
        let config = EngineConfig::from_yaml("backends:\n  x: { type: carrier-pigeon }\n").unwrap();
        assert!(matches!(
            EngineBuilder::new(config).build(),
            Err(EngineError::Backend(_))
        ));
    }
}
