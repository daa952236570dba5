//! Scripted backend for simulations and tests.
//!
//! Replays a queue of outcomes, then repeats a default outcome forever.
//! Every call is counted, so it doubles as a spy.

use async_trait::async_trait;
use bulwark_core::duration::humantime_str;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Backend, BackendError, BackendFactory};

/// What one scripted call does.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Answer with this payload
    Succeed(JsonValue),

    /// Fail with this error
    Fail(BackendError),

    /// Never answer
    Hang,
}

/// Backend that replays scripted outcomes.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    latency: Duration,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    default_outcome: ScriptedOutcome,
    calls: AtomicU32,
    healthy: AtomicBool,
}

impl ScriptedBackend {
    /// Create a backend that repeats `default_outcome`.
    pub fn new(name: impl Into<String>, default_outcome: ScriptedOutcome) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            default_outcome,
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Always answers `{"provider": name}`.
    pub fn succeeding(name: impl Into<String>) -> Self {
        let name = name.into();
        let payload = serde_json::json!({ "provider": name });
        Self::new(name, ScriptedOutcome::Succeed(payload))
    }

    /// Always fails with `error`.
    pub fn failing(name: impl Into<String>, error: BackendError) -> Self {
        Self::new(name, ScriptedOutcome::Fail(error))
    }

    /// Never answers.
    pub fn hanging(name: impl Into<String>) -> Self {
        Self::new(name, ScriptedOutcome::Hang)
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Play these outcomes first, in order.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Answer for later health checks.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of times `invoke` was entered.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn invoke(&self, _operation: &str, _params: &JsonValue) -> Result<JsonValue, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            ScriptedOutcome::Succeed(payload) => Ok(payload),
            ScriptedOutcome::Fail(error) => Err(error),
            ScriptedOutcome::Hang => futures::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct ScriptedConfig {
    #[serde(default, with = "humantime_str")]
    latency: Duration,

    /// Error message for failing calls, classified like a real backend's
    #[serde(default)]
    fail_with: Option<String>,

    /// Fail this many times before succeeding; absent means always fail
    #[serde(default)]
    fail_times: Option<u32>,

    /// Never answer
    #[serde(default)]
    hang: bool,

    #[serde(default)]
    response: Option<JsonValue>,
}

/// Builds [`ScriptedBackend`]s from `type: scripted` configuration.
///
/// ```yaml
/// backends:
///   openai: { type: scripted, latency: 40ms, fail_with: "429 Too Many Requests" }
///   ollama: { type: scripted, fail_with: "ECONNREFUSED", fail_times: 2 }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedBackendFactory;

impl ScriptedBackendFactory {
    fn parse(config: &JsonValue) -> Result<ScriptedConfig, BackendError> {
        serde_json::from_value(config.clone())
            .map_err(|e| BackendError::NotConfigured(format!("Invalid scripted backend config: {}", e)))
    }
}

impl BackendFactory for ScriptedBackendFactory {
    fn backend_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, provider: &str, config: &JsonValue) -> Result<Arc<dyn Backend>, BackendError> {
        let parsed = Self::parse(config)?;
        let success = ScriptedOutcome::Succeed(
            parsed
                .response
                .unwrap_or_else(|| serde_json::json!({ "provider": provider })),
        );

        let backend = if parsed.hang {
            ScriptedBackend::hanging(provider)
        } else {
            match (parsed.fail_with, parsed.fail_times) {
                (Some(message), Some(times)) => ScriptedBackend::new(provider, success).with_script(
                    (0..times).map(|_| ScriptedOutcome::Fail(BackendError::from_message(message.clone()))),
                ),
                (Some(message), None) => {
                    ScriptedBackend::failing(provider, BackendError::from_message(message))
                }
                (None, _) => ScriptedBackend::new(provider, success),
            }
        };

        Ok(Arc::new(backend.with_latency(parsed.latency)))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), BackendError> {
        Self::parse(config).map(|_| ())
    }

    fn description(&self) -> &'static str {
        "Scripted backend for simulations"
    }
}
