//! Per-provider rolling health records.
//!
//! Every attempted call reports its outcome here. The tracker only labels
//! providers Healthy/Degraded/Failed; deciding when to stop calling one is
//! the job of the chain's failure budget (see [`ProviderHealth::exceeds_budget`]).
//!
//! Each provider has its own lock, so concurrent outcomes for different
//! providers never contend. Readers may see slightly stale values.

use bulwark_core::config::HealthConfig;
use bulwark_core::{HealthStatus, ProviderHealth};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::events::{EngineEvent, EventSink, TracingSink};

type Slot = Arc<Mutex<ProviderHealth>>;

/// Tracks health for every provider the engine has called.
pub struct HealthTracker {
    records: RwLock<HashMap<String, Slot>>,
    config: HealthConfig,
    events: Arc<dyn EventSink>,
}

impl HealthTracker {
    /// Create a new tracker.
    pub fn new(config: HealthConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
            events,
        }
    }

    /// Slot for a provider, created on first use.
    fn slot(&self, provider: &str) -> Slot {
        if let Some(slot) = self.records.read().get(provider) {
            return slot.clone();
        }
        self.records
            .write()
            .entry(provider.to_string())
            .or_default()
            .clone()
    }

    /// Record the outcome of one call.
    pub fn record_outcome(&self, provider: &str, success: bool, latency: Duration) -> ProviderHealth {
        self.update(provider, success, latency, None)
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: &str, latency: Duration) -> ProviderHealth {
        self.update(provider, true, latency, None)
    }

    /// Record a failed call with its error message.
    pub fn record_failure(&self, provider: &str, latency: Duration, error: &str) -> ProviderHealth {
        self.update(provider, false, latency, Some(error))
    }

    fn update(
        &self,
        provider: &str,
        success: bool,
        latency: Duration,
        error: Option<&str>,
    ) -> ProviderHealth {
        let slot = self.slot(provider);
        let snapshot = {
            let mut health = slot.lock();
            let latency_ms = latency.as_secs_f64() * 1000.0;

            if success {
                health.consecutive_failures = 0;
                health.total_successes += 1;
                health.status = if latency > self.config.slow_threshold {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };

                let w = self.config.latency_weight;
                health.average_response_time_ms = if health.average_response_time_ms == 0.0 {
                    latency_ms
                } else {
                    health.average_response_time_ms * (1.0 - w) + latency_ms * w
                };
            } else {
                health.consecutive_failures += 1;
                health.total_failures += 1;
                health.status = if health.consecutive_failures >= self.config.failure_threshold {
                    HealthStatus::Failed
                } else {
                    HealthStatus::Degraded
                };
                health.last_error = error.map(str::to_string);
            }

            let w = self.config.availability_weight;
            let sample = if success { 1.0 } else { 0.0 };
            health.availability = (health.availability * (1.0 - w) + sample * w).clamp(0.0, 1.0);
            health.last_checked_at = Some(Utc::now());
            health.clone()
        };

        if snapshot.status == HealthStatus::Failed && !success {
            tracing::warn!(
                provider = %provider,
                failures = snapshot.consecutive_failures,
                "Provider marked failed after repeated failures"
            );
        }

        self.events.emit(&EngineEvent::ProviderHealthUpdated {
            provider: provider.to_string(),
            status: snapshot.status,
            consecutive_failures: snapshot.consecutive_failures,
        });

        snapshot
    }

    /// Current health of a provider; `Unknown` if never called.
    pub fn get(&self, provider: &str) -> ProviderHealth {
        self.records
            .read()
            .get(provider)
            .map(|slot| slot.lock().clone())
            .unwrap_or_default()
    }

    /// Health of every provider seen so far.
    pub fn get_all(&self) -> HashMap<String, ProviderHealth> {
        self.records
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.lock().clone()))
            .collect()
    }

    /// Forget a provider's history.
    pub fn reset(&self, provider: &str) {
        self.records.write().remove(provider);
    }

    /// Forget every provider.
    pub fn reset_all(&self) {
        self.records.write().clear();
    }

    /// Tracker configuration.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default(), Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("providers", &self.records.read().len())
            .field("config", &self.config)
            .finish()
    }
}
