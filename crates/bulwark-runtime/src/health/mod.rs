//! System health aggregation.
//!
//! The aggregator runs every registered [`HealthCheck`] in parallel, each
//! under its own timeout, and folds the results into one [`SystemHealth`]
//! whose overall status is the worst component status. It runs on its own
//! timer and is never on the execution path.
//!
//! Alerts fire when a component moves into `Warning` or `Critical`; a
//! component that stays in the same state does not alert again.

mod checks;

pub use checks::{
    classify, ConnectivityCheck, HealthCheck, ProviderPoolCheck, QueueBacklogCheck, ResourceCheck,
    ResourceSample,
};

use bulwark_core::config::SystemHealthConfig;
use bulwark_core::{ComponentHealth, ComponentStatus, HealthSnapshot, SystemHealth};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::events::{EngineEvent, EventSink, TracingSink};

#[derive(Default)]
struct AggregatorState {
    latest: Option<SystemHealth>,
    last_status: HashMap<String, ComponentStatus>,
    history: VecDeque<HealthSnapshot>,
}

/// Periodically folds named health checks into one status.
pub struct SystemHealthAggregator {
    config: SystemHealthConfig,
    checks: RwLock<Vec<Arc<dyn HealthCheck>>>,
    state: Mutex<AggregatorState>,
    events: Arc<dyn EventSink>,
}

impl SystemHealthAggregator {
    /// Create an aggregator with no checks.
    pub fn new(config: SystemHealthConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            checks: RwLock::new(Vec::new()),
            state: Mutex::new(AggregatorState::default()),
            events,
        }
    }

    /// Register a check. A check with the same name replaces the old one.
    pub fn add_check(&self, check: Arc<dyn HealthCheck>) {
        let mut checks = self.checks.write();
        checks.retain(|existing| existing.name() != check.name());
        checks.push(check);
    }

    /// Names of the registered checks.
    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .read()
            .iter()
            .map(|check| check.name().to_string())
            .collect()
    }

    /// Run every check now.
    pub async fn check_now(&self) -> SystemHealth {
        let checks: Vec<Arc<dyn HealthCheck>> = self.checks.read().clone();
        let timeout = self.config.check_timeout;

        let runs = checks.iter().map(|check| async move {
            let health = match tokio::time::timeout(timeout, check.check()).await {
                Ok(health) => health,
                Err(_) => ComponentHealth::warning(format!("Check timed out after {:?}", timeout)),
            };
            (check.name().to_string(), health)
        });
        let components: BTreeMap<String, ComponentHealth> =
            futures::future::join_all(runs).await.into_iter().collect();

        let health = SystemHealth::from_components(components);
        let alerts = self.record(&health);
        for alert in alerts {
            self.events.emit(&alert);
        }

        tracing::debug!(
            overall = ?health.overall,
            components = health.components.len(),
            "Health check finished"
        );
        health
    }

    /// Store the result and work out which components need an alert.
    fn record(&self, health: &SystemHealth) -> Vec<EngineEvent> {
        let mut state = self.state.lock();
        let mut alerts = Vec::new();

        for (name, component) in &health.components {
            let previous = state
                .last_status
                .insert(name.clone(), component.status)
                .unwrap_or(ComponentStatus::Healthy);
            if component.status == previous {
                continue;
            }
            match component.status {
                ComponentStatus::Critical => alerts.push(EngineEvent::CriticalAlert {
                    component: name.clone(),
                    message: component.message.clone(),
                }),
                ComponentStatus::Warning => alerts.push(EngineEvent::WarningAlert {
                    component: name.clone(),
                    message: component.message.clone(),
                }),
                ComponentStatus::Healthy => {
                    tracing::info!(component = %name, "Component recovered");
                }
            }
        }

        state.history.push_back(health.snapshot());
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }
        state.latest = Some(health.clone());

        alerts
    }

    /// Most recent result, if any check has run.
    pub fn latest(&self) -> Option<SystemHealth> {
        self.state.lock().latest.clone()
    }

    /// Snapshots taken within `window` of now, oldest first.
    pub fn get_history(&self, window: Duration) -> Vec<HealthSnapshot> {
        let state = self.state.lock();
        let Ok(window) = chrono::Duration::from_std(window) else {
            return state.history.iter().cloned().collect();
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(window) else {
            return state.history.iter().cloned().collect();
        };
        state
            .history
            .iter()
            .filter(|snapshot| snapshot.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Every retained snapshot, oldest first.
    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Check on the configured interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.config.interval, "Health aggregator started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_now().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Health aggregator stopped");
    }

    pub fn config(&self) -> &SystemHealthConfig {
        &self.config
    }
}

impl Default for SystemHealthAggregator {
    fn default() -> Self {
        Self::new(SystemHealthConfig::default(), Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for SystemHealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHealthAggregator")
            .field("checks", &self.check_names())
            .field("history", &self.state.lock().history.len())
            .finish()
    }
}
