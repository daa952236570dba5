//! Built-in health checks.

use async_trait::async_trait;
use bulwark_core::config::Thresholds;
use bulwark_core::{ComponentHealth, ComponentStatus, HealthStatus};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};

use crate::connectivity::ConnectivityMonitor;
use crate::offline_queue::OfflineQueue;
use crate::resilience::{ChainRegistry, HealthTracker};

/// One named check folded into the system health.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Component name in the report.
    fn name(&self) -> &str;

    async fn check(&self) -> ComponentHealth;
}

// Two CPU refreshes this far apart give a usage reading
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Status of a percentage against its thresholds.
pub fn classify(value: f64, thresholds: &Thresholds) -> ComponentStatus {
    if value >= thresholds.critical {
        ComponentStatus::Critical
    } else if value >= thresholds.warning {
        ComponentStatus::Warning
    } else {
        ComponentStatus::Healthy
    }
}

/// Host resource usage, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu: f64,
    pub memory: f64,
    /// Fullest mounted disk
    pub disk: f64,
}

impl ResourceSample {
    /// Sample the host. Blocks for the CPU measurement interval.
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        std::thread::sleep(CPU_SAMPLE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu = sys.global_cpu_info().cpu_usage() as f64;

        let total_mem = sys.total_memory();
        let memory = if total_mem > 0 {
            sys.used_memory() as f64 / total_mem as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                used as f64 / d.total_space() as f64 * 100.0
            })
            .fold(0.0, f64::max);

        Self { cpu, memory, disk }
    }
}

/// CPU, memory and disk usage against configured thresholds.
#[derive(Debug, Clone)]
pub struct ResourceCheck {
    cpu: Thresholds,
    memory: Thresholds,
    disk: Thresholds,
}

impl ResourceCheck {
    pub fn new(cpu: Thresholds, memory: Thresholds, disk: Thresholds) -> Self {
        Self { cpu, memory, disk }
    }

    /// Judge a sample.
    pub fn evaluate(&self, sample: ResourceSample) -> ComponentHealth {
        let readings = [
            ("cpu", sample.cpu, &self.cpu),
            ("memory", sample.memory, &self.memory),
            ("disk", sample.disk, &self.disk),
        ];

        let mut status = ComponentStatus::Healthy;
        let mut notes = Vec::new();
        for (name, value, thresholds) in readings {
            let reading = classify(value, thresholds);
            if reading > ComponentStatus::Healthy {
                notes.push(format!("{} at {:.1}%", name, value));
            }
            status = status.max(reading);
        }

        let message = if notes.is_empty() {
            format!(
                "cpu {:.1}%, memory {:.1}%, disk {:.1}%",
                sample.cpu, sample.memory, sample.disk
            )
        } else {
            notes.join(", ")
        };

        ComponentHealth::new(status, message)
            .with_metric("cpu_percent", sample.cpu)
            .with_metric("memory_percent", sample.memory)
            .with_metric("disk_percent", sample.disk)
    }
}

#[async_trait]
impl HealthCheck for ResourceCheck {
    fn name(&self) -> &str {
        "resources"
    }

    async fn check(&self) -> ComponentHealth {
        match tokio::task::spawn_blocking(ResourceSample::collect).await {
            Ok(sample) => self.evaluate(sample),
            Err(e) => ComponentHealth::warning(format!("Resource sampling failed: {}", e)),
        }
    }
}

/// Reports the connectivity monitor's state.
#[derive(Debug)]
pub struct ConnectivityCheck {
    monitor: Arc<ConnectivityMonitor>,
}

impl ConnectivityCheck {
    pub fn new(monitor: Arc<ConnectivityMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl HealthCheck for ConnectivityCheck {
    fn name(&self) -> &str {
        "connectivity"
    }

    async fn check(&self) -> ComponentHealth {
        if self.monitor.is_offline() {
            ComponentHealth::warning("Offline; online operations are being deferred")
                .with_metric("online", 0.0)
        } else {
            ComponentHealth::healthy("Online").with_metric("online", 1.0)
        }
    }
}

/// Health of every provider referenced by a chain.
#[derive(Debug)]
pub struct ProviderPoolCheck {
    chains: Arc<ChainRegistry>,
    health: Arc<HealthTracker>,
}

impl ProviderPoolCheck {
    pub fn new(chains: Arc<ChainRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { chains, health }
    }
}

#[async_trait]
impl HealthCheck for ProviderPoolCheck {
    fn name(&self) -> &str {
        "providers"
    }

    async fn check(&self) -> ComponentHealth {
        let providers = self.chains.providers();
        if providers.is_empty() {
            return ComponentHealth::healthy("No providers configured");
        }

        let mut failed = Vec::new();
        let mut degraded = Vec::new();
        for provider in &providers {
            match self.health.get(provider).status {
                HealthStatus::Failed => failed.push(provider.as_str()),
                HealthStatus::Degraded => degraded.push(provider.as_str()),
                HealthStatus::Healthy | HealthStatus::Unknown => {}
            }
        }

        let total = providers.len();
        let health = if failed.len() == total {
            ComponentHealth::critical(format!("All {} providers failed", total))
        } else if !failed.is_empty() || !degraded.is_empty() {
            let mut parts = Vec::new();
            if !failed.is_empty() {
                parts.push(format!("failed: {}", failed.join(", ")));
            }
            if !degraded.is_empty() {
                parts.push(format!("degraded: {}", degraded.join(", ")));
            }
            ComponentHealth::warning(parts.join("; "))
        } else {
            ComponentHealth::healthy(format!("{} providers available", total))
        };

        health
            .with_metric("providers", total as f64)
            .with_metric("failed", failed.len() as f64)
            .with_metric("degraded", degraded.len() as f64)
    }
}

/// Warns when too many operations are waiting for connectivity.
#[derive(Debug)]
pub struct QueueBacklogCheck {
    queue: Arc<OfflineQueue>,
    warning_threshold: usize,
}

impl QueueBacklogCheck {
    pub fn new(queue: Arc<OfflineQueue>, warning_threshold: usize) -> Self {
        Self {
            queue,
            warning_threshold,
        }
    }
}

#[async_trait]
impl HealthCheck for QueueBacklogCheck {
    fn name(&self) -> &str {
        "offline_queue"
    }

    async fn check(&self) -> ComponentHealth {
        let stats = self.queue.stats();
        let health = if stats.queued > self.warning_threshold {
            ComponentHealth::warning(format!("{} operations waiting for connectivity", stats.queued))
        } else {
            ComponentHealth::healthy(format!("{} operations queued", stats.queued))
        };

        health
            .with_metric("queued", stats.queued as f64)
            .with_metric("failed", stats.failed as f64)
    }
}
