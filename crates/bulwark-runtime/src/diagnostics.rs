//! Diagnostics export for support tooling.

use bulwark_core::{
    Connectivity, ConnectivityEvent, ErrorLogEntry, HealthSnapshot, ProviderHealth, SystemHealth,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::offline_queue::QueueStats;
use crate::recovery::ErrorStatistics;

/// Point-in-time snapshot of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,

    /// Fresh health check taken at export time
    pub system_health: SystemHealth,

    /// Newest first
    pub recent_errors: Vec<ErrorLogEntry>,
    pub error_stats: ErrorStatistics,

    pub connectivity: Connectivity,
    pub connectivity_history: Vec<ConnectivityEvent>,

    /// Oldest first
    pub health_history: Vec<HealthSnapshot>,

    pub provider_health: BTreeMap<String, ProviderHealth>,
    pub queue_stats: QueueStats,
}

impl DiagnosticsReport {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read a report back from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write the report to `path`, replacing any existing file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), crate::EngineError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), errors = self.recent_errors.len(), "Diagnostics written");
        Ok(())
    }
}
