//! Statistics over the error log.

use bulwark_core::{ErrorLogEntry, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Counts for one time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub total: usize,
    pub by_component: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl WindowStats {
    fn add(&mut self, entry: &ErrorLogEntry) {
        self.total += 1;
        *self
            .by_component
            .entry(entry.context.component.clone())
            .or_default() += 1;
        *self.by_severity.entry(entry.severity).or_default() += 1;
    }
}

/// How often one error signature occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    pub signature: String,
    pub count: usize,
}

/// Summary of the retained error log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total: usize,
    pub unresolved: usize,
    pub last_24h: WindowStats,
    pub last_7d: WindowStats,
    /// Mean time from logging to resolution, over resolved entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_resolution_ms: Option<f64>,
    /// Most frequent signatures, most frequent first
    pub top_errors: Vec<ErrorFrequency>,
}

impl ErrorStatistics {
    /// Compute statistics as of `now`.
    pub fn compute<'a>(
        entries: impl IntoIterator<Item = &'a ErrorLogEntry>,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Self {
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut stats = Self::default();
        let mut resolution_total_ms = 0.0;
        let mut resolved_count = 0usize;
        let mut signatures: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            stats.total += 1;
            if !entry.resolved {
                stats.unresolved += 1;
            }
            if entry.timestamp >= day_ago {
                stats.last_24h.add(entry);
            }
            if entry.timestamp >= week_ago {
                stats.last_7d.add(entry);
            }
            if let Some(resolved_at) = entry.resolved_at {
                resolution_total_ms += (resolved_at - entry.timestamp).num_milliseconds() as f64;
                resolved_count += 1;
            }
            *signatures.entry(entry.signature()).or_default() += 1;
        }

        if resolved_count > 0 {
            stats.average_resolution_ms = Some(resolution_total_ms / resolved_count as f64);
        }

        let mut top: Vec<ErrorFrequency> = signatures
            .into_iter()
            .map(|(signature, count)| ErrorFrequency { signature, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
        top.truncate(top_n);
        stats.top_errors = top;

        stats
    }
}
