//! Engine events and the observers that receive them.
//!
//! Components never hold a global listener registry. Each one is handed an
//! [`EventSink`] at construction and reports through it; the sink decides
//! whether to log, forward over a channel, or fan out to several sinks.

use bulwark_core::{
    ComponentStatus, Connectivity, ErrorKind, HealthStatus, OperationStatus, Severity,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event names as constants, for observers that route on strings.
pub mod event_names {
    pub const PROVIDER_HEALTH_UPDATED: &str = "provider-health-updated";
    pub const FALLBACK_ATTEMPT: &str = "fallback-attempt";
    pub const FALLBACK_SUCCESS: &str = "fallback-success";
    pub const FALLBACK_EXHAUSTED: &str = "fallback-exhausted";
    pub const WENT_OFFLINE: &str = "went-offline";
    pub const WENT_ONLINE: &str = "went-online";
    pub const OPERATION_QUEUED: &str = "operation-queued";
    pub const OPERATION_PROCESSING: &str = "operation-processing";
    pub const OPERATION_COMPLETED: &str = "operation-completed";
    pub const OPERATION_FAILED: &str = "operation-failed";
    pub const OPERATION_CANCELLED: &str = "operation-cancelled";
    pub const ERROR_HANDLED: &str = "error-handled";
    pub const CRITICAL_ALERT: &str = "critical-alert";
    pub const WARNING_ALERT: &str = "warning-alert";
    pub const DIAGNOSTICS_EXPORT_COMPLETED: &str = "diagnostics-export-completed";
}

/// Everything the engine reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    ProviderHealthUpdated {
        provider: String,
        status: HealthStatus,
        consecutive_failures: u32,
    },
    FallbackAttempt {
        operation: String,
        provider: String,
        attempt: usize,
    },
    FallbackSuccess {
        operation: String,
        provider: String,
        attempts: usize,
        fallback_used: bool,
    },
    FallbackExhausted {
        operation: String,
        attempted: Vec<String>,
        error: Option<ErrorKind>,
    },
    WentOffline {
        reason: String,
    },
    WentOnline {
        reason: String,
        offline_for_ms: u64,
    },
    OperationQueued {
        id: String,
        operation: String,
    },
    OperationProcessing {
        id: String,
        operation: String,
    },
    OperationCompleted {
        id: String,
        operation: String,
    },
    OperationFailed {
        id: String,
        operation: String,
        retry_count: u32,
        permanent: bool,
    },
    OperationCancelled {
        id: String,
        operation: String,
    },
    ErrorHandled {
        entry_id: String,
        severity: Severity,
        recovered: bool,
    },
    CriticalAlert {
        component: String,
        message: String,
    },
    WarningAlert {
        component: String,
        message: String,
    },
    DiagnosticsExportCompleted {
        errors: usize,
        overall: ComponentStatus,
    },
}

impl EngineEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        use event_names::*;
        match self {
            EngineEvent::ProviderHealthUpdated { .. } => PROVIDER_HEALTH_UPDATED,
            EngineEvent::FallbackAttempt { .. } => FALLBACK_ATTEMPT,
            EngineEvent::FallbackSuccess { .. } => FALLBACK_SUCCESS,
            EngineEvent::FallbackExhausted { .. } => FALLBACK_EXHAUSTED,
            EngineEvent::WentOffline { .. } => WENT_OFFLINE,
            EngineEvent::WentOnline { .. } => WENT_ONLINE,
            EngineEvent::OperationQueued { .. } => OPERATION_QUEUED,
            EngineEvent::OperationProcessing { .. } => OPERATION_PROCESSING,
            EngineEvent::OperationCompleted { .. } => OPERATION_COMPLETED,
            EngineEvent::OperationFailed { .. } => OPERATION_FAILED,
            EngineEvent::OperationCancelled { .. } => OPERATION_CANCELLED,
            EngineEvent::ErrorHandled { .. } => ERROR_HANDLED,
            EngineEvent::CriticalAlert { .. } => CRITICAL_ALERT,
            EngineEvent::WarningAlert { .. } => WARNING_ALERT,
            EngineEvent::DiagnosticsExportCompleted { .. } => DIAGNOSTICS_EXPORT_COMPLETED,
        }
    }

    /// Build the connectivity event for a transition.
    pub fn connectivity(state: Connectivity, reason: &str, previous_ms: u64) -> Self {
        match state {
            Connectivity::Online => EngineEvent::WentOnline {
                reason: reason.to_string(),
                offline_for_ms: previous_ms,
            },
            Connectivity::Offline => EngineEvent::WentOffline {
                reason: reason.to_string(),
            },
        }
    }

    /// Build the queue event for a status change.
    pub fn operation(id: &str, operation: &str, status: OperationStatus, retry_count: u32) -> Self {
        let (id, operation) = (id.to_string(), operation.to_string());
        match status {
            OperationStatus::Queued => EngineEvent::OperationQueued { id, operation },
            OperationStatus::Processing => EngineEvent::OperationProcessing { id, operation },
            OperationStatus::Completed => EngineEvent::OperationCompleted { id, operation },
            OperationStatus::Cancelled => EngineEvent::OperationCancelled { id, operation },
            OperationStatus::Failed => EngineEvent::OperationFailed {
                id,
                operation,
                retry_count,
                permanent: true,
            },
        }
    }
}

/// Observer for engine events.
pub trait EventSink: Send + Sync {
    /// Receive one event. Must not block.
    fn emit(&self, event: &EngineEvent);
}

/// Renders every event as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::CriticalAlert { component, message } => {
                tracing::error!(event = event.name(), component = %component, "{}", message);
            }
            EngineEvent::WarningAlert { component, message } => {
                tracing::warn!(event = event.name(), component = %component, "{}", message);
            }
            EngineEvent::FallbackExhausted { .. }
            | EngineEvent::WentOffline { .. }
            | EngineEvent::OperationFailed { .. } => {
                tracing::warn!(event = event.name(), detail = ?event);
            }
            EngineEvent::FallbackAttempt { .. } | EngineEvent::ProviderHealthUpdated { .. } => {
                tracing::debug!(event = event.name(), detail = ?event);
            }
            _ => {
                tracing::info!(event = event.name(), detail = ?event);
            }
        }
    }
}

/// Forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &EngineEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Delivers each event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
