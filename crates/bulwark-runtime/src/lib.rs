//! # bulwark-runtime
//!
//! The stateful side of Bulwark: multi-provider fallback, connectivity
//! tracking, offline deferral, error recovery and system health.
//!
//! ## Components
//!
//! - [`FallbackRouter`] walks an operation's chain of providers, skipping
//!   providers past their failure budget and recording every outcome in the
//!   [`HealthTracker`]
//! - [`ConnectivityMonitor`] probes reachability and publishes online/offline
//!   transitions
//! - [`OfflineQueue`] parks online-required operations while offline and
//!   replays them in priority order when connectivity returns
//! - [`ErrorRecoveryEngine`] classifies failures and runs recovery
//!   strategies (retry, switch provider, defer, restore a stored result)
//! - [`SystemHealthAggregator`] folds named health checks into one status,
//!   off the execution path
//!
//! [`Engine`] wires these together and owns their background tasks.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{EngineConfig, Priority};
//! use bulwark_runtime::Engine;
//!
//! let engine = Engine::from_config(EngineConfig::from_file("bulwark.yaml")?)?;
//! engine.start();
//!
//! let result = engine.execute("generate", &serde_json::json!({"prompt": "hi"})).await;
//! println!("served by {:?} after {:?}", result.provider, result.attempted_providers);
//!
//! engine.shutdown().await;
//! ```

use thiserror::Error;

pub mod backend;
pub mod connectivity;
pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod health;
pub mod offline_queue;
pub mod recovery;
pub mod resilience;
pub mod router;

pub use backend::{
    Backend, BackendError, BackendFactory, BackendRegistry, ScriptedBackend,
    ScriptedBackendFactory, ScriptedOutcome,
};
#[cfg(feature = "http-probe")]
pub use connectivity::HttpProbe;
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe, TcpProbe};
pub use diagnostics::DiagnosticsReport;
pub use engine::{DeferredOutcome, Engine, EngineBuilder};
pub use events::{ChannelSink, EngineEvent, EventSink, FanoutSink, TracingSink};
pub use health::{HealthCheck, SystemHealthAggregator};
pub use offline_queue::{
    DrainReport, NewOperation, OfflineQueue, OperationExecutor, QueueError, QueueStats,
};
pub use recovery::{ErrorRecoveryEngine, ErrorStatistics, HandlingResult, RecoveryValidator};
pub use resilience::{BackupStore, ChainRegistry, HealthTracker};
pub use router::{ExecutionOptions, FallbackRouter};

/// Errors from building or operating the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] bulwark_core::ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
