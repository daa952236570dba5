//! Resilience primitives shared by the router and the monitors.
//!
//! This module provides:
//! - Per-provider health tracking
//! - The copy-on-write fallback chain table
//! - The last-known-good result store used by recovery

mod backup;
mod chain;
mod health;

pub use backup::BackupStore;
pub use chain::ChainRegistry;
pub use health::HealthTracker;
