//! Command implementations.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bulwark_core::{
    ComponentStatus, Connectivity, EngineConfig, ExecutionResult, Priority, ProviderHealth,
};
use bulwark_runtime::{
    BackendError, Engine, HandlingResult, ReachabilityProbe, ScriptedBackend,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn load(path: &Path) -> Result<EngineConfig> {
    let config = EngineConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    tracing::debug!(path = %path.display(), chains = config.chains.len(), "Configuration loaded");
    Ok(config)
}

/// Probe with a fixed answer, so simulations never touch the network.
struct FixedProbe(bool);

#[async_trait]
impl ReachabilityProbe for FixedProbe {
    async fn probe(&self, _endpoint: &str) -> bool {
        self.0
    }
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "OK",
        ComponentStatus::Warning => "WARN",
        ComponentStatus::Critical => "CRIT",
    }
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let config = load(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("{} is valid", path.display());
    println!();
    println!("Chains:");
    for (operation, chain) in &config.chains {
        println!(
            "  {:<20} {}  (max failures {}, timeout {:?})",
            operation,
            chain.providers.join(" -> "),
            chain.max_failures,
            chain.timeout
        );
    }
    println!();
    println!("Backends: {}", config.backends.len());
    println!("Connectivity endpoints: {}", config.connectivity.endpoints.join(", "));
    println!(
        "Offline-capable operations: {}",
        config.offline_queue.offline_capable.join(", ")
    );
    Ok(())
}

#[derive(Serialize)]
struct SimulationReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handling: Option<&'a HandlingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queued_id: Option<&'a str>,
    provider_health: BTreeMap<String, ProviderHealth>,
}

pub async fn simulate(
    path: &Path,
    operation: &str,
    params: &str,
    fail: &[String],
    offline: bool,
) -> Result<()> {
    let config = load(path)?;
    let params: JsonValue = serde_json::from_str(params).context("--params is not valid JSON")?;

    let mut builder = Engine::builder(config)
        .probe(Arc::new(FixedProbe(!offline)))
        .without_resource_checks();
    for provider in fail {
        let backend = ScriptedBackend::failing(
            provider.as_str(),
            BackendError::Provider("simulated outage".to_string()),
        );
        builder = builder.backend(provider.as_str(), Arc::new(backend));
    }
    let engine = builder.build().context("Failed to build engine")?;

    if offline {
        engine
            .connectivity()
            .set_state(Connectivity::Offline, "simulated");
    }

    let outcome = engine
        .execute_or_defer(operation, params, Priority::Normal)
        .await?;

    let report = SimulationReport {
        result: outcome.result.as_ref(),
        handling: outcome.handling.as_ref(),
        queued_id: outcome.queued_id.as_deref(),
        provider_health: engine.health().get_all().into_iter().collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(handling) = &outcome.handling {
        eprintln!("{}", handling.message.render());
    }

    if !outcome.succeeded() && !outcome.is_deferred() {
        bail!("Operation '{}' failed", operation);
    }
    Ok(())
}

pub async fn health(path: &Path, json: bool) -> Result<()> {
    let engine = Engine::from_config(load(path)?).context("Failed to build engine")?;
    engine.connectivity().force_check().await;
    let health = engine.aggregator().check_now().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    println!("Overall: {}", status_label(health.overall));
    for (name, component) in &health.components {
        println!(
            "  [{:<4}] {:<14} {}",
            status_label(component.status),
            name,
            component.message
        );
    }
    Ok(())
}

pub async fn diagnostics(path: &Path, output: &Path) -> Result<()> {
    let engine = Engine::from_config(load(path)?).context("Failed to build engine")?;
    engine.connectivity().force_check().await;

    let report = engine
        .export_diagnostics(output)
        .await
        .with_context(|| format!("Failed to write diagnostics to {}", output.display()))?;

    println!(
        "Wrote {} (overall {}, {} errors, {} queued)",
        output.display(),
        status_label(report.system_health.overall),
        report.recent_errors.len(),
        report.queue_stats.queued
    );
    Ok(())
}
