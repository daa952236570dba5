//! Host connectivity monitoring.
//!
//! The monitor probes several independent endpoints in parallel and calls the
//! host online if any one of them answers within the probe timeout. Only
//! transitions are recorded and reported; a probe that confirms the current
//! state is silent.

use async_trait::async_trait;
use bulwark_core::config::ConnectivityConfig;
use bulwark_core::{Connectivity, ConnectivityEvent};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::events::{EngineEvent, EventSink, TracingSink};

/// Reachability test for one endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// True if the endpoint answered. The monitor applies the timeout.
    async fn probe(&self, endpoint: &str) -> bool;
}

/// Opens a TCP connection to `host:port`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        match tokio::net::TcpStream::connect(endpoint).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "TCP probe failed");
                false
            }
        }
    }
}

/// Sends an HTTP `HEAD` request; any response counts as reachable.
#[cfg(feature = "http-probe")]
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

#[cfg(feature = "http-probe")]
impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "http-probe")]
#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        match self.client.head(endpoint).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "HTTP probe failed");
                false
            }
        }
    }
}

struct MonitorState {
    since: Instant,
    history: VecDeque<ConnectivityEvent>,
}

/// Tracks whether the host is online.
pub struct ConnectivityMonitor {
    config: ConnectivityConfig,
    probe: Arc<dyn ReachabilityProbe>,
    state: watch::Sender<Connectivity>,
    inner: Mutex<MonitorState>,
    events: Arc<dyn EventSink>,
}

impl ConnectivityMonitor {
    /// Create a monitor. The host is assumed online until a probe says otherwise.
    pub fn new(
        config: ConnectivityConfig,
        probe: Arc<dyn ReachabilityProbe>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (state, _) = watch::channel(Connectivity::Online);
        Self {
            config,
            probe,
            state,
            inner: Mutex::new(MonitorState {
                since: Instant::now(),
                history: VecDeque::new(),
            }),
            events,
        }
    }

    /// Current state.
    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_offline(&self) -> bool {
        self.state() == Connectivity::Offline
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Probe every endpoint now and apply the result.
    pub async fn force_check(&self) -> Connectivity {
        let timeout = self.config.probe_timeout;
        let probes = self.config.endpoints.iter().map(|endpoint| {
            let probe = self.probe.clone();
            async move {
                matches!(
                    tokio::time::timeout(timeout, probe.probe(endpoint)).await,
                    Ok(true)
                )
            }
        });

        let reachable = futures::future::join_all(probes)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        let total = self.config.endpoints.len();

        let (state, reason) = if reachable > 0 {
            (
                Connectivity::Online,
                format!("{}/{} endpoints reachable", reachable, total),
            )
        } else {
            (
                Connectivity::Offline,
                format!("None of {} endpoints reachable", total),
            )
        };

        tracing::debug!(reachable, total, state = ?state, "Connectivity probe finished");
        self.set_state(state, &reason);
        state
    }

    /// Set the state directly. Returns true if this was a transition.
    pub fn set_state(&self, state: Connectivity, reason: &str) -> bool {
        let previous_ms = {
            let mut inner = self.inner.lock();
            if *self.state.borrow() == state {
                return false;
            }

            let previous = inner.since.elapsed();
            inner.since = Instant::now();
            inner.history.push_back(ConnectivityEvent {
                timestamp: Utc::now(),
                transition: state,
                reason: reason.to_string(),
                previous_state_duration: previous,
            });
            while inner.history.len() > self.config.history_capacity {
                inner.history.pop_front();
            }

            self.state.send_replace(state);
            previous.as_millis() as u64
        };

        match state {
            Connectivity::Online => {
                tracing::info!(reason = %reason, offline_ms = previous_ms, "Connectivity restored")
            }
            Connectivity::Offline => {
                tracing::warn!(reason = %reason, online_ms = previous_ms, "Connectivity lost")
            }
        }
        self.events
            .emit(&EngineEvent::connectivity(state, reason, previous_ms));
        true
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> Vec<ConnectivityEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Probe on the configured interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.config.interval, "Connectivity monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.force_check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Connectivity monitor stopped");
    }

    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(
            ConnectivityConfig::default(),
            Arc::new(TcpProbe),
            Arc::new(TracingSink),
        )
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("endpoints", &self.config.endpoints)
            .finish()
    }
}
