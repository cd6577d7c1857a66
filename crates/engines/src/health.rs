//! Remote engine health monitoring
//!
//! Periodically probes each registered remote endpoint and publishes an
//! availability flag the TTS dispatcher reads on every request. On an
//! unavailable-to-available transition the dispatcher's local bias is
//! cleared so the next request tries remote first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use walnut_config::HealthConfig;

/// Shared availability flag for one remote engine.
#[derive(Debug, Clone)]
pub struct EngineAvailability {
    name: &'static str,
    available: Arc<AtomicBool>,
    /// Set after a failure to bias routing away from the remote until
    /// the monitor observes a recovery.
    prefer_local: Arc<AtomicBool>,
}

impl EngineAvailability {
    pub fn new(name: &'static str, initially_available: bool) -> Self {
        Self {
            name,
            available: Arc::new(AtomicBool::new(initially_available)),
            prefer_local: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::Relaxed);
        if was != available {
            tracing::info!(engine = self.name, available, "remote engine availability changed");
        }
        if available && !was {
            // Recovery: drop the local bias so remote is tried first again.
            self.prefer_local.store(false, Ordering::Relaxed);
        }
    }

    /// Record a request-time failure.
    pub fn mark_failed(&self) {
        self.available.store(false, Ordering::Relaxed);
        self.prefer_local.store(true, Ordering::Relaxed);
    }

    pub fn prefers_local(&self) -> bool {
        self.prefer_local.load(Ordering::Relaxed)
    }
}

struct Probe {
    availability: EngineAvailability,
    url: String,
}

/// Background prober for remote engine endpoints.
pub struct RemoteHealthMonitor {
    config: HealthConfig,
    probes: Vec<Probe>,
}

impl RemoteHealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            probes: Vec::new(),
        }
    }

    /// Register an endpoint to probe. The URL should answer a plain GET
    /// while the engine is up.
    pub fn register(&mut self, availability: EngineAvailability, url: impl Into<String>) {
        self.probes.push(Probe {
            availability,
            url: url.into(),
        });
    }

    /// Spawn the periodic probe task.
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));
        let timeout = Duration::from_secs(self.config.probe_timeout_secs.max(1));

        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "health monitor could not build http client");
                    return;
                }
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                for probe in &self.probes {
                    if probe.url.is_empty() {
                        continue;
                    }
                    let healthy = match client.get(&probe.url).send().await {
                        Ok(response) => response.status().is_success(),
                        Err(e) => {
                            tracing::debug!(engine = probe.availability.name(), error = %e, "health probe failed");
                            false
                        }
                    };
                    probe.availability.set_available(healthy);
                }
            }
        })
    }
}
