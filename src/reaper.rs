//! Background reclamation of tenant connections left idle past a timeout.

use crate::connector::Connector;
use crate::registry::{ConnectionRegistry, HandleState};
use crate::role::Alias;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Tenant handles unused for longer than this are closed.
    pub idle_timeout: Duration,
    /// Time between sweeps when running in the background.
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            idle_timeout: Duration::from_secs(3600),
            interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub examined: usize,
    pub reaped: Vec<Alias>,
}

pub struct Reaper<K: Connector> {
    registry: Arc<ConnectionRegistry<K>>,
    config: ReaperConfig,
}

impl<K: Connector> Reaper<K> {
    pub fn new(registry: Arc<ConnectionRegistry<K>>, config: ReaperConfig) -> Self {
        Reaper { registry, config }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    pub async fn sweep(&self) -> ReapReport {
        self.sweep_at(Instant::now()).await
    }

    /// Reap as if the current time were `now`. Each candidate is re-checked under its own
    /// lock, so a handle touched after the snapshot survives.
    pub async fn sweep_at(&self, now: Instant) -> ReapReport {
        let snapshot = self.registry.snapshot();
        let mut report = ReapReport {
            examined: snapshot.len(),
            reaped: Vec::new(),
        };
        for entry in snapshot {
            if entry.alias.is_control()
                || !matches!(entry.state, HandleState::Active | HandleState::Idle)
                || now.saturating_duration_since(entry.last_used) <= self.config.idle_timeout
            {
                continue;
            }
            if self
                .registry
                .remove_if_idle(&entry.alias, self.config.idle_timeout, now)
                .await
            {
                report.reaped.push(entry.alias);
            }
        }
        if !report.reaped.is_empty() {
            tracing::info!(
                examined = report.examined,
                reaped = report.reaped.len(),
                "reaped idle connections"
            );
        }
        report
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "connection reaper started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("connection reaper shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
