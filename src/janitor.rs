//! Periodic cleanup of expired artifacts and store records
//!
//! Files in the artifact directory are judged by modification time alone; the
//! job and result records have their own TTLs and either side may expire first.

use crate::config::Config;
use crate::observability::Metrics;
use crate::storage::{ArtifactStore, StorageError};
use crate::store::KvStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub records_pruned: usize,
}

pub struct Janitor {
    artifacts: ArtifactStore,
    store: Arc<dyn KvStore>,
    metrics: Arc<Metrics>,
    retention: Duration,
    interval: Duration,
}

impl Janitor {
    pub fn new(
        artifacts: ArtifactStore,
        store: Arc<dyn KvStore>,
        metrics: Arc<Metrics>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            artifacts,
            store,
            metrics,
            retention,
            interval,
        }
    }

    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now()).await
    }

    /// Delete every artifact last modified before `now - retention`, then let
    /// the store drop expired records. Individual failures are logged and
    /// skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();
        let cutoff = TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.artifacts.list().await {
            Ok(artifacts) => {
                stats.scanned = artifacts.len();
                for artifact in artifacts.iter().filter(|a| a.last_modified < cutoff) {
                    match self.artifacts.delete(&artifact.filename).await {
                        Ok(()) => {
                            stats.deleted += 1;
                            debug!(filename = %artifact.filename, "Expired artifact removed");
                        }
                        // already gone, e.g. a concurrent sweep
                        Err(StorageError::NotFound(_)) => {}
                        Err(e) => {
                            stats.failed += 1;
                            warn!(filename = %artifact.filename, error = %e, "Failed to remove artifact");
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to list artifact directory"),
        }

        match self.store.prune_expired().await {
            Ok(pruned) => stats.records_pruned = pruned,
            Err(e) => warn!(error = %e, "Failed to prune expired records"),
        }

        self.metrics.artifacts_swept(stats.deleted as u64);
        if stats.deleted > 0 || stats.failed > 0 || stats.records_pruned > 0 {
            info!(?stats, "Sweep completed");
        } else {
            debug!(?stats, "Sweep completed");
        }
        stats
    }

    /// Sweep every `interval` until shutdown; the first sweep runs immediately
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            retention = ?self.retention,
            interval = ?self.interval,
            "Janitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Janitor stopped");
    }

    pub fn spawn(self) -> JanitorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        JanitorHandle {
            shutdown_tx,
            handle: tokio::spawn(self.run(shutdown_rx)),
        }
    }
}

pub struct JanitorHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl JanitorHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            error!(error = %e, "Janitor task panicked");
        }
    }
}

/// One sweep against the configured store and artifact directory
pub async fn sweep_once(
    config: &Config,
) -> Result<SweepStats, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let store = crate::store::open(&config.store).await?;
    let artifacts = ArtifactStore::open(&config.artifacts.dir)?;
    let janitor = Janitor::new(
        artifacts,
        store.clone(),
        Arc::new(Metrics::new()),
        config.artifacts.retention.into(),
        config.artifacts.sweep_interval.into(),
    );

    let stats = janitor.sweep().await;
    store.flush().await?;
    Ok(stats)
}
