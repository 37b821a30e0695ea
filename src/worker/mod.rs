//! Download worker pool
//!
//! A fixed number of tokio tasks, each pulling one job id at a time from the
//! dispatch queue, running the fetch tool and writing the outcome back.

pub mod fetcher;
pub mod runner;

pub use fetcher::{CommandFetcher, FetchError, FetchOutput, Fetcher};
pub use runner::{JobOutcome, JobWorker, WorkerContext};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pool of workers that process jobs concurrently
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing `ctx`
    pub fn spawn(ctx: Arc<WorkerContext>, count: usize) -> Self {
        let mut workers = Vec::with_capacity(count);
        let mut shutdown_txs = Vec::with_capacity(count);

        for worker_id in 0..count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let worker = JobWorker::new(ctx.clone(), worker_id);
            workers.push(tokio::spawn(worker.run(shutdown_rx)));
            shutdown_txs.push(shutdown_tx);
        }

        tracing::info!(count, "Worker pool started");
        Self {
            workers,
            shutdown_txs,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        tracing::info!("Shutting down worker pool...");

        for shutdown_tx in self.shutdown_txs {
            let _ = shutdown_tx.send(()).await;
        }

        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        tracing::info!("Worker pool shut down");
    }
}
