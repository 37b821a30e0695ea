use std::sync::Arc;

use crate::config::Config;
use crate::jobs::{DispatchQueue, JobRegistry, ResultStore};
use crate::observability::Metrics;
use crate::storage::ArtifactStore;
use crate::store::KvStore;
use crate::worker::{Fetcher, WorkerContext};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn KvStore>,
    pub registry: JobRegistry,
    pub dispatch: DispatchQueue,
    pub results: ResultStore,
    pub artifacts: ArtifactStore,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn KvStore>, artifacts: ArtifactStore) -> Self {
        let registry = JobRegistry::new(store.clone(), config.workers.job_ttl.into());
        let results = ResultStore::new(store.clone(), config.workers.result_ttl.into());
        Self {
            registry,
            results,
            dispatch: DispatchQueue::new(store.clone()),
            config: Arc::new(config),
            store,
            artifacts,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Context for a worker pool sharing this state's store and metrics
    pub fn worker_context(&self, fetcher: Arc<dyn Fetcher>) -> WorkerContext {
        WorkerContext {
            registry: self.registry.clone(),
            dispatch: self.dispatch.clone(),
            results: self.results.clone(),
            artifacts: self.artifacts.clone(),
            fetcher,
            metrics: self.metrics.clone(),
            retry_backoff: self.config.workers.retry_backoff.into(),
            fallback_content_type: self.config.fetcher.content_type.clone(),
        }
    }
}
