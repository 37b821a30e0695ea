use super::error::{JobError, Result};
use super::keys::result_key;
use super::models::ResultRecord;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Artifact metadata under `result:{id}`, written once per completed job
#[derive(Clone)]
pub struct ResultStore {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write the result; its TTL starts now
    pub async fn put(&self, job_id: &str, result: &ResultRecord) -> Result<()> {
        self.store
            .set_fields(&result_key(job_id), &result.to_fields(), self.ttl)
            .await?;
        debug!(job_id, filename = %result.filename, "Result stored");
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<ResultRecord> {
        let key = result_key(job_id);
        match self.store.get_fields(&key).await? {
            Some(map) => ResultRecord::from_fields(&key, &map),
            None => Err(JobError::NotFound(job_id.to_string())),
        }
    }
}
