use super::error::{JobError, Result};
use super::keys::job_key;
use super::models::{JobRecord, JobStatus, fields};
use crate::store::KvStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const PENDING_MESSAGE: &str = "Waiting in queue";

/// Job records under `job:{id}` with a rolling TTL
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a new pending job for `url`
    ///
    /// The locator is trimmed; an empty one is rejected before anything is
    /// written.
    pub async fn create(&self, url: &str) -> Result<JobRecord> {
        let url = url.trim();
        if url.is_empty() {
            return Err(JobError::InvalidInput("resourceLocator must not be empty".into()));
        }

        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            status: JobStatus::Pending,
            message: PENDING_MESSAGE.to_string(),
            created_at: Utc::now(),
            artifact: None,
            title: None,
        };

        self.store
            .set_fields(&job_key(&record.id), &record.to_fields(), self.ttl)
            .await?;

        info!(job_id = %record.id, url = %record.url, "Job created");
        Ok(record)
    }

    /// Fetch a job; expired and unknown ids both map to `NotFound`
    pub async fn get(&self, job_id: &str) -> Result<JobRecord> {
        let key = job_key(job_id);
        match self.store.get_fields(&key).await? {
            Some(map) => JobRecord::from_fields(&key, &map),
            None => Err(JobError::NotFound(job_id.to_string())),
        }
    }

    /// Partial update of status, message and any `extra` fields, refreshing
    /// the job TTL. Returns `false` if the job no longer exists.
    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        extra: &[(&'static str, String)],
    ) -> Result<bool> {
        self.update_status_with_ttl(job_id, status, message, extra, self.ttl)
            .await
    }

    /// Same as [`update_status`](Self::update_status) with an explicit TTL
    pub async fn update_status_with_ttl(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        extra: &[(&'static str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        let mut updates = Vec::with_capacity(extra.len() + 2);
        updates.push((fields::STATUS, status.as_str().to_string()));
        updates.push((fields::MESSAGE, message.to_string()));
        updates.extend(extra.iter().cloned());

        let applied = self
            .store
            .update_fields(&job_key(job_id), &updates, ttl)
            .await?;

        if applied {
            debug!(job_id, status = %status, "Job status updated");
        } else {
            debug!(job_id, status = %status, "Job gone, status update dropped");
        }
        Ok(applied)
    }

    /// Move `record` to `next` after checking the transition is legal, and
    /// mirror the write into the in-memory copy.
    pub async fn advance(
        &self,
        record: &mut JobRecord,
        next: JobStatus,
        message: &str,
        extra: &[(&'static str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        if !record.status.can_advance_to(next) {
            return Err(JobError::InvalidTransition {
                from: record.status,
                to: next,
            });
        }

        let applied = self
            .update_status_with_ttl(&record.id, next, message, extra, ttl)
            .await?;

        record.status = next;
        record.message = message.to_string();
        if let Some((_, artifact)) = extra.iter().find(|(name, _)| *name == fields::ARTIFACT) {
            record.artifact = Some(artifact.clone());
        }
        if let Some((_, title)) = extra.iter().find(|(name, _)| *name == fields::TITLE) {
            record.title = Some(title.clone());
        }
        Ok(applied)
    }
}
