//! Job runner - takes one job id from the dispatch queue to a terminal state

use super::fetcher::Fetcher;
use crate::jobs::models::fields;
use crate::jobs::{
    DispatchQueue, JobError, JobRecord, JobRegistry, JobStatus, ResultRecord, ResultStore,
};
use crate::observability::Metrics;
use crate::storage::{ArtifactStore, content_type_for};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

const PROCESSING_MESSAGE: &str = "Downloading...";
const COMPLETED_MESSAGE: &str = "Download complete";
/// Stored when the tool printed no title
const FALLBACK_TITLE: &str = "Video Downloaded";

/// Everything a worker needs, shared by the whole pool
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: JobRegistry,
    pub dispatch: DispatchQueue,
    pub results: ResultStore,
    pub artifacts: ArtifactStore,
    pub fetcher: Arc<dyn Fetcher>,
    pub metrics: Arc<Metrics>,
    /// Pause after a store error before dequeuing again
    pub retry_backoff: Duration,
    /// Content type for artifacts with an unrecognised extension
    pub fallback_content_type: String,
}

/// Terminal result of processing one dequeued id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { artifact: String },
    Failed { message: String },
    /// The record expired before a worker got to it
    Orphaned,
}

/// A single worker: dequeue, process, repeat
pub struct JobWorker {
    ctx: Arc<WorkerContext>,
    worker_id: usize,
}

impl JobWorker {
    pub fn new(ctx: Arc<WorkerContext>, worker_id: usize) -> Self {
        Self { ctx, worker_id }
    }

    /// Run until a shutdown signal arrives (or its sender is dropped)
    ///
    /// The signal is only observed while waiting on the queue or backing off;
    /// a job that has been dequeued always runs to completion.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let worker_id = self.worker_id;
        info!(worker_id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                next = self.ctx.dispatch.dequeue() => next,
            };

            let result = match next {
                Ok(job_id) => self.process(&job_id).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(worker_id, error = %e, "Worker iteration failed");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(self.ctx.retry_backoff) => {}
                }
            }
        }

        info!(worker_id, "Worker stopped");
    }

    /// Drive one job to `completed` or `failed`
    ///
    /// Fetch and artifact problems end up in the job record; only backing
    /// store errors are returned. A record that disappears mid-run is
    /// reported as orphaned and never recreated.
    pub async fn process(&self, job_id: &str) -> Result<JobOutcome, JobError> {
        let worker_id = self.worker_id;
        let ctx = &self.ctx;

        let mut record = match ctx.registry.get(job_id).await {
            Ok(record) => record,
            Err(JobError::NotFound(_)) => {
                warn!(worker_id, job_id, "Dequeued job has no record, skipping");
                ctx.metrics.job_orphaned();
                return Ok(JobOutcome::Orphaned);
            }
            Err(e) => return Err(e),
        };

        let job_ttl = ctx.registry.ttl();
        let applied = ctx
            .registry
            .advance(&mut record, JobStatus::Processing, PROCESSING_MESSAGE, &[], job_ttl)
            .await?;
        if !applied {
            return Ok(self.vanished(job_id, JobStatus::Processing));
        }
        info!(worker_id, job_id, url = %record.url, "Job processing");

        match self.fetch_artifact(&record).await {
            Ok((result, title)) => {
                ctx.results.put(job_id, &result).await?;
                let applied = ctx
                    .registry
                    .advance(
                        &mut record,
                        JobStatus::Completed,
                        COMPLETED_MESSAGE,
                        &[
                            (fields::ARTIFACT, result.filename.clone()),
                            (fields::TITLE, title),
                        ],
                        ctx.results.ttl(),
                    )
                    .await?;
                if !applied {
                    return Ok(self.vanished(job_id, JobStatus::Completed));
                }

                ctx.metrics.job_completed();
                info!(worker_id, job_id, artifact = %result.filename, "Job completed");
                Ok(JobOutcome::Completed {
                    artifact: result.filename,
                })
            }
            Err(err) => {
                let message = err.to_string();
                let applied = ctx
                    .registry
                    .advance(&mut record, JobStatus::Failed, &message, &[], job_ttl)
                    .await?;
                if !applied {
                    return Ok(self.vanished(job_id, JobStatus::Failed));
                }

                ctx.metrics.job_failed();
                warn!(worker_id, job_id, error = %message, "Job failed");
                Ok(JobOutcome::Failed { message })
            }
        }
    }

    /// The record expired between dequeue and a status write
    fn vanished(&self, job_id: &str, status: JobStatus) -> JobOutcome {
        warn!(
            worker_id = self.worker_id,
            job_id,
            status = %status,
            "Job record expired mid-run, status write dropped"
        );
        self.ctx.metrics.job_orphaned();
        JobOutcome::Orphaned
    }

    async fn fetch_artifact(&self, record: &JobRecord) -> Result<(ResultRecord, String), JobError> {
        let ctx = &self.ctx;
        let template = ctx.artifacts.output_template(&record.id);
        let fetched = ctx.fetcher.fetch(&record.url, &template).await?;

        let artifact = ctx
            .artifacts
            .find_by_prefix(&record.id)
            .await?
            .ok_or(JobError::ArtifactMissing)?;
        let path = ctx.artifacts.path_of(&artifact.filename)?;

        let result = ResultRecord {
            content_type: content_type_for(&artifact.filename, &ctx.fallback_content_type),
            path: path.display().to_string(),
            filename: artifact.filename,
        };
        let title = fetched.title.unwrap_or_else(|| FALLBACK_TITLE.to_string());
        Ok((result, title))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::keys::job_key;
    use crate::store::{Fields, FjallStore, KvStore, StoreError};
    use crate::worker::{FetchError, FetchOutput};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes `<template with ext>` or fails, without spawning anything
    pub(crate) enum StubFetcher {
        Writes(&'static str),
        WritesTitled(&'static str, &'static str),
        Exits(i32),
        WritesNothing,
    }

    fn write_artifact(output_template: &Path, ext: &str, url: &str) -> std::io::Result<()> {
        let path = output_template.to_string_lossy().replace("%(ext)s", ext);
        std::fs::write(path, url.as_bytes())
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &str, output_template: &Path) -> Result<FetchOutput, FetchError> {
            match self {
                StubFetcher::Writes(ext) => {
                    write_artifact(output_template, ext, url)?;
                    Ok(FetchOutput::default())
                }
                StubFetcher::WritesTitled(ext, title) => {
                    write_artifact(output_template, ext, url)?;
                    Ok(FetchOutput {
                        title: Some(title.to_string()),
                    })
                }
                StubFetcher::Exits(code) => Err(FetchError::Exited {
                    code: Some(*code),
                    stderr: "ERROR: unsupported URL".to_string(),
                }),
                StubFetcher::WritesNothing => Ok(FetchOutput::default()),
            }
        }
    }

    /// Deletes the job record while the download runs
    struct ExpiringFetcher {
        store: Arc<dyn KvStore>,
    }

    #[async_trait]
    impl Fetcher for ExpiringFetcher {
        async fn fetch(&self, url: &str, output_template: &Path) -> Result<FetchOutput, FetchError> {
            let name = output_template.file_name().unwrap().to_string_lossy();
            let job_id = name.trim_end_matches(".%(ext)s");
            self.store.delete(&job_key(job_id)).await.unwrap();
            write_artifact(output_template, "mp4", url)?;
            Ok(FetchOutput::default())
        }
    }

    /// Fjall store whose first pops and updates fail
    struct FlakyStore {
        inner: FjallStore,
        pop_failures: AtomicUsize,
        update_failures: AtomicUsize,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        fn backend(&self) -> &'static str {
            "flaky"
        }

        async fn set_fields(
            &self,
            key: &str,
            fields: &[(&str, String)],
            ttl: Duration,
        ) -> crate::store::Result<()> {
            self.inner.set_fields(key, fields, ttl).await
        }

        async fn update_fields(
            &self,
            key: &str,
            fields: &[(&str, String)],
            ttl: Duration,
        ) -> crate::store::Result<bool> {
            if take_failure(&self.update_failures) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.update_fields(key, fields, ttl).await
        }

        async fn get_fields(&self, key: &str) -> crate::store::Result<Option<Fields>> {
            self.inner.get_fields(key).await
        }

        async fn delete(&self, key: &str) -> crate::store::Result<bool> {
            self.inner.delete(key).await
        }

        async fn push(&self, list: &str, value: &str) -> crate::store::Result<()> {
            self.inner.push(list, value).await
        }

        async fn blocking_pop(&self, list: &str) -> crate::store::Result<String> {
            if take_failure(&self.pop_failures) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.blocking_pop(list).await
        }

        async fn list_len(&self, list: &str) -> crate::store::Result<usize> {
            self.inner.list_len(list).await
        }

        async fn ping(&self) -> crate::store::Result<()> {
            self.inner.ping().await
        }
    }

    pub(crate) struct Harness {
        pub ctx: Arc<WorkerContext>,
        pub store: Arc<dyn KvStore>,
        _temp: TempDir,
    }

    pub(crate) fn harness(fetcher: Arc<dyn Fetcher>) -> Harness {
        harness_with(|_| fetcher, Duration::from_secs(900), |fjall| Arc::new(fjall))
    }

    fn harness_with(
        fetcher: impl FnOnce(Arc<dyn KvStore>) -> Arc<dyn Fetcher>,
        result_ttl: Duration,
        wrap: impl FnOnce(FjallStore) -> Arc<dyn KvStore>,
    ) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = wrap(FjallStore::open(temp.path().join("store")).unwrap());
        let ctx = WorkerContext {
            registry: JobRegistry::new(store.clone(), Duration::from_secs(7200)),
            dispatch: DispatchQueue::new(store.clone()),
            results: ResultStore::new(store.clone(), result_ttl),
            artifacts: ArtifactStore::open(temp.path().join("downloads")).unwrap(),
            fetcher: fetcher(store.clone()),
            metrics: Arc::new(Metrics::new()),
            retry_backoff: Duration::from_millis(10),
            fallback_content_type: "application/octet-stream".to_string(),
        };
        Harness {
            ctx: Arc::new(ctx),
            store,
            _temp: temp,
        }
    }

    async fn wait_for_completions(h: &Harness, count: u64) {
        for _ in 0..300 {
            if h.ctx.metrics.snapshot().jobs_completed == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} completed jobs");
    }

    #[tokio::test]
    async fn test_successful_job() {
        let h = harness(Arc::new(StubFetcher::WritesTitled("mp4", "Big Buck Bunny")));
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        let worker = JobWorker::new(h.ctx.clone(), 0);
        let outcome = worker.process(&record.id).await.unwrap();

        let expected = format!("{}.mp4", record.id);
        assert_eq!(outcome, JobOutcome::Completed { artifact: expected.clone() });

        let job = h.ctx.registry.get(&record.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.artifact.as_deref(), Some(expected.as_str()));
        assert_eq!(job.title.as_deref(), Some("Big Buck Bunny"));

        let result = h.ctx.results.get(&record.id).await.unwrap();
        assert_eq!(result.filename, expected);
        assert!(result.filename.starts_with(&record.id));
        assert_eq!(result.content_type, "video/mp4");
        assert!(Path::new(&result.path).is_file());
        assert_eq!(h.ctx.metrics.snapshot().jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_untitled_download_gets_fallback_title() {
        let h = harness(Arc::new(StubFetcher::Writes("webm")));
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        let job = h.ctx.registry.get(&record.id).await.unwrap();
        assert_eq!(job.title.as_deref(), Some("Video Downloaded"));
    }

    #[tokio::test]
    async fn test_tool_failure_marks_job_failed() {
        let h = harness(Arc::new(StubFetcher::Exits(1)));
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        let outcome = JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        let message = match outcome {
            JobOutcome::Failed { message } => message,
            other => panic!("expected failure, got {other:?}"),
        };
        assert!(message.starts_with("download failed:"));

        let job = h.ctx.registry.get(&record.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, message);
        assert!(job.artifact.is_none());
        assert!(job.title.is_none());
        assert!(matches!(h.ctx.results.get(&record.id).await, Err(JobError::NotFound(_))));
        assert_eq!(h.ctx.metrics.snapshot().jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_marks_job_failed() {
        let h = harness(Arc::new(StubFetcher::WritesNothing));
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        let outcome = JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Failed { message: "artifact missing after success".to_string() }
        );
        let job = h.ctx.registry.get(&record.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, "artifact missing after success");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stray_file_does_not_break_artifact_lookup() {
        use std::os::unix::ffi::OsStrExt;

        let h = harness(Arc::new(StubFetcher::Writes("mp4")));
        let stray = std::ffi::OsStr::from_bytes(b"stray\xff.mp4");
        std::fs::write(h.ctx.artifacts.root().join(stray), b"x").unwrap();
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        let outcome = JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Completed { artifact: format!("{}.mp4", record.id) }
        );
    }

    #[tokio::test]
    async fn test_orphaned_id_is_counted() {
        let h = harness(Arc::new(StubFetcher::Writes("mp4")));

        let outcome = JobWorker::new(h.ctx.clone(), 0).process("expired-job").await.unwrap();

        assert_eq!(outcome, JobOutcome::Orphaned);
        assert_eq!(h.ctx.metrics.snapshot().jobs_orphaned, 1);
        assert!(h.store.get_fields("job:expired-job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_expiring_mid_run_is_orphaned() {
        let h = harness_with(
            |store| Arc::new(ExpiringFetcher { store }),
            Duration::from_secs(900),
            |fjall| Arc::new(fjall),
        );
        let record = h.ctx.registry.create("https://example.com/v").await.unwrap();

        let outcome = JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        assert_eq!(outcome, JobOutcome::Orphaned);
        let metrics = h.ctx.metrics.snapshot();
        assert_eq!(metrics.jobs_completed, 0);
        assert_eq!(metrics.jobs_orphaned, 1);
        assert!(matches!(h.ctx.registry.get(&record.id).await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_completed_job_expires_with_its_result() {
        let result_ttl = Duration::from_millis(200);
        let h = harness_with(
            |_| Arc::new(StubFetcher::Writes("mp4")),
            result_ttl,
            |fjall| Arc::new(fjall),
        );
        let done = h.ctx.registry.create("https://example.com/ok").await.unwrap();
        let worker = JobWorker::new(h.ctx.clone(), 0);
        worker.process(&done.id).await.unwrap();

        assert!(h.ctx.registry.get(&done.id).await.is_ok());
        assert!(h.ctx.results.get(&done.id).await.is_ok());

        sleep(result_ttl + Duration::from_millis(100)).await;

        // job TTL is two hours, so only the re-armed TTL can expire it
        assert!(matches!(h.ctx.registry.get(&done.id).await, Err(JobError::NotFound(_))));
        assert!(matches!(h.ctx.results.get(&done.id).await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_job_keeps_job_ttl() {
        let result_ttl = Duration::from_millis(100);
        let h = harness_with(
            |_| Arc::new(StubFetcher::Exits(2)),
            result_ttl,
            |fjall| Arc::new(fjall),
        );
        let record = h.ctx.registry.create("https://example.com/bad").await.unwrap();
        JobWorker::new(h.ctx.clone(), 0).process(&record.id).await.unwrap();

        sleep(result_ttl + Duration::from_millis(100)).await;

        let job = h.ctx.registry.get(&record.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_survives_store_errors() {
        let h = harness_with(
            |_| Arc::new(StubFetcher::Writes("mp4")),
            Duration::from_secs(900),
            |fjall| {
                Arc::new(FlakyStore {
                    inner: fjall,
                    pop_failures: AtomicUsize::new(2),
                    update_failures: AtomicUsize::new(1),
                })
            },
        );
        let first = h.ctx.registry.create("https://example.com/1").await.unwrap();
        let second = h.ctx.registry.create("https://example.com/2").await.unwrap();
        h.ctx.dispatch.enqueue(&first.id).await.unwrap();
        h.ctx.dispatch.enqueue(&second.id).await.unwrap();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(JobWorker::new(h.ctx.clone(), 0).run(shutdown_rx));

        // two failed pops, then the first job's processing write fails
        wait_for_completions(&h, 1).await;
        assert!(!handle.is_finished());

        assert_eq!(h.ctx.registry.get(&first.id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(h.ctx.registry.get(&second.id).await.unwrap().status, JobStatus::Completed);

        shutdown_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let h = harness(Arc::new(StubFetcher::Writes("webm")));
        let mut ids = Vec::new();
        for i in 0..3 {
            let record = h.ctx.registry.create(&format!("https://example.com/{i}")).await.unwrap();
            h.ctx.dispatch.enqueue(&record.id).await.unwrap();
            ids.push(record.id);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(JobWorker::new(h.ctx.clone(), 0).run(shutdown_rx));

        wait_for_completions(&h, 3).await;

        shutdown_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        for id in ids {
            assert_eq!(h.ctx.registry.get(&id).await.unwrap().status, JobStatus::Completed);
        }
        assert_eq!(h.ctx.dispatch.depth().await.unwrap(), 0);
    }
}
