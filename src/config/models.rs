use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Largest accepted submission body
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(64 * 1024)
}

/// Backing store implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded fjall keyspace on local disk
    #[default]
    Fjall,
    /// External Redis server (requires the `redis` cargo feature)
    Redis,
}

/// Backing store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Keyspace directory for the fjall backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Connection URL for the redis backend, e.g. `redis://127.0.0.1:6379/0`
    pub redis_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fjall,
            path: default_store_path(),
            redis_url: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store")
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Rolling TTL of job records, refreshed on every write
    #[serde(default = "default_job_ttl")]
    pub job_ttl: HumanDuration,
    /// TTL of result records; also re-armed on the job when it completes
    #[serde(default = "default_result_ttl")]
    pub result_ttl: HumanDuration,
    /// Pause after a backing store error before dequeuing again
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: HumanDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            job_ttl: default_job_ttl(),
            result_ttl: default_result_ttl(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_worker_count() -> usize {
    5
}

fn default_job_ttl() -> HumanDuration {
    HumanDuration::from_hours(2)
}

fn default_result_ttl() -> HumanDuration {
    HumanDuration::from_mins(15)
}

fn default_retry_backoff() -> HumanDuration {
    HumanDuration::from_secs(1)
}

/// External fetch tool invocation
///
/// `args` is a template; `{url}` is replaced by the resource locator and
/// `{output}` by the per-job output path template inside the artifact directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Wall-clock bound on one invocation; the child is killed when exceeded
    #[serde(default = "default_fetch_timeout")]
    pub timeout: HumanDuration,
    /// Content type used when the artifact extension is not recognised
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout: default_fetch_timeout(),
            content_type: default_content_type(),
        }
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_args() -> Vec<String> {
    [
        "--no-warnings",
        "--no-playlist",
        "--print",
        "after_move:title",
        "--format",
        "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
        "--output",
        "{output}",
        "{url}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_fetch_timeout() -> HumanDuration {
    HumanDuration::from_mins(30)
}

fn default_content_type() -> String {
    mime::APPLICATION_OCTET_STREAM.to_string()
}

/// Artifact directory and janitor schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// Files older than this (by modification time) are swept
    #[serde(default = "default_retention")]
    pub retention: HumanDuration,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_retention() -> HumanDuration {
    HumanDuration::from_mins(15)
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_mins(1)
}
