//! Request and response bodies of the HTTP API
//!
//! - `POST /download` takes a [`DownloadRequest`] and answers with [`DownloadAccepted`]
//! - `GET /status/{job_id}` answers with [`StatusResponse`]
//! - `GET /health` answers with [`HealthResponse`]
//!
//! ```json
//! { "resourceLocator": "https://www.youtube.com/watch?v=dQw4w9WgXcQ" }
//! ```

use crate::jobs::{JobRecord, JobStatus, ResultRecord};
use crate::observability::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadRequest {
    /// Also accepted as `url`
    #[serde(rename = "resourceLocator", alias = "url", default)]
    pub resource_locator: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownloadAccepted {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusResponse {
    pub job: JobRecord,
    /// Present only for completed jobs whose result has not expired
    pub result: Option<ResultRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub queue_depth: Option<usize>,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
