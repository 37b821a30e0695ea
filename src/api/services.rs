use std::collections::HashMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{error, info, warn};

use super::{
    models::{DownloadAccepted, DownloadRequest, HealthResponse, StatusResponse},
    state::AppState,
};
use crate::api::error::ApiError;
use crate::jobs::keys::job_key;
use crate::jobs::{JobError, JobStatus};
use crate::storage::content_type_for;

/// Job submission endpoint (POST /download)
///
/// ## Flow:
/// 1. Validate Content-Type, read the (possibly decompressed) body
/// 2. Validate the locator; nothing is written for a rejected request
/// 3. Persist a `pending` job record
/// 4. Push the job id onto the dispatch queue
///
/// The response carries the new job id; progress is polled through
/// `GET /status/{job_id}`.
pub async fn submit_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let max_size = state.config.server.max_payload_bytes.as_usize();
    let body_bytes = read_body(body, max_size).await?;

    let request: DownloadRequest = serde_json::from_slice(&body_bytes)?;
    let locator = super::validation::validate_download_request(&request)
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let record = state.registry.create(locator).await?;

    if let Err(e) = state.dispatch.enqueue(&record.id).await {
        error!(job_id = %record.id, error = %e, "Failed to enqueue job");
        // nobody learns the id, so the record would sit in `pending` until it expires
        if let Err(cleanup) = state.store.delete(&job_key(&record.id)).await {
            warn!(job_id = %record.id, error = %cleanup, "Failed to remove unqueued job");
        }
        return Err(e.into());
    }

    state.metrics.job_submitted();
    info!(job_id = %record.id, "Job accepted");

    let response = DownloadAccepted {
        job_id: record.id,
        status: record.status,
        message: record.message,
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Reads the request body, stopping as soon as it exceeds `max_size`
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decoded payload.
async fn read_body(body: Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = Limited::new(body, max_size)
        .collect()
        .await
        .map_err(|err| {
            if err.is::<LengthLimitError>() {
                ApiError::PayloadTooLarge(max_size)
            } else {
                ApiError::InvalidPayload(err.to_string())
            }
        })?
        .to_bytes()
        .to_vec();

    Ok(data)
}

/// Job status endpoint (GET /status/{job_id})
///
/// The result record is looked up only for completed jobs. A completed job
/// whose result already expired reports `result: null`.
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.registry.get(&job_id).await?;

    let result = if job.status == JobStatus::Completed {
        match state.results.get(&job_id).await {
            Ok(result) => Some(result),
            Err(JobError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    Ok((StatusCode::OK, Json(StatusResponse { job, result })))
}

/// Artifact download endpoint (GET /files/{filename})
///
/// Streams the file from the artifact directory as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state.artifacts.get(&filename).await?;

    let content_type = content_type_for(&filename, &state.config.fetcher.content_type);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\'], "_")
    );
    let headers = [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CONTENT_LENGTH, file.meta.size.to_string()),
    ];

    Ok((headers, Body::from_stream(file.into_stream())))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let store_status = match state.store.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!(backend = state.store.backend(), error = %e, "Store health check failed");
            "unhealthy"
        }
    };
    components.insert(state.store.backend().to_string(), store_status.to_string());

    let artifacts_status = if state.artifacts.root().is_dir() {
        "healthy"
    } else {
        "unhealthy"
    };
    components.insert("artifacts".to_string(), artifacts_status.to_string());

    let queue_depth = state.dispatch.depth().await.ok();

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        queue_depth,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
