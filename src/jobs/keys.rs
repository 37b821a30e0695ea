/// Key layout in the backing store
///
/// - `job:{job_id}`: job record (hash fields)
/// - `result:{job_id}`: result record (hash fields)
/// - `queue:downloads`: dispatch list of job ids

/// List holding job ids waiting for a worker
pub const QUEUE_KEY: &str = "queue:downloads";

/// Encode a job key: job:{job_id}
pub fn job_key(job_id: &str) -> String {
    format!("job:{}", job_id)
}

/// Encode a result key: result:{job_id}
pub fn result_key(job_id: &str) -> String {
    format!("result:{}", job_id)
}
