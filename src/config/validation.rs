use super::models::{Config, StoreBackend};
use thiserror::Error;

/// Upper bound for `server.max_payload_bytes`
const MAX_PAYLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_payload_bytes ({actual}) exceeds limit of 5MB ({limit})")]
    PayloadSizeExceedsLimit { actual: u64, limit: u64 },

    #[error("max_payload_bytes must be positive")]
    ZeroPayloadSize,

    #[error("workers.count must be at least 1")]
    NoWorkers,

    #[error("Duration must be positive: {field}")]
    ZeroDuration { field: &'static str },

    #[error("fetcher.program must not be empty")]
    EmptyProgram,

    #[error("fetcher.args must contain the '{placeholder}' placeholder")]
    MissingPlaceholder { placeholder: &'static str },

    #[error("store.backend is redis but store.redis_url is not set")]
    MissingRedisUrl,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_payload_size(config)?;
    validate_workers(config)?;
    validate_fetcher(config)?;
    validate_artifacts(config)?;
    validate_store(config)?;
    Ok(())
}

fn validate_payload_size(config: &Config) -> Result<(), ValidationError> {
    let actual = config.server.max_payload_bytes.as_u64();
    if actual == 0 {
        return Err(ValidationError::ZeroPayloadSize);
    }
    if actual > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::PayloadSizeExceedsLimit {
            actual,
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    let workers = &config.workers;
    if workers.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if workers.job_ttl.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "workers.job_ttl" });
    }
    if workers.result_ttl.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "workers.result_ttl" });
    }
    Ok(())
}

fn validate_fetcher(config: &Config) -> Result<(), ValidationError> {
    let fetcher = &config.fetcher;
    if fetcher.program.trim().is_empty() {
        return Err(ValidationError::EmptyProgram);
    }
    if fetcher.timeout.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "fetcher.timeout" });
    }

    for placeholder in ["{url}", "{output}"] {
        if !fetcher.args.iter().any(|arg| arg.contains(placeholder)) {
            return Err(ValidationError::MissingPlaceholder { placeholder });
        }
    }
    Ok(())
}

fn validate_artifacts(config: &Config) -> Result<(), ValidationError> {
    if config.artifacts.retention.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "artifacts.retention" });
    }
    if config.artifacts.sweep_interval.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "artifacts.sweep_interval" });
    }
    Ok(())
}

fn validate_store(config: &Config) -> Result<(), ValidationError> {
    if config.store.backend == StoreBackend::Redis
        && config.store.redis_url.as_deref().is_none_or(str::is_empty)
    {
        return Err(ValidationError::MissingRedisUrl);
    }
    Ok(())
}
