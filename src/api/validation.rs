use thiserror::Error;

use super::models::DownloadRequest;

/// Longest accepted resource locator
const MAX_LOCATOR_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("resourceLocator must not be empty")]
    EmptyLocator,
    #[error("resourceLocator exceeds {MAX_LOCATOR_LEN} bytes")]
    LocatorTooLong,
    #[error("resourceLocator must not contain control characters")]
    ControlCharacters,
    #[error("resourceLocator must not start with '-'")]
    LooksLikeOption,
}

/// Check a submission and return the trimmed locator
///
/// The locator ends up as a command-line argument of the fetch tool, so a
/// leading `-` is refused to keep it from being read as an option.
pub fn validate_download_request(
    request: &DownloadRequest,
) -> Result<&str, RequestValidationError> {
    let locator = request.resource_locator.trim();

    if locator.is_empty() {
        return Err(RequestValidationError::EmptyLocator);
    }
    if locator.len() > MAX_LOCATOR_LEN {
        return Err(RequestValidationError::LocatorTooLong);
    }
    if locator.chars().any(char::is_control) {
        return Err(RequestValidationError::ControlCharacters);
    }
    if locator.starts_with('-') {
        return Err(RequestValidationError::LooksLikeOption);
    }

    Ok(locator)
}
