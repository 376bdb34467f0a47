//! Error types for marksim-adapters

use marksim_core::CollaboratorError;
use thiserror::Error;

/// Errors raised while building an adapter. Call-time failures are reported
/// as [`CollaboratorError`] instead.
#[derive(Error, Debug)]
pub enum AdapterConfigError {
    /// The reasoning service needs a key and none was configured
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    /// A base URL did not parse
    #[error("invalid base url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be constructed
    #[error("failed to build http client: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, AdapterConfigError>;

impl From<reqwest::Error> for AdapterConfigError {
    fn from(err: reqwest::Error) -> Self {
        AdapterConfigError::Client(err.to_string())
    }
}

/// Classify a transport error from a call that was bounded by `timeout_ms`.
pub(crate) fn classify(err: reqwest::Error, timeout_ms: u64) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout {
            after_ms: timeout_ms,
        }
    } else if err.is_connect() {
        CollaboratorError::Unavailable(err.to_string())
    } else if err.is_decode() {
        CollaboratorError::InvalidResponse(err.to_string())
    } else {
        CollaboratorError::Http(err.to_string())
    }
}

/// Map a non-success status. Throttling and server errors are `Unavailable`.
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> CollaboratorError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.chars().take(300).collect::<String>())
    };
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Unavailable(detail)
    } else {
        CollaboratorError::Http(detail)
    }
}

/// Parse a base URL that path segments will be appended to.
pub(crate) fn parse_segment_base(raw: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| AdapterConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(AdapterConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "cannot be a base".to_string(),
        });
    }
    Ok(url)
}

pub(crate) fn parse_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    reqwest::Url::parse(trimmed).map_err(|e| AdapterConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    Ok(trimmed.to_string())
}
