// src/proxy/error.rs
use hyper::StatusCode;

/// Outcome of a failed remote call. Recorded on the target, never thrown
/// across the proxy boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response body: {0}")]
    Decode(String),

    #[error("Remote returned HTTP {status}: {message}")]
    Application { status: u16, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RemoteError {
    pub fn status_code(&self) -> u16 {
        match self {
            RemoteError::Timeout(_) => StatusCode::REQUEST_TIMEOUT.as_u16(),
            RemoteError::Transport(_) => StatusCode::BAD_GATEWAY.as_u16(),
            RemoteError::Decode(_)
            | RemoteError::Application { .. }
            | RemoteError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    /// Classify a reqwest failure raised while sending or reading a request.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_builder() {
            RemoteError::Unexpected(err.to_string())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Rank a status code for aggregation: server and application errors outrank
/// transport errors, which outrank timeouts. Ties within a class go to the higher code.
pub fn severity(status_code: u16) -> (u8, u16) {
    let class = match status_code {
        200..=299 => 0,
        408 => 1,
        502 => 2,
        _ => 3,
    };
    (class, status_code)
}

/// Aggregate per-target status codes into one externally visible code.
pub fn aggregate_status<I>(codes: I) -> u16
where
    I: IntoIterator<Item = u16>,
{
    codes
        .into_iter()
        .filter(|code| !(200..=299).contains(code))
        .max_by_key(|code| severity(*code))
        .unwrap_or(StatusCode::OK.as_u16())
}
