/*!
Errors raised while talking to the threats API
*/

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout, ...)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The response body was not the JSON shape we expected
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ApiError {
    /// Status code of the failed response, if there was one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }
}
