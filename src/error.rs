use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong talking to the upstream API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("timed out after {after:?} fetching {what}")]
    Timeout { what: String, after: Duration },

    #[error("malformed upstream JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("item {0} does not exist")]
    NotFound(u64),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
