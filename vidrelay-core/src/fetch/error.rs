use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

/// Structured classification of an upstream failure, inspected by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Connection,
    Timeout,
    BadResponse,
    ClientStatus,
    RateLimited,
    AuthRequired,
    NoData,
    InvalidUrl,
    Io,
    Client,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("upstream rate limited request to {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },
    #[error("upstream requires authentication for {url}")]
    AuthRequired { url: String },
    #[error("no video data found: {0}")]
    NoData(String),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http client setup failed: {0}")]
    Client(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl FetchError {
    /// Maps a non-success HTTP status to its structured error.
    pub fn from_status(status: u16, url: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let url = url.into();
        match status {
            429 => FetchError::RateLimited { url, retry_after },
            401 => FetchError::AuthRequired { url },
            _ => FetchError::Status { status, url },
        }
    }

    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout {
                url: url.to_string(),
            };
        }
        if let Some(status) = error.status() {
            return FetchError::from_status(status.as_u16(), url, None);
        }
        FetchError::Connection {
            url: url.to_string(),
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Connection { .. } => FetchErrorKind::Connection,
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::Status { status, .. } if *status >= 500 => FetchErrorKind::BadResponse,
            FetchError::Status { .. } => FetchErrorKind::ClientStatus,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::AuthRequired { .. } => FetchErrorKind::AuthRequired,
            FetchError::NoData(_) => FetchErrorKind::NoData,
            FetchError::InvalidUrl { .. } => FetchErrorKind::InvalidUrl,
            FetchError::Io { .. } => FetchErrorKind::Io,
            FetchError::Client(_) => FetchErrorKind::Client,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Connection
                | FetchErrorKind::Timeout
                | FetchErrorKind::BadResponse
                | FetchErrorKind::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_structured_kinds() {
        let url = "https://www.tiktok.com/@user/video/1";
        assert_eq!(
            FetchError::from_status(429, url, None).kind(),
            FetchErrorKind::RateLimited
        );
        assert_eq!(
            FetchError::from_status(401, url, None).kind(),
            FetchErrorKind::AuthRequired
        );
        assert_eq!(
            FetchError::from_status(502, url, None).kind(),
            FetchErrorKind::BadResponse
        );
        assert_eq!(
            FetchError::from_status(404, url, None).kind(),
            FetchErrorKind::ClientStatus
        );
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(FetchError::from_status(503, "u", None).is_retryable());
        assert!(FetchError::from_status(429, "u", None).is_retryable());
        assert!(FetchError::Timeout { url: "u".into() }.is_retryable());
        assert!(!FetchError::from_status(404, "u", None).is_retryable());
        assert!(!FetchError::from_status(401, "u", None).is_retryable());
        assert!(!FetchError::NoData("empty".into()).is_retryable());
    }
}
