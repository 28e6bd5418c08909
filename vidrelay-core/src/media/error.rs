use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("probe of {path} failed: {message}")]
    Probe { path: PathBuf, message: String },
    #[error("no video stream in {path}")]
    MissingVideoStream { path: PathBuf },
    #[error("transcode exited with {status:?}: {stderr}")]
    Transcode { status: Option<i32>, stderr: String },
    #[error("transcode produced no output at {path}")]
    MissingOutput { path: PathBuf },
    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse probe output: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for MediaError {
    fn from(error: serde_json::Error) -> Self {
        MediaError::Parse(error.to_string())
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
