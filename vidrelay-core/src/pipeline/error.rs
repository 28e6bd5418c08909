use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::AcquisitionStage;
use crate::fetch::FetchError;
use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("no source handles {url}")]
    Unsupported { url: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("staging failed at {path}: {source}")]
    Staging {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("deadline exceeded during {stage} after {elapsed:?}")]
    Timeout {
        stage: AcquisitionStage,
        elapsed: Duration,
    },
    #[error("acquirer setup failed: {0}")]
    Setup(String),
}

impl AcquireError {
    /// The single reply a chat user sees for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            AcquireError::Unsupported { .. } => "This link is not supported.",
            AcquireError::Fetch(FetchError::RateLimited { .. }) => {
                "The platform is limiting requests right now. Please try again later."
            }
            AcquireError::Fetch(FetchError::NoData(_)) => "Could not find a video at that link.",
            AcquireError::Fetch(FetchError::AuthRequired { .. }) => {
                "This post needs a login and could not be fetched."
            }
            AcquireError::Fetch(FetchError::InvalidUrl { .. }) => {
                "That link does not point to a video."
            }
            AcquireError::Fetch(_) => "Could not reach the platform. Please try again.",
            AcquireError::Media(_) => "The video could not be processed.",
            AcquireError::Timeout { .. } => "Fetching the video took too long. Please try again.",
            AcquireError::Staging { .. } | AcquireError::Setup(_) => {
                "Something went wrong while preparing the video."
            }
        }
    }
}

pub type AcquireResult<T> = Result<T, AcquireError>;
