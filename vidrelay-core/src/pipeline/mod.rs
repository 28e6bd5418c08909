//! Acquisition orchestrator: fetch, extract, download, normalize under one
//! wall-clock deadline, with the staging area torn down on every exit path.

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{VidrelayConfig, MAX_DEADLINE_SECONDS};
use crate::extract::VideoDescriptor;
use crate::fetch::{HttpTransport, RetryPolicy};
use crate::instagram::{FileSessionStore, InstagramClient, SessionManager, WebLoginAuthenticator};
use crate::media::{MediaNormalizer, NormalizeStrategy, NormalizedMedia};
use crate::source::{Platform, VideoSource};
use crate::staging::StagingArea;
use crate::tiktok::TikTokSource;

pub use error::{AcquireError, AcquireResult};

const SOURCE_FILE_NAME: &str = "source.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStage {
    Start,
    FetchingMetadata,
    Extracting,
    Downloading,
    Normalizing,
    Done,
    Error,
}

impl AcquisitionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionStage::Start => "start",
            AcquisitionStage::FetchingMetadata => "fetching_metadata",
            AcquisitionStage::Extracting => "extracting",
            AcquisitionStage::Downloading => "downloading",
            AcquisitionStage::Normalizing => "normalizing",
            AcquisitionStage::Done => "done",
            AcquisitionStage::Error => "error",
        }
    }
}

impl std::fmt::Display for AcquisitionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AcquiredVideo {
    pub platform: Platform,
    pub descriptor: VideoDescriptor,
    pub media: NormalizedMedia,
    pub strategy: NormalizeStrategy,
    pub elapsed: Duration,
}

/// Anything that can turn a link into a deliverable video.
#[async_trait]
pub trait VideoAcquirer: Send + Sync {
    async fn acquire(&self, url: &str) -> AcquireResult<AcquiredVideo>;
}

pub struct Acquirer {
    transport: HttpTransport,
    retry: RetryPolicy,
    normalizer: MediaNormalizer,
    sources: Vec<Arc<dyn VideoSource>>,
    staging_root: PathBuf,
    deadline: Duration,
}

impl Acquirer {
    pub fn new(
        transport: HttpTransport,
        retry: RetryPolicy,
        normalizer: MediaNormalizer,
        staging_root: impl Into<PathBuf>,
        deadline: Duration,
    ) -> Self {
        Self {
            transport,
            retry,
            normalizer,
            sources: Vec::new(),
            staging_root: staging_root.into(),
            deadline,
        }
    }

    /// Wires the transport, both platform sources and the normalizer from config.
    pub fn from_config(config: &VidrelayConfig) -> AcquireResult<Self> {
        let transport = HttpTransport::new(&config.fetch)?;
        let retry = RetryPolicy::new(config.retry.clone());
        let staging_root = config.pipeline.staging_root();
        let normalizer = MediaNormalizer::new(&config.media, staging_root.clone());

        let tiktok = TikTokSource::new(transport.clone(), retry.clone());
        let instagram_section = config.instagram.clone().unwrap_or_default();
        let mut instagram = InstagramClient::new(
            transport.client().clone(),
            instagram_section.doc_id.clone(),
            retry.clone(),
        );
        if config.instagram.is_some() {
            let authenticator = WebLoginAuthenticator::new(&config.fetch.user_agent)
                .map_err(|err| AcquireError::Setup(err.to_string()))?;
            let sessions = SessionManager::new(
                instagram_section.username.clone(),
                instagram_section.password.clone(),
                Arc::new(FileSessionStore::new(&instagram_section.session_dir)),
            )
            .with_authenticator(Arc::new(authenticator));
            instagram = instagram.with_sessions(Arc::new(sessions));
        }

        Ok(Self::new(
            transport,
            retry,
            normalizer,
            staging_root,
            Duration::from_secs(config.pipeline.deadline_seconds),
        )
        .with_source(Arc::new(tiktok))
        .with_source(Arc::new(instagram)))
    }

    pub fn with_source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn acquire(&self, url: &str) -> AcquireResult<AcquiredVideo> {
        let platform = Platform::detect(url).ok_or_else(|| AcquireError::Unsupported {
            url: url.to_string(),
        })?;
        self.acquire_from(platform, url).await
    }

    /// Runs the whole sequence for a link already attributed to `platform`.
    pub async fn acquire_from(&self, platform: Platform, url: &str) -> AcquireResult<AcquiredVideo> {
        let source = self
            .sources
            .iter()
            .find(|source| source.platform() == platform)
            .cloned()
            .ok_or_else(|| AcquireError::Unsupported {
                url: url.to_string(),
            })?;

        let mut run = Run::new(self.deadline);
        let result = self.sequence(&mut run, source.as_ref(), url).await;
        match &result {
            Ok(video) => {
                run.enter_unchecked(AcquisitionStage::Done);
                info!(
                    platform = %platform,
                    id = %video.descriptor.id,
                    strategy = video.strategy.as_str(),
                    bytes = video.media.bytes.len(),
                    elapsed = ?video.elapsed,
                    "video acquired"
                );
            }
            Err(err) => {
                let failed_at = run.stage;
                run.enter_unchecked(AcquisitionStage::Error);
                warn!(platform = %platform, url, stage = %failed_at, error = %err, "acquisition failed");
            }
        }
        result
    }

    async fn sequence(
        &self,
        run: &mut Run,
        source: &dyn VideoSource,
        url: &str,
    ) -> AcquireResult<AcquiredVideo> {
        run.enter(AcquisitionStage::FetchingMetadata)?;
        let page = run.bounded(source.fetch_page(url)).await??;

        run.enter(AcquisitionStage::Extracting)?;
        let descriptor = source.extract(&page)?;

        run.enter(AcquisitionStage::Downloading)?;
        let staging = StagingArea::create(&self.staging_root)
            .await
            .map_err(|err| AcquireError::Staging {
                source: err,
                path: self.staging_root.clone(),
            })?;
        let result = self.deliverable(run, &staging, &descriptor).await;
        staging.teardown().await;
        let (media, strategy) = result?;

        Ok(AcquiredVideo {
            platform: source.platform(),
            descriptor,
            media,
            strategy,
            elapsed: run.elapsed(),
        })
    }

    async fn deliverable(
        &self,
        run: &mut Run,
        staging: &StagingArea,
        descriptor: &VideoDescriptor,
    ) -> AcquireResult<(NormalizedMedia, NormalizeStrategy)> {
        let input = staging.file(SOURCE_FILE_NAME);
        let download = self.retry.run("download", |_| {
            self.transport.download_to(&descriptor.playable_url, &input)
        });
        let downloaded = run.bounded(download).await??;
        debug!(id = %descriptor.id, bytes = downloaded.result, attempts = downloaded.attempts, "media staged");

        run.enter(AcquisitionStage::Normalizing)?;
        let outcome = run.bounded(self.normalizer.normalize_in(staging, &input)).await??;
        Ok((outcome.media, outcome.strategy))
    }
}

#[async_trait]
impl VideoAcquirer for Acquirer {
    async fn acquire(&self, url: &str) -> AcquireResult<AcquiredVideo> {
        Acquirer::acquire(self, url).await
    }
}

/// Stage and deadline bookkeeping for one request.
struct Run {
    stage: AcquisitionStage,
    started: Instant,
    deadline: Instant,
}

impl Run {
    fn new(budget: Duration) -> Self {
        let started = Instant::now();
        let budget = budget.min(Duration::from_secs(MAX_DEADLINE_SECONDS));
        Self {
            stage: AcquisitionStage::Start,
            started,
            deadline: started.checked_add(budget).unwrap_or(started),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn enter(&mut self, stage: AcquisitionStage) -> AcquireResult<()> {
        if Instant::now() >= self.deadline {
            return Err(self.timed_out());
        }
        self.enter_unchecked(stage);
        Ok(())
    }

    fn enter_unchecked(&mut self, stage: AcquisitionStage) {
        debug!(from = %self.stage, to = %stage, elapsed = ?self.elapsed(), "acquisition stage");
        self.stage = stage;
    }

    /// Awaits `future` unless the deadline passes first, in which case the
    /// future is dropped along with any child process it owns.
    async fn bounded<F: std::future::Future>(&self, future: F) -> AcquireResult<F::Output> {
        timeout_at(self.deadline, future)
            .await
            .map_err(|_| self.timed_out())
    }

    fn timed_out(&self) -> AcquireError {
        AcquireError::Timeout {
            stage: self.stage,
            elapsed: self.elapsed(),
        }
    }
}
