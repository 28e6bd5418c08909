use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::extract::VideoDescriptor;
use crate::fetch::FetchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    TikTok,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::TikTok, Platform::Instagram];

    /// Registrable domain links must mention to be picked up from chat text.
    pub fn domain(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok.com",
            Platform::Instagram => "instagram.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }

    pub fn detect(raw: &str) -> Option<Platform> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|platform| {
            let domain = platform.domain();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata payload fetched for one link, before extraction.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub final_url: Url,
    pub body: String,
    pub canonical_id: String,
}

/// A platform able to turn a share link into a [`VideoDescriptor`].
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_page(&self, url: &str) -> FetchResult<SourcePage>;

    fn extract(&self, page: &SourcePage) -> FetchResult<VideoDescriptor>;
}
