use async_trait::async_trait;

use crate::extract::{self, canonical_id, VideoDescriptor};
use crate::fetch::{FetchResult, HttpTransport, RetryPolicy};
use crate::source::{Platform, SourcePage, VideoSource};

/// TikTok video pages: fetched with retries, item recovered from the embedded JSON.
#[derive(Debug, Clone)]
pub struct TikTokSource {
    transport: HttpTransport,
    retry: RetryPolicy,
}

impl TikTokSource {
    pub fn new(transport: HttpTransport, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }
}

#[async_trait]
impl VideoSource for TikTokSource {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn fetch_page(&self, url: &str) -> FetchResult<SourcePage> {
        let outcome = self
            .retry
            .run("tiktok_page", |_| self.transport.fetch(url))
            .await?;
        let page = outcome.result;
        let canonical_id = canonical_id(&page.final_url)?;
        Ok(SourcePage {
            final_url: page.final_url,
            body: page.body,
            canonical_id,
        })
    }

    fn extract(&self, page: &SourcePage) -> FetchResult<VideoDescriptor> {
        extract::extract(&page.body, &page.canonical_id)
    }
}
