use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::links::harvest_links;
use super::{ChatGateway, InboundMessage, VideoUpload};
use crate::config::BotSection;
use crate::pipeline::{AcquiredVideo, VideoAcquirer};
use crate::source::Platform;

const UPLOAD_FILENAME: &str = "video.mp4";
const DELIVERY_FAILED: &str = "The video was fetched but could not be sent.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleReport {
    pub links: usize,
    pub delivered: usize,
    pub failed: usize,
    pub ignored: bool,
}

/// Turns one inbound chat message into zero or more delivered videos.
pub struct MessageHandler {
    acquirer: Arc<dyn VideoAcquirer>,
    gateway: Arc<dyn ChatGateway>,
    settings: BotSection,
}

impl MessageHandler {
    pub fn new(
        acquirer: Arc<dyn VideoAcquirer>,
        gateway: Arc<dyn ChatGateway>,
        settings: BotSection,
    ) -> Self {
        Self {
            acquirer,
            gateway,
            settings,
        }
    }

    /// Empty allow-list admits everyone; otherwise the chat or the sender must be listed.
    pub fn is_allowed(&self, message: &InboundMessage) -> bool {
        let allowed = &self.settings.allowed_ids;
        allowed.is_empty()
            || allowed.contains(&message.chat_id)
            || message
                .sender_id
                .map(|sender| allowed.contains(&sender))
                .unwrap_or(false)
    }

    pub async fn handle(&self, message: &InboundMessage) -> HandleReport {
        let mut report = HandleReport::default();
        if !self.is_allowed(message) {
            debug!(chat_id = message.chat_id, "ignoring message from chat outside allow-list");
            report.ignored = true;
            return report;
        }
        let Some(text) = message.text.as_deref() else {
            return report;
        };
        let mut links: Vec<String> = Vec::new();
        for link in Platform::ALL
            .into_iter()
            .flat_map(|platform| harvest_links(text, &message.entities, platform))
        {
            // A link naming both domains is harvested once per platform.
            if !links.contains(&link) {
                links.push(link);
            }
        }
        report.links = links.len();

        for link in &links {
            match self.acquirer.acquire(link).await {
                Ok(video) => {
                    if self.deliver(message, video).await {
                        report.delivered += 1;
                    } else {
                        report.failed += 1;
                        self.notify(message, DELIVERY_FAILED).await;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    debug!(link = %link, error = %err, "replying with acquisition failure");
                    self.notify(message, err.user_message()).await;
                }
            }
        }
        report
    }

    async fn deliver(&self, message: &InboundMessage, video: AcquiredVideo) -> bool {
        let caption = if self.settings.with_captions {
            video.descriptor.caption.clone()
        } else {
            None
        };
        let upload = VideoUpload {
            bytes: video.media.bytes,
            filename: UPLOAD_FILENAME.to_string(),
            width: video.media.width,
            height: video.media.height,
        };
        info!(
            chat_id = message.chat_id,
            platform = %video.platform,
            id = %video.descriptor.id,
            "sending video"
        );
        let result = if self.settings.reply_to_message {
            self.gateway
                .reply_video(message.chat_id, message.message_id, upload, caption)
                .await
        } else {
            self.gateway.send_video(message.chat_id, upload, caption).await
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(chat_id = message.chat_id, error = %err, "failed to deliver video");
                false
            }
        }
    }

    async fn notify(&self, message: &InboundMessage, text: &str) {
        if let Err(err) = self
            .gateway
            .reply(message.chat_id, message.message_id, text)
            .await
        {
            warn!(chat_id = message.chat_id, error = %err, "failed to send error reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{GatewayError, GatewayResult, TextEntity};
    use crate::extract::VideoDescriptor;
    use crate::fetch::FetchError;
    use crate::media::{NormalizeStrategy, NormalizedMedia};
    use crate::pipeline::{AcquireError, AcquireResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Video {
            reply_to: Option<i64>,
            caption: Option<String>,
            bytes: usize,
        },
        Text(String),
    }

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<Sent>>,
        fail_videos: bool,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn send_video(
            &self,
            _chat_id: i64,
            video: VideoUpload,
            caption: Option<String>,
        ) -> GatewayResult<()> {
            if self.fail_videos {
                return Err(GatewayError::Rejected("too large".into()));
            }
            self.sent.lock().unwrap().push(Sent::Video {
                reply_to: None,
                caption,
                bytes: video.bytes.len(),
            });
            Ok(())
        }

        async fn reply_video(
            &self,
            _chat_id: i64,
            reply_to: i64,
            video: VideoUpload,
            caption: Option<String>,
        ) -> GatewayResult<()> {
            if self.fail_videos {
                return Err(GatewayError::Rejected("too large".into()));
            }
            self.sent.lock().unwrap().push(Sent::Video {
                reply_to: Some(reply_to),
                caption,
                bytes: video.bytes.len(),
            });
            Ok(())
        }

        async fn reply(&self, _chat_id: i64, _reply_to: i64, text: &str) -> GatewayResult<()> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn delete(&self, _chat_id: i64, _message_id: i64) -> GatewayResult<()> {
            Ok(())
        }
    }

    struct FakeAcquirer;

    #[async_trait]
    impl VideoAcquirer for FakeAcquirer {
        async fn acquire(&self, url: &str) -> AcquireResult<AcquiredVideo> {
            if url.contains("missing") {
                return Err(AcquireError::Fetch(FetchError::NoData("gone".into())));
            }
            Ok(AcquiredVideo {
                platform: Platform::detect(url).unwrap_or(Platform::TikTok),
                descriptor: VideoDescriptor {
                    id: "1".into(),
                    playable_url: "https://cdn.test/1.mp4".into(),
                    caption: Some("caption".into()),
                },
                media: NormalizedMedia {
                    bytes: vec![0; 4],
                    width: 720,
                    height: 1280,
                },
                strategy: NormalizeStrategy::Passthrough,
                elapsed: Duration::from_millis(5),
            })
        }
    }

    fn message(text: &str, chat_id: i64, sender_id: Option<i64>) -> InboundMessage {
        let entities = text
            .split(' ')
            .scan(0usize, |offset, word| {
                let entity = TextEntity {
                    offset: *offset,
                    length: word.encode_utf16().count(),
                };
                *offset += word.encode_utf16().count() + 1;
                Some(entity)
            })
            .collect();
        InboundMessage {
            chat_id,
            sender_id,
            message_id: 77,
            text: Some(text.to_string()),
            entities,
        }
    }

    fn handler(settings: BotSection, gateway: Arc<RecordingGateway>) -> MessageHandler {
        MessageHandler::new(Arc::new(FakeAcquirer), gateway, settings)
    }

    #[tokio::test]
    async fn allow_list_admits_chat_or_sender() {
        let settings = BotSection {
            allowed_ids: vec![10, 20],
            ..BotSection::default()
        };
        let gateway = Arc::new(RecordingGateway::default());
        let handler = handler(settings, gateway.clone());
        assert!(handler.is_allowed(&message("x", 10, None)));
        assert!(handler.is_allowed(&message("x", 99, Some(20))));
        assert!(!handler.is_allowed(&message("x", 99, Some(98))));

        let report = handler
            .handle(&message("tiktok.com/@u/video/1", 99, None))
            .await;
        assert!(report.ignored);
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replies_with_caption_and_one_error_per_failure() {
        let gateway = Arc::new(RecordingGateway::default());
        let handler = handler(BotSection::default(), gateway.clone());
        let report = handler
            .handle(&message(
                "see tiktok.com/@u/video/1 and www.instagram.com/reel/missing/",
                5,
                Some(6),
            ))
            .await;
        assert_eq!(report.links, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        let sent = gateway.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                Sent::Video {
                    reply_to: Some(77),
                    caption: Some("caption".into()),
                    bytes: 4,
                },
                Sent::Text("Could not find a video at that link.".into()),
            ]
        );
    }

    #[tokio::test]
    async fn send_mode_without_captions() {
        let gateway = Arc::new(RecordingGateway::default());
        let settings = BotSection {
            reply_to_message: false,
            with_captions: false,
            ..BotSection::default()
        };
        handler(settings, gateway.clone())
            .handle(&message("https://www.tiktok.com/@u/video/1", 5, None))
            .await;
        assert_eq!(
            gateway.sent.lock().unwrap().clone(),
            vec![Sent::Video {
                reply_to: None,
                caption: None,
                bytes: 4,
            }]
        );
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_once() {
        let gateway = Arc::new(RecordingGateway {
            fail_videos: true,
            ..RecordingGateway::default()
        });
        let report = handler(BotSection::default(), gateway.clone())
            .handle(&message("tiktok.com/@u/video/1", 5, None))
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(
            gateway.sent.lock().unwrap().clone(),
            vec![Sent::Text(DELIVERY_FAILED.into())]
        );
    }

    #[tokio::test]
    async fn link_naming_both_platforms_is_delivered_once() {
        let gateway = Arc::new(RecordingGateway::default());
        let report = handler(BotSection::default(), gateway.clone())
            .handle(&message(
                "https://www.tiktok.com/@u/video/1?ref=instagram.com",
                5,
                None,
            ))
            .await;
        assert_eq!(report.links, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    }
}
