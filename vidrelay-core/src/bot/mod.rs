//! Chat-side glue: link harvesting and the per-message handler. The chat
//! platform itself is reached through [`ChatGateway`].

mod handler;
mod links;

use async_trait::async_trait;
use thiserror::Error;

pub use handler::{HandleReport, MessageHandler};
pub use links::harvest_links;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("chat platform rejected the request: {0}")]
    Rejected(String),
    #[error("chat platform unreachable: {0}")]
    Transport(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Entity span as reported by the chat platform, in UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEntity {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    /// Absent for channel posts.
    pub sender_id: Option<i64>,
    pub message_id: i64,
    pub text: Option<String>,
    pub entities: Vec<TextEntity>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct VideoUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for VideoUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoUpload")
            .field("bytes", &self.bytes.len())
            .field("filename", &self.filename)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_video(
        &self,
        chat_id: i64,
        video: VideoUpload,
        caption: Option<String>,
    ) -> GatewayResult<()>;

    async fn reply_video(
        &self,
        chat_id: i64,
        reply_to: i64,
        video: VideoUpload,
        caption: Option<String>,
    ) -> GatewayResult<()>;

    async fn reply(&self, chat_id: i64, reply_to: i64, text: &str) -> GatewayResult<()>;

    async fn delete(&self, chat_id: i64, message_id: i64) -> GatewayResult<()>;
}
