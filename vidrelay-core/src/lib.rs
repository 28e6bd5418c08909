pub mod bot;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod instagram;
pub mod media;
pub mod pipeline;
pub mod source;
pub mod staging;
pub mod tiktok;

pub use bot::{
    harvest_links, ChatGateway, GatewayError, GatewayResult, HandleReport, InboundMessage,
    MessageHandler, TextEntity, VideoUpload,
};
pub use config::{
    load_vidrelay_config, BotSection, FetchSection, InstagramSection, MediaSection,
    PipelineSection, RetrySection, VidrelayConfig, MAX_DEADLINE_SECONDS,
};
pub use error::{ConfigError, Result};
pub use extract::{canonical_id, extract, VideoDescriptor};
pub use fetch::{
    FetchError, FetchErrorKind, FetchResult, FetchedPage, HttpTransport, RetryOutcome,
    RetryPolicy, Retryable,
};
pub use instagram::{
    shortcode_from_url, Authenticator, FileSessionStore, InstagramClient, InstagramSession,
    SessionError, SessionManager, SessionStore, WebLoginAuthenticator,
};
pub use media::{
    CommandExecutor, MediaError, MediaNormalizer, MediaProbe, MediaResult, NormalizeOutcome,
    NormalizeStrategy, NormalizedMedia, ProbeResult, SystemCommandExecutor,
};
pub use pipeline::{
    AcquireError, AcquireResult, AcquiredVideo, Acquirer, AcquisitionStage, VideoAcquirer,
};
pub use source::{Platform, SourcePage, VideoSource};
pub use staging::{staged_file_count, StagingArea};
pub use tiktok::TikTokSource;
