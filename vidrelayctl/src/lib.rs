use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vidrelay_core::{
    load_vidrelay_config, AcquireError, AcquiredVideo, Acquirer, FetchError, MediaError,
    MediaProbe, Platform, ProbeResult, VideoDescriptor, VidrelayConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vidrelay_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Media(#[from] MediaError),
    #[error("{0}")]
    Acquire(#[from] AcquireError),
    #[error("failed to write {path}: {source}")]
    Output {
        source: std::io::Error,
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vidrelay operator command-line interface", long_about = None)]
pub struct Cli {
    /// Path to the main vidrelay.toml
    #[arg(long, default_value = "configs/vidrelay.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log pipeline progress at debug level
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the full acquisition pipeline for one link
    Fetch(FetchArgs),
    /// Prints stream metadata for a local media file
    Probe(ProbeArgs),
    /// Runs the descriptor extractor on a saved page
    Extract(ExtractArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// TikTok or Instagram link
    pub url: String,
    /// Destination file (defaults to <id>.mp4 in the working directory)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Saved HTML page
    pub html: PathBuf,
    /// Canonical numeric id the embedded item must carry
    #[arg(long)]
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Loads and validates the configuration
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Fetch(args) => {
            let config = load_config(&cli.config)?;
            let report = block_on(fetch_video(&config, args))??;
            render(&report, cli.format)?;
        }
        Commands::Probe(args) => {
            let config = load_config(&cli.config)?;
            let probe = MediaProbe::new(&config.media);
            let result = block_on(probe.probe(&args.file))??;
            render(&ProbeReport(result), cli.format)?;
        }
        Commands::Extract(args) => {
            let descriptor = extract_saved_page(args)?;
            render(&descriptor, cli.format)?;
        }
        Commands::Config(ConfigCommands::Check) => {
            let config = load_config(&cli.config)?;
            render(&ConfigSummary::new(&cli.config, &config), cli.format)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded or under test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<VidrelayConfig> {
    let mut config = load_vidrelay_config(path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

async fn fetch_video(config: &VidrelayConfig, args: &FetchArgs) -> Result<FetchReport> {
    let acquirer = Acquirer::from_config(config)?;
    let video = acquirer.acquire(&args.url).await?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.mp4", video.descriptor.id)));
    tokio::fs::write(&output, &video.media.bytes)
        .await
        .map_err(|source| AppError::Output {
            source,
            path: output.clone(),
        })?;
    info!(path = %output.display(), bytes = video.media.bytes.len(), "video written");
    Ok(FetchReport::new(&video, output))
}

fn extract_saved_page(args: &ExtractArgs) -> Result<VideoDescriptor> {
    let body = fs::read_to_string(&args.html)?;
    Ok(vidrelay_core::extract(&body, &args.id)?)
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub platform: Platform,
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    pub strategy: String,
    pub elapsed_ms: u64,
    pub output: PathBuf,
}

impl FetchReport {
    fn new(video: &AcquiredVideo, output: PathBuf) -> Self {
        Self {
            platform: video.platform,
            id: video.descriptor.id.clone(),
            width: video.media.width,
            height: video.media.height,
            size_bytes: video.media.bytes.len(),
            strategy: video.strategy.as_str().to_string(),
            elapsed_ms: u64::try_from(video.elapsed.as_millis()).unwrap_or(u64::MAX),
            output,
        }
    }
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        format!(
            "{platform} {id} | {w}x{h} | {size} bytes | {strategy} | {ms} ms -> {path}",
            platform = self.platform,
            id = self.id,
            w = self.width,
            h = self.height,
            size = self.size_bytes,
            strategy = self.strategy,
            ms = self.elapsed_ms,
            path = self.output.display(),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ProbeReport(pub ProbeResult);

impl DisplayFallback for ProbeReport {
    fn display(&self) -> String {
        let probe = &self.0;
        [
            format!("container: {}", probe.container),
            format!("video: {} {}x{}", probe.video_codec, probe.width, probe.height),
            format!("audio: {}", probe.audio_codec),
            format!("duration: {:.2} s", probe.duration_s),
            format!("fps: {:.2}", probe.fps),
            format!("bitrate: {} bps", probe.bitrate_bps),
            format!(
                "compatible: {}",
                if probe.is_compatible() { "yes" } else { "no" }
            ),
        ]
        .join("\n")
    }
}

impl DisplayFallback for VideoDescriptor {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("id: {}", self.id),
            format!("url: {}", self.playable_url),
        ];
        if let Some(caption) = &self.caption {
            lines.push(format!("caption: {caption}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub config_path: PathBuf,
    pub token_configured: bool,
    pub allowed_ids: usize,
    pub reply_to_message: bool,
    pub with_captions: bool,
    pub retry_max_attempts: usize,
    pub deadline_seconds: u64,
    pub ffprobe: String,
    pub ffmpeg: String,
    pub staging_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_user: Option<String>,
}

impl ConfigSummary {
    fn new(path: &Path, config: &VidrelayConfig) -> Self {
        Self {
            config_path: path.to_path_buf(),
            token_configured: !config.bot.api_token.trim().is_empty(),
            allowed_ids: config.bot.allowed_ids.len(),
            reply_to_message: config.bot.reply_to_message,
            with_captions: config.bot.with_captions,
            retry_max_attempts: config.retry.max_attempts,
            deadline_seconds: config.pipeline.deadline_seconds,
            ffprobe: config.media.ffprobe_binary.clone(),
            ffmpeg: config.media.ffmpeg_binary.clone(),
            staging_root: config.pipeline.staging_root(),
            instagram_user: config
                .instagram
                .as_ref()
                .map(|section| section.username.clone()),
        }
    }
}

impl DisplayFallback for ConfigSummary {
    fn display(&self) -> String {
        let allowed = if self.allowed_ids == 0 {
            "everyone".to_string()
        } else {
            format!("{} ids", self.allowed_ids)
        };
        let mut lines = vec![
            format!("Config: {} (ok)", self.config_path.display()),
            format!(
                "  - Bot token: {}",
                if self.token_configured { "set" } else { "missing" }
            ),
            format!("  - Allowed: {allowed}"),
            format!(
                "  - Replies: {} | captions: {}",
                self.reply_to_message, self.with_captions
            ),
            format!("  - Retry attempts: {}", self.retry_max_attempts),
            format!("  - Deadline: {} s", self.deadline_seconds),
            format!("  - Tools: {} / {}", self.ffprobe, self.ffmpeg),
            format!("  - Staging: {}", self.staging_root.display()),
        ];
        match &self.instagram_user {
            Some(user) => lines.push(format!("  - Instagram: {user}")),
            None => lines.push("  - Instagram: anonymous".to_string()),
        }
        lines.join("\n")
    }
}
