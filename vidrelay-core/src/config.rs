use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Upper bound for one request's wall-clock budget.
pub const MAX_DEADLINE_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VidrelayConfig {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub instagram: Option<InstagramSection>,
}

impl VidrelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be lower than retry.base_delay_ms".into(),
            ));
        }
        if self.pipeline.deadline_seconds == 0
            || self.pipeline.deadline_seconds > MAX_DEADLINE_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "pipeline.deadline_seconds must be between 1 and {MAX_DEADLINE_SECONDS}"
            )));
        }
        if self.media.ffmpeg_binary.trim().is_empty() || self.media.ffprobe_binary.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "media.ffmpeg_binary and media.ffprobe_binary are required".into(),
            ));
        }
        if let Some(instagram) = &self.instagram {
            if instagram.username.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "instagram.username must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Applies the process environment on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.apply_overrides(&vars)
    }

    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(token) = vars.get("API_TOKEN") {
            self.bot.api_token = token.clone();
        }
        if let Some(raw) = vars.get("ALLOWED_IDS") {
            self.bot.allowed_ids = parse_id_list("ALLOWED_IDS", raw)?;
        }
        if let Some(raw) = vars.get("REPLY_TO_MESSAGE") {
            self.bot.reply_to_message = parse_flag(raw);
        }
        if let Some(raw) = vars.get("WITH_CAPTIONS") {
            self.bot.with_captions = parse_flag(raw);
        }
        let username = vars.get("INSTAGRAM_USERNAME").filter(|v| !v.trim().is_empty());
        let password = vars.get("INSTAGRAM_PASSWORD").filter(|v| !v.is_empty());
        if username.is_some() || password.is_some() {
            let section = self.instagram.get_or_insert_with(InstagramSection::default);
            if let Some(username) = username {
                section.username = username.trim().to_string();
            }
            if let Some(password) = password {
                section.password = Some(password.clone());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSection {
    pub api_token: String,
    pub allowed_ids: Vec<i64>,
    pub reply_to_message: bool,
    pub with_captions: bool,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            allowed_ids: Vec::new(),
            reply_to_message: true,
            with_captions: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    /// Cookie domain the session cookie is scoped to, subdomains included.
    pub cookie_domain: String,
    /// Page requests are capped as a whole; downloads only between chunks.
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".into(),
            accept_language: "en-US,en;q=0.5".into(),
            referer: "https://www.tiktok.com/".into(),
            cookie_domain: "tiktok.com".into(),
            request_timeout_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub ffprobe_binary: String,
    pub ffmpeg_binary: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub probe_timeout_seconds: u64,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            ffprobe_binary: "ffprobe".into(),
            ffmpeg_binary: "ffmpeg".into(),
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            video_bitrate: "2M".into(),
            audio_bitrate: "128k".into(),
            probe_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub deadline_seconds: u64,
    pub staging_dir: Option<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            deadline_seconds: 120,
            staging_dir: None,
        }
    }
}

impl PipelineSection {
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstagramSection {
    pub username: String,
    pub password: Option<String>,
    pub session_dir: String,
    pub doc_id: String,
}

impl Default for InstagramSection {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            session_dir: "sessions".into(),
            doc_id: "8845758582119845".into(),
        }
    }
}

pub fn load_vidrelay_config<P: AsRef<Path>>(path: P) -> Result<VidrelayConfig> {
    let config: VidrelayConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<i64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let values: Vec<serde_json::Value> =
        serde_json::from_str(trimmed).map_err(|_| ConfigError::Env {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Number(number) => number.as_i64(),
            serde_json::Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
        .map(|parsed| {
            parsed.ok_or_else(|| ConfigError::Env {
                key: key.to_string(),
                value: raw.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/vidrelay.toml");
        let config = load_vidrelay_config(path).expect("fixture config should parse");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.pipeline.deadline_seconds, 120);
        assert_eq!(config.media.video_bitrate, "2M");
        assert!(config.bot.reply_to_message);
        assert!(config.instagram.is_none());
    }

    #[test]
    fn env_overrides_replace_bot_settings() {
        let mut config = VidrelayConfig::default();
        let vars = HashMap::from([
            ("API_TOKEN".to_string(), "123:abc".to_string()),
            ("ALLOWED_IDS".to_string(), "[10, \"-20\"]".to_string()),
            ("REPLY_TO_MESSAGE".to_string(), "off".to_string()),
            ("WITH_CAPTIONS".to_string(), "Yes".to_string()),
            ("INSTAGRAM_USERNAME".to_string(), " reels ".to_string()),
        ]);
        config.apply_overrides(&vars).unwrap();
        assert_eq!(config.bot.api_token, "123:abc");
        assert_eq!(config.bot.allowed_ids, vec![10, -20]);
        assert!(!config.bot.reply_to_message);
        assert!(config.bot.with_captions);
        let instagram = config.instagram.expect("instagram section created");
        assert_eq!(instagram.username, "reels");
        assert!(instagram.password.is_none());
    }

    #[test]
    fn malformed_allow_list_is_rejected() {
        let mut config = VidrelayConfig::default();
        let vars = HashMap::from([("ALLOWED_IDS".to_string(), "1,2".to_string())]);
        assert!(matches!(
            config.apply_overrides(&vars),
            Err(ConfigError::Env { .. })
        ));
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let mut config = VidrelayConfig::default();
        assert!(config.validate().is_ok());
        config.retry.max_delay_ms = 10;
        assert!(config.validate().is_err());
        config.retry.max_delay_ms = 8_000;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_bounds_the_deadline() {
        let mut config = VidrelayConfig::default();
        config.pipeline.deadline_seconds = MAX_DEADLINE_SECONDS;
        assert!(config.validate().is_ok());
        config.pipeline.deadline_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.pipeline.deadline_seconds = 0;
        assert!(config.validate().is_err());
    }
}
