use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use super::error::{MediaError, MediaResult};
use super::executor::{CommandExecutor, SystemCommandExecutor};
use super::types::{ProbeResult, NO_AUDIO};
use crate::config::MediaSection;

/// Reads container and stream metadata through `ffprobe`.
#[derive(Clone)]
pub struct MediaProbe {
    binary: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl MediaProbe {
    pub fn new(config: &MediaSection) -> Self {
        Self {
            binary: PathBuf::from(&config.ffprobe_binary),
            timeout: Duration::from_secs(config.probe_timeout_seconds.max(1)),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn probe(&self, path: &Path) -> MediaResult<ProbeResult> {
        tokio::fs::metadata(path)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_streams".to_string(),
            "-show_format".to_string(),
            path.display().to_string(),
        ];
        let output = match timeout(self.timeout, self.executor.output(&self.binary, &args)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(MediaError::Io {
                    source,
                    path: self.binary.clone(),
                })
            }
            Err(_) => {
                return Err(MediaError::Timeout {
                    program: self.binary.display().to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };
        if !output.status.success() {
            return Err(MediaError::Probe {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        let result = parsed.into_probe_result(path)?;
        debug!(
            path = %path.display(),
            container = %result.container,
            video = %result.video_codec,
            audio = %result.audio_codec,
            width = result.width,
            height = result.height,
            "probed media"
        );
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

impl FfprobeOutput {
    fn into_probe_result(self, path: &Path) -> MediaResult<ProbeResult> {
        let stream_of = |kind: &str| {
            self.streams
                .iter()
                .find(|stream| stream.codec_type.as_deref() == Some(kind))
        };
        let video = stream_of("video").ok_or_else(|| MediaError::MissingVideoStream {
            path: path.to_path_buf(),
        })?;
        let (width, height) = match (video.width, video.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
            _ => {
                return Err(MediaError::Probe {
                    path: path.to_path_buf(),
                    message: "video stream has no dimensions".into(),
                })
            }
        };
        let audio_codec = stream_of("audio")
            .and_then(|stream| stream.codec_name.clone())
            .unwrap_or_else(|| NO_AUDIO.to_string());
        let fps = parse_rate(video.avg_frame_rate.as_deref())
            .or_else(|| parse_rate(video.r_frame_rate.as_deref()))
            .unwrap_or(0.0);
        let bitrate_bps = self
            .format
            .bit_rate
            .as_deref()
            .or(video.bit_rate.as_deref())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let duration_s = self
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(ProbeResult {
            container: self.format.format_name.clone().unwrap_or_default(),
            video_codec: video.codec_name.clone().unwrap_or_default(),
            audio_codec,
            width,
            height,
            duration_s,
            bitrate_bps,
            fps,
        })
    }
}

fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let value = match rate.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator = numerator.parse::<f64>().ok()?;
            let denominator = denominator.parse::<f64>().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => rate.parse::<f64>().ok()?,
    };
    (value > 0.0).then_some(value)
}
