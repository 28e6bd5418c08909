use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use super::error::{MediaError, MediaResult};
use super::executor::{CommandExecutor, SystemCommandExecutor};
use super::probe::MediaProbe;
use super::types::{NormalizeOutcome, NormalizeStrategy, NormalizedMedia, ProbeResult};
use crate::config::MediaSection;
use crate::staging::StagingArea;

const DEFAULT_INPUT_NAME: &str = "input.mp4";
const OUTPUT_NAME: &str = "normalized.mp4";

/// Target encoding handed to ffmpeg when a file is not deliverable as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl From<&MediaSection> for TranscodeProfile {
    fn from(config: &MediaSection) -> Self {
        Self {
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
            video_bitrate: config.video_bitrate.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }
}

impl TranscodeProfile {
    /// ffmpeg arguments fitting the output into the source frame size.
    pub fn ffmpeg_args(&self, input: &Path, output: &Path, width: u32, height: u32) -> Vec<String> {
        [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .chain([
            input.display().to_string(),
            "-c:v".into(),
            self.video_codec.clone(),
            "-c:a".into(),
            self.audio_codec.clone(),
            "-b:v".into(),
            self.video_bitrate.clone(),
            "-b:a".into(),
            self.audio_bitrate.clone(),
            "-vf".into(),
            format!("scale={width}:{height}:force_original_aspect_ratio=decrease"),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            "-strict".into(),
            "experimental".into(),
            output.display().to_string(),
        ])
        .collect()
    }
}

/// Probes a file and re-encodes it only when it misses the delivery profile.
#[derive(Clone)]
pub struct MediaNormalizer {
    probe: MediaProbe,
    ffmpeg: PathBuf,
    profile: TranscodeProfile,
    staging_root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl MediaNormalizer {
    pub fn new(config: &MediaSection, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            probe: MediaProbe::new(config),
            ffmpeg: PathBuf::from(&config.ffmpeg_binary),
            profile: TranscodeProfile::from(config),
            staging_root: staging_root.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    /// Routes both ffprobe and ffmpeg through `executor`.
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.probe = self.probe.with_executor(executor.clone());
        self.executor = executor;
        self
    }

    pub fn probe(&self) -> &MediaProbe {
        &self.probe
    }

    /// Normalizes in-memory bytes inside a private staging area that is
    /// removed before returning.
    pub async fn normalize(&self, bytes: &[u8], filename_hint: &str) -> MediaResult<NormalizeOutcome> {
        let staging = StagingArea::create(&self.staging_root)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: self.staging_root.clone(),
            })?;
        let result = self.normalize_bytes_in(&staging, bytes, filename_hint).await;
        staging.teardown().await;
        result
    }

    async fn normalize_bytes_in(
        &self,
        staging: &StagingArea,
        bytes: &[u8],
        filename_hint: &str,
    ) -> MediaResult<NormalizeOutcome> {
        let input = staging.file(&input_name(filename_hint));
        fs::write(&input, bytes)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: input.clone(),
            })?;
        self.normalize_in(staging, &input).await
    }

    /// Normalizes a file already inside `staging`; outputs are written next to it.
    pub async fn normalize_in(&self, staging: &StagingArea, input: &Path) -> MediaResult<NormalizeOutcome> {
        let source_probe = self.probe.probe(input).await?;
        if source_probe.is_compatible() {
            info!(
                container = %source_probe.container,
                video = %source_probe.video_codec,
                audio = %source_probe.audio_codec,
                "media already deliverable"
            );
            let bytes = read(input).await?;
            return Ok(NormalizeOutcome {
                media: NormalizedMedia {
                    bytes,
                    width: source_probe.width,
                    height: source_probe.height,
                },
                strategy: NormalizeStrategy::Passthrough,
                source_probe,
            });
        }

        info!(
            container = %source_probe.container,
            video = %source_probe.video_codec,
            audio = %source_probe.audio_codec,
            width = source_probe.width,
            height = source_probe.height,
            "transcoding media to delivery profile"
        );
        let output = staging.file(OUTPUT_NAME);
        self.transcode(input, &output, &source_probe).await?;
        let bytes = read(&output).await?;
        match self.probe.probe(&output).await {
            Ok(result) => info!(
                video = %result.video_codec,
                audio = %result.audio_codec,
                width = result.width,
                height = result.height,
                "transcoded media probed"
            ),
            Err(err) => warn!(error = %err, "failed to probe transcoded media"),
        }
        Ok(NormalizeOutcome {
            media: NormalizedMedia {
                bytes,
                width: source_probe.width,
                height: source_probe.height,
            },
            strategy: NormalizeStrategy::Transcode,
            source_probe,
        })
    }

    async fn transcode(&self, input: &Path, output: &Path, source: &ProbeResult) -> MediaResult<()> {
        let args = self
            .profile
            .ffmpeg_args(input, output, source.width, source.height);
        let result = self
            .executor
            .output(&self.ffmpeg, &args)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: self.ffmpeg.clone(),
            })?;
        if !result.status.success() {
            return Err(MediaError::Transcode {
                status: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        match fs::metadata(output).await {
            Ok(metadata) if metadata.len() > 0 => Ok(()),
            _ => Err(MediaError::MissingOutput {
                path: output.to_path_buf(),
            }),
        }
    }
}

async fn read(path: &Path) -> MediaResult<Vec<u8>> {
    fs::read(path).await.map_err(|source| MediaError::Io {
        source,
        path: path.to_path_buf(),
    })
}

fn input_name(filename_hint: &str) -> String {
    Path::new(filename_hint)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != OUTPUT_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::{ffprobe_json, FfmpegScript, ScriptedExecutor};
    use crate::staging::staged_file_count;
    use tempfile::tempdir;

    fn normalizer(root: &Path, executor: Arc<ScriptedExecutor>) -> MediaNormalizer {
        MediaNormalizer::new(&MediaSection::default(), root).with_executor(executor)
    }

    #[tokio::test]
    async fn compatible_input_is_byte_identical() {
        let root = tempdir().unwrap();
        let executor = ScriptedExecutor::probing(ffprobe_json("mp4,mov", "h264", Some("aac"), 1080, 1920));
        let outcome = normalizer(root.path(), executor.clone())
            .normalize(b"original-bytes", "clip.mp4")
            .await
            .unwrap();
        assert_eq!(outcome.strategy, NormalizeStrategy::Passthrough);
        assert_eq!(outcome.media.bytes, b"original-bytes");
        assert_eq!((outcome.media.width, outcome.media.height), (1080, 1920));
        assert!(executor.ffmpeg_calls().is_empty());
        assert_eq!(staged_file_count(root.path()), 0);
    }

    #[tokio::test]
    async fn hevc_input_is_transcoded_with_source_dimensions() {
        let root = tempdir().unwrap();
        let executor = ScriptedExecutor::new(
            vec![
                ffprobe_json("mov,mp4,m4a", "hevc", Some("aac"), 720, 1280),
                ffprobe_json("mov,mp4,m4a", "h264", Some("aac"), 720, 1280),
            ],
            FfmpegScript::Writes(b"transcoded".to_vec()),
        );
        let outcome = normalizer(root.path(), executor.clone())
            .normalize(b"hevc-bytes", "../../escape.mov")
            .await
            .unwrap();
        assert_eq!(outcome.strategy, NormalizeStrategy::Transcode);
        assert_eq!(outcome.media.bytes, b"transcoded");
        assert_eq!((outcome.media.width, outcome.media.height), (720, 1280));
        assert_eq!(outcome.source_probe.video_codec, "hevc");

        let ffmpeg = executor.ffmpeg_calls();
        assert_eq!(ffmpeg.len(), 1);
        let args = &ffmpeg[0];
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "2M"));
        assert!(args.contains(&"scale=720:1280:force_original_aspect_ratio=decrease".to_string()));
        assert!(args[5].ends_with("escape.mov"));
        // source probe plus the re-probe of the output
        assert_eq!(executor.calls().len(), 3);
        assert_eq!(staged_file_count(root.path()), 0);
    }

    #[tokio::test]
    async fn failed_transcode_surfaces_stderr_and_cleans_up() {
        let root = tempdir().unwrap();
        let executor = ScriptedExecutor::new(
            vec![ffprobe_json("matroska,webm", "vp9", Some("opus"), 640, 360)],
            FfmpegScript::Fails {
                code: 1,
                stderr: "Unknown encoder".into(),
            },
        );
        let error = normalizer(root.path(), executor)
            .normalize(b"webm", "clip.webm")
            .await
            .unwrap_err();
        match error {
            MediaError::Transcode { status, stderr } => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "Unknown encoder");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(staged_file_count(root.path()), 0);
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let root = tempdir().unwrap();
        let executor = ScriptedExecutor::new(
            vec![ffprobe_json("avi", "mpeg4", None, 320, 240)],
            FfmpegScript::NoOutput,
        );
        let error = normalizer(root.path(), executor)
            .normalize(b"avi", "clip.avi")
            .await
            .unwrap_err();
        assert!(matches!(error, MediaError::MissingOutput { .. }));
    }

    #[test]
    fn input_name_keeps_only_the_file_name() {
        assert_eq!(input_name("a/b/clip.mov"), "clip.mov");
        assert_eq!(input_name(""), DEFAULT_INPUT_NAME);
        assert_eq!(input_name(OUTPUT_NAME), DEFAULT_INPUT_NAME);
    }
}
