use serde::Serialize;

pub const NO_AUDIO: &str = "none";

/// Stream metadata read from a media file without decoding frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Demuxer names as reported by the prober, e.g. `mov,mp4,m4a,3gp,3g2,mj2`.
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub duration_s: f64,
    pub bitrate_bps: u64,
    pub fps: f64,
}

impl ProbeResult {
    pub fn has_audio(&self) -> bool {
        self.audio_codec != NO_AUDIO
    }

    /// H.264 video in an MP4-class container with AAC or no audio.
    pub fn is_compatible(&self) -> bool {
        self.video_codec.eq_ignore_ascii_case("h264")
            && self
                .container
                .split(',')
                .any(|name| name.trim().eq_ignore_ascii_case("mp4"))
            && (self.audio_codec.eq_ignore_ascii_case("aac") || !self.has_audio())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeStrategy {
    Passthrough,
    Transcode,
}

impl NormalizeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizeStrategy::Passthrough => "passthrough",
            NormalizeStrategy::Transcode => "transcode",
        }
    }
}

/// Delivery-ready bytes with the source dimensions.
#[derive(Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for NormalizedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedMedia")
            .field("bytes", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub media: NormalizedMedia,
    pub strategy: NormalizeStrategy,
    pub source_probe: ProbeResult,
}
