use serde::{Deserialize, Serialize};

/// Grants queried from the permission collaborator before a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Microphone,
    PhoneState,
}

/// Raw PCM capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// 44100 Hz, mono, 16-bit: the only format the capture loop opens.
    pub const MIC: PcmFormat = PcmFormat {
        sample_rate: 44_100,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bits_per_sample as u32 / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Format descriptor reported by an encoder when its output format is known.
///
/// `codec_config` carries the codec-specific setup data: the AAC
/// AudioSpecificConfig for audio, Annex-B SPS + PPS for H.264.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    Audio {
        mime: String,
        sample_rate: u32,
        channels: u16,
        bitrate: u32,
        codec_config: Vec<u8>,
    },
    Video {
        mime: String,
        width: u32,
        height: u32,
        frame_rate: u32,
        bitrate: u32,
        codec_config: Vec<u8>,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Audio { .. } => TrackKind::Audio,
            Self::Video { .. } => TrackKind::Video,
        }
    }

    pub fn mime(&self) -> &str {
        match self {
            Self::Audio { mime, .. } | Self::Video { mime, .. } => mime,
        }
    }

    pub fn codec_config(&self) -> &[u8] {
        match self {
            Self::Audio { codec_config, .. } | Self::Video { codec_config, .. } => codec_config,
        }
    }
}

/// Per-sample flags as reported by the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame: bool,
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// One access unit drained from an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Presentation timestamp in microseconds, relative to the track start.
    pub pts_us: i64,
    pub data: Vec<u8>,
    pub flags: SampleFlags,
}

impl EncodedSample {
    pub fn new(pts_us: i64, data: Vec<u8>, flags: SampleFlags) -> Self {
        Self { pts_us, data, flags }
    }

    /// Zero-size end-of-stream marker.
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self {
            pts_us,
            data: Vec::new(),
            flags: SampleFlags {
                end_of_stream: true,
                ..Default::default()
            },
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.codec_config
    }
}

/// Result of one blocking dequeue on an encoder's output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// Output format became known. Happens once, before the first sample.
    FormatChanged(TrackFormat),
    Sample(EncodedSample),
}

/// Device encoder limits for one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderCapability {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bitrate: u32,
}

/// Compressed audio encoder setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    pub mime: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl AudioEncoderConfig {
    pub const AAC_MIME: &'static str = "audio/mp4a-latm";

    /// AAC at the microphone capture format.
    pub fn aac(bitrate: u32) -> Self {
        Self {
            mime: Self::AAC_MIME.into(),
            sample_rate: PcmFormat::MIC.sample_rate,
            channels: PcmFormat::MIC.channels,
            bitrate,
        }
    }
}

/// Where the video encoder takes its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// Frames are drawn onto a surface the encoder exposes.
    Surface,
}

/// Video encoder setup produced by resolution negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    pub mime: String,
    pub resolution: Resolution,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub color_format: ColorFormat,
}

impl VideoEncoderConfig {
    pub const AVC_MIME: &'static str = "video/avc";
}

/// Opaque token for an encoder's drawable input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSurface {
    pub id: u64,
}
