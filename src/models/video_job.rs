//! Video job configuration and encoding settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ClipInfo, DenoiseParameters};

/// Represents a complete video denoising job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJob {
    /// Unique job identifier
    pub id: Uuid,

    /// Input video file path
    pub input_path: String,

    /// Output video file path
    pub output_path: String,

    /// Dimensions, format and color tags of the decoded input
    pub source: ClipInfo,

    /// Denoiser settings
    #[serde(default)]
    pub denoise: DenoiseParameters,

    /// FFmpeg encoding settings
    #[serde(default)]
    pub encoding_settings: EncodingSettings,

    /// Frame count of the input, used until vspipe reports its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i32>,
}

impl VideoJob {
    /// Create a job with default denoise and encoding settings.
    pub fn new(input_path: &str, output_path: &str, source: ClipInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path: input_path.to_string(),
            output_path: output_path.to_string(),
            source,
            denoise: DenoiseParameters::default(),
            encoding_settings: EncodingSettings::default(),
            total_frames: None,
        }
    }
}

/// Video encoding settings for FFmpeg output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingSettings {
    /// Output video codec
    #[serde(default)]
    pub codec: VideoCodec,

    /// Encoder preset (speed/quality tradeoff)
    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,

    /// Quality setting (CRF for H.264/H.265, quality level for ProRes)
    #[serde(default = "default_quality")]
    pub quality: i32,

    /// Copy audio stream without re-encoding
    #[serde(default = "default_true")]
    pub audio_copy: bool,

    /// Audio codec if not copying
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate in kbps (if re-encoding)
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: i32,

    /// Additional FFmpeg arguments
    #[serde(default)]
    pub custom_ffmpeg_args: String,
}

fn default_encoder_preset() -> String {
    "medium".to_string()
}

fn default_quality() -> i32 {
    18
}

fn default_true() -> bool {
    true
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> i32 {
    192
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            encoder_preset: default_encoder_preset(),
            quality: default_quality(),
            audio_copy: true,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            custom_ffmpeg_args: String::new(),
        }
    }
}

/// Supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoCodec {
    #[default]
    #[serde(rename = "libx264")]
    H264,

    #[serde(rename = "libx265")]
    H265,

    #[serde(rename = "ffv1")]
    FFV1,

    #[serde(rename = "prores_ks -profile:v 0")]
    ProResProxy,

    #[serde(rename = "prores_ks -profile:v 1")]
    ProResLT,

    #[serde(rename = "prores_ks -profile:v 2")]
    ProRes422,

    #[serde(rename = "prores_ks -profile:v 3")]
    ProResHQ,
}

impl VideoCodec {
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::FFV1 => "ffv1",
            VideoCodec::ProResProxy | VideoCodec::ProResLT | VideoCodec::ProRes422 | VideoCodec::ProResHQ => "prores_ks",
        }
    }

    /// `-profile:v` value for ProRes variants.
    pub fn prores_profile(&self) -> Option<i32> {
        match self {
            VideoCodec::ProResProxy => Some(0),
            VideoCodec::ProResLT => Some(1),
            VideoCodec::ProRes422 => Some(2),
            VideoCodec::ProResHQ => Some(3),
            _ => None,
        }
    }

    /// x264/x265 take `-crf` and `-preset`; FFV1 and ProRes do not.
    pub fn uses_crf(&self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}
