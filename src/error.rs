//! Error types for the denoising pipeline.

use thiserror::Error;

use crate::models::ColorFamily;

/// A knob or source format the pipeline refuses before any transform runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("unsupported color family {0:?}: only YUV or GRAY clips are supported")]
    UnsupportedColorFamily(ColorFamily),

    #[error("unsupported chroma subsampling (w shift {0}, h shift {1}): only 4:2:0, 4:2:2 and 4:4:4 are supported")]
    UnsupportedSubsampling(u8, u8),

    #[error("invalid quality level {0}: expected 1 (8-bit), 2 (16-bit), 3 (16-bit 4:4:4) or 4 (32-bit 4:4:4), or 0 to disable the pass")]
    InvalidQualityLevel(u8),

    #[error("downscale ratio must be greater than 0 and less than 1, got {0}")]
    InvalidDownscaleRatio(f64),

    #[error("output bit depth must be 8, 10, 12, 14, 16 or 32, got {0}")]
    InvalidOutputDepth(u8),

    #[error("at least one pass must be enabled")]
    NoPassEnabled,
}

impl ConfigurationError {
    /// Check that `value` lies in `[min, max]`.
    pub fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if value.is_nan() || value < min || value > max {
            return Err(ConfigurationError::OutOfRange { name, min, max, value });
        }
        Ok(())
    }
}

/// An external transform rejected its input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{transform} failed: {reason}")]
pub struct TransformFailure {
    pub transform: &'static str,
    pub reason: String,
}

impl TransformFailure {
    pub fn new(transform: &'static str, reason: impl Into<String>) -> Self {
        Self {
            transform,
            reason: reason.into(),
        }
    }
}

/// Any failure surfaced by [`crate::denoise::Denoiser::process`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DenoiseError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transform(#[from] TransformFailure),
}
