//! Working formats of the passes and the source variants they read from.

use std::collections::HashMap;

use crate::backend::{Backend, Frame, Resample};
use crate::error::{ConfigurationError, TransformFailure};
use crate::models::{ColorFamily, ColorTags, DitherMode, Sampling, VideoFormat, OUTPUT_DEPTHS};

/// Precision a pass runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityLevel {
    Disabled,
    /// 8-bit, source chroma layout.
    Source8,
    /// 16-bit, source chroma layout.
    Source16,
    /// 16-bit 4:4:4.
    Full16,
    /// 32-bit float 4:4:4.
    Float444,
}

impl QualityLevel {
    pub fn from_level(level: u8) -> Result<Self, ConfigurationError> {
        match level {
            0 => Ok(QualityLevel::Disabled),
            1 => Ok(QualityLevel::Source8),
            2 => Ok(QualityLevel::Source16),
            3 => Ok(QualityLevel::Full16),
            4 => Ok(QualityLevel::Float444),
            other => Err(ConfigurationError::InvalidQualityLevel(other)),
        }
    }
}

/// Working format of a pass at `level` for a `source` clip. Gray stays gray.
pub fn derive_format(source: &VideoFormat, level: QualityLevel) -> Result<VideoFormat, ConfigurationError> {
    if source.color_family == ColorFamily::Rgb {
        return Err(ConfigurationError::UnsupportedColorFamily(source.color_family));
    }
    let format = match level {
        QualityLevel::Disabled => return Err(ConfigurationError::InvalidQualityLevel(0)),
        QualityLevel::Source8 => source.with_bits(8),
        QualityLevel::Source16 => source.with_bits(16),
        QualityLevel::Full16 => source.with_bits(16).with_sampling(Sampling::S444),
        QualityLevel::Float444 => source.with_bits(32).with_sampling(Sampling::S444),
    };
    Ok(format)
}

pub fn validate_output_bits(bits: u8) -> Result<u8, ConfigurationError> {
    if OUTPUT_DEPTHS.contains(&bits) {
        Ok(bits)
    } else {
        Err(ConfigurationError::InvalidOutputDepth(bits))
    }
}

/// The source frame plus every working-format copy made from it so far.
pub struct SourceVariants<H> {
    source: Frame<H>,
    variants: HashMap<VideoFormat, Frame<H>>,
}

impl<H: Clone> SourceVariants<H> {
    pub fn new(source: Frame<H>) -> Self {
        Self {
            source,
            variants: HashMap::new(),
        }
    }

    /// The source in `format`, converted once and reused afterwards.
    pub fn get<B: Backend<Handle = H>>(
        &mut self,
        backend: &mut B,
        format: VideoFormat,
    ) -> Result<Frame<H>, TransformFailure> {
        if format == self.source.format() {
            return Ok(self.source.clone());
        }
        if let Some(frame) = self.variants.get(&format) {
            return Ok(frame.clone());
        }

        let current = self.source.format();
        let frame = if format == current.with_bits(format.bits_per_sample) {
            let dither = if format.is_float() { DitherMode::ROUND } else { DitherMode::ORDERED };
            backend.bit_depth(&self.source, format.bits_per_sample, dither)?
        } else {
            let mut params = Resample::to_format(self.source.info(), format);
            if !format.is_float() {
                params = params.with_ordered_dither();
            }
            backend.resample(&self.source, &params)?
        };
        self.variants.insert(format, frame.clone());
        Ok(frame)
    }

    /// Number of converted copies held.
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Bring a pass result back to `working`, restoring the working clip's tags.
pub fn convert_to_working<B: Backend>(
    backend: &mut B,
    frame: &Frame<B::Handle>,
    working: VideoFormat,
    tags: ColorTags,
) -> Result<Frame<B::Handle>, TransformFailure> {
    if frame.format() == working && frame.tags() == tags {
        return Ok(frame.clone());
    }
    let mut params = Resample::to_format(frame.info(), working);
    if frame.format().color_family == ColorFamily::Rgb || frame.tags() != tags {
        params = params.with_tags(tags);
    }
    backend.resample(frame, &params)
}
