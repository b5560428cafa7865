//! Sample formats and color tags of a clip.

use serde::{Deserialize, Serialize};

/// Color family of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFamily {
    Gray,
    Yuv,
    Rgb,
}

impl ColorFamily {
    /// VapourSynth constant for this family.
    pub fn vs_name(&self) -> &'static str {
        match self {
            ColorFamily::Gray => "vs.GRAY",
            ColorFamily::Yuv => "vs.YUV",
            ColorFamily::Rgb => "vs.RGB",
        }
    }
}

/// Sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Integer,
    Float,
}

/// Chroma layout of a clip, as compared between the source and the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sampling {
    #[serde(rename = "gray")]
    Gray,
    #[serde(rename = "444")]
    S444,
    #[serde(rename = "422")]
    S422,
    #[serde(rename = "420")]
    S420,
}

impl Sampling {
    /// Subsampling shifts (width, height) for this layout.
    pub fn shifts(&self) -> (u8, u8) {
        match self {
            Sampling::Gray | Sampling::S444 => (0, 0),
            Sampling::S422 => (1, 0),
            Sampling::S420 => (1, 1),
        }
    }

    /// Name understood by `fmtc.resample(css=...)`.
    pub fn css(&self) -> &'static str {
        match self {
            Sampling::Gray => "GRAY",
            Sampling::S444 => "444",
            Sampling::S422 => "422",
            Sampling::S420 => "420",
        }
    }
}

/// Sample format of a clip: family, precision and chroma subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub color_family: ColorFamily,
    pub sample_type: SampleType,
    pub bits_per_sample: u8,
    #[serde(default)]
    pub subsampling_w: u8,
    #[serde(default)]
    pub subsampling_h: u8,
}

fn sample_type_for(bits: u8) -> SampleType {
    if bits == 32 {
        SampleType::Float
    } else {
        SampleType::Integer
    }
}

impl VideoFormat {
    pub fn gray(bits: u8) -> Self {
        Self {
            color_family: ColorFamily::Gray,
            sample_type: sample_type_for(bits),
            bits_per_sample: bits,
            subsampling_w: 0,
            subsampling_h: 0,
        }
    }

    pub fn yuv(bits: u8, sampling: Sampling) -> Self {
        let (subsampling_w, subsampling_h) = sampling.shifts();
        Self {
            color_family: ColorFamily::Yuv,
            sample_type: sample_type_for(bits),
            bits_per_sample: bits,
            subsampling_w,
            subsampling_h,
        }
    }

    /// 32-bit float planar RGB.
    pub fn rgbs() -> Self {
        Self {
            color_family: ColorFamily::Rgb,
            sample_type: SampleType::Float,
            bits_per_sample: 32,
            subsampling_w: 0,
            subsampling_h: 0,
        }
    }

    pub fn is_float(&self) -> bool {
        self.sample_type == SampleType::Float
    }

    pub fn is_gray(&self) -> bool {
        self.color_family == ColorFamily::Gray
    }

    pub fn num_planes(&self) -> usize {
        if self.is_gray() {
            1
        } else {
            3
        }
    }

    /// Chroma layout; RGB reports as 4:4:4. `None` for layouts such as 4:1:1 or 4:4:0.
    pub fn known_sampling(&self) -> Option<Sampling> {
        match (self.color_family, self.subsampling_w, self.subsampling_h) {
            (ColorFamily::Gray, _, _) => Some(Sampling::Gray),
            (_, 0, 0) => Some(Sampling::S444),
            (_, 1, 0) => Some(Sampling::S422),
            (_, 1, 1) => Some(Sampling::S420),
            _ => None,
        }
    }

    /// Chroma layout of a format that passed [`known_sampling`](Self::known_sampling).
    pub fn sampling(&self) -> Sampling {
        self.known_sampling().unwrap_or(Sampling::S420)
    }

    /// Same layout at another bit depth; 32 bits means float.
    pub fn with_bits(self, bits: u8) -> Self {
        Self {
            sample_type: sample_type_for(bits),
            bits_per_sample: bits,
            ..self
        }
    }

    /// Same precision with another chroma layout. Gray formats stay gray.
    pub fn with_sampling(self, sampling: Sampling) -> Self {
        if self.is_gray() || sampling == Sampling::Gray {
            return self;
        }
        let (subsampling_w, subsampling_h) = sampling.shifts();
        Self {
            subsampling_w,
            subsampling_h,
            ..self
        }
    }

    /// Luma-only format at the same precision.
    pub fn luma(self) -> Self {
        Self {
            color_family: ColorFamily::Gray,
            subsampling_w: 0,
            subsampling_h: 0,
            ..self
        }
    }

    /// Largest representable sample value.
    pub fn peak(&self) -> f64 {
        if self.is_float() {
            1.0
        } else {
            ((1u64 << self.bits_per_sample) - 1) as f64
        }
    }

    /// Size of one 8-bit code value at this precision.
    pub fn scale_8bit(&self) -> f64 {
        if self.is_float() {
            1.0 / 255.0
        } else {
            (1u64 << (self.bits_per_sample - 8)) as f64
        }
    }

    /// Zero point of a difference clip.
    pub fn neutral(&self) -> f64 {
        if self.is_float() {
            0.0
        } else {
            (1u64 << (self.bits_per_sample - 1)) as f64
        }
    }

    /// Dimensions of `plane` for a clip of `width` x `height`.
    pub fn plane_size(&self, width: u32, height: u32, plane: usize) -> (u32, u32) {
        if plane == 0 {
            (width, height)
        } else {
            (width >> self.subsampling_w, height >> self.subsampling_h)
        }
    }

    /// VapourSynth expression naming this format.
    pub fn vs_name(&self) -> String {
        let bits = self.bits_per_sample;
        let suffix = match (self.sample_type, bits) {
            (SampleType::Float, 32) => Some("S".to_string()),
            (SampleType::Integer, 8 | 9 | 10 | 12 | 14 | 16) => Some(bits.to_string()),
            _ => None,
        };
        let named = match (self.color_family, self.sampling(), suffix.as_deref()) {
            (ColorFamily::Gray, _, Some(s)) => Some(format!("vs.GRAY{}", s)),
            (ColorFamily::Yuv, Sampling::S444, Some(s)) => Some(format!("vs.YUV444P{}", s)),
            (ColorFamily::Yuv, Sampling::S422, Some(s)) => Some(format!("vs.YUV422P{}", s)),
            (ColorFamily::Yuv, Sampling::S420, Some(s)) => Some(format!("vs.YUV420P{}", s)),
            (ColorFamily::Rgb, _, Some("S")) => Some("vs.RGBS".to_string()),
            (ColorFamily::Rgb, _, Some("8")) => Some("vs.RGB24".to_string()),
            (ColorFamily::Rgb, _, Some("16")) => Some("vs.RGB48".to_string()),
            _ => None,
        };
        named.unwrap_or_else(|| {
            format!(
                "core.query_video_format({}, {}, {}, {}, {}).id",
                self.color_family.vs_name(),
                if self.is_float() { "vs.FLOAT" } else { "vs.INTEGER" },
                bits,
                self.subsampling_w,
                self.subsampling_h
            )
        })
    }
}

/// Signal range, as tagged on frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    Full,
    #[default]
    Limited,
}

impl ColorRange {
    /// Value of the `_ColorRange` frame property.
    pub fn prop_value(&self) -> i32 {
        match self {
            ColorRange::Full => 0,
            ColorRange::Limited => 1,
        }
    }

    /// Value of the `range` argument of the resizers (reversed from the property).
    pub fn resize_arg(&self) -> i32 {
        match self {
            ColorRange::Full => 1,
            ColorRange::Limited => 0,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ColorRange::Full)
    }
}

/// Color metadata carried alongside every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorTags {
    #[serde(default)]
    pub range: ColorRange,
    #[serde(default = "default_matrix")]
    pub matrix: u8,
    #[serde(default)]
    pub transfer: u8,
    #[serde(default)]
    pub primaries: u8,
    #[serde(default)]
    pub chroma_location: u8,
}

fn default_matrix() -> u8 { 1 }

impl Default for ColorTags {
    fn default() -> Self {
        Self {
            range: ColorRange::default(),
            matrix: default_matrix(),
            transfer: 0,
            primaries: 0,
            chroma_location: 0,
        }
    }
}

impl ColorTags {
    /// Matrix to use for conversions; RGB (0) and unspecified (2) fall back to 170M.
    pub fn effective_matrix(&self) -> u8 {
        if matches!(self.matrix, 0 | 2) {
            6
        } else {
            self.matrix
        }
    }

    pub fn effective_transfer(&self) -> u8 {
        if matches!(self.transfer, 0 | 2) {
            self.effective_matrix()
        } else {
            self.transfer
        }
    }

    pub fn effective_primaries(&self) -> u8 {
        if matches!(self.primaries, 0 | 2) {
            self.effective_matrix()
        } else {
            self.primaries
        }
    }
}

/// Dimensions, format and tags of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    #[serde(default)]
    pub tags: ColorTags,
}

impl ClipInfo {
    pub fn new(width: u32, height: u32, format: VideoFormat) -> Self {
        Self {
            width,
            height,
            format,
            tags: ColorTags::default(),
        }
    }

    pub fn with_format(self, format: VideoFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_tags(self, tags: ColorTags) -> Self {
        Self { tags, ..self }
    }

    /// Resolution proxy used to scale every resolution-dependent constant.
    pub fn ref_height(&self) -> u32 {
        self.height.max(self.width / 4 * 3)
    }
}
