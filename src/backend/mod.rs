//! External transforms the denoiser is built from.
//!
//! The pipeline never touches samples itself: every step is a request to a
//! [`Backend`], which either renders it as a VapourSynth statement
//! ([`script::ScriptBackend`]) or evaluates it on in-memory planes
//! ([`raster::RasterBackend`]). Every request takes immutable frames and
//! returns a new [`Frame`] whose [`ClipInfo`] states its format and tags.

pub mod raster;
pub mod script;

use crate::error::TransformFailure;
use crate::models::{ClipInfo, ColorTags, Device, DitherMode, Sampling, VideoFormat};

/// A clip handle paired with its dimensions, format and color tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<H> {
    handle: H,
    info: ClipInfo,
}

impl<H> Frame<H> {
    pub fn new(handle: H, info: ClipInfo) -> Self {
        Self { handle, info }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn info(&self) -> &ClipInfo {
        &self.info
    }

    pub fn format(&self) -> VideoFormat {
        self.info.format
    }

    pub fn tags(&self) -> ColorTags {
        self.info.tags
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }
}

pub type TransformResult<H> = Result<Frame<H>, TransformFailure>;

/// Two-input transforms need identical formats and dimensions.
pub(crate) fn ensure_compatible<H>(transform: &'static str, a: &Frame<H>, b: &Frame<H>) -> Result<(), TransformFailure> {
    if a.format() != b.format() {
        return Err(TransformFailure::new(
            transform,
            format!("format mismatch: {} vs {}", a.format().vs_name(), b.format().vs_name()),
        ));
    }
    if (a.width(), a.height()) != (b.width(), b.height()) {
        return Err(TransformFailure::new(
            transform,
            format!("size mismatch: {}x{} vs {}x{}", a.width(), a.height(), b.width(), b.height()),
        ));
    }
    Ok(())
}

/// A mask matches the clip, or is a gray clip of the same precision driving every plane.
pub(crate) fn ensure_mask<H>(transform: &'static str, clip: &Frame<H>, mask: &Frame<H>) -> Result<(), TransformFailure> {
    if mask.format().is_gray() && mask.format() == clip.format().luma() {
        if (clip.width(), clip.height()) != (mask.width(), mask.height()) {
            return Err(TransformFailure::new(transform, "mask size differs from clip size"));
        }
        return Ok(());
    }
    ensure_compatible(transform, clip, mask)
}

/// Sample precision a transform implementation is chosen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Integer,
    Float,
}

impl Precision {
    pub fn of(format: &VideoFormat) -> Self {
        if format.is_float() {
            Precision::Float
        } else {
            Precision::Integer
        }
    }
}

/// Logical transforms that have several implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    RemoveGrain,
    Repair,
    MotionSearch,
    BlockMatching,
}

/// One implementation of a logical transform, picked from the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Engine {
    pub kind: TransformKind,
    pub namespace: &'static str,
}

impl Engine {
    /// Pick the implementation of `kind` for samples of `precision`.
    pub fn select(kind: TransformKind, precision: Precision) -> Self {
        let namespace = match (kind, precision) {
            (TransformKind::RemoveGrain | TransformKind::Repair, Precision::Integer) => "rgvs",
            (TransformKind::RemoveGrain | TransformKind::Repair, Precision::Float) => "rgsf",
            (TransformKind::MotionSearch, Precision::Integer) => "mv",
            (TransformKind::MotionSearch, Precision::Float) => "mvsf",
            // Block matching always runs in float; the device decides.
            (TransformKind::BlockMatching, _) => "bm3dcpu",
        };
        Self { kind, namespace }
    }

    /// Pick a device-dependent implementation.
    pub fn for_device(kind: TransformKind, device: Device) -> Self {
        match (kind, device) {
            (TransformKind::BlockMatching, Device::Gpu(_)) => Self { kind, namespace: "bm3dcuda_rtc" },
            (TransformKind::BlockMatching, Device::Cpu) => Self { kind, namespace: "bm3dcpu" },
            (kind, _) => Self::select(kind, Precision::Float),
        }
    }
}

/// Planes a plane-selective transform applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planes {
    All,
    Luma,
    Chroma,
}

impl Planes {
    /// Plane indices present in `format`.
    pub fn indices(&self, format: &VideoFormat) -> Vec<usize> {
        match (self, format.num_planes()) {
            (Planes::All, n) => (0..n).collect(),
            (Planes::Luma, _) => vec![0],
            (Planes::Chroma, 1) => Vec::new(),
            (Planes::Chroma, _) => vec![1, 2],
        }
    }

    pub fn contains(&self, plane: usize) -> bool {
        match self {
            Planes::All => true,
            Planes::Luma => plane == 0,
            Planes::Chroma => plane > 0,
        }
    }
}

/// Direction of a convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolutionMode {
    Square,
    Horizontal,
    Vertical,
}

/// Resize or reformat request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resample {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    /// Matrix of the input, for YUV to RGB conversion.
    pub matrix_in: Option<u8>,
    /// Tags to assign to the output, for RGB to YUV conversion.
    pub tags: Option<ColorTags>,
    pub ordered_dither: bool,
}

impl Resample {
    /// Reformat `info` to `format` without resizing.
    pub fn to_format(info: &ClipInfo, format: VideoFormat) -> Self {
        Self {
            width: info.width,
            height: info.height,
            format,
            matrix_in: None,
            tags: None,
            ordered_dither: false,
        }
    }

    /// Resize `info` keeping its format.
    pub fn to_size(info: &ClipInfo, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::to_format(info, info.format)
        }
    }

    pub fn with_matrix_in(self, matrix: u8) -> Self {
        Self { matrix_in: Some(matrix), ..self }
    }

    pub fn with_tags(self, tags: ColorTags) -> Self {
        Self { tags: Some(tags), ..self }
    }

    pub fn with_ordered_dither(self) -> Self {
        Self { ordered_dither: true, ..self }
    }

    /// Info of the clip this request produces from `input`.
    pub fn output_info(&self, input: &ClipInfo) -> ClipInfo {
        let mut tags = self.tags.unwrap_or(input.tags);
        if self.format.color_family == crate::models::ColorFamily::Rgb {
            tags.matrix = 0;
        }
        ClipInfo {
            width: self.width,
            height: self.height,
            format: self.format,
            tags,
        }
    }
}

/// Level remap in native sample units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub min_in: f64,
    pub max_in: f64,
    pub gamma: f64,
    pub min_out: f64,
    pub max_out: f64,
}

/// Pointwise expressions used by post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprOp {
    /// Per-sample minimum of two clips.
    Min,
    /// Per-sample maximum of two clips.
    Max,
    /// 0 below `low`, `peak` above `high`, a ramp anchored at `origin` in between.
    RenoiseBand {
        low: f64,
        high: f64,
        origin: f64,
        end: f64,
        peak: f64,
    },
    /// `(x - pivot) * cont + bright + pivot`, clamped to `[min, max]`.
    Contrast {
        cont: f64,
        bright: f64,
        pivot: f64,
        min: f64,
        max: f64,
    },
}

impl ExprOp {
    pub fn arity(&self) -> usize {
        match self {
            ExprOp::Min | ExprOp::Max => 2,
            ExprOp::RenoiseBand { .. } | ExprOp::Contrast { .. } => 1,
        }
    }

    /// Evaluate for one sample set.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        match *self {
            ExprOp::Min => x.min(y),
            ExprOp::Max => x.max(y),
            ExprOp::RenoiseBand { low, high, origin, end, peak } => {
                if x < low {
                    0.0
                } else if x > high {
                    peak
                } else {
                    0.0 - (x - origin) * (peak / (low - end))
                }
            }
            ExprOp::Contrast { cont, bright, pivot, min, max } => {
                ((x - pivot) * cont + bright + pivot).max(min).min(max)
            }
        }
    }
}

/// Super clip construction for motion search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperParams {
    pub pad: u32,
    pub pel: u32,
    pub rfilter: u32,
    pub sharp: Option<u32>,
    pub levels: Option<u32>,
}

/// One motion vector analysis at a frame distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisStep {
    pub delta: u32,
    pub backward: bool,
    pub bad_sad: Option<u32>,
    pub lsad: Option<u32>,
    pub bad_range: Option<u32>,
}

/// Everything the motion-compensated average needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub engine: Engine,
    pub block_size: u32,
    pub overlap: u32,
    pub pel: u32,
    pub search: u32,
    pub truemotion: bool,
    pub lambda: u32,
    pub recalculate_thsad: u32,
    pub search_super: SuperParams,
    pub render_super: SuperParams,
    pub steps: Vec<AnalysisStep>,
    pub thsad: i32,
}

impl MotionPlan {
    /// Temporal radius of the average.
    pub fn radius(&self) -> u32 {
        self.steps.iter().map(|s| s.delta).max().unwrap_or(0)
    }
}

/// Block-matching 3-D settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm3dParams {
    pub engine: Engine,
    pub device: Device,
    pub sigma: f64,
    pub block_step: i32,
    pub bm_range: i32,
    pub ps_range: i32,
}

/// Channels a non-local-means call filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlmChannels {
    Y,
    UV,
    YUV,
}

impl NlmChannels {
    pub fn as_str(&self) -> &'static str {
        match self {
            NlmChannels::Y => "Y",
            NlmChannels::UV => "UV",
            NlmChannels::YUV => "YUV",
        }
    }

    pub fn planes(&self) -> Planes {
        match self {
            NlmChannels::Y => Planes::Luma,
            NlmChannels::UV => Planes::Chroma,
            NlmChannels::YUV => Planes::All,
        }
    }
}

/// Non-local-means settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlmParams {
    pub temporal_radius: i32,
    pub spatial_radius: i32,
    pub strength: f64,
    pub channels: NlmChannels,
    pub device: Device,
}

/// Warp sharpening settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarpParams {
    pub thresh: i32,
    pub blur: i32,
    pub kind: i32,
    pub depth: i32,
    pub chroma: i32,
}

/// Debanding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebandParams {
    pub range: u32,
    pub preset: &'static str,
    pub grain_y: u32,
    pub grain_c: u32,
}

/// The transforms the denoiser sequences.
pub trait Backend {
    type Handle: Clone;

    /// Change bit depth, keeping layout and tags.
    fn bit_depth(&mut self, clip: &Frame<Self::Handle>, bits: u8, dither: DitherMode) -> TransformResult<Self::Handle>;

    /// Resize and/or reformat.
    fn resample(&mut self, clip: &Frame<Self::Handle>, params: &Resample) -> TransformResult<Self::Handle>;

    /// Change the chroma layout only.
    fn resample_chroma(&mut self, clip: &Frame<Self::Handle>, sampling: Sampling) -> TransformResult<Self::Handle>;

    /// Luma plane as a gray clip.
    fn extract_luma(&mut self, clip: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    /// Luma of `luma` with the chroma planes of `chroma`.
    fn join_planes(&mut self, luma: &Frame<Self::Handle>, chroma: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    /// `a * (1 - weight) + b * weight`.
    fn merge(&mut self, a: &Frame<Self::Handle>, b: &Frame<Self::Handle>, weight: f64) -> TransformResult<Self::Handle>;

    /// Per-sample blend of `a` toward `b` by `mask`; a gray mask drives every plane.
    fn masked_merge(
        &mut self,
        a: &Frame<Self::Handle>,
        b: &Frame<Self::Handle>,
        mask: &Frame<Self::Handle>,
    ) -> TransformResult<Self::Handle>;

    /// Signed difference `a - b` around the neutral value.
    fn make_diff(&mut self, a: &Frame<Self::Handle>, b: &Frame<Self::Handle>, planes: Planes) -> TransformResult<Self::Handle>;

    /// Apply a difference clip to `a`.
    fn merge_diff(&mut self, a: &Frame<Self::Handle>, diff: &Frame<Self::Handle>, planes: Planes) -> TransformResult<Self::Handle>;

    /// 3x3 morphological maximum.
    fn maximum(&mut self, clip: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    fn levels(&mut self, clip: &Frame<Self::Handle>, levels: &Levels) -> TransformResult<Self::Handle>;

    fn invert(&mut self, clip: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    /// Threshold at mid-range.
    fn binarize(&mut self, clip: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    /// Gradient magnitude.
    fn sobel(&mut self, clip: &Frame<Self::Handle>) -> TransformResult<Self::Handle>;

    fn convolution(
        &mut self,
        clip: &Frame<Self::Handle>,
        matrix: &[i32],
        mode: ConvolutionMode,
    ) -> TransformResult<Self::Handle>;

    /// Pointwise expression over one or two clips.
    fn expr(&mut self, clips: &[&Frame<Self::Handle>], op: &ExprOp) -> TransformResult<Self::Handle>;

    fn remove_grain(&mut self, engine: Engine, clip: &Frame<Self::Handle>, mode: i32) -> TransformResult<Self::Handle>;

    /// Clamp `clip` against the neighborhood of `reference`.
    fn repair(
        &mut self,
        engine: Engine,
        clip: &Frame<Self::Handle>,
        reference: &Frame<Self::Handle>,
        mode: i32,
    ) -> TransformResult<Self::Handle>;

    fn temporal_median(&mut self, clip: &Frame<Self::Handle>, radius: u32, planes: Planes) -> TransformResult<Self::Handle>;

    /// Motion-compensated temporal average of `render`, vectors searched on `search`.
    fn motion_degrain(
        &mut self,
        search: &Frame<Self::Handle>,
        render: &Frame<Self::Handle>,
        plan: &MotionPlan,
    ) -> TransformResult<Self::Handle>;

    fn bm3d(
        &mut self,
        clip: &Frame<Self::Handle>,
        reference: Option<&Frame<Self::Handle>>,
        params: &Bm3dParams,
    ) -> TransformResult<Self::Handle>;

    fn nlm(
        &mut self,
        clip: &Frame<Self::Handle>,
        reference: Option<&Frame<Self::Handle>>,
        params: &NlmParams,
    ) -> TransformResult<Self::Handle>;

    fn warp_sharpen(&mut self, clip: &Frame<Self::Handle>, params: &WarpParams) -> TransformResult<Self::Handle>;

    fn deband(&mut self, clip: &Frame<Self::Handle>, params: &DebandParams) -> TransformResult<Self::Handle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_table() {
        assert_eq!(Engine::select(TransformKind::RemoveGrain, Precision::Integer).namespace, "rgvs");
        assert_eq!(Engine::select(TransformKind::Repair, Precision::Float).namespace, "rgsf");
        assert_eq!(Engine::select(TransformKind::MotionSearch, Precision::Float).namespace, "mvsf");
        assert_eq!(Engine::for_device(TransformKind::BlockMatching, Device::Gpu(0)).namespace, "bm3dcuda_rtc");
        assert_eq!(Engine::for_device(TransformKind::BlockMatching, Device::Cpu).namespace, "bm3dcpu");
    }

    #[test]
    fn test_plane_indices() {
        let yuv = VideoFormat::yuv(16, Sampling::S420);
        assert_eq!(Planes::Chroma.indices(&yuv), vec![1, 2]);
        assert!(Planes::Chroma.indices(&VideoFormat::gray(16)).is_empty());
        assert_eq!(Planes::All.indices(&yuv), vec![0, 1, 2]);
    }

    #[test]
    fn test_renoise_band() {
        let band = ExprOp::RenoiseBand { low: 32.0, high: 45.0, origin: 35.0, end: 65.0, peak: 255.0 };
        assert_eq!(band.eval(10.0, 0.0), 0.0);
        assert_eq!(band.eval(200.0, 0.0), 255.0);
        assert_eq!(band.eval(35.0, 0.0), 0.0);
        assert!(band.eval(40.0, 0.0) > 0.0);
    }

    #[test]
    fn test_rgb_output_tags() {
        let info = ClipInfo::new(64, 64, VideoFormat::yuv(16, Sampling::S420));
        let out = Resample::to_format(&info, VideoFormat::rgbs()).with_matrix_in(1).output_info(&info);
        assert_eq!(out.tags.matrix, 0);
        assert_eq!(out.tags.range, info.tags.range);
    }
}
