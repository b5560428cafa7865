//! Post-processing shared by every pass: strength blend, detail
//! recovery, renoise and the edge-aware composite.

use crate::backend::{
    Backend, ConvolutionMode, Engine, ExprOp, Frame, Levels, Planes, Precision, TransformKind,
};
use crate::error::{ConfigurationError, DenoiseError};
use crate::models::{ColorFamily, ColorRange, DitherMode, VideoFormat};

use super::luma_of;

/// Lowest amount the directional sharpen kernel accepts (`-log2(3)`).
pub const SHARPEN_MIN: f64 = -1.5849625;

/// Amounts closer to zero than `log2(1 + 1/65536)` leave the clip unchanged.
const SHARPEN_EPSILON: f64 = 0.00002201361136;

/// Which pass a post-processing call follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Motion,
    BlockMatching,
    NonLocalMeans,
}

impl PassKind {
    /// Scale applied to the sharpen amount after this pass.
    pub fn sharpen_multiplier(&self) -> f64 {
        match self {
            PassKind::Motion => 1.0,
            PassKind::BlockMatching => 0.14,
            PassKind::NonLocalMeans => 0.69,
        }
    }
}

/// Knobs of one post-processing call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostSettings {
    pub ref_height: u32,
    pub strength: i32,
    pub sharp: f64,
    pub renoise: f64,
    pub repair_mode: i32,
    pub pass: PassKind,
}

/// Merge weight toward the denoised clip for a reduced strength (1-19).
pub fn strength_weight(strength: i32) -> f64 {
    0.2 + 0.04 * strength as f64
}

/// Dilations applied to the dynamic strength mask.
pub fn mask_dilations(ref_height: u32) -> usize {
    if ref_height <= 500 {
        0
    } else if ref_height <= 1200 {
        1
    } else {
        2
    }
}

/// Final sharpen amount for a pass, capped at 50.
pub fn sharpen_amount(ref_height: u32, sharp: f64, pass: PassKind) -> f64 {
    ((15.0 + ref_height as f64 * sharp * 0.0007) * pass.sharpen_multiplier()).min(50.0)
}

/// Outer and center weights of the 3-tap directional sharpen kernel.
pub fn sharpen_kernel(amount: f64) -> Result<[i32; 3], ConfigurationError> {
    ConfigurationError::check_range("sharpen amount", amount, SHARPEN_MIN, 1.0)?;
    let center = (2f64.powf(amount - 1.0) * 1023.0 + 0.5).floor() as i32;
    let outer = ((0.25 - 2f64.powf(amount - 2.0)) * 1023.0 + 0.5).floor() as i32;
    Ok([outer, center, outer])
}

/// Luma contrast remap around the black level, clamped to the legal luma range.
pub fn tweak_contrast(format: &VideoFormat, range: ColorRange, cont: f64) -> ExprOp {
    if format.is_float() {
        return ExprOp::Contrast { cont, bright: 0.0, pivot: 0.0, min: 0.0, max: 1.0 };
    }
    let (min, max) = if range.is_full() {
        (0.0, format.peak())
    } else {
        let scale = format.scale_8bit();
        (16.0 * scale, 235.0 * scale)
    };
    ExprOp::Contrast { cont, bright: 0.0, pivot: min, min, max }
}

/// Band that renoises mid-tones and fades out toward black.
pub fn renoise_band(format: &VideoFormat) -> ExprOp {
    let i = format.scale_8bit();
    ExprOp::RenoiseBand {
        low: 32.0 * i,
        high: 45.0 * i,
        origin: 35.0 * i,
        end: 65.0 * i,
        peak: format.peak(),
    }
}

/// Level remap turning source luma into the dynamic strength mask.
pub fn strength_levels(format: &VideoFormat, range: ColorRange, strength: i32) -> Levels {
    let i = format.scale_8bit();
    let s = strength.unsigned_abs() as f64;
    let (lo, hi) = if range.is_full() { (0.0, 255.0) } else { (16.0, 235.0) };
    Levels {
        min_in: (lo + s) * i,
        max_in: hi * i,
        gamma: 0.85,
        min_out: 0.0,
        max_out: (255.0 - s) * i,
    }
}

fn at_least_16<B: Backend>(backend: &mut B, clip: &Frame<B::Handle>) -> Result<Frame<B::Handle>, DenoiseError> {
    if clip.format().bits_per_sample < 16 {
        Ok(backend.bit_depth(clip, 16, DitherMode::ROUND)?)
    } else {
        Ok(clip.clone())
    }
}

/// Vertical then horizontal pass of the directional kernel.
pub fn sharpen<B: Backend>(
    backend: &mut B,
    clip: &Frame<B::Handle>,
    amount: f64,
) -> Result<Frame<B::Handle>, DenoiseError> {
    let kernel = sharpen_kernel(amount)?;
    if amount.abs() < SHARPEN_EPSILON {
        return Ok(clip.clone());
    }
    let vertical = backend.convolution(clip, &kernel, ConvolutionMode::Vertical)?;
    Ok(backend.convolution(&vertical, &kernel, ConvolutionMode::Horizontal)?)
}

fn dynamic_mask<B: Backend>(
    backend: &mut B,
    luma: &Frame<B::Handle>,
    settings: &PostSettings,
    range: ColorRange,
) -> Result<Frame<B::Handle>, DenoiseError> {
    let mut mask = backend.maximum(luma)?;
    for _ in 0..mask_dilations(settings.ref_height) {
        mask = backend.maximum(&mask)?;
    }
    let levels = strength_levels(&luma.format(), range, settings.strength);
    Ok(backend.levels(&mask, &levels)?)
}

/// Post-process `output`, the result of a pass run on `pre`.
///
/// The result is at least 16-bit and has the layout of `pre` (upconverted
/// to 16-bit when narrower). Luma is blended, sharpened and renoised; for YUV
/// clips the chroma planes come from the strength-blended pass output.
pub fn post_process<B: Backend>(
    backend: &mut B,
    output: &Frame<B::Handle>,
    pre: &Frame<B::Handle>,
    settings: &PostSettings,
) -> Result<Frame<B::Handle>, DenoiseError> {
    let (sharp, renoise, repair_mode) = if settings.repair_mode == 0 {
        (0.0, 0.0, 0)
    } else {
        (settings.sharp, settings.renoise, settings.repair_mode)
    };

    let output = at_least_16(backend, output)?;
    let pre = at_least_16(backend, pre)?;
    let format = output.format();
    let range = pre.tags().range;

    let precision = Precision::of(&format);
    let remove_grain = Engine::select(TransformKind::RemoveGrain, precision);
    let repair = Engine::select(TransformKind::Repair, precision);

    let mut filt = output.clone();
    let mut clean = luma_of(backend, &output)?;
    let cy = luma_of(backend, &pre)?;
    let mut clean2 = if repair_mode > 0 {
        backend.remove_grain(remove_grain, &clean, repair_mode)?
    } else {
        clean.clone()
    };

    if settings.strength <= 0 {
        let mask = dynamic_mask(backend, &cy, settings, range)?;
        clean = backend.masked_merge(&clean, &cy, &mask)?;
        clean2 = backend.masked_merge(&clean2, &cy, &mask)?;
        filt = backend.masked_merge(&filt, &pre, &mask)?;
    } else if settings.strength < 20 {
        let weight = strength_weight(settings.strength);
        clean = backend.merge(&cy, &clean, weight)?;
        clean2 = backend.merge(&cy, &clean2, weight)?;
        filt = backend.merge(&pre, &filt, weight)?;
    }

    let sharpened = if sharp > 0.0 {
        let amount = sharpen_amount(settings.ref_height, sharp, settings.pass);
        let softened = sharpen(backend, &clean2, -0.08 - 0.03 * amount)?;
        let detail = backend.make_diff(&clean, &softened, Planes::All)?;
        let stable = backend.temporal_median(&detail, 1, Planes::All)?;
        let detail = backend.repair(repair, &stable, &detail, 12)?;
        Some(backend.merge_diff(&clean2, &detail, Planes::All)?)
    } else {
        None
    };

    let noise = backend.make_diff(&clean2, &cy, Planes::All)?;
    if renoise > 0.0 {
        let stable = backend.temporal_median(&noise, 1, Planes::All)?;
        let boosted = backend.expr(&[&stable], &tweak_contrast(&format, range, 1.008 + 0.00016 * renoise))?;
        let renoised = backend.merge_diff(&clean2, &boosted, Planes::All)?;
        let clean1 = backend.merge(&clean2, &renoised, 0.3 + renoise * 0.035)?;
        let inverted = backend.invert(&clean)?;
        let darkest = backend.expr(&[&clean, &inverted], &ExprOp::Min)?;
        let band = backend.expr(&[&darkest], &renoise_band(&format))?;
        clean2 = backend.masked_merge(&clean2, &clean1, &band)?;
    }

    if repair_mode > 0 {
        let flat = backend.binarize(&noise)?;
        let flat = backend.invert(&flat)?;
        let edges = backend.sobel(&clean)?;
        let mask = backend.expr(&[&flat, &edges], &ExprOp::Max)?;
        let detail = sharpened.as_ref().unwrap_or(&clean);
        clean2 = backend.masked_merge(&clean2, detail, &mask)?;
    }

    if pre.format().color_family == ColorFamily::Yuv {
        Ok(backend.join_planes(&clean2, &filt)?)
    } else {
        Ok(clean2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::raster::{max_abs_diff, plane, RasterBackend};
    use crate::models::{ClipInfo, Sampling};

    fn settings(strength: i32, repair_mode: i32) -> PostSettings {
        PostSettings {
            ref_height: 480,
            strength,
            sharp: 9.5,
            renoise: 14.0,
            repair_mode,
            pass: PassKind::Motion,
        }
    }

    #[test]
    fn test_strength_weight() {
        assert!((strength_weight(1) - 0.24).abs() < 1e-12);
        assert!((strength_weight(19) - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_mask_dilations() {
        assert_eq!(mask_dilations(480), 0);
        assert_eq!(mask_dilations(1080), 1);
        assert_eq!(mask_dilations(1440), 2);
    }

    #[test]
    fn test_sharpen_kernel() {
        assert_eq!(sharpen_kernel(0.0).unwrap(), [0, 512, 0]);
        assert_eq!(sharpen_kernel(1.0).unwrap(), [-256, 1023, -256]);
        assert!(sharpen_kernel(-1.6).is_err());
        assert!(sharpen_kernel(1.1).is_err());
        // Largest amount reachable from post-processing stays in range.
        assert!(sharpen_kernel(-0.08 - 0.03 * 50.0).is_ok());
    }

    #[test]
    fn test_sharpen_amount_per_pass() {
        let motion = sharpen_amount(1080, 9.5, PassKind::Motion);
        assert!((motion - 22.182).abs() < 1e-9);
        let bm3d = sharpen_amount(1080, 9.5, PassKind::BlockMatching);
        assert!((bm3d - 22.182 * 0.14).abs() < 1e-9);
        assert_eq!(sharpen_amount(4320, 20.0, PassKind::Motion), 50.0);
    }

    #[test]
    fn test_tweak_contrast_is_range_aware() {
        let format = VideoFormat::gray(16);
        match tweak_contrast(&format, ColorRange::Limited, 1.01) {
            ExprOp::Contrast { pivot, min, max, .. } => {
                assert_eq!(pivot, 4096.0);
                assert_eq!(min, 4096.0);
                assert_eq!(max, 60160.0);
            }
            other => panic!("unexpected op {:?}", other),
        }
        match tweak_contrast(&format, ColorRange::Full, 1.01) {
            ExprOp::Contrast { min, max, .. } => {
                assert_eq!(min, 0.0);
                assert_eq!(max, 65535.0);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_strength_levels_scale_with_depth() {
        let levels = strength_levels(&VideoFormat::gray(16), ColorRange::Limited, -50);
        assert_eq!(levels.min_in, 66.0 * 256.0);
        assert_eq!(levels.max_in, 235.0 * 256.0);
        assert_eq!(levels.max_out, 205.0 * 256.0);
    }

    #[test]
    fn test_full_strength_without_repair_is_identity() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::yuv(16, Sampling::S420));
        let output = RasterBackend::frame_from_fn(info, |p, r, c| (20000 + p * 3000 + r * 40 + c * 7) as f32);
        let pre = RasterBackend::frame_from_fn(info, |p, r, c| (21000 + p * 3000 + (r * c) % 50) as f32);

        let result = post_process(&mut backend, &output, &pre, &settings(20, 0)).unwrap();
        assert_eq!(result.format(), info.format);
        assert_eq!(max_abs_diff(&result, &output), 0.0);
    }

    #[test]
    fn test_reduced_strength_blends_toward_source() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(8, 8, VideoFormat::gray(16));
        let output = RasterBackend::flat(info, &[30000.0]);
        let pre = RasterBackend::flat(info, &[40000.0]);

        let result = post_process(&mut backend, &output, &pre, &settings(1, 0)).unwrap();
        // 40000 * 0.76 + 30000 * 0.24
        assert_eq!(plane(&result, 0)[[4, 4]], 37600.0);
    }

    #[test]
    fn test_narrow_inputs_are_upconverted() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(8, 8, VideoFormat::yuv(8, Sampling::S420));
        let output = RasterBackend::flat(info, &[100.0, 128.0, 128.0]);
        let pre = RasterBackend::flat(info, &[100.0, 128.0, 128.0]);

        let settings = PostSettings { renoise: 0.0, ..settings(20, 18) };
        let result = post_process(&mut backend, &output, &pre, &settings).unwrap();
        assert_eq!(result.format(), VideoFormat::yuv(16, Sampling::S420));
        assert_eq!(plane(&result, 0)[[2, 2]], 25600.0);
        assert_eq!(plane(&result, 1)[[1, 1]], 32768.0);
    }

    #[test]
    fn test_renoise_lifts_mid_tones() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(8, 8, VideoFormat::gray(16));
        let output = RasterBackend::flat(info, &[25600.0]);

        let plain = post_process(&mut backend, &output, &output, &PostSettings { renoise: 0.0, ..settings(20, 18) })
            .unwrap();
        let renoised = post_process(&mut backend, &output, &output, &settings(20, 18)).unwrap();
        assert!(plane(&renoised, 0)[[3, 3]] > plane(&plain, 0)[[3, 3]]);
    }
}
