//! Motion-compensated temporal pass.

use crate::backend::{
    AnalysisStep, Backend, ConvolutionMode, Engine, Frame, MotionPlan, Planes, Precision, SuperParams, TransformKind,
};
use crate::error::TransformFailure;
use crate::models::{ColorFamily, DitherMode};

use super::luma_of;

/// Blur applied to the clip the vectors are searched on.
pub const PREFILTER: [i32; 9] = [1, 2, 1, 2, 4, 2, 1, 2, 1];

impl MotionPlan {
    /// Motion search settings for a clip of the given resolution proxy.
    pub fn derive(ref_height: u32, precision: Precision, threshold: i32) -> Self {
        let scale = if ref_height > 2880 {
            8
        } else if ref_height > 1440 {
            4
        } else if ref_height > 720 {
            2
        } else {
            1
        };
        let block_size = if ref_height as f64 / scale as f64 > 360.0 { 16 } else { 8 };
        let overlap = if block_size > 12 { 6 } else { 2 };
        let pel = if ref_height > 720 { 1 } else { 2 };
        let radius = match precision {
            Precision::Integer => 3,
            Precision::Float => 4,
        };

        let mut steps = Vec::with_capacity(radius as usize * 2);
        for delta in 1..=radius {
            for backward in [true, false] {
                steps.push(analysis_step(delta, backward));
            }
        }

        Self {
            engine: Engine::select(TransformKind::MotionSearch, precision),
            block_size,
            overlap,
            pel,
            search: 5,
            truemotion: ref_height <= 720,
            lambda: 777 * block_size * block_size / 64,
            recalculate_thsad: 180,
            search_super: SuperParams {
                pad: block_size,
                pel,
                rfilter: 4,
                sharp: Some(1),
                levels: None,
            },
            render_super: SuperParams {
                pad: block_size,
                pel,
                rfilter: 1,
                sharp: None,
                levels: Some(1),
            },
            steps,
            thsad: threshold,
        }
    }
}

fn analysis_step(delta: u32, backward: bool) -> AnalysisStep {
    let (bad_sad, lsad, bad_range) = match delta {
        1 => (Some(1500), Some(980), Some(27)),
        2 => (Some(1100), Some(1120), None),
        _ => (None, None, None),
    };
    AnalysisStep {
        delta,
        backward,
        bad_sad,
        lsad,
        bad_range,
    }
}

/// Degrain `clip` and restore its chroma.
///
/// Vectors are searched on a blurred copy. Without chroma processing only luma
/// is averaged and the chroma planes of `clip` are kept. Output is at least
/// 16-bit.
pub fn run<B: Backend>(
    backend: &mut B,
    clip: &Frame<B::Handle>,
    chroma: bool,
    plan: &MotionPlan,
) -> Result<Frame<B::Handle>, TransformFailure> {
    let prefiltered = backend.convolution(clip, &PREFILTER, ConvolutionMode::Square)?;
    let (search, render) = if chroma {
        (prefiltered, clip.clone())
    } else {
        (luma_of(backend, &prefiltered)?, luma_of(backend, clip)?)
    };

    let mut clean = backend.motion_degrain(&search, &render, plan)?;
    let mut source = clip.clone();
    if clip.format().bits_per_sample < 16 {
        clean = backend.bit_depth(&clean, 16, DitherMode::ROUND)?;
        source = backend.bit_depth(&source, 16, DitherMode::ROUND)?;
    }

    if source.format().color_family != ColorFamily::Yuv {
        return Ok(clean);
    }
    let chroma_planes = if chroma {
        let residual = backend.make_diff(&source, &clean, Planes::Chroma)?;
        let residual = backend.temporal_median(&residual, 1, Planes::Chroma)?;
        backend.merge_diff(&clean, &residual, Planes::Chroma)?
    } else {
        source
    };
    backend.join_planes(&clean, &chroma_planes)
}
