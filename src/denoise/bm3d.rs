//! Block-matching 3-D pass.

use crate::backend::{Backend, Bm3dParams, Engine, Frame, Resample, TransformKind};
use crate::error::TransformFailure;
use crate::models::{ColorFamily, DenoiseParameters, DitherMode, VideoFormat};

use super::format::convert_to_working;
use super::luma_of;

impl Bm3dParams {
    pub fn from_parameters(params: &DenoiseParameters) -> Self {
        let device = params.bm3d_device();
        Self {
            engine: Engine::for_device(TransformKind::BlockMatching, device),
            device,
            sigma: params.bm3d_sigma,
            block_step: params.block_step,
            bm_range: params.bm_range,
            ps_range: params.ps_range,
        }
    }
}

/// Float input for the filter: planar RGB with chroma, float luma without.
fn to_float<B: Backend>(
    backend: &mut B,
    frame: &Frame<B::Handle>,
    chroma: bool,
    matrix: u8,
) -> Result<Frame<B::Handle>, TransformFailure> {
    if chroma {
        let params = Resample::to_format(frame.info(), VideoFormat::rgbs()).with_matrix_in(matrix);
        backend.resample(frame, &params)
    } else {
        let luma = luma_of(backend, frame)?;
        backend.bit_depth(&luma, 32, DitherMode::ROUND)
    }
}

/// Filter `clip` (already in its working format) against `reference`, and
/// return the result in the working format with the working clip's tags.
pub fn run<B: Backend>(
    backend: &mut B,
    clip: &Frame<B::Handle>,
    reference: Option<&Frame<B::Handle>>,
    chroma: bool,
    params: &Bm3dParams,
) -> Result<Frame<B::Handle>, TransformFailure> {
    let working = clip.format();
    let tags = clip.tags();
    let matrix = tags.effective_matrix();

    let input = to_float(backend, clip, chroma, matrix)?;
    let reference = match reference {
        Some(r) => Some(to_float(backend, r, chroma, matrix)?),
        None => None,
    };
    let filtered = backend.bm3d(&input, reference.as_ref(), params)?;

    if chroma {
        return convert_to_working(backend, &filtered, working, tags);
    }
    let luma = convert_to_working(backend, &filtered, working.luma(), tags)?;
    if working.color_family == ColorFamily::Yuv {
        backend.join_planes(&luma, clip)
    } else {
        Ok(luma)
    }
}
