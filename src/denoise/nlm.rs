//! Non-local-means pass.

use crate::backend::{Backend, Frame, NlmChannels, NlmParams, Resample};
use crate::error::TransformFailure;
use crate::models::{DenoiseParameters, Sampling};

impl NlmParams {
    pub fn from_parameters(params: &DenoiseParameters) -> Self {
        Self {
            temporal_radius: params.temporal_radius,
            spatial_radius: params.spatial_radius,
            strength: params.nlm_strength,
            channels: NlmChannels::YUV,
            device: params.nlm_device(),
        }
    }

    fn with_channels(self, channels: NlmChannels, strength: f64) -> Self {
        Self { channels, strength, ..self }
    }
}

/// Filter `clip` guided by `reference`.
///
/// Gray clips filter Y; 4:4:4 clips filter all planes jointly; subsampled
/// clips filter luma and, with chroma processing, chroma at half strength.
pub fn run<B: Backend>(
    backend: &mut B,
    clip: &Frame<B::Handle>,
    reference: Option<&Frame<B::Handle>>,
    chroma: bool,
    params: &NlmParams,
) -> Result<Frame<B::Handle>, TransformFailure> {
    let reference = match reference {
        Some(r) if r.format() != clip.format() => {
            Some(backend.resample(r, &Resample::to_format(r.info(), clip.format()))?)
        }
        Some(r) => Some(r.clone()),
        None => None,
    };
    let reference = reference.as_ref();

    match clip.format().sampling() {
        Sampling::Gray => backend.nlm(clip, reference, &params.with_channels(NlmChannels::Y, params.strength)),
        Sampling::S444 => backend.nlm(clip, reference, &params.with_channels(NlmChannels::YUV, params.strength)),
        Sampling::S422 | Sampling::S420 => {
            let luma = backend.nlm(clip, reference, &params.with_channels(NlmChannels::Y, params.strength))?;
            if !chroma {
                return Ok(luma);
            }
            let uv = backend.nlm(clip, reference, &params.with_channels(NlmChannels::UV, params.strength / 2.0))?;
            backend.join_planes(&luma, &uv)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::script::ScriptBackend;
    use crate::models::{ClipInfo, Device, VideoFormat};

    fn params() -> NlmParams {
        NlmParams::from_parameters(&DenoiseParameters::default())
    }

    #[test]
    fn test_subsampled_chroma_runs_at_half_strength() {
        let mut backend = ScriptBackend::new();
        let info = ClipInfo::new(720, 480, VideoFormat::yuv(16, Sampling::S420));
        let clip = backend.source("in.mkv", info);
        let out = run(&mut backend, &clip, None, true, &params()).unwrap();

        assert_eq!(out.format(), info.format);
        let lines = backend.statements();
        assert!(lines.iter().any(|l| l.contains("h=1.4, channels=\"Y\"")));
        assert!(lines.iter().any(|l| l.contains("h=0.7, channels=\"UV\"")));
        assert!(lines.iter().any(|l| l.contains("planes=[0, 1, 2], colorfamily=vs.YUV")));
    }

    #[test]
    fn test_full_chroma_is_filtered_jointly() {
        let mut backend = ScriptBackend::new();
        let info = ClipInfo::new(720, 480, VideoFormat::yuv(16, Sampling::S444));
        let clip = backend.source("in.mkv", info);
        run(&mut backend, &clip, None, false, &params()).unwrap();
        assert_eq!(backend.transform_count(), 1);
        assert!(backend.statements().iter().any(|l| l.contains("channels=\"YUV\"")));
    }

    #[test]
    fn test_reference_is_resampled_and_device_honored() {
        let mut backend = ScriptBackend::new();
        let info = ClipInfo::new(720, 480, VideoFormat::gray(16));
        let clip = backend.source("in.mkv", info);
        let reference = backend.bit_depth(&clip, 32, crate::models::DitherMode::ROUND).unwrap();
        let params = NlmParams { device: Device::Cpu, ..params() };
        run(&mut backend, &clip, Some(&reference), true, &params).unwrap();

        let lines = backend.statements();
        assert!(lines.iter().any(|l| l.contains("core.resize.Bicubic(n0, format=vs.GRAY16)")));
        assert!(lines.iter().any(|l| l.contains("channels=\"Y\", rclip=n1, device_type=\"cpu\", device_id=0")));
    }
}
