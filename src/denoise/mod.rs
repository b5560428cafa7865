//! The three-pass denoiser.
//!
//! A motion-compensated temporal pass, a block-matching 3-D pass and a
//! non-local-means pass run in sequence, each followed by post-processing.
//! Optional line thickening and debanding follow, then the result is
//! converted back to the source chroma layout and the output bit depth.

pub mod bm3d;
pub mod format;
pub mod motion;
pub mod nlm;
pub mod post;

use crate::backend::{Backend, Bm3dParams, DebandParams, Frame, MotionPlan, NlmParams, Planes, Precision, Resample, WarpParams};
use crate::error::{ConfigurationError, DenoiseError, TransformFailure};
use crate::models::{ColorFamily, DenoiseParameters, DitherMode, LogLevel};
use crate::progress_reporter::ProgressReporter;

use self::format::{convert_to_working, derive_format, validate_output_bits, QualityLevel, SourceVariants};
use self::post::{post_process, PassKind, PostSettings};

/// Luma plane of `clip`; gray clips are returned as they are.
pub(crate) fn luma_of<B: Backend>(backend: &mut B, clip: &Frame<B::Handle>) -> Result<Frame<B::Handle>, TransformFailure> {
    if clip.format().is_gray() {
        Ok(clip.clone())
    } else {
        backend.extract_luma(clip)
    }
}

fn clamp_sharp(sharp: f64) -> f64 {
    sharp.clamp(0.0, 20.0)
}

/// Sharpening for the motion pass, raised to make up for detail lost to downscaling.
pub fn motion_sharp(sharp: f64, downscale_ratio: Option<f64>) -> f64 {
    clamp_sharp(sharp + (1.0 - downscale_ratio.unwrap_or(1.0)) * 1.35)
}

/// Sharpening for the non-local-means pass, scaled with its strength.
pub fn nlm_sharp(sharp: f64, nlm_strength: f64) -> f64 {
    clamp_sharp(sharp - 0.5 + nlm_strength / 2.8)
}

/// Size of a downscaled pass, rounded down to even dimensions.
pub fn downscaled_size(width: u32, height: u32, ratio: f64) -> (u32, u32) {
    let even = |v: u32| ((v as f64 * ratio / 2.0).floor() as u32) * 2;
    (even(width), even(height))
}

/// Runs the denoising pipeline on a backend.
pub struct Denoiser {
    params: DenoiseParameters,
    reporter: Option<ProgressReporter>,
}

impl Denoiser {
    /// Validate `params` and build a denoiser.
    pub fn new(params: DenoiseParameters) -> Result<Self, ConfigurationError> {
        params.validate()?;
        Ok(Self { params, reporter: None })
    }

    /// Log derived settings through `reporter` at debug level.
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn params(&self) -> &DenoiseParameters {
        &self.params
    }

    fn debug(&self, message: &str) {
        if let Some(reporter) = &self.reporter {
            reporter.send_log(LogLevel::Debug, message);
        }
    }

    fn post_settings(&self, ref_height: u32, sharp: f64, pass: PassKind) -> PostSettings {
        PostSettings {
            ref_height,
            strength: self.params.strength,
            sharp,
            renoise: self.params.renoise,
            repair_mode: self.params.repair_mode,
            pass,
        }
    }

    /// Denoise `source` and return it in the source chroma layout at the output depth.
    ///
    /// Every configuration error is reported before the first transform runs.
    pub fn process<B: Backend>(&self, backend: &mut B, source: &Frame<B::Handle>) -> Result<Frame<B::Handle>, DenoiseError> {
        let params = &self.params;
        let source_format = source.format();
        if source_format.color_family == ColorFamily::Rgb {
            return Err(ConfigurationError::UnsupportedColorFamily(source_format.color_family).into());
        }
        if source_format.known_sampling().is_none() {
            return Err(
                ConfigurationError::UnsupportedSubsampling(source_format.subsampling_w, source_format.subsampling_h).into(),
            );
        }
        let out_bits = validate_output_bits(params.output_bits.unwrap_or(source_format.bits_per_sample))?;

        let m1 = QualityLevel::from_level(params.motion_pass.level)?;
        let m2 = QualityLevel::from_level(params.bm3d_pass.level)?;
        let m3 = QualityLevel::from_level(params.nlm_pass.level)?;
        let bm3d_level = QualityLevel::Source16.max(m2).max(m3);
        let nlm_level = QualityLevel::Source16.max(m3);

        let motion_format = if m1 != QualityLevel::Disabled { Some(derive_format(&source_format, m1)?) } else { None };
        let bm3d_format = if m2 != QualityLevel::Disabled { Some(derive_format(&source_format, bm3d_level)?) } else { None };
        let nlm_format = if m3 != QualityLevel::Disabled { Some(derive_format(&source_format, nlm_level)?) } else { None };

        let ref_height = source.info().ref_height();
        let chroma = params.chroma && source_format.color_family == ColorFamily::Yuv;
        self.debug(&format!(
            "denoising {}x{} {} (reference height {}, chroma {})",
            source.width(),
            source.height(),
            source_format.vs_name(),
            ref_height,
            chroma
        ));

        let mut variants = SourceVariants::new(source.clone());
        let mut output: Option<Frame<B::Handle>> = None;

        if let Some(working) = motion_format {
            let mut clip = variants.get(backend, working)?;
            let ratio = params.motion_pass.downscale_ratio;
            if let Some(ratio) = ratio {
                let (width, height) = downscaled_size(source.width(), source.height(), ratio);
                clip = backend.resample(&clip, &Resample::to_size(clip.info(), width, height))?;
            }

            let plan = MotionPlan::derive(ref_height, Precision::of(&working), params.motion_threshold);
            self.debug(&format!(
                "motion pass: {} at {}x{}, block {} overlap {} pel {} radius {}",
                working.vs_name(),
                clip.width(),
                clip.height(),
                plan.block_size,
                plan.overlap,
                plan.pel,
                plan.radius()
            ));
            let filtered = motion::run(backend, &clip, chroma, &plan)?;
            let settings = self.post_settings(ref_height, motion_sharp(params.sharp, ratio), PassKind::Motion);
            let mut out = post_process(backend, &filtered, &clip, &settings)?;
            if ratio.is_some() {
                out = backend.resample(&out, &Resample::to_size(out.info(), source.width(), source.height()))?;
            }
            output = Some(out);
        }

        if let Some(working) = bm3d_format {
            let clip = variants.get(backend, working)?;
            let bm3d_params = Bm3dParams::from_parameters(params);
            self.debug(&format!(
                "block-matching pass: {} on {}, sigma {}",
                working.vs_name(),
                bm3d_params.engine.namespace,
                bm3d_params.sigma
            ));
            let filtered = bm3d::run(backend, &clip, output.as_ref(), chroma, &bm3d_params)?;
            let settings = self.post_settings(ref_height, params.sharp, PassKind::BlockMatching);
            output = Some(post_process(backend, &filtered, &clip, &settings)?);
        }

        if let Some(working) = nlm_format {
            let clip = variants.get(backend, working)?;
            let reference = match &output {
                Some(out) => Some(convert_to_working(backend, out, working, clip.tags())?),
                None => None,
            };
            let nlm_params = NlmParams::from_parameters(params);
            self.debug(&format!(
                "non-local-means pass: {}, d {} a {} h {}",
                working.vs_name(),
                nlm_params.temporal_radius,
                nlm_params.spatial_radius,
                nlm_params.strength
            ));
            let filtered = nlm::run(backend, &clip, reference.as_ref(), chroma, &nlm_params)?;
            let settings = self.post_settings(ref_height, nlm_sharp(params.sharp, params.nlm_strength), PassKind::NonLocalMeans);
            output = Some(post_process(backend, &filtered, &clip, &settings)?);
        }

        let mut out = match output {
            Some(out) => out,
            None => return Err(ConfigurationError::NoPassEnabled.into()),
        };

        if params.depth > 0 {
            out = thicken_lines(backend, &out, params.depth)?;
        }

        if params.deband {
            if out.format().is_float() {
                out = backend.bit_depth(&out, 16, DitherMode::ORDERED)?;
            }
            let deband = DebandParams {
                range: 16,
                preset: if chroma { "high" } else { "luma" },
                grain_y: ref_height / 15,
                grain_c: if chroma { ref_height / 16 } else { 0 },
            };
            self.debug(&format!("deband: grain {} / {}", deband.grain_y, deband.grain_c));
            out = backend.deband(&out, &deband)?;
        }

        if out.format().sampling() != source_format.sampling() {
            out = backend.resample_chroma(&out, source_format.sampling())?;
        }
        if out.format().bits_per_sample != out_bits {
            out = backend.bit_depth(&out, out_bits, params.dither_mode)?;
        }
        Ok(out)
    }
}

/// Difference of a thinning and a thickening warp, added back to `clip`.
fn thicken_lines<B: Backend>(backend: &mut B, clip: &Frame<B::Handle>, depth: i32) -> Result<Frame<B::Handle>, TransformFailure> {
    let warp = |blur: i32, depth: i32| WarpParams { thresh: 128, blur, kind: 1, depth, chroma: 1 };
    let thin = backend.warp_sharpen(clip, &warp(3, -3 * depth))?;
    let thick = backend.warp_sharpen(clip, &warp(2, 2 * depth))?;
    let diff = backend.make_diff(&thin, &thick, Planes::All)?;
    backend.merge_diff(clip, &diff, Planes::All)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::raster::{max_abs_diff, RasterBackend};
    use crate::backend::script::ScriptBackend;
    use crate::models::{ClipInfo, PassConfig, Sampling, VideoFormat};

    fn quiet() -> DenoiseParameters {
        DenoiseParameters { repair_mode: 0, ..Default::default() }
    }

    #[test]
    fn test_sharp_adjustments() {
        assert!((motion_sharp(9.5, Some(0.6)) - 10.04).abs() < 1e-9);
        assert_eq!(motion_sharp(9.5, None), 9.5);
        assert_eq!(motion_sharp(20.0, Some(0.5)), 20.0);
        assert!((nlm_sharp(9.5, 1.4) - 9.5).abs() < 1e-9);
        assert_eq!(nlm_sharp(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_downscaled_size_is_even() {
        assert_eq!(downscaled_size(1920, 1080, 0.6), (1152, 648));
        assert_eq!(downscaled_size(720, 486, 0.65), (468, 314));
        assert_eq!(downscaled_size(16, 16, 0.6), (8, 8));
    }

    #[test]
    fn test_rgb_is_rejected_before_any_transform() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::rgbs());
        let frame = RasterBackend::flat(info, &[0.5, 0.5, 0.5]);
        let denoiser = Denoiser::new(DenoiseParameters::default()).unwrap();

        let result = denoiser.process(&mut backend, &frame);
        assert!(matches!(
            result,
            Err(DenoiseError::Configuration(ConfigurationError::UnsupportedColorFamily(ColorFamily::Rgb)))
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_nlm_level_picks_working_layout() {
        let knlm_channels = |level: u8| {
            let mut backend = ScriptBackend::new();
            let info = ClipInfo::new(720, 480, VideoFormat::yuv(8, Sampling::S420));
            let source = backend.source("in.mkv", info);
            let params = DenoiseParameters { nlm_pass: PassConfig::new(level), ..Default::default() };
            Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();
            backend
                .statements()
                .iter()
                .filter(|l| l.contains("core.knlm.KNLMeansCL("))
                .map(|l| l.contains("channels=\"YUV\""))
                .collect::<Vec<_>>()
        };
        assert_eq!(knlm_channels(3), vec![true]);
        assert_eq!(knlm_channels(2), vec![false, false]);
    }

    #[test]
    fn test_411_is_rejected_before_any_transform() {
        let mut backend = RasterBackend::new();
        let format = VideoFormat { subsampling_w: 2, subsampling_h: 0, ..VideoFormat::yuv(8, Sampling::S444) };
        let frame = RasterBackend::flat(ClipInfo::new(16, 16, format), &[80.0, 128.0, 128.0]);
        let denoiser = Denoiser::new(DenoiseParameters::default()).unwrap();

        let result = denoiser.process(&mut backend, &frame);
        assert_eq!(
            result.map(|_| ()),
            Err(DenoiseError::Configuration(ConfigurationError::UnsupportedSubsampling(2, 0)))
        );
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_invalid_knobs_are_rejected_up_front() {
        assert!(Denoiser::new(DenoiseParameters { sharp: 25.0, ..Default::default() }).is_err());
        assert!(Denoiser::new(DenoiseParameters { nlm_pass: PassConfig::new(7), ..Default::default() }).is_err());
    }

    #[test]
    fn test_flat_frame_survives_pipeline() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::yuv(8, Sampling::S420));
        let frame = RasterBackend::flat(info, &[100.0, 128.0, 128.0]);
        let denoiser = Denoiser::new(DenoiseParameters { depth: 2, ..quiet() }).unwrap();

        let out = denoiser.process(&mut backend, &frame).unwrap();
        assert_eq!(out.format(), info.format);
        assert_eq!((out.width(), out.height()), (16, 16));
        assert!(max_abs_diff(&out, &frame) <= 1.0);
    }

    #[test]
    fn test_output_depth_and_layout() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::yuv(8, Sampling::S422));
        let frame = RasterBackend::flat(info, &[90.0, 120.0, 140.0]);
        let params = DenoiseParameters {
            output_bits: Some(10),
            motion_pass: PassConfig::disabled(),
            ..quiet()
        };
        let out = Denoiser::new(params).unwrap().process(&mut backend, &frame).unwrap();
        assert_eq!(out.format(), VideoFormat::yuv(10, Sampling::S422));
    }

    #[test]
    fn test_gray_source_ignores_chroma_flag() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::gray(8));
        let frame = RasterBackend::flat(info, &[80.0]);
        let out = Denoiser::new(DenoiseParameters { chroma: true, ..quiet() })
            .unwrap()
            .process(&mut backend, &frame)
            .unwrap();
        assert_eq!(out.format(), VideoFormat::gray(8));
    }

    #[test]
    fn test_hd_script_structure() {
        let mut backend = ScriptBackend::new();
        let info = ClipInfo::new(1920, 1080, VideoFormat::yuv(8, Sampling::S420));
        let source = backend.source("in.mkv", info);
        let params = DenoiseParameters { deband: true, nlm_pass: PassConfig::new(4), ..Default::default() };
        let out = Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();
        assert_eq!(out.format(), info.format);

        let lines = backend.statements();
        assert!(lines.iter().any(|l| l.contains("width=1152, height=648")));
        assert!(lines.iter().any(|l| l.contains("core.mv.Degrain3(")));
        assert!(lines.iter().any(|l| l.contains("blksize=16")));
        assert!(lines.iter().any(|l| l.contains("core.bm3dcuda_rtc.BM3D(")));
        assert!(lines.iter().any(|l| l.contains("core.knlm.KNLMeansCL(")));
        assert!(lines.iter().any(|l| l.contains("range=16, preset=\"high\", grainy=96, grainc=90")));
        assert!(lines.iter().any(|l| l.contains("css=\"420\"")));
        assert!(lines.last().unwrap().contains("bits=8, dmode=0"));
    }
}
