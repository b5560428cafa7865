//! End-to-end checks of the denoiser on the in-memory and script backends.
//!
//! Run with: cargo test --test denoise_integration_test

use tripass_worker::backend::raster::{max_abs_diff, plane, plane_mean, RasterBackend};
use tripass_worker::backend::script::ScriptBackend;
use tripass_worker::backend::{Backend, MotionPlan, NlmParams, Precision, Resample};
use tripass_worker::denoise::format::{convert_to_working, derive_format, QualityLevel};
use tripass_worker::denoise::post::{post_process, PassKind, PostSettings};
use tripass_worker::denoise::{motion, nlm, Denoiser};
use tripass_worker::models::*;
use tripass_worker::script_generator::ScriptGenerator;
use tripass_worker::{ConfigurationError, DenoiseError};

/// Small 8-bit 4:2:0 frame with texture in every plane.
fn textured(width: u32, height: u32) -> tripass_worker::backend::Frame<tripass_worker::backend::raster::PlaneSet> {
    let info = ClipInfo::new(width, height, VideoFormat::yuv(8, Sampling::S420));
    RasterBackend::frame_from_fn(info, |p, r, c| match p {
        0 => (60 + (r * 7 + c * 13) % 90) as f32,
        1 => (110 + (r + c) % 9) as f32,
        _ => (140 - (r * 3 + c) % 7) as f32,
    })
}

fn passthrough() -> DenoiseParameters {
    DenoiseParameters {
        strength: 20,
        sharp: 0.0,
        renoise: 0.0,
        repair_mode: 0,
        motion_pass: PassConfig::disabled(),
        bm3d_pass: PassConfig::disabled(),
        nlm_pass: PassConfig::disabled(),
        ..Default::default()
    }
}

fn gray16(value: f32) -> tripass_worker::backend::Frame<tripass_worker::backend::raster::PlaneSet> {
    RasterBackend::flat(ClipInfo::new(16, 16, VideoFormat::gray(16)), &[value])
}

fn settings(strength: i32) -> PostSettings {
    PostSettings {
        ref_height: 480,
        strength,
        sharp: 0.0,
        renoise: 0.0,
        repair_mode: 0,
        pass: PassKind::NonLocalMeans,
    }
}

#[test]
fn test_single_motion_pass_equals_raw_result() {
    let source = textured(32, 32);
    let params = DenoiseParameters { motion_pass: PassConfig::new(2), ..passthrough() };

    let mut backend = RasterBackend::new();
    let out = Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();

    let mut reference = RasterBackend::new();
    let working = reference.bit_depth(&source, 16, DitherMode::ORDERED).unwrap();
    let plan = MotionPlan::derive(source.info().ref_height(), Precision::Integer, 400);
    let raw = motion::run(&mut reference, &working, true, &plan).unwrap();
    let expected = reference.bit_depth(&raw, 8, DitherMode::ORDERED).unwrap();

    assert_eq!(out.format(), source.format());
    assert_eq!(max_abs_diff(&out, &expected), 0.0);
}

#[test]
fn test_single_nlm_pass_equals_raw_result() {
    let source = textured(32, 32);
    let params = DenoiseParameters { nlm_pass: PassConfig::new(3), ..passthrough() };

    let mut backend = RasterBackend::new();
    let out = Denoiser::new(params.clone()).unwrap().process(&mut backend, &source).unwrap();

    let mut reference = RasterBackend::new();
    let full = VideoFormat::yuv(16, Sampling::S444);
    let working = reference
        .resample(&source, &Resample::to_format(source.info(), full).with_ordered_dither())
        .unwrap();
    let raw = nlm::run(&mut reference, &working, None, true, &NlmParams::from_parameters(&params)).unwrap();
    let raw = reference.resample_chroma(&raw, Sampling::S420).unwrap();
    let expected = reference.bit_depth(&raw, 8, DitherMode::ORDERED).unwrap();

    assert_eq!(out.format(), source.format());
    assert_eq!(max_abs_diff(&out, &expected), 0.0);
}

#[test]
fn test_full_strength_skips_blend() {
    let mut backend = RasterBackend::new();
    let out = post_process(&mut backend, &gray16(20000.0), &gray16(30000.0), &settings(20)).unwrap();
    assert_eq!(plane(&out, 0)[[4, 4]], 20000.0);
}

#[test]
fn test_strength_one_blends_at_024() {
    let mut backend = RasterBackend::new();
    let out = post_process(&mut backend, &gray16(20000.0), &gray16(30000.0), &settings(1)).unwrap();
    // 30000 + (20000 - 30000) * 0.24
    assert_eq!(plane(&out, 0)[[4, 4]], 27600.0);
}

#[test]
fn test_dynamic_strength_follows_luma() {
    let strength = -50;
    let mut backend = RasterBackend::new();

    let dark = post_process(&mut backend, &gray16(3000.0), &gray16(4000.0), &settings(strength)).unwrap();
    assert_eq!(plane(&dark, 0)[[8, 8]], 3000.0);

    let (pre, denoised) = (61000.0, 59000.0);
    let bright = post_process(&mut backend, &gray16(denoised), &gray16(pre), &settings(strength)).unwrap();
    let applied = (pre - plane(&bright, 0)[[8, 8]]) / (pre - denoised);
    assert!((applied as f64 - 50.0 / 255.0).abs() < 0.01, "applied fraction {}", applied);
}

#[test]
fn test_format_negotiation_is_idempotent() {
    let source = VideoFormat::yuv(8, Sampling::S420);
    for level in 1..=4 {
        let level = QualityLevel::from_level(level).unwrap();
        assert_eq!(derive_format(&source, level).unwrap(), derive_format(&source, level).unwrap());
    }
}

#[test]
fn test_float_round_trip_keeps_tags() {
    let tags = ColorTags {
        range: ColorRange::Full,
        matrix: 1,
        transfer: 1,
        primaries: 1,
        chroma_location: 2,
    };
    let info = ClipInfo::new(16, 16, VideoFormat::yuv(16, Sampling::S420)).with_tags(tags);
    let frame = RasterBackend::flat(info, &[30000.0, 31000.0, 36000.0]);

    let mut backend = RasterBackend::new();
    let up = backend
        .resample(&frame, &Resample::to_format(frame.info(), VideoFormat::yuv(32, Sampling::S444)))
        .unwrap();
    let down = convert_to_working(&mut backend, &up, info.format, tags).unwrap();
    assert_eq!(down.format(), info.format);
    assert_eq!(down.tags(), tags);
    assert!(max_abs_diff(&down, &frame) <= 1.0);

    let mut script = ScriptBackend::new();
    let src = script.source("in.mkv", info);
    let up = script.resample(&src, &Resample::to_format(src.info(), VideoFormat::yuv(32, Sampling::S444))).unwrap();
    let down = convert_to_working(&mut script, &up, info.format, tags).unwrap();
    assert_eq!(*down.info(), info);
}

#[test]
fn test_invalid_configs_fail_before_any_transform() {
    let cases = [
        DenoiseParameters { sharp: 21.0, ..Default::default() },
        DenoiseParameters { renoise: -1.0, ..Default::default() },
        DenoiseParameters { depth: 6, ..Default::default() },
        DenoiseParameters { strength: 21, ..Default::default() },
        DenoiseParameters { strength: -201, ..Default::default() },
        passthrough(),
    ];
    for params in cases {
        assert!(Denoiser::new(params).is_err());
    }

    let mut backend = RasterBackend::new();
    let rgb = RasterBackend::flat(ClipInfo::new(16, 16, VideoFormat::rgbs()), &[0.2, 0.4, 0.6]);
    let result = Denoiser::new(DenoiseParameters::default()).unwrap().process(&mut backend, &rgb);
    assert!(matches!(result, Err(DenoiseError::Configuration(ConfigurationError::UnsupportedColorFamily(_)))));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_hd_motion_only_scenario() {
    let info = ClipInfo::new(1920, 1080, VideoFormat::yuv(8, Sampling::S420));
    let params = DenoiseParameters {
        motion_pass: PassConfig::new(2),
        bm3d_pass: PassConfig::disabled(),
        nlm_pass: PassConfig::disabled(),
        output_bits: Some(8),
        ..Default::default()
    };

    let mut backend = ScriptBackend::new();
    let source = backend.source("in.mkv", info);
    let out = Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();

    assert_eq!(*out.info(), info);
    let lines = backend.statements();
    assert!(lines.iter().any(|l| l.contains("blksize=16, overlap=6")));
    assert!(lines.iter().any(|l| l.contains("core.mv.Degrain3(")));
    assert!(lines.iter().any(|l| l.contains("core.rgvs.RemoveGrain(")));
    assert!(!lines.iter().any(|l| l.contains("width=")));
    assert!(!lines.iter().any(|l| l.contains("BM3D") || l.contains("KNLMeansCL")));
}

#[test]
fn test_gray_source_with_chroma_enabled() {
    let info = ClipInfo::new(64, 48, VideoFormat::gray(8));
    let params = DenoiseParameters { chroma: true, ..Default::default() };

    let mut raster = RasterBackend::new();
    let frame = RasterBackend::frame_from_fn(info, |_, r, c| (40 + (r * 5 + c * 3) % 120) as f32);
    let out = Denoiser::new(params.clone()).unwrap().process(&mut raster, &frame).unwrap();
    assert_eq!(*out.info(), info);

    let mut script = ScriptBackend::new();
    let source = script.source("gray.mkv", info);
    Denoiser::new(params).unwrap().process(&mut script, &source).unwrap();
    let lines = script.statements();
    assert!(!lines.iter().any(|l| l.contains("channels=\"UV\"") || l.contains("vs.RGBS")));
    assert!(!lines.iter().any(|l| l.contains("colorfamily=vs.YUV")));
}

#[test]
fn test_depth_keeps_flat_frame() {
    let info = ClipInfo::new(16, 16, VideoFormat::yuv(8, Sampling::S420));
    let frame = RasterBackend::flat(info, &[120.0, 128.0, 128.0]);
    let base = DenoiseParameters { nlm_pass: PassConfig::new(2), ..passthrough() };

    let mut backend = RasterBackend::new();
    let plain = Denoiser::new(base.clone()).unwrap().process(&mut backend, &frame).unwrap();
    let deep = Denoiser::new(DenoiseParameters { depth: 5, ..base }).unwrap().process(&mut backend, &frame).unwrap();

    assert_eq!(plane_mean(&deep, 0), plane_mean(&plain, 0));
    assert_eq!(max_abs_diff(&deep, &plain), 0.0);
}

#[test]
fn test_namespaces_follow_precision_and_device() {
    let info = ClipInfo::new(1280, 720, VideoFormat::yuv(10, Sampling::S420));
    let params = DenoiseParameters {
        motion_pass: PassConfig::new(4),
        gpu_device: -1,
        ..Default::default()
    };

    let mut backend = ScriptBackend::new();
    let source = backend.source("in.mkv", info);
    Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();

    let lines = backend.statements();
    assert!(lines.iter().any(|l| l.contains("core.mvsf.Degrain4(")));
    assert!(lines.iter().any(|l| l.contains("core.rgsf.RemoveGrain(")));
    assert!(lines.iter().any(|l| l.contains("core.bm3dcpu.BM3D(")));
    assert!(lines.iter().any(|l| l.contains("device_type=\"cpu\"")));
    assert!(lines.iter().any(|l| l.contains("core.rgvs.Repair(")));
}

#[test]
fn test_job_file_to_script() {
    let json = r#"{
        "id": "0b5c3c52-8a5e-4d0e-9a39-1f2f0c7d6e11",
        "inputPath": "/videos/tape.mkv",
        "outputPath": "/videos/tape_clean.mp4",
        "source": {
            "width": 720,
            "height": 576,
            "format": { "colorFamily": "yuv", "sampleType": "integer", "bitsPerSample": 8, "subsamplingW": 1, "subsamplingH": 1 },
            "tags": { "range": "limited", "matrix": 5, "chromaLocation": 0 }
        },
        "denoise": { "deband": true, "depth": 2, "outputBits": 10 }
    }"#;
    let job: VideoJob = serde_json::from_str(json).unwrap();
    assert_eq!(job.denoise.motion_pass, PassConfig::downscaled(1, 0.6));
    assert_eq!(job.denoise.output_bits, Some(10));

    let dir = tempfile::tempdir().unwrap();
    let path = ScriptGenerator::new().generate_into(&job, dir.path()).unwrap();
    assert_eq!(path.file_name().unwrap().to_string_lossy(), format!("{}.vpy", job.id));

    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("core.ffms2.Source(source=\"/videos/tape.mkv\")"));
    assert!(script.contains("_Matrix=5"));
    assert!(script.contains("core.warp.AWarpSharp2("));
    assert!(script.contains("core.f3kdb.Deband("));
    assert!(script.contains("bits=10"));
}

#[test]
fn test_legacy_pass_encoding() {
    let params = DenoiseParameters {
        motion_pass: PassConfig::from_legacy_mode(2.65),
        ..Default::default()
    };
    assert_eq!(params.motion_pass, PassConfig::downscaled(2, 0.65));
    assert!(Denoiser::new(params).is_ok());
}

/// `name = core...` bindings of a script, keyed by node name.
fn bindings(lines: &[String]) -> std::collections::HashMap<String, String> {
    lines
        .iter()
        .filter_map(|l| l.split_once(" = core."))
        .map(|(name, call)| (name.to_string(), call.to_string()))
        .collect()
}

fn is_node(token: &str) -> bool {
    token == "src" || (token.len() > 1 && token.starts_with('n') && token[1..].chars().all(|c| c.is_ascii_digit()))
}

/// Whether `node` is `ancestor` or is computed from it.
fn derives_from(nodes: &std::collections::HashMap<String, String>, node: &str, ancestor: &str) -> bool {
    if node == ancestor {
        return true;
    }
    let Some(call) = nodes.get(node) else { return false };
    call.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| is_node(t) && *t != node)
        .any(|t| derives_from(nodes, t, ancestor))
}

fn first_arg(call: &str) -> &str {
    let args = &call[call.find('(').map_or(0, |i| i + 1)..];
    args.split([',', ')']).next().unwrap_or("").trim()
}

fn keyword<'a>(call: &'a str, key: &str) -> Option<&'a str> {
    let start = call.find(&format!("{}=", key))? + key.len() + 1;
    call[start..].split([',', ')']).next().map(str::trim)
}

#[test]
fn test_each_pass_references_the_previous_stage() {
    let mut backend = ScriptBackend::new();
    let info = ClipInfo::new(720, 480, VideoFormat::yuv(8, Sampling::S420));
    let source = backend.source("in.mkv", info);
    let params = DenoiseParameters {
        motion_pass: PassConfig::new(2),
        bm3d_pass: PassConfig::new(2),
        nlm_pass: PassConfig::new(2),
        ..passthrough()
    };
    Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();

    let nodes = bindings(backend.statements());
    let node_of = |needle: &str| -> Vec<String> {
        nodes.iter().filter(|(_, call)| call.contains(needle)).map(|(name, _)| name.clone()).collect()
    };
    let degrain = node_of("Degrain");
    let bm3d = node_of(".BM3D(");
    let knlm = node_of("KNLMeansCL(");
    assert_eq!(degrain.len(), 1);
    assert_eq!(bm3d.len(), 1);
    assert!(!knlm.is_empty());

    let bm3d_call = &nodes[&bm3d[0]];
    let bm3d_ref = keyword(bm3d_call, "ref").expect("bm3d has a reference clip");
    assert!(derives_from(&nodes, bm3d_ref, &degrain[0]));
    assert!(!derives_from(&nodes, first_arg(bm3d_call), &degrain[0]));

    for name in &knlm {
        let call = &nodes[name];
        let rclip = keyword(call, "rclip").expect("knlm has a reference clip");
        assert!(derives_from(&nodes, rclip, &bm3d[0]));
        assert!(!derives_from(&nodes, first_arg(call), &bm3d[0]));
    }
}

#[test]
fn test_downscaled_motion_pass_returns_source_size() {
    let info = ClipInfo::new(64, 48, VideoFormat::yuv(8, Sampling::S420));
    let source = RasterBackend::flat(info, &[90.0, 120.0, 135.0]);
    let params = DenoiseParameters { motion_pass: PassConfig::downscaled(2, 0.5), ..passthrough() };

    let mut backend = RasterBackend::new();
    let out = Denoiser::new(params).unwrap().process(&mut backend, &source).unwrap();

    assert_eq!((out.width(), out.height()), (64, 48));
    assert_eq!(out.format(), source.format());
    assert!(max_abs_diff(&out, &source) <= 1.0);
}
