//! VapourSynth script backend.
//!
//! Each transform appends one `nN = core....` statement and hands back the
//! node name as the frame handle. [`ScriptBackend::finish`] wraps the
//! statements into a complete `.vpy` script.

use crate::error::TransformFailure;
use crate::models::{ClipInfo, Device, DitherMode, Sampling};

use super::{
    ensure_compatible, ensure_mask, AnalysisStep, Backend, Bm3dParams, ConvolutionMode, DebandParams, Engine,
    ExprOp, Frame, Levels, MotionPlan, NlmChannels, NlmParams, Planes, Resample, SuperParams, TransformResult,
    WarpParams,
};

/// Node name of the loaded source clip.
pub const SOURCE_NODE: &str = "src";

/// Accumulates VapourSynth statements.
#[derive(Debug, Default)]
pub struct ScriptBackend {
    lines: Vec<String>,
    next_node: usize,
    transforms: usize,
}

impl ScriptBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` with ffms2, refuse clips that differ from `info`, and tag it
    /// with the declared range and chroma location. Matrix, transfer and
    /// primaries are tagged with the same effective values later conversions pass.
    pub fn source(&mut self, path: &str, info: ClipInfo) -> Frame<String> {
        let format = info.format.vs_name();
        self.lines.push(format!("{} = core.ffms2.Source(source={})", SOURCE_NODE, py_str(path)));
        self.lines.push(format!(
            "if {src}.format.id != {fmt} or {src}.width != {w} or {src}.height != {h}:",
            src = SOURCE_NODE,
            fmt = format,
            w = info.width,
            h = info.height
        ));
        self.lines.push(format!(
            "    raise vs.Error(f\"source is {{{src}.format.name}} {{{src}.width}}x{{{src}.height}}, expected {fmt_name} {w}x{h}\")",
            src = SOURCE_NODE,
            fmt_name = format.trim_start_matches("vs."),
            w = info.width,
            h = info.height
        ));
        self.lines.push(format!(
            "{src} = core.std.SetFrameProps({src}, _ColorRange={}, _Matrix={}, _Transfer={}, _Primaries={}, _ChromaLocation={})",
            info.tags.range.prop_value(),
            info.tags.effective_matrix(),
            info.tags.effective_transfer(),
            info.tags.effective_primaries(),
            info.tags.chroma_location,
            src = SOURCE_NODE
        ));
        self.lines.push(format!(
            "print(f\"INPUT_INFO:frames={{{src}.num_frames}},fps_num={{{src}.fps.numerator}},fps_den={{{src}.fps.denominator}}\", file=sys.stderr)",
            src = SOURCE_NODE
        ));
        Frame::new(SOURCE_NODE.to_string(), info)
    }

    /// Number of transform statements emitted so far.
    pub fn transform_count(&self) -> usize {
        self.transforms
    }

    /// Statements emitted so far, without the script header.
    pub fn statements(&self) -> &[String] {
        &self.lines
    }

    /// Render the complete script with `output` as the output node.
    pub fn finish(&self, output: &Frame<String>) -> String {
        let mut script = String::from("import vapoursynth as vs\nimport sys\n\ncore = vs.core\n\n");
        for line in &self.lines {
            script.push_str(line);
            script.push('\n');
        }
        script.push('\n');
        script.push_str(&format!("{}.set_output()\n", output.handle()));
        script
    }

    fn node(&mut self) -> String {
        let name = format!("n{}", self.next_node);
        self.next_node += 1;
        name
    }

    /// Append `name = call` without counting it as a transform.
    fn bind(&mut self, call: String) -> String {
        let name = self.node();
        self.lines.push(format!("{} = {}", name, call));
        name
    }

    fn emit(&mut self, info: ClipInfo, call: String) -> TransformResult<String> {
        self.transforms += 1;
        let name = self.bind(call);
        Ok(Frame::new(name, info))
    }

    fn super_clip(&mut self, namespace: &str, clip: &str, params: &SuperParams) -> String {
        let mut args = vec![
            clip.to_string(),
            format!("hpad={}", params.pad),
            format!("vpad={}", params.pad),
            format!("pel={}", params.pel),
            format!("rfilter={}", params.rfilter),
        ];
        if let Some(sharp) = params.sharp {
            args.push(format!("sharp={}", sharp));
        }
        if let Some(levels) = params.levels {
            args.push(format!("levels={}", levels));
        }
        self.bind(format!("core.{}.Super({})", namespace, args.join(", ")))
    }

    fn vectors(&mut self, plan: &MotionPlan, super_clip: &str, step: &AnalysisStep) -> String {
        let ns = plan.engine.namespace;
        let shared = format!(
            "blksize={}, overlap={}, search={}, truemotion={}",
            plan.block_size,
            plan.overlap,
            plan.search,
            py_bool(plan.truemotion)
        );
        let mut tuning = String::new();
        if let Some(bad_sad) = step.bad_sad {
            tuning.push_str(&format!(", badsad={}", bad_sad));
        }
        if let Some(lsad) = step.lsad {
            tuning.push_str(&format!(", lsad={}", lsad));
        }
        if let Some(bad_range) = step.bad_range {
            tuning.push_str(&format!(", badrange={}", bad_range));
        }
        let analysis = self.bind(format!(
            "core.{ns}.Analyse({sup}, isb={}, delta={}{tuning}, {shared})",
            py_bool(step.backward),
            step.delta,
            ns = ns,
            sup = super_clip,
            tuning = tuning,
            shared = shared
        ));
        self.bind(format!(
            "core.{ns}.Recalculate({sup}, {analysis}, {shared}, thsad={}, lambda_={})",
            plan.recalculate_thsad,
            plan.lambda,
            ns = ns,
            sup = super_clip,
            analysis = analysis,
            shared = shared
        ))
    }
}

/// Python float literal.
pub fn py_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn py_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn py_planes(planes: Planes, clip: &ClipInfo) -> String {
    let indices: Vec<String> = planes.indices(&clip.format).iter().map(|p| p.to_string()).collect();
    format!("[{}]", indices.join(", "))
}

/// Reverse-polish form of an expression.
pub fn render_expr(op: &ExprOp) -> String {
    match *op {
        ExprOp::Min => "x y min".to_string(),
        ExprOp::Max => "x y max".to_string(),
        ExprOp::RenoiseBand { low, high, origin, end, peak } => format!(
            "x {a} < 0 x {b} > {p} 0 x {c} - {p} {a} {d} - / * - ? ?",
            a = py_float(low),
            b = py_float(high),
            c = py_float(origin),
            d = py_float(end),
            p = py_float(peak)
        ),
        ExprOp::Contrast { cont, bright, pivot, min, max } => format!(
            "x {pivot} - {cont} * {bright} + {pivot} + {min} max {max} min",
            pivot = py_float(pivot),
            cont = py_float(cont),
            bright = py_float(bright),
            min = py_float(min),
            max = py_float(max)
        ),
    }
}

fn device_args(device: Device) -> String {
    match device {
        Device::Gpu(id) => format!("device_type=\"auto\", device_id={}", id),
        Device::Cpu => "device_type=\"cpu\", device_id=0".to_string(),
    }
}

impl Backend for ScriptBackend {
    type Handle = String;

    fn bit_depth(&mut self, clip: &Frame<String>, bits: u8, dither: DitherMode) -> TransformResult<String> {
        let info = clip.info().with_format(clip.format().with_bits(bits));
        self.emit(info, format!("core.fmtc.bitdepth({}, bits={}, dmode={})", clip.handle(), bits, dither.0))
    }

    fn resample(&mut self, clip: &Frame<String>, params: &Resample) -> TransformResult<String> {
        let mut args = vec![clip.handle().clone()];
        if (params.width, params.height) != (clip.width(), clip.height()) {
            args.push(format!("width={}", params.width));
            args.push(format!("height={}", params.height));
        }
        if params.format != clip.format() {
            args.push(format!("format={}", params.format.vs_name()));
        }
        if let Some(matrix) = params.matrix_in {
            args.push(format!("matrix_in={}", matrix));
        }
        if let Some(tags) = params.tags {
            args.push(format!("matrix={}", tags.effective_matrix()));
            args.push(format!("transfer={}", tags.effective_transfer()));
            args.push(format!("primaries={}", tags.effective_primaries()));
            args.push(format!("chromaloc={}", tags.chroma_location));
            args.push(format!("range={}", tags.range.resize_arg()));
        }
        if params.ordered_dither {
            args.push("dither_type=\"ordered\"".to_string());
        }
        let info = params.output_info(clip.info());
        self.emit(info, format!("core.resize.Bicubic({})", args.join(", ")))
    }

    fn resample_chroma(&mut self, clip: &Frame<String>, sampling: Sampling) -> TransformResult<String> {
        if clip.format().is_gray() {
            return Err(TransformFailure::new("fmtc.resample", "gray clips have no chroma to resample"));
        }
        let mut format = clip.format().with_sampling(sampling);
        if !format.is_float() && format.bits_per_sample < 16 {
            format = format.with_bits(16);
        }
        self.emit(
            clip.info().with_format(format),
            format!("core.fmtc.resample({}, kernel=\"bicubic\", css=\"{}\")", clip.handle(), sampling.css()),
        )
    }

    fn extract_luma(&mut self, clip: &Frame<String>) -> TransformResult<String> {
        let info = clip.info().with_format(clip.format().luma());
        self.emit(info, format!("core.std.ShufflePlanes({}, planes=0, colorfamily=vs.GRAY)", clip.handle()))
    }

    fn join_planes(&mut self, luma: &Frame<String>, chroma: &Frame<String>) -> TransformResult<String> {
        if luma.format().luma() != chroma.format().luma() || chroma.format().is_gray() {
            return Err(TransformFailure::new(
                "std.ShufflePlanes",
                format!("cannot join {} luma with {} chroma", luma.format().vs_name(), chroma.format().vs_name()),
            ));
        }
        self.emit(
            *chroma.info(),
            format!(
                "core.std.ShufflePlanes([{}, {}], planes=[0, 1, 2], colorfamily=vs.YUV)",
                luma.handle(),
                chroma.handle()
            ),
        )
    }

    fn merge(&mut self, a: &Frame<String>, b: &Frame<String>, weight: f64) -> TransformResult<String> {
        ensure_compatible("std.Merge", a, b)?;
        self.emit(*a.info(), format!("core.std.Merge({}, {}, weight={})", a.handle(), b.handle(), py_float(weight)))
    }

    fn masked_merge(&mut self, a: &Frame<String>, b: &Frame<String>, mask: &Frame<String>) -> TransformResult<String> {
        ensure_compatible("std.MaskedMerge", a, b)?;
        ensure_mask("std.MaskedMerge", a, mask)?;
        let first_plane = if mask.format().is_gray() && !a.format().is_gray() { ", first_plane=True" } else { "" };
        self.emit(
            *a.info(),
            format!("core.std.MaskedMerge({}, {}, {}{})", a.handle(), b.handle(), mask.handle(), first_plane),
        )
    }

    fn make_diff(&mut self, a: &Frame<String>, b: &Frame<String>, planes: Planes) -> TransformResult<String> {
        ensure_compatible("std.MakeDiff", a, b)?;
        let planes = py_planes(planes, a.info());
        self.emit(*a.info(), format!("core.std.MakeDiff({}, {}, planes={})", a.handle(), b.handle(), planes))
    }

    fn merge_diff(&mut self, a: &Frame<String>, diff: &Frame<String>, planes: Planes) -> TransformResult<String> {
        ensure_compatible("std.MergeDiff", a, diff)?;
        let planes = py_planes(planes, a.info());
        self.emit(*a.info(), format!("core.std.MergeDiff({}, {}, planes={})", a.handle(), diff.handle(), planes))
    }

    fn maximum(&mut self, clip: &Frame<String>) -> TransformResult<String> {
        self.emit(*clip.info(), format!("core.std.Maximum({})", clip.handle()))
    }

    fn levels(&mut self, clip: &Frame<String>, levels: &Levels) -> TransformResult<String> {
        self.emit(
            *clip.info(),
            format!(
                "core.std.Levels({}, min_in={}, max_in={}, gamma={}, min_out={}, max_out={})",
                clip.handle(),
                py_float(levels.min_in),
                py_float(levels.max_in),
                py_float(levels.gamma),
                py_float(levels.min_out),
                py_float(levels.max_out)
            ),
        )
    }

    fn invert(&mut self, clip: &Frame<String>) -> TransformResult<String> {
        self.emit(*clip.info(), format!("core.std.Invert({})", clip.handle()))
    }

    fn binarize(&mut self, clip: &Frame<String>) -> TransformResult<String> {
        self.emit(*clip.info(), format!("core.std.Binarize({})", clip.handle()))
    }

    fn sobel(&mut self, clip: &Frame<String>) -> TransformResult<String> {
        self.emit(*clip.info(), format!("core.std.Sobel({})", clip.handle()))
    }

    fn convolution(&mut self, clip: &Frame<String>, matrix: &[i32], mode: ConvolutionMode) -> TransformResult<String> {
        let expected = if mode == ConvolutionMode::Square { 9 } else { 3 };
        if matrix.len() != expected {
            return Err(TransformFailure::new(
                "std.Convolution",
                format!("expected {} coefficients, got {}", expected, matrix.len()),
            ));
        }
        let mode = match mode {
            ConvolutionMode::Square => "s",
            ConvolutionMode::Horizontal => "h",
            ConvolutionMode::Vertical => "v",
        };
        let matrix: Vec<String> = matrix.iter().map(|m| m.to_string()).collect();
        self.emit(
            *clip.info(),
            format!("core.std.Convolution({}, matrix=[{}], mode=\"{}\")", clip.handle(), matrix.join(", "), mode),
        )
    }

    fn expr(&mut self, clips: &[&Frame<String>], op: &ExprOp) -> TransformResult<String> {
        if clips.len() != op.arity() {
            return Err(TransformFailure::new(
                "std.Expr",
                format!("expression takes {} clips, got {}", op.arity(), clips.len()),
            ));
        }
        if let [a, b] = clips {
            ensure_compatible("std.Expr", *a, *b)?;
        }
        let names: Vec<&str> = clips.iter().map(|c| c.handle().as_str()).collect();
        self.emit(
            *clips[0].info(),
            format!("core.std.Expr([{}], expr=\"{}\")", names.join(", "), render_expr(op)),
        )
    }

    fn remove_grain(&mut self, engine: Engine, clip: &Frame<String>, mode: i32) -> TransformResult<String> {
        self.emit(
            *clip.info(),
            format!("core.{}.RemoveGrain({}, mode={})", engine.namespace, clip.handle(), mode),
        )
    }

    fn repair(
        &mut self,
        engine: Engine,
        clip: &Frame<String>,
        reference: &Frame<String>,
        mode: i32,
    ) -> TransformResult<String> {
        ensure_compatible("Repair", clip, reference)?;
        self.emit(
            *clip.info(),
            format!("core.{}.Repair({}, {}, mode={})", engine.namespace, clip.handle(), reference.handle(), mode),
        )
    }

    fn temporal_median(&mut self, clip: &Frame<String>, radius: u32, planes: Planes) -> TransformResult<String> {
        let planes = py_planes(planes, clip.info());
        self.emit(
            *clip.info(),
            format!("core.tmedian.TemporalMedian({}, radius={}, planes={})", clip.handle(), radius, planes),
        )
    }

    fn motion_degrain(
        &mut self,
        search: &Frame<String>,
        render: &Frame<String>,
        plan: &MotionPlan,
    ) -> TransformResult<String> {
        if (search.width(), search.height()) != (render.width(), render.height()) {
            return Err(TransformFailure::new("Degrain", "search and render clips differ in size"));
        }
        if plan.steps.is_empty() {
            return Err(TransformFailure::new("Degrain", "no analysis steps"));
        }
        let ns = plan.engine.namespace;
        let search_super = self.super_clip(ns, search.handle(), &plan.search_super);
        let render_super = self.super_clip(ns, render.handle(), &plan.render_super);

        let mut steps = plan.steps.clone();
        steps.sort_by_key(|s| (s.delta, !s.backward));
        let mut vectors = Vec::with_capacity(steps.len());
        for step in &steps {
            vectors.push(self.vectors(plan, &search_super, step));
        }

        self.emit(
            *render.info(),
            format!(
                "core.{}.Degrain{}({}, {}, {}, thsad={})",
                ns,
                plan.radius(),
                render.handle(),
                render_super,
                vectors.join(", "),
                plan.thsad
            ),
        )
    }

    fn bm3d(
        &mut self,
        clip: &Frame<String>,
        reference: Option<&Frame<String>>,
        params: &Bm3dParams,
    ) -> TransformResult<String> {
        let name = "BM3D";
        if !clip.format().is_float() {
            return Err(TransformFailure::new(name, "input must be 32-bit float"));
        }
        let reference = match reference {
            Some(r) => {
                ensure_compatible(name, clip, r)?;
                format!(", ref={}", r.handle())
            }
            None => String::new(),
        };
        let device = match params.device {
            Device::Gpu(id) => format!(", device_id={}, fast=False", id),
            Device::Cpu => String::new(),
        };
        self.emit(
            *clip.info(),
            format!(
                "core.{}.BM3D({}, sigma={}{}{}, block_step={}, bm_range={}, ps_range={})",
                params.engine.namespace,
                clip.handle(),
                py_float(params.sigma),
                reference,
                device,
                params.block_step,
                params.bm_range,
                params.ps_range
            ),
        )
    }

    fn nlm(
        &mut self,
        clip: &Frame<String>,
        reference: Option<&Frame<String>>,
        params: &NlmParams,
    ) -> TransformResult<String> {
        let name = "knlm.KNLMeansCL";
        if clip.format().is_gray() && params.channels != NlmChannels::Y {
            return Err(TransformFailure::new(name, "gray clips only have a Y channel"));
        }
        let reference = match reference {
            Some(r) => {
                ensure_compatible(name, clip, r)?;
                format!(", rclip={}", r.handle())
            }
            None => String::new(),
        };
        self.emit(
            *clip.info(),
            format!(
                "core.knlm.KNLMeansCL({}, d={}, a={}, h={}, channels=\"{}\"{}, {})",
                clip.handle(),
                params.temporal_radius,
                params.spatial_radius,
                py_float(params.strength),
                params.channels.as_str(),
                reference,
                device_args(params.device)
            ),
        )
    }

    fn warp_sharpen(&mut self, clip: &Frame<String>, params: &WarpParams) -> TransformResult<String> {
        self.emit(
            *clip.info(),
            format!(
                "core.warp.AWarpSharp2({}, thresh={}, blur={}, type={}, depth={}, chroma={})",
                clip.handle(),
                params.thresh,
                params.blur,
                params.kind,
                params.depth,
                params.chroma
            ),
        )
    }

    fn deband(&mut self, clip: &Frame<String>, params: &DebandParams) -> TransformResult<String> {
        if clip.format().is_float() {
            return Err(TransformFailure::new("f3kdb.Deband", "float input is not supported"));
        }
        self.emit(
            *clip.info(),
            format!(
                "core.f3kdb.Deband({}, range={}, preset=\"{}\", grainy={}, grainc={})",
                clip.handle(),
                params.range,
                params.preset,
                params.grain_y,
                params.grain_c
            ),
        )
    }
}
