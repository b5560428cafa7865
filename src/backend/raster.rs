//! In-memory reference backend.
//!
//! Planes are `ndarray` arrays in native sample units (integer formats hold
//! whole numbers, float formats hold normalized values). Format helpers are
//! computed exactly; the denoising engines are replaced by small spatial
//! stand-ins that leave flat areas untouched.

use std::sync::Arc;

use ndarray::{Array2, Zip};

use crate::error::TransformFailure;
use crate::models::{ClipInfo, ColorFamily, ColorRange, DitherMode, Sampling, VideoFormat};

use super::{
    ensure_compatible, ensure_mask, Backend, Bm3dParams, ConvolutionMode, DebandParams, Engine, ExprOp, Frame,
    Levels, MotionPlan, NlmChannels, NlmParams, Planes, Resample, TransformResult, WarpParams,
};

/// Sample planes of one frame, luma first.
pub type PlaneSet = Arc<Vec<Array2<f32>>>;

/// Evaluates transforms on single in-memory frames and counts them.
#[derive(Debug, Default)]
pub struct RasterBackend {
    calls: usize,
}

impl RasterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transforms evaluated so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Build a frame from `f(plane, row, col)`, rounded to the format.
    pub fn frame_from_fn(info: ClipInfo, f: impl Fn(usize, usize, usize) -> f32) -> Frame<PlaneSet> {
        let mut planes: Vec<Array2<f32>> = (0..info.format.num_planes())
            .map(|p| {
                let (w, h) = info.format.plane_size(info.width, info.height, p);
                Array2::from_shape_fn((h as usize, w as usize), |(r, c)| f(p, r, c))
            })
            .collect();
        quantize(&info.format, &mut planes);
        Frame::new(Arc::new(planes), info)
    }

    /// A frame with one constant value per plane.
    pub fn flat(info: ClipInfo, values: &[f32]) -> Frame<PlaneSet> {
        Self::frame_from_fn(info, |p, _, _| values.get(p).copied().unwrap_or(0.0))
    }

    fn produce(&mut self, info: ClipInfo, mut planes: Vec<Array2<f32>>) -> TransformResult<PlaneSet> {
        self.calls += 1;
        quantize(&info.format, &mut planes);
        Ok(Frame::new(Arc::new(planes), info))
    }

    /// Apply `f` to every plane of `clip`.
    fn per_plane(
        &mut self,
        clip: &Frame<PlaneSet>,
        f: impl Fn(usize, &Array2<f32>) -> Array2<f32>,
    ) -> TransformResult<PlaneSet> {
        let planes = clip.handle().iter().enumerate().map(|(p, plane)| f(p, plane)).collect();
        self.produce(*clip.info(), planes)
    }

    /// Combine two clips sample by sample on the selected planes; others come from `a`.
    fn combine(
        &mut self,
        a: &Frame<PlaneSet>,
        b: &Frame<PlaneSet>,
        planes: Planes,
        f: impl Fn(usize, f32, f32) -> f32,
    ) -> TransformResult<PlaneSet> {
        let out = a
            .handle()
            .iter()
            .zip(b.handle().iter())
            .enumerate()
            .map(|(p, (x, y))| {
                if planes.contains(p) {
                    Zip::from(x).and(y).map_collect(|&x, &y| f(p, x, y))
                } else {
                    x.clone()
                }
            })
            .collect();
        self.produce(*a.info(), out)
    }
}

/// One plane of a frame.
pub fn plane(frame: &Frame<PlaneSet>, index: usize) -> &Array2<f32> {
    &frame.handle()[index]
}

/// Average sample value of one plane.
pub fn plane_mean(frame: &Frame<PlaneSet>, index: usize) -> f64 {
    let plane = plane(frame, index);
    plane.iter().map(|&v| v as f64).sum::<f64>() / plane.len().max(1) as f64
}

/// Largest absolute sample difference over all planes.
pub fn max_abs_diff(a: &Frame<PlaneSet>, b: &Frame<PlaneSet>) -> f32 {
    a.handle()
        .iter()
        .zip(b.handle().iter())
        .flat_map(|(x, y)| x.iter().zip(y.iter()).map(|(x, y)| (x - y).abs()))
        .fold(0.0, f32::max)
}

fn quantize(format: &VideoFormat, planes: &mut [Array2<f32>]) {
    if format.is_float() {
        return;
    }
    let peak = format.peak() as f32;
    for plane in planes {
        plane.mapv_inplace(|v| v.round().clamp(0.0, peak));
    }
}

fn is_chroma(format: &VideoFormat, plane: usize) -> bool {
    plane > 0 && format.color_family == ColorFamily::Yuv
}

/// `(offset, scale)` with `normalized = (native - offset) / scale`.
fn plane_scale(format: &VideoFormat, range: ColorRange, plane: usize) -> (f32, f32) {
    if format.is_float() {
        return (0.0, 1.0);
    }
    let chroma = is_chroma(format, plane);
    if format.color_family == ColorFamily::Rgb || range.is_full() {
        let peak = format.peak() as f32;
        if chroma {
            (format.neutral() as f32, peak)
        } else {
            (0.0, peak)
        }
    } else {
        let s = format.scale_8bit() as f32;
        if chroma {
            (128.0 * s, 224.0 * s)
        } else {
            (16.0 * s, 219.0 * s)
        }
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Evaluate `f` over the clamped 3x3 window around every sample.
fn neighborhood(plane: &Array2<f32>, f: impl Fn(&[f32; 9]) -> f32) -> Array2<f32> {
    let (rows, cols) = plane.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut window = [0.0f32; 9];
        for (i, slot) in window.iter_mut().enumerate() {
            let rr = clamp_index(r as isize + i as isize / 3 - 1, rows);
            let cc = clamp_index(c as isize + i as isize % 3 - 1, cols);
            *slot = plane[[rr, cc]];
        }
        f(&window)
    })
}

fn mean3x3(plane: &Array2<f32>) -> Array2<f32> {
    neighborhood(plane, |w| w.iter().sum::<f32>() / 9.0)
}

/// Bilinear resize with centered sample positions.
fn resize_plane(plane: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (rows, cols) = plane.dim();
    if (rows, cols) == (height, width) {
        return plane.clone();
    }
    let sy = rows as f32 / height as f32;
    let sx = cols as f32 / width as f32;
    Array2::from_shape_fn((height, width), |(r, c)| {
        let y = ((r as f32 + 0.5) * sy - 0.5).clamp(0.0, (rows - 1) as f32);
        let x = ((c as f32 + 0.5) * sx - 0.5).clamp(0.0, (cols - 1) as f32);
        let (y0, x0) = (y.floor() as usize, x.floor() as usize);
        let (y1, x1) = ((y0 + 1).min(rows - 1), (x0 + 1).min(cols - 1));
        let (fy, fx) = (y - y0 as f32, x - x0 as f32);
        let top = plane[[y0, x0]] * (1.0 - fx) + plane[[y0, x1]] * fx;
        let bottom = plane[[y1, x0]] * (1.0 - fx) + plane[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// Luma and blue-difference weights of a matrix coefficient set.
fn matrix_weights(matrix: u8) -> (f32, f32) {
    match matrix {
        5 | 6 => (0.299, 0.114),
        7 => (0.212, 0.087),
        9 | 10 => (0.2627, 0.0593),
        _ => (0.2126, 0.0722),
    }
}

fn yuv_to_rgb(planes: &[Array2<f32>], matrix: u8) -> Vec<Array2<f32>> {
    let (kr, kb) = matrix_weights(matrix);
    let kg = 1.0 - kr - kb;
    let r = Zip::from(&planes[0]).and(&planes[2]).map_collect(|&y, &v| y + 2.0 * (1.0 - kr) * v);
    let b = Zip::from(&planes[0]).and(&planes[1]).map_collect(|&y, &u| y + 2.0 * (1.0 - kb) * u);
    let g = Zip::from(&planes[0]).and(&r).and(&b).map_collect(|&y, &r, &b| (y - kr * r - kb * b) / kg);
    vec![r, g, b]
}

fn rgb_to_yuv(planes: &[Array2<f32>], matrix: u8) -> Vec<Array2<f32>> {
    let (kr, kb) = matrix_weights(matrix);
    let kg = 1.0 - kr - kb;
    let y = Zip::from(&planes[0])
        .and(&planes[1])
        .and(&planes[2])
        .map_collect(|&r, &g, &b| kr * r + kg * g + kb * b);
    let u = Zip::from(&planes[2]).and(&y).map_collect(|&b, &y| (b - y) / (2.0 * (1.0 - kb)));
    let v = Zip::from(&planes[0]).and(&y).map_collect(|&r, &y| (r - y) / (2.0 * (1.0 - kr)));
    vec![y, u, v]
}

/// Convert `input` to `out`, going through normalized float.
fn convert(input: &Frame<PlaneSet>, out: &ClipInfo, matrix_in: Option<u8>) -> Vec<Array2<f32>> {
    let in_format = input.format();
    let in_range = input.tags().range;
    let mut planes: Vec<Array2<f32>> = input
        .handle()
        .iter()
        .enumerate()
        .map(|(p, plane)| {
            let (offset, scale) = plane_scale(&in_format, in_range, p);
            plane.mapv(|v| (v - offset) / scale)
        })
        .collect();

    let same_layout = in_format.color_family == out.format.color_family
        && in_format.sampling() == out.format.sampling()
        && (input.width(), input.height()) == (out.width, out.height);

    if !same_layout {
        let (w, h) = (out.width as usize, out.height as usize);
        planes = planes.iter().map(|p| resize_plane(p, w, h)).collect();
        planes = match (in_format.color_family, out.format.color_family) {
            (ColorFamily::Yuv, ColorFamily::Rgb) => {
                yuv_to_rgb(&planes, matrix_in.unwrap_or_else(|| input.tags().effective_matrix()))
            }
            (ColorFamily::Rgb, ColorFamily::Yuv) => rgb_to_yuv(&planes, out.tags.effective_matrix()),
            (ColorFamily::Rgb, ColorFamily::Gray) => {
                rgb_to_yuv(&planes, out.tags.effective_matrix()).into_iter().take(1).collect()
            }
            (_, ColorFamily::Gray) => planes.into_iter().take(1).collect(),
            (ColorFamily::Gray, _) => {
                let zero = Array2::zeros((h, w));
                vec![planes[0].clone(), zero.clone(), zero]
            }
            _ => planes,
        };
        planes = planes
            .iter()
            .enumerate()
            .map(|(p, plane)| {
                let (pw, ph) = out.format.plane_size(out.width, out.height, p);
                resize_plane(plane, pw as usize, ph as usize)
            })
            .collect();
    }

    planes
        .iter()
        .enumerate()
        .map(|(p, plane)| {
            let (offset, scale) = plane_scale(&out.format, out.tags.range, p);
            plane.mapv(|v| v * scale + offset)
        })
        .collect()
}

impl Backend for RasterBackend {
    type Handle = PlaneSet;

    fn bit_depth(&mut self, clip: &Frame<PlaneSet>, bits: u8, _dither: DitherMode) -> TransformResult<PlaneSet> {
        let info = clip.info().with_format(clip.format().with_bits(bits));
        let planes = convert(clip, &info, None);
        self.produce(info, planes)
    }

    fn resample(&mut self, clip: &Frame<PlaneSet>, params: &Resample) -> TransformResult<PlaneSet> {
        if params.width == 0 || params.height == 0 {
            return Err(TransformFailure::new("resize.Bicubic", "output size must be positive"));
        }
        let info = params.output_info(clip.info());
        let planes = convert(clip, &info, params.matrix_in);
        self.produce(info, planes)
    }

    fn resample_chroma(&mut self, clip: &Frame<PlaneSet>, sampling: Sampling) -> TransformResult<PlaneSet> {
        if clip.format().is_gray() {
            return Err(TransformFailure::new("fmtc.resample", "gray clips have no chroma to resample"));
        }
        let mut format = clip.format().with_sampling(sampling);
        if !format.is_float() && format.bits_per_sample < 16 {
            format = format.with_bits(16);
        }
        let info = clip.info().with_format(format);
        let planes = convert(clip, &info, None);
        self.produce(info, planes)
    }

    fn extract_luma(&mut self, clip: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        let info = clip.info().with_format(clip.format().luma());
        self.produce(info, vec![clip.handle()[0].clone()])
    }

    fn join_planes(&mut self, luma: &Frame<PlaneSet>, chroma: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        if luma.format().luma() != chroma.format().luma() || chroma.format().is_gray() {
            return Err(TransformFailure::new(
                "std.ShufflePlanes",
                format!("cannot join {} luma with {} chroma", luma.format().vs_name(), chroma.format().vs_name()),
            ));
        }
        let planes = vec![luma.handle()[0].clone(), chroma.handle()[1].clone(), chroma.handle()[2].clone()];
        self.produce(*chroma.info(), planes)
    }

    fn merge(&mut self, a: &Frame<PlaneSet>, b: &Frame<PlaneSet>, weight: f64) -> TransformResult<PlaneSet> {
        ensure_compatible("std.Merge", a, b)?;
        let w = weight as f32;
        self.combine(a, b, Planes::All, |_, x, y| x * (1.0 - w) + y * w)
    }

    fn masked_merge(&mut self, a: &Frame<PlaneSet>, b: &Frame<PlaneSet>, mask: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        ensure_compatible("std.MaskedMerge", a, b)?;
        ensure_mask("std.MaskedMerge", a, mask)?;
        let format = a.format();
        let to_weight = |m: f32| if format.is_float() { m.clamp(0.0, 1.0) } else { m / format.peak() as f32 };
        let planes = (0..format.num_planes())
            .map(|p| {
                let (x, y) = (&a.handle()[p], &b.handle()[p]);
                let (rows, cols) = x.dim();
                let m = if mask.format().is_gray() && !format.is_gray() {
                    resize_plane(&mask.handle()[0], cols, rows)
                } else {
                    mask.handle()[p].clone()
                };
                Zip::from(x).and(y).and(&m).map_collect(|&x, &y, &m| x + (y - x) * to_weight(m))
            })
            .collect();
        self.produce(*a.info(), planes)
    }

    fn make_diff(&mut self, a: &Frame<PlaneSet>, b: &Frame<PlaneSet>, planes: Planes) -> TransformResult<PlaneSet> {
        ensure_compatible("std.MakeDiff", a, b)?;
        let neutral = a.format().neutral() as f32;
        self.combine(a, b, planes, |_, x, y| x - y + neutral)
    }

    fn merge_diff(&mut self, a: &Frame<PlaneSet>, diff: &Frame<PlaneSet>, planes: Planes) -> TransformResult<PlaneSet> {
        ensure_compatible("std.MergeDiff", a, diff)?;
        let neutral = a.format().neutral() as f32;
        self.combine(a, diff, planes, |_, x, d| x + d - neutral)
    }

    fn maximum(&mut self, clip: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        self.per_plane(clip, |_, p| neighborhood(p, |w| w.iter().copied().fold(f32::MIN, f32::max)))
    }

    fn levels(&mut self, clip: &Frame<PlaneSet>, levels: &Levels) -> TransformResult<PlaneSet> {
        if levels.max_in <= levels.min_in || levels.gamma <= 0.0 {
            return Err(TransformFailure::new("std.Levels", "input range must be increasing and gamma positive"));
        }
        let l = *levels;
        self.per_plane(clip, |_, p| {
            p.mapv(|v| {
                let t = ((v as f64 - l.min_in) / (l.max_in - l.min_in)).clamp(0.0, 1.0);
                (t.powf(1.0 / l.gamma) * (l.max_out - l.min_out) + l.min_out) as f32
            })
        })
    }

    fn invert(&mut self, clip: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        let format = clip.format();
        self.per_plane(clip, |p, plane| {
            if !format.is_float() {
                let peak = format.peak() as f32;
                plane.mapv(|v| peak - v)
            } else if is_chroma(&format, p) {
                plane.mapv(|v| -v)
            } else {
                plane.mapv(|v| 1.0 - v)
            }
        })
    }

    fn binarize(&mut self, clip: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        let format = clip.format();
        let (threshold, high) = if format.is_float() {
            (0.5, 1.0)
        } else {
            (format.neutral() as f32, format.peak() as f32)
        };
        self.per_plane(clip, |_, p| p.mapv(|v| if v < threshold { 0.0 } else { high }))
    }

    fn sobel(&mut self, clip: &Frame<PlaneSet>) -> TransformResult<PlaneSet> {
        self.per_plane(clip, |_, p| {
            neighborhood(p, |w| {
                let gx = (w[2] + 2.0 * w[5] + w[8]) - (w[0] + 2.0 * w[3] + w[6]);
                let gy = (w[6] + 2.0 * w[7] + w[8]) - (w[0] + 2.0 * w[1] + w[2]);
                (gx * gx + gy * gy).sqrt()
            })
        })
    }

    fn convolution(&mut self, clip: &Frame<PlaneSet>, matrix: &[i32], mode: ConvolutionMode) -> TransformResult<PlaneSet> {
        let taps: &[usize] = match mode {
            ConvolutionMode::Square => &[0, 1, 2, 3, 4, 5, 6, 7, 8],
            ConvolutionMode::Horizontal => &[3, 4, 5],
            ConvolutionMode::Vertical => &[1, 4, 7],
        };
        if matrix.len() != taps.len() {
            return Err(TransformFailure::new(
                "std.Convolution",
                format!("expected {} coefficients, got {}", taps.len(), matrix.len()),
            ));
        }
        let sum: i32 = matrix.iter().sum();
        let divisor = if sum == 0 { 1.0 } else { sum as f32 };
        let weights: Vec<(usize, f32)> = taps.iter().copied().zip(matrix.iter().map(|&m| m as f32)).collect();
        self.per_plane(clip, |_, p| {
            neighborhood(p, |w| weights.iter().map(|&(i, k)| w[i] * k).sum::<f32>() / divisor)
        })
    }

    fn expr(&mut self, clips: &[&Frame<PlaneSet>], op: &ExprOp) -> TransformResult<PlaneSet> {
        match clips {
            [x] if op.arity() == 1 => {
                let op = *op;
                self.per_plane(*x, |_, p| p.mapv(|v| op.eval(v as f64, 0.0) as f32))
            }
            [x, y] if op.arity() == 2 => {
                ensure_compatible("std.Expr", *x, *y)?;
                let op = *op;
                self.combine(*x, *y, Planes::All, |_, a, b| op.eval(a as f64, b as f64) as f32)
            }
            _ => Err(TransformFailure::new(
                "std.Expr",
                format!("expression takes {} clips, got {}", op.arity(), clips.len()),
            )),
        }
    }

    fn remove_grain(&mut self, _engine: Engine, clip: &Frame<PlaneSet>, mode: i32) -> TransformResult<PlaneSet> {
        if mode == 0 {
            return self.per_plane(clip, |_, p| p.clone());
        }
        self.per_plane(clip, |_, p| {
            neighborhood(p, |w| {
                let (lo, hi) = w
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != 4)
                    .fold((f32::MAX, f32::MIN), |(lo, hi), (_, &v)| (lo.min(v), hi.max(v)));
                w[4].clamp(lo, hi)
            })
        })
    }

    fn repair(
        &mut self,
        _engine: Engine,
        clip: &Frame<PlaneSet>,
        reference: &Frame<PlaneSet>,
        mode: i32,
    ) -> TransformResult<PlaneSet> {
        ensure_compatible("Repair", clip, reference)?;
        let planes = clip
            .handle()
            .iter()
            .zip(reference.handle().iter())
            .map(|(x, r)| {
                if mode == 0 {
                    return x.clone();
                }
                let lo = neighborhood(r, |w| w.iter().copied().fold(f32::MAX, f32::min));
                let hi = neighborhood(r, |w| w.iter().copied().fold(f32::MIN, f32::max));
                Zip::from(x).and(&lo).and(&hi).map_collect(|&v, &lo, &hi| v.clamp(lo, hi))
            })
            .collect();
        self.produce(*clip.info(), planes)
    }

    fn temporal_median(&mut self, clip: &Frame<PlaneSet>, _radius: u32, _planes: Planes) -> TransformResult<PlaneSet> {
        self.per_plane(clip, |_, p| p.clone())
    }

    fn motion_degrain(
        &mut self,
        search: &Frame<PlaneSet>,
        render: &Frame<PlaneSet>,
        plan: &MotionPlan,
    ) -> TransformResult<PlaneSet> {
        if (search.width(), search.height()) != (render.width(), render.height()) {
            return Err(TransformFailure::new("Degrain", "search and render clips differ in size"));
        }
        if plan.steps.is_empty() {
            return Err(TransformFailure::new("Degrain", "no analysis steps"));
        }
        self.per_plane(render, |_, p| mean3x3(p))
    }

    fn bm3d(
        &mut self,
        clip: &Frame<PlaneSet>,
        reference: Option<&Frame<PlaneSet>>,
        _params: &Bm3dParams,
    ) -> TransformResult<PlaneSet> {
        if !clip.format().is_float() {
            return Err(TransformFailure::new("BM3D", "input must be 32-bit float"));
        }
        if let Some(r) = reference {
            ensure_compatible("BM3D", clip, r)?;
        }
        self.per_plane(clip, |_, p| mean3x3(p))
    }

    fn nlm(
        &mut self,
        clip: &Frame<PlaneSet>,
        reference: Option<&Frame<PlaneSet>>,
        params: &NlmParams,
    ) -> TransformResult<PlaneSet> {
        if clip.format().is_gray() && params.channels != NlmChannels::Y {
            return Err(TransformFailure::new("knlm.KNLMeansCL", "gray clips only have a Y channel"));
        }
        if let Some(r) = reference {
            ensure_compatible("knlm.KNLMeansCL", clip, r)?;
        }
        let planes = params.channels.planes();
        self.per_plane(clip, |i, p| if planes.contains(i) { mean3x3(p) } else { p.clone() })
    }

    fn warp_sharpen(&mut self, clip: &Frame<PlaneSet>, params: &WarpParams) -> TransformResult<PlaneSet> {
        let amount = params.depth as f32 / 64.0;
        let passes = params.blur.max(1);
        self.per_plane(clip, |_, p| {
            let mut blurred = p.clone();
            for _ in 0..passes {
                blurred = mean3x3(&blurred);
            }
            Zip::from(p).and(&blurred).map_collect(|&v, &b| v + (v - b) * amount)
        })
    }

    fn deband(&mut self, clip: &Frame<PlaneSet>, _params: &DebandParams) -> TransformResult<PlaneSet> {
        if clip.format().is_float() {
            return Err(TransformFailure::new("f3kdb.Deband", "float input is not supported"));
        }
        self.per_plane(clip, |_, p| p.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Precision, TransformKind};
    use crate::models::ColorTags;

    fn gray8(width: u32, height: u32) -> ClipInfo {
        ClipInfo::new(width, height, VideoFormat::gray(8))
    }

    #[test]
    fn test_merge_weight() {
        let mut backend = RasterBackend::new();
        let a = RasterBackend::flat(gray8(8, 8), &[100.0]);
        let b = RasterBackend::flat(gray8(8, 8), &[200.0]);
        let out = backend.merge(&a, &b, 0.24).unwrap();
        assert_eq!(plane(&out, 0)[[3, 3]], 124.0);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_diff_round_trip() {
        let mut backend = RasterBackend::new();
        let a = RasterBackend::frame_from_fn(gray8(8, 8), |_, r, c| (r * 16 + c) as f32);
        let b = RasterBackend::flat(gray8(8, 8), &[40.0]);
        let diff = backend.make_diff(&a, &b, Planes::All).unwrap();
        let back = backend.merge_diff(&b, &diff, Planes::All).unwrap();
        assert_eq!(max_abs_diff(&a, &back), 0.0);
    }

    #[test]
    fn test_levels_floor() {
        let mut backend = RasterBackend::new();
        let a = RasterBackend::flat(gray8(4, 4), &[0.0]);
        let levels = Levels { min_in: 50.0, max_in: 255.0, gamma: 0.85, min_out: 0.0, max_out: 205.0 };
        let out = backend.levels(&a, &levels).unwrap();
        assert_eq!(plane(&out, 0)[[0, 0]], 0.0);

        let a = RasterBackend::flat(gray8(4, 4), &[255.0]);
        let out = backend.levels(&a, &levels).unwrap();
        assert_eq!(plane(&out, 0)[[0, 0]], 205.0);
    }

    #[test]
    fn test_bit_depth_is_exact_for_integers() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(8, 8, VideoFormat::yuv(8, Sampling::S420));
        let a = RasterBackend::frame_from_fn(info, |p, r, c| (16 + p * 30 + r * 8 + c) as f32);
        let deep = backend.bit_depth(&a, 16, DitherMode::ROUND).unwrap();
        assert_eq!(plane(&deep, 0)[[1, 1]], plane(&a, 0)[[1, 1]] * 256.0);
        let back = backend.bit_depth(&deep, 8, DitherMode::ORDERED).unwrap();
        assert_eq!(max_abs_diff(&a, &back), 0.0);
    }

    #[test]
    fn test_rgb_round_trip_restores_tags() {
        let mut backend = RasterBackend::new();
        let tags = ColorTags { range: ColorRange::Full, matrix: 9, chroma_location: 2, ..ColorTags::default() };
        let info = ClipInfo::new(16, 16, VideoFormat::yuv(16, Sampling::S444)).with_tags(tags);
        let a = RasterBackend::flat(info, &[30000.0, 31000.0, 34000.0]);

        let rgb = backend
            .resample(&a, &Resample::to_format(a.info(), VideoFormat::rgbs()).with_matrix_in(9))
            .unwrap();
        let back = backend
            .resample(&rgb, &Resample::to_format(rgb.info(), info.format).with_tags(tags))
            .unwrap();
        assert_eq!(back.tags(), tags);
        assert!(max_abs_diff(&a, &back) <= 1.0);
    }

    #[test]
    fn test_chroma_layout_keeps_flat_values() {
        let mut backend = RasterBackend::new();
        let info = ClipInfo::new(16, 16, VideoFormat::yuv(16, Sampling::S444));
        let a = RasterBackend::flat(info, &[20000.0, 30000.0, 36000.0]);
        let sub = backend.resample_chroma(&a, Sampling::S420).unwrap();
        assert_eq!(plane(&sub, 1).dim(), (8, 8));
        assert_eq!(plane(&sub, 2)[[4, 4]], 36000.0);
    }

    #[test]
    fn test_stand_ins_preserve_flat_frames() {
        let mut backend = RasterBackend::new();
        let a = RasterBackend::flat(gray8(8, 8), &[90.0]);
        let engine = Engine::select(TransformKind::RemoveGrain, Precision::Integer);
        let rg = backend.remove_grain(engine, &a, 18).unwrap();
        let warp = backend
            .warp_sharpen(&a, &WarpParams { thresh: 128, blur: 3, kind: 1, depth: -9, chroma: 1 })
            .unwrap();
        assert_eq!(max_abs_diff(&a, &rg), 0.0);
        assert_eq!(max_abs_diff(&a, &warp), 0.0);
    }

    #[test]
    fn test_sobel_and_binarize() {
        let mut backend = RasterBackend::new();
        let edge = RasterBackend::frame_from_fn(gray8(8, 8), |_, _, c| if c < 4 { 0.0 } else { 200.0 });
        let sobel = backend.sobel(&edge).unwrap();
        assert_eq!(plane(&sobel, 0)[[4, 0]], 0.0);
        assert_eq!(plane(&sobel, 0)[[4, 4]], 255.0);

        let bin = backend.binarize(&edge).unwrap();
        assert_eq!(plane(&bin, 0)[[0, 0]], 0.0);
        assert_eq!(plane(&bin, 0)[[0, 7]], 255.0);
    }
}
