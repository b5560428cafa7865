//! Parameters for the three-pass denoiser.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Configuration of one denoising pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassConfig {
    /// 0 = disabled, 1 = 8-bit, 2 = 16-bit, 3 = 16-bit 4:4:4, 4 = 32-bit 4:4:4.
    pub level: u8,

    /// Fraction of the source size to run the pass at (motion pass only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downscale_ratio: Option<f64>,
}

impl PassConfig {
    pub fn new(level: u8) -> Self {
        Self { level, downscale_ratio: None }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn downscaled(level: u8, ratio: f64) -> Self {
        Self { level, downscale_ratio: Some(ratio) }
    }

    /// Decode the legacy single-number encoding: `2.6` is level 2 at 60% size,
    /// `.6` is level 1 at 60% size.
    pub fn from_legacy_mode(mode: f64) -> Self {
        let level = mode.trunc();
        let ratio = ((mode - level) * 1000.0).round() / 1000.0;
        let level = if level == 0.0 && ratio > 0.0 { 1 } else { level as u8 };
        Self {
            level,
            downscale_ratio: if ratio > 0.0 { Some(ratio) } else { None },
        }
    }

    pub fn enabled(&self) -> bool {
        self.level > 0
    }
}

/// Dithering method used by bit-depth conversion (fmtc `dmode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DitherMode(pub u8);

impl DitherMode {
    /// Ordered dithering.
    pub const ORDERED: DitherMode = DitherMode(0);
    /// Plain rounding.
    pub const ROUND: DitherMode = DitherMode(1);
}

/// Compute device for GPU-capable engines; negative ids select the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Gpu(u32),
    Cpu,
}

impl Device {
    pub fn from_id(id: i32) -> Self {
        if id >= 0 {
            Device::Gpu(id as u32)
        } else {
            Device::Cpu
        }
    }
}

/// All user-facing knobs of the denoiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenoiseParameters {
    /// Process chroma planes as well as luma.
    #[serde(default = "default_true")]
    pub chroma: bool,

    /// Sharpening amount (0-20), scaled by resolution.
    #[serde(default = "default_sharp")]
    pub sharp: f64,

    /// Renoise strength (0-20). Use 0 for animation.
    #[serde(default = "default_renoise")]
    pub renoise: f64,

    /// Apply debanding with stabilized grain.
    #[serde(default)]
    pub deband: bool,

    /// Warp-based line thickening (0-5).
    #[serde(default)]
    pub depth: i32,

    /// 20 = normal, 1-19 = reduced, 0 to -200 = dynamic luma-based strength.
    #[serde(default = "default_strength")]
    pub strength: i32,

    /// Motion-compensated temporal pass.
    #[serde(default = "default_motion_pass")]
    pub motion_pass: PassConfig,

    /// Block-matching 3-D pass.
    #[serde(default = "default_full_pass")]
    pub bm3d_pass: PassConfig,

    /// Non-local-means pass.
    #[serde(default = "default_full_pass")]
    pub nlm_pass: PassConfig,

    /// Output bit depth; defaults to the source depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bits: Option<u8>,

    /// Dithering for the final bit-depth conversion.
    #[serde(default)]
    pub dither_mode: DitherMode,

    /// RemoveGrain mode used by post-processing; 0 disables sharpen and renoise.
    #[serde(default = "default_repair_mode")]
    pub repair_mode: i32,

    /// SAD threshold of the motion-compensated average.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: i32,

    /// Temporal radius of the non-local-means pass.
    #[serde(default = "default_radius")]
    pub temporal_radius: i32,

    /// Spatial radius of the non-local-means pass.
    #[serde(default = "default_radius")]
    pub spatial_radius: i32,

    /// Non-local-means strength.
    #[serde(default = "default_nlm_strength")]
    pub nlm_strength: f64,

    /// Device for non-local means and block matching; -1 for CPU.
    #[serde(default)]
    pub gpu_device: i32,

    /// Device for block matching only; defaults to `gpu_device`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_device_secondary: Option<i32>,

    /// Block-matching strength.
    #[serde(default = "default_bm3d_sigma")]
    pub bm3d_sigma: f64,

    #[serde(default = "default_block_step")]
    pub block_step: i32,

    #[serde(default = "default_bm_range")]
    pub bm_range: i32,

    #[serde(default = "default_ps_range")]
    pub ps_range: i32,
}

fn default_true() -> bool { true }
fn default_sharp() -> f64 { 9.5 }
fn default_renoise() -> f64 { 14.0 }
fn default_strength() -> i32 { 20 }
fn default_motion_pass() -> PassConfig { PassConfig::downscaled(1, 0.6) }
fn default_full_pass() -> PassConfig { PassConfig::new(3) }
fn default_repair_mode() -> i32 { 18 }
fn default_motion_threshold() -> i32 { 400 }
fn default_radius() -> i32 { 2 }
fn default_nlm_strength() -> f64 { 1.4 }
fn default_bm3d_sigma() -> f64 { 9.0 }
fn default_block_step() -> i32 { 5 }
fn default_bm_range() -> i32 { 15 }
fn default_ps_range() -> i32 { 7 }

/// Bit depths the final conversion can produce.
pub const OUTPUT_DEPTHS: [u8; 6] = [8, 10, 12, 14, 16, 32];

impl Default for DenoiseParameters {
    fn default() -> Self {
        Self {
            chroma: true,
            sharp: default_sharp(),
            renoise: default_renoise(),
            deband: false,
            depth: 0,
            strength: default_strength(),
            motion_pass: default_motion_pass(),
            bm3d_pass: default_full_pass(),
            nlm_pass: default_full_pass(),
            output_bits: None,
            dither_mode: DitherMode::default(),
            repair_mode: default_repair_mode(),
            motion_threshold: default_motion_threshold(),
            temporal_radius: default_radius(),
            spatial_radius: default_radius(),
            nlm_strength: default_nlm_strength(),
            gpu_device: 0,
            gpu_device_secondary: None,
            bm3d_sigma: default_bm3d_sigma(),
            block_step: default_block_step(),
            bm_range: default_bm_range(),
            ps_range: default_ps_range(),
        }
    }
}

impl DenoiseParameters {
    /// Check every knob against its documented range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range("sharp", self.sharp, 0.0, 20.0)?;
        ConfigurationError::check_range("renoise", self.renoise, 0.0, 20.0)?;
        ConfigurationError::check_range("depth", self.depth as f64, 0.0, 5.0)?;
        ConfigurationError::check_range("strength", self.strength as f64, -200.0, 20.0)?;

        for pass in [&self.motion_pass, &self.bm3d_pass, &self.nlm_pass] {
            if pass.level > 4 {
                return Err(ConfigurationError::InvalidQualityLevel(pass.level));
            }
        }
        if let Some(ratio) = self.motion_pass.downscale_ratio {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigurationError::InvalidDownscaleRatio(ratio));
            }
        }
        if !self.motion_pass.enabled() && !self.bm3d_pass.enabled() && !self.nlm_pass.enabled() {
            return Err(ConfigurationError::NoPassEnabled);
        }

        if let Some(bits) = self.output_bits {
            if !OUTPUT_DEPTHS.contains(&bits) {
                return Err(ConfigurationError::InvalidOutputDepth(bits));
            }
        }
        ConfigurationError::check_range("repairMode", self.repair_mode as f64, 0.0, 24.0)?;
        ConfigurationError::check_range("temporalRadius", self.temporal_radius as f64, 0.0, 16.0)?;
        ConfigurationError::check_range("spatialRadius", self.spatial_radius as f64, 1.0, 16.0)?;
        ConfigurationError::check_range("nlmStrength", self.nlm_strength, 0.0, f64::MAX)?;
        ConfigurationError::check_range("bm3dSigma", self.bm3d_sigma, 0.0, f64::MAX)?;
        ConfigurationError::check_range("blockStep", self.block_step as f64, 1.0, 8.0)?;
        ConfigurationError::check_range("bmRange", self.bm_range as f64, 1.0, f64::MAX)?;
        ConfigurationError::check_range("psRange", self.ps_range as f64, 1.0, f64::MAX)?;
        Ok(())
    }

    /// Device used by the non-local-means pass.
    pub fn nlm_device(&self) -> Device {
        Device::from_id(self.gpu_device)
    }

    /// Device used by the block-matching pass.
    pub fn bm3d_device(&self) -> Device {
        Device::from_id(self.gpu_device_secondary.unwrap_or(self.gpu_device))
    }
}
