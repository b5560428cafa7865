//! TriPass Worker Library
//!
//! Three-pass video denoising (motion-compensated, block-matching 3-D and
//! non-local means) expressed over a pluggable transform backend, plus the
//! VapourSynth script generation and vspipe | ffmpeg execution around it.

pub mod backend;
pub mod denoise;
pub mod dependency_locator;
pub mod error;
pub mod models;
pub mod pipeline_executor;
pub mod progress_reporter;
pub mod script_generator;

pub use denoise::Denoiser;
pub use error::{ConfigurationError, DenoiseError, TransformFailure};
