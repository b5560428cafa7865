//! VapourSynth script generator.
//!
//! Evaluates the denoiser on the script backend and writes the resulting
//! `.vpy` file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::backend::script::ScriptBackend;
use crate::denoise::Denoiser;
use crate::models::VideoJob;
use crate::progress_reporter::ProgressReporter;

/// Builds denoising scripts for jobs.
#[derive(Default)]
pub struct ScriptGenerator {
    reporter: Option<ProgressReporter>,
}

impl ScriptGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward the denoiser's debug log to `reporter`.
    pub fn with_reporter(reporter: ProgressReporter) -> Self {
        Self { reporter: Some(reporter) }
    }

    /// Script text for `job`.
    pub fn render(&self, job: &VideoJob) -> Result<String> {
        let mut denoiser = Denoiser::new(job.denoise.clone()).context("Invalid denoise parameters")?;
        if let Some(reporter) = &self.reporter {
            denoiser = denoiser.with_reporter(reporter.clone());
        }

        let mut backend = ScriptBackend::new();
        let source = backend.source(&job.input_path, job.source);
        let output = denoiser
            .process(&mut backend, &source)
            .with_context(|| format!("Failed to build the filter graph for {}", job.input_path))?;
        Ok(backend.finish(&output))
    }

    /// Write the script for `job` to the temp directory and return its path.
    pub fn generate(&self, job: &VideoJob) -> Result<PathBuf> {
        self.generate_into(job, &env::temp_dir())
    }

    /// Write the script for `job` as `<dir>/<job id>.vpy`.
    pub fn generate_into(&self, job: &VideoJob, dir: &Path) -> Result<PathBuf> {
        let script = self.render(job)?;
        let script_path = dir.join(format!("{}.vpy", job.id));
        fs::write(&script_path, &script)
            .with_context(|| format!("Failed to write script to {:?}", script_path))?;
        Ok(script_path)
    }
}
