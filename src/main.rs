//! TriPass Worker - three-pass video denoising CLI
//!
//! Reads a job configuration file (--config), generates the VapourSynth
//! denoising script and runs the vspipe | ffmpeg pipeline. Progress is
//! reported via JSON messages on stdout.
//!
//! --script-only writes the script and prints its path.
//! --preview --frame N writes a single denoised frame as PNG to stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tripass_worker::models::{LogLevel, VideoJob};
use tripass_worker::pipeline_executor::PipelineExecutor;
use tripass_worker::progress_reporter::ProgressReporter;
use tripass_worker::script_generator::ScriptGenerator;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tripass-worker")]
#[command(about = "Three-pass video denoising worker using VapourSynth")]
#[command(version)]
struct Args {
    /// Path to the job configuration JSON file
    #[arg(long)]
    config: PathBuf,

    /// Write the VapourSynth script and print its path without encoding
    #[arg(long, conflicts_with = "preview")]
    script_only: bool,

    /// Preview mode: generate a single processed frame as PNG to stdout
    #[arg(long, requires = "frame")]
    preview: bool,

    /// Frame number to render in preview mode
    #[arg(long)]
    frame: Option<i32>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Preview mode writes raw PNG to stdout, so no JSON messages
    if args.preview {
        return match run_preview(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error generating preview: {:#}", e);
                ExitCode::from(1)
            }
        };
    }

    if args.script_only {
        return match run_script_only(&args) {
            Ok(path) => {
                println!("{}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(1)
            }
        };
    }

    let reporter = ProgressReporter::new();

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = cancelled.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        cancelled_clone.store(true, Ordering::SeqCst);
    }) {
        reporter.send_error(&format!("Failed to set signal handler: {}", e));
        return ExitCode::from(1);
    }

    match run_worker(&args, &reporter, &cancelled) {
        Ok(output_path) => {
            reporter.send_complete(true, Some(&output_path));
            ExitCode::SUCCESS
        }
        Err(_) if cancelled.load(Ordering::SeqCst) => {
            reporter.send_log(LogLevel::Info, "Job cancelled by user");
            reporter.send_complete(false, None);
            ExitCode::from(130)
        }
        Err(e) => {
            reporter.send_error(&format!("{:#}", e));
            reporter.send_complete(false, None);
            ExitCode::from(1)
        }
    }
}

fn load_job(path: &Path) -> Result<VideoJob> {
    let config_content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_json::from_str(&config_content).context("Failed to parse job configuration")
}

fn run_script_only(args: &Args) -> Result<PathBuf> {
    let job = load_job(&args.config)?;
    ScriptGenerator::new().generate(&job)
}

fn run_preview(args: &Args) -> Result<()> {
    let frame = match args.frame {
        Some(f) => f,
        None => bail!("--frame is required with --preview"),
    };
    let job = load_job(&args.config)?;
    if let Some(total) = job.total_frames {
        if frame < 0 || frame >= total {
            bail!("frame {} is outside 0..{}", frame, total);
        }
    }

    let script_path = ScriptGenerator::new().generate(&job)?;
    eprintln!("Preview: frame {} of {}", frame, job.input_path);

    let executor = PipelineExecutor::new(ProgressReporter::new())?;
    let result = executor.generate_preview(&script_path, frame, job.source.tags.range);
    let _ = std::fs::remove_file(&script_path);
    result
}

fn run_worker(args: &Args, reporter: &ProgressReporter, cancelled: &AtomicBool) -> Result<String> {
    reporter.send_log(LogLevel::Info, "Loading job configuration...");
    let job = load_job(&args.config)?;

    reporter.send_log(LogLevel::Info, &format!("Processing: {}", job.input_path));
    reporter.send_log(
        LogLevel::Debug,
        &format!(
            "Passes: motion={:?}, bm3d={}, nlm={}, chroma={}, strength={}",
            job.denoise.motion_pass,
            job.denoise.bm3d_pass.level,
            job.denoise.nlm_pass.level,
            job.denoise.chroma,
            job.denoise.strength
        ),
    );

    reporter.send_log(LogLevel::Info, "Generating VapourSynth script...");
    let script_path = ScriptGenerator::with_reporter(reporter.clone())
        .generate(&job)
        .context("Failed to generate VapourSynth script")?;
    reporter.send_log(LogLevel::Debug, &format!("Script written to: {:?}", script_path));

    reporter.send_log(LogLevel::Info, "Starting encoding pipeline...");
    let mut executor = PipelineExecutor::new(reporter.clone())?;
    let result = executor.execute(&script_path, &job, || cancelled.load(Ordering::SeqCst));
    drop(executor);
    if let Err(e) = std::fs::remove_file(&script_path) {
        reporter.send_log(LogLevel::Warning, &format!("Failed to remove script {:?}: {}", script_path, e));
    }

    if cancelled.load(Ordering::SeqCst) {
        if let Err(e) = std::fs::remove_file(&job.output_path) {
            reporter.send_log(LogLevel::Warning, &format!("Failed to remove partial output: {}", e));
        }
        bail!("Job cancelled");
    }
    result?;

    reporter.send_log(LogLevel::Info, "Encoding complete!");
    Ok(job.output_path)
}
