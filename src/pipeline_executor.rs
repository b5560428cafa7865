//! Pipeline executor for vspipe | ffmpeg.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::dependency_locator::DependencyLocator;
use crate::models::{ColorRange, LogLevel, ProgressInfo, VideoJob};
use crate::progress_reporter::ProgressReporter;

/// Minimum interval between progress messages.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Executes the vspipe | ffmpeg pipeline.
pub struct PipelineExecutor {
    reporter: ProgressReporter,
    deps: DependencyLocator,
    vspipe_process: Option<Child>,
    ffmpeg_process: Option<Child>,
}

/// Frame count from the `INPUT_INFO:frames=N,...` line the script prints.
pub fn parse_input_info(line: &str) -> Option<i32> {
    line.strip_prefix("INPUT_INFO:")?
        .split(',')
        .find_map(|part| part.strip_prefix("frames="))
        .and_then(|frames| frames.trim().parse().ok())
}

/// Progress state fed by ffmpeg's `-progress` output.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EncodeProgress {
    pub frame: i32,
    pub fps: f64,
}

impl EncodeProgress {
    /// Update from one line of ffmpeg output; returns whether anything changed.
    pub fn update(&mut self, line: &str) -> bool {
        let mut changed = false;
        for part in line.split_whitespace() {
            if let Some(frame) = part.strip_prefix("frame=").and_then(|v| v.trim().parse().ok()) {
                self.frame = frame;
                changed = true;
            } else if let Some(fps) = part.strip_prefix("fps=").and_then(|v| v.trim().parse().ok()) {
                self.fps = fps;
                changed = true;
            }
        }
        // Classic stats lines pad the value: "frame=  123 fps= 45.0"
        if !changed && line.starts_with("frame=") {
            let mut tokens = line.split(|c: char| c == '=' || c.is_whitespace()).filter(|t| !t.is_empty());
            while let Some(token) = tokens.next() {
                match token {
                    "frame" => {
                        if let Some(v) = tokens.next().and_then(|v| v.parse().ok()) {
                            self.frame = v;
                            changed = true;
                        }
                    }
                    "fps" => {
                        if let Some(v) = tokens.next().and_then(|v| v.parse().ok()) {
                            self.fps = v;
                            changed = true;
                        }
                    }
                    _ => {}
                }
            }
        }
        changed
    }

    /// Progress message for a run of `total` frames.
    pub fn info(&self, total: i32) -> ProgressInfo {
        let eta = if self.fps > 0.0 && total > self.frame {
            (total - self.frame) as f64 / self.fps
        } else {
            0.0
        };
        ProgressInfo::new(self.frame, total, self.fps, eta)
    }
}

/// FFmpeg arguments for encoding the piped y4m stream of `job`.
///
/// Audio is mapped from the input file.
pub fn ffmpeg_args(job: &VideoJob) -> Vec<String> {
    let settings = &job.encoding_settings;
    let mut args: Vec<String> = ["-f", "yuv4mpegpipe", "-i", "-"].iter().map(|s| s.to_string()).collect();

    args.extend(["-i".to_string(), job.input_path.clone()]);
    args.extend(["-map", "0:v:0", "-map", "1:a?"].iter().map(|s| s.to_string()));
    args.extend(["-progress".to_string(), "pipe:2".to_string()]);

    args.extend(["-c:v".to_string(), settings.codec.ffmpeg_codec().to_string()]);
    if let Some(profile) = settings.codec.prores_profile() {
        args.extend(["-profile:v".to_string(), profile.to_string()]);
    } else if settings.codec.uses_crf() {
        args.extend(["-crf".to_string(), settings.quality.to_string()]);
        args.extend(["-preset".to_string(), settings.encoder_preset.clone()]);
    }

    let range = if job.source.tags.range.is_full() { "pc" } else { "tv" };
    args.extend(["-color_range".to_string(), range.to_string()]);

    if settings.audio_copy {
        args.extend(["-c:a".to_string(), "copy".to_string()]);
    } else {
        args.extend(["-c:a".to_string(), settings.audio_codec.clone()]);
        args.extend(["-b:a".to_string(), format!("{}k", settings.audio_bitrate)]);
    }

    if !settings.custom_ffmpeg_args.is_empty() {
        args.extend(settings.custom_ffmpeg_args.split_whitespace().map(String::from));
    }

    args.push("-y".to_string());
    args.push(job.output_path.clone());
    args
}

/// Spawn `cmd`, killing and reaping `upstream` if that fails.
fn spawn_downstream(cmd: &mut Command, upstream: &mut Child) -> std::io::Result<Child> {
    cmd.spawn().map_err(|e| {
        let _ = upstream.kill();
        let _ = upstream.wait();
        e
    })
}

/// Treat SIGINT (130) and SIGPIPE (141) exits as clean.
fn check_exit(name: &str, code: Option<i32>) -> Result<()> {
    let code = code.unwrap_or(-1);
    if code != 0 && code != 130 && code != 141 {
        bail!("{} exited with code {}", name, code);
    }
    Ok(())
}

impl PipelineExecutor {
    pub fn new(reporter: ProgressReporter) -> Result<Self> {
        let deps = DependencyLocator::new()?;
        Ok(Self {
            reporter,
            deps,
            vspipe_process: None,
            ffmpeg_process: None,
        })
    }

    /// Run the denoising script through vspipe into ffmpeg.
    pub fn execute<F>(&mut self, script_path: &Path, job: &VideoJob, on_cancel: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        let vspipe_path = self.deps.vspipe_path()?;
        let ffmpeg_path = self.deps.ffmpeg_path()?;
        let env = self.deps.build_environment();

        self.reporter.send_log(
            LogLevel::Debug,
            &format!("vspipe: {:?}, ffmpeg: {:?}, platform: {}", vspipe_path, ffmpeg_path, self.deps.platform_suffix()),
        );
        for name in ["PYTHONHOME", "PYTHONPATH", "VAPOURSYNTH_PLUGIN_PATH"] {
            self.reporter.send_log(LogLevel::Debug, &format!("{}: {:?}", name, env.get(name)));
        }

        let mut vspipe = Command::new(&vspipe_path)
            .args(["-c", "y4m", script_path.to_string_lossy().as_ref(), "-"])
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start vspipe: {:?}", vspipe_path))?;

        let vspipe_stdout = vspipe.stdout.take().context("Failed to get vspipe stdout")?;
        let vspipe_stderr = vspipe.stderr.take().context("Failed to get vspipe stderr")?;

        let mut ffmpeg_cmd = Command::new(&ffmpeg_path);
        ffmpeg_cmd
            .args(ffmpeg_args(job))
            .envs(&env)
            .stdin(vspipe_stdout)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut ffmpeg = spawn_downstream(&mut ffmpeg_cmd, &mut vspipe)
            .with_context(|| format!("Failed to start ffmpeg: {:?}", ffmpeg_path))?;

        let ffmpeg_stderr = ffmpeg.stderr.take().context("Failed to get ffmpeg stderr")?;

        self.vspipe_process = Some(vspipe);
        self.ffmpeg_process = Some(ffmpeg);

        let total_frames = Arc::new(AtomicI32::new(0));
        let total_frames_clone = total_frames.clone();
        let reporter_clone = self.reporter.clone();

        let vspipe_thread = thread::spawn(move || {
            let reader = BufReader::new(vspipe_stderr);
            for line in reader.lines().map_while(Result::ok) {
                reporter_clone.send_log(LogLevel::Debug, &format!("vspipe stderr: {}", line));
                if let Some(frames) = parse_input_info(&line) {
                    total_frames_clone.store(frames, Ordering::SeqCst);
                }
            }
        });

        let mut progress = EncodeProgress::default();
        let mut last_progress_time = Instant::now();

        let ffmpeg_reader = BufReader::new(ffmpeg_stderr);
        for line in ffmpeg_reader.lines().map_while(Result::ok) {
            if on_cancel() {
                self.terminate();
                bail!("Job cancelled");
            }

            progress.update(&line);

            if last_progress_time.elapsed() >= PROGRESS_INTERVAL {
                let total = match total_frames.load(Ordering::SeqCst) {
                    0 => job.total_frames.unwrap_or(0),
                    total => total,
                };
                self.reporter.send_progress(&progress.info(total));
                last_progress_time = Instant::now();
            }
        }

        let _ = vspipe_thread.join();

        let vspipe_status = self
            .vspipe_process
            .as_mut()
            .map(|p| p.wait())
            .transpose()
            .context("Failed to wait for vspipe")?;
        let ffmpeg_status = self
            .ffmpeg_process
            .as_mut()
            .map(|p| p.wait())
            .transpose()
            .context("Failed to wait for ffmpeg")?;

        if let Some(status) = vspipe_status {
            check_exit("vspipe", status.code())?;
        }
        if let Some(status) = ffmpeg_status {
            check_exit("ffmpeg", status.code())?;
        }
        Ok(())
    }

    /// Render `frame` of the script as PNG to stdout.
    pub fn generate_preview(&self, script_path: &Path, frame: i32, range: ColorRange) -> Result<()> {
        let vspipe_path = self.deps.vspipe_path()?;
        let ffmpeg_path = self.deps.ffmpeg_path()?;
        let env = self.deps.build_environment();
        let frame = frame.to_string();

        let mut vspipe = Command::new(&vspipe_path)
            .args(["--start", &frame, "--end", &frame, "-c", "y4m", script_path.to_string_lossy().as_ref(), "-"])
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start vspipe: {:?}", vspipe_path))?;

        let vspipe_stdout = vspipe.stdout.take().context("Failed to get vspipe stdout")?;
        let vspipe_stderr = vspipe.stderr.take();

        let in_range = if range.is_full() { "pc" } else { "tv" };
        let scale = format!("scale=in_range={}:out_range=pc", in_range);
        let mut ffmpeg_cmd = Command::new(&ffmpeg_path);
        ffmpeg_cmd
            .args(["-f", "yuv4mpegpipe", "-i", "-", "-vframes", "1", "-vf", &scale, "-f", "image2pipe", "-vcodec", "png", "-"])
            .envs(&env)
            .stdin(vspipe_stdout)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let ffmpeg = spawn_downstream(&mut ffmpeg_cmd, &mut vspipe)
            .with_context(|| format!("Failed to start ffmpeg: {:?}", ffmpeg_path))?;

        let stderr_thread = vspipe_stderr.map(|stderr| {
            thread::spawn(move || {
                BufReader::new(stderr)
                    .lines()
                    .map_while(Result::ok)
                    .filter(|line| !line.starts_with("INPUT_INFO:") && !line.trim().is_empty())
                    .collect::<Vec<_>>()
            })
        });

        let vspipe_status = vspipe.wait().context("Failed to wait for vspipe")?;
        let output = ffmpeg.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !vspipe_status.success() {
            let errors = stderr_thread.and_then(|t| t.join().ok()).unwrap_or_default();
            if !errors.is_empty() {
                bail!("vspipe failed: {}", errors.join("\n"));
            }
            bail!("vspipe exited with code {}", vspipe_status.code().unwrap_or(-1));
        }
        if !output.status.success() {
            bail!("ffmpeg exited with code {}", output.status.code().unwrap_or(-1));
        }

        let mut stdout = std::io::stdout();
        stdout.write_all(&output.stdout)?;
        stdout.flush()?;
        Ok(())
    }

    /// Terminate both processes.
    fn terminate(&mut self) {
        if let Some(ref mut vspipe) = self.vspipe_process {
            let _ = vspipe.kill();
        }
        if let Some(ref mut ffmpeg) = self.ffmpeg_process {
            let _ = ffmpeg.kill();
        }
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.terminate();
    }
}
