//! Locates vspipe, ffmpeg and the Python / plugin environment they run in.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Name of the per-user directory that downloaded dependencies are unpacked into.
const APP_DIR: &str = "TriPass";

/// Platform-specific dependency locator.
pub struct DependencyLocator {
    base_path: PathBuf,
    platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOSArm64,
    MacOSX64,
    WindowsX64,
    WindowsArm64,
    LinuxX64,
    LinuxArm64,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::MacOSArm64,
        Platform::MacOSX64,
        Platform::WindowsX64,
        Platform::WindowsArm64,
        Platform::LinuxX64,
        Platform::LinuxArm64,
    ];

    /// The platform this binary was built for.
    pub fn current() -> Option<Platform> {
        match (env::consts::OS, env::consts::ARCH) {
            ("macos", "aarch64") => Some(Platform::MacOSArm64),
            ("macos", "x86_64") => Some(Platform::MacOSX64),
            ("windows", "x86_64") => Some(Platform::WindowsX64),
            ("windows", "aarch64") => Some(Platform::WindowsArm64),
            ("linux", "x86_64") => Some(Platform::LinuxX64),
            ("linux", "aarch64") => Some(Platform::LinuxArm64),
            _ => None,
        }
    }

    /// Directory name under `deps/`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Platform::MacOSArm64 => "macos-arm64",
            Platform::MacOSX64 => "macos-x64",
            Platform::WindowsX64 => "windows-x64",
            Platform::WindowsArm64 => "windows-arm64",
            Platform::LinuxX64 => "linux-x64",
            Platform::LinuxArm64 => "linux-arm64",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::WindowsX64 | Platform::WindowsArm64)
    }

    pub fn is_macos(&self) -> bool {
        matches!(self, Platform::MacOSArm64 | Platform::MacOSX64)
    }

    fn path_separator(&self) -> &'static str {
        if self.is_windows() {
            ";"
        } else {
            ":"
        }
    }
}

impl DependencyLocator {
    /// Create a locator for the running executable.
    pub fn new() -> Result<Self> {
        let platform = match Platform::current() {
            Some(p) => p,
            None => bail!("unsupported platform {}-{}", env::consts::OS, env::consts::ARCH),
        };
        let exe_path = env::current_exe().context("Failed to get executable path")?;
        let base_path = Self::find_deps_directory(&exe_path, platform);
        Ok(Self { base_path, platform })
    }

    /// Create a locator rooted at an explicit `deps` directory.
    pub fn with_base(base_path: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            base_path: base_path.into(),
            platform,
        }
    }

    /// Per-user dependency directory, if the platform has one.
    fn user_deps_directory(platform: Platform) -> Option<PathBuf> {
        if platform.is_macos() {
            let home = env::var_os("HOME")?;
            return Some(PathBuf::from(home).join("Library").join("Application Support").join(APP_DIR).join("deps"));
        }
        if platform.is_windows() {
            let appdata = env::var_os("LOCALAPPDATA")?;
            return Some(PathBuf::from(appdata).join(APP_DIR).join("deps"));
        }
        let data = env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))?;
        Some(data.join(APP_DIR.to_lowercase()).join("deps"))
    }

    /// Find the deps directory: per-user install first, then upward from the executable.
    fn find_deps_directory(exe_path: &Path, platform: Platform) -> PathBuf {
        let user_deps = Self::user_deps_directory(platform);
        if let Some(dir) = &user_deps {
            if dir.join(platform.suffix()).exists() {
                return dir.clone();
            }
        }

        // Only accept a deps directory with a platform subdirectory, not Cargo's deps
        let mut current = exe_path.parent();
        while let Some(dir) = current {
            let deps_dir = dir.join("deps");
            if Platform::ALL.iter().any(|p| deps_dir.join(p.suffix()).exists()) {
                return deps_dir;
            }
            current = dir.parent();
        }

        user_deps.unwrap_or_else(|| PathBuf::from("deps"))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn platform_suffix(&self) -> &'static str {
        self.platform.suffix()
    }

    fn platform_dir(&self) -> PathBuf {
        self.base_path.join(self.platform.suffix())
    }

    /// Bundled executable `name` inside `subdir`, or `name` on `PATH`.
    fn find_tool(&self, subdir: &str, names: &[&str]) -> Result<PathBuf> {
        let dir = self.platform_dir().join(subdir);
        for name in names {
            let file = if self.platform.is_windows() { format!("{}.exe", name) } else { name.to_string() };
            let path = dir.join(file);
            if path.exists() {
                return Ok(path);
            }
        }
        if let Some(path) = names.iter().find_map(|name| which::which(name).ok()) {
            return Ok(path);
        }
        bail!("{} not found in {:?} or on PATH", names[0], dir);
    }

    /// Path to the vspipe executable.
    pub fn vspipe_path(&self) -> Result<PathBuf> {
        self.find_tool("vapoursynth", &["vspipe", "VSPipe"])
    }

    /// Path to the ffmpeg executable.
    pub fn ffmpeg_path(&self) -> Result<PathBuf> {
        self.find_tool("ffmpeg", &["ffmpeg"])
    }

    /// Bundled Python home, or None to use the system interpreter.
    pub fn python_home(&self) -> Option<PathBuf> {
        let platform_dir = self.platform_dir();
        if self.platform.is_windows() {
            // Python ships inside the portable VapourSynth directory
            let vs_dir = platform_dir.join("vapoursynth");
            return vs_dir.exists().then_some(vs_dir);
        }
        let python_dir = platform_dir.join("python");
        python_dir.join("bin").join("python3.12").exists().then_some(python_dir)
    }

    /// PYTHONPATH: custom packages, then the bundled site-packages.
    pub fn python_path(&self) -> String {
        let platform_dir = self.platform_dir();
        let mut paths = vec![platform_dir.join("python-packages")];
        if self.platform.is_windows() {
            paths.push(platform_dir.join("vapoursynth").join("Lib").join("site-packages"));
        } else if let Some(python_home) = self.python_home() {
            paths.push(python_home.join("lib").join("python3.12").join("site-packages"));
        }
        join_paths(&paths, self.platform.path_separator())
    }

    /// VapourSynth plugin directory.
    pub fn vapoursynth_plugin_path(&self) -> PathBuf {
        let vs_dir = self.platform_dir().join("vapoursynth");
        if self.platform.is_windows() {
            vs_dir.join("vs-plugins")
        } else {
            vs_dir.join("plugins")
        }
    }

    /// Directories prepended to PATH.
    pub fn bin_path(&self) -> String {
        let platform_dir = self.platform_dir();
        let mut paths = vec![platform_dir.join("ffmpeg"), platform_dir.join("vapoursynth")];
        if !self.platform.is_windows() {
            if let Some(python_home) = self.python_home() {
                paths.push(python_home.join("bin"));
            }
        }
        join_paths(&paths, self.platform.path_separator())
    }

    /// Environment for running vspipe and ffmpeg.
    pub fn build_environment(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let separator = self.platform.path_separator();

        vars.insert("PYTHONNOUSERSITE".to_string(), "1".to_string());
        if let Some(python_home) = self.python_home() {
            vars.insert("PYTHONHOME".to_string(), python_home.to_string_lossy().to_string());
        }
        vars.insert("PYTHONPATH".to_string(), self.python_path());
        vars.insert(
            "VAPOURSYNTH_PLUGIN_PATH".to_string(),
            self.vapoursynth_plugin_path().to_string_lossy().to_string(),
        );

        let existing_path = env::var("PATH").unwrap_or_default();
        vars.insert("PATH".to_string(), format!("{}{}{}", self.bin_path(), separator, existing_path));

        let library_var = if self.platform.is_macos() {
            Some("DYLD_LIBRARY_PATH")
        } else if self.platform.is_windows() {
            None
        } else {
            Some("LD_LIBRARY_PATH")
        };
        if let Some(name) = library_var {
            let mut libs = join_paths(
                &[self.platform_dir().join("vapoursynth"), self.platform_dir().join("python").join("lib")],
                separator,
            );
            let existing = env::var(name).unwrap_or_default();
            if !existing.is_empty() {
                libs = format!("{}{}{}", libs, separator, existing);
            }
            vars.insert(name.to_string(), libs);
        }

        vars
    }
}

fn join_paths(paths: &[PathBuf], separator: &str) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(separator)
}
