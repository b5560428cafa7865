//! Progress reporting via JSON lines on stdout.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::models::{LogLevel, ProgressInfo, WorkerMessage};

enum Sink {
    Stdout,
    Memory(Vec<String>),
}

/// Thread-safe reporter that writes one JSON message per line.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<Mutex<Sink>>,
}

impl ProgressReporter {
    /// Reporter writing to stdout.
    pub fn new() -> Self {
        Self::with_sink(Sink::Stdout)
    }

    /// Reporter keeping its messages in memory; read them back with [`captured`](Self::captured).
    pub fn capturing() -> Self {
        Self::with_sink(Sink::Memory(Vec::new()))
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub fn send_progress(&self, progress: &ProgressInfo) {
        self.send_message(&WorkerMessage::progress(progress));
    }

    pub fn send_log(&self, level: LogLevel, message: &str) {
        self.send_message(&WorkerMessage::log(level, message));
    }

    pub fn send_error(&self, message: &str) {
        self.send_message(&WorkerMessage::error(message));
    }

    pub fn send_complete(&self, success: bool, output_path: Option<&str>) {
        self.send_message(&WorkerMessage::complete(success, output_path));
    }

    /// JSON lines sent to a capturing reporter so far; empty for stdout reporters.
    pub fn captured(&self) -> Vec<String> {
        match &*self.sink.lock().unwrap_or_else(|e| e.into_inner()) {
            Sink::Memory(lines) => lines.clone(),
            Sink::Stdout => Vec::new(),
        }
    }

    fn send_message(&self, message: &WorkerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("Failed to serialize message: {}", e);
                return;
            }
        };

        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *sink {
            Sink::Stdout => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                if let Err(e) = writeln!(handle, "{}", json) {
                    eprintln!("Failed to write to stdout: {}", e);
                }
                let _ = handle.flush();
            }
            Sink::Memory(lines) => lines.push(json),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
