//! JSON messages the worker writes to stdout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encoding progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub frame: i32,
    pub total_frames: i32,
    pub fps: f64,
    /// Seconds remaining, 0 when unknown
    pub eta: f64,
}

impl ProgressInfo {
    pub fn new(frame: i32, total_frames: i32, fps: f64, eta: f64) -> Self {
        Self { frame, total_frames, fps, eta }
    }
}

/// One line of worker output, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress(ProgressInfo),

    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },

    Error {
        message: String,
    },

    Complete {
        success: bool,
        #[serde(rename = "outputPath", skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },
}

impl WorkerMessage {
    pub fn progress(info: &ProgressInfo) -> Self {
        WorkerMessage::Progress(info.clone())
    }

    /// Log line stamped with the current time.
    pub fn log(level: LogLevel, message: &str) -> Self {
        WorkerMessage::Log {
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: &str) -> Self {
        WorkerMessage::Error { message: message.to_string() }
    }

    pub fn complete(success: bool, output_path: Option<&str>) -> Self {
        WorkerMessage::Complete {
            success,
            output_path: output_path.map(String::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
}
