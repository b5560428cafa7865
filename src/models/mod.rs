//! Data models shared between the host application and the worker.
//! These serialize to/from camelCase JSON job files.

mod video_job;
mod video_format;
mod denoise_parameters;
mod progress_info;

pub use video_job::*;
pub use video_format::*;
pub use denoise_parameters::*;
pub use progress_info::*;
