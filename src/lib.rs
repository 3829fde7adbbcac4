//! Spark event log analysis: reconstructs substages from task timing and
//! reports CPU efficiency and spill per substage.

pub mod bench;
pub mod config;
pub mod cpus;
pub mod discovery;
pub mod error;
pub mod error_tracker;
pub mod pipeline;
pub mod report;

pub use error::{PipelineError, Result};
