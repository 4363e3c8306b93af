//! Error types for planning and job execution.

use crate::runner::RunnerError;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid job parameters found while building arguments
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Display aspect ratio is required to scale to {resolution}p")]
    MissingAspectRatio { resolution: u32 },
}

/// Failure while running a single job
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to run encoder: {0}")]
    Runner(#[from] RunnerError),
}

/// Failure that stops job creation for the whole catalog
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Source file for anime {anime_id} does not exist: {}", path.display())]
    SourceMissing { anime_id: u32, path: PathBuf },
}
