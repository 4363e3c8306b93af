//! Encode pipeline for anime theme songs.
//!
//! This library turns catalog state into ffmpeg jobs and runs them:
//! - Resolution planning and job creation
//! - ffmpeg argument construction
//! - Process execution with cancellation and progress streaming
//! - Source probing through ffprobe
//! - The fixes report for songs that still need submitting

pub mod command;
pub mod error;
pub mod job;
pub mod planner;
pub mod probe;
pub mod processor;
pub mod progress;
pub mod report;
pub mod runner;

pub use command::{ArgMap, JobArgs, JobInput};
pub use error::{ConfigurationError, JobError, ProcessorError};
pub use job::{AudioJob, JobResult, JobTarget, SongJob, VideoJob};
pub use planner::{Rung, RungPlan};
pub use probe::{FfprobeService, GatheringError, ProbeService};
pub use processor::{BatchSummary, JobBatch, RunOptions, SongProcessor};
pub use progress::{Progress, ProgressEvent, ProgressParser};
pub use report::FixEntry;
pub use runner::{ProcessExit, ProcessRunner, RunnerError};
