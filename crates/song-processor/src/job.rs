//! Encode jobs.
//!
//! A job produces one output file for one song: an mp3 clip or a webm clip
//! at a given vertical resolution. Jobs carry everything they need (anime
//! id, directory, source) so they can run without the catalog.

use crate::command::{self, ArgMap, JobArgs, JobInput};
use crate::error::{ConfigurationError, JobError};
use crate::progress::{ProgressEvent, ProgressParser};
use crate::runner::{ProcessExit, ProcessRunner};
use shared::models::{Song, VideoInfo};
use shared::paths::{audio_output_path, video_output_path};
use shared::scalars::timespan;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exit code ffmpeg uses when it was interrupted
const ABORTED_EXIT_CODE: i32 = 255;

/// Where a job reads from and writes to
#[derive(Debug, Clone, PartialEq)]
pub struct JobTarget {
    pub anime_id: u32,
    /// Anime directory; outputs and relative clean paths live here
    pub directory: PathBuf,
    /// Absolute path of the source video
    pub source: PathBuf,
}

impl JobTarget {
    fn clean_path(&self, song: &Song) -> Option<PathBuf> {
        song.clean_path
            .as_deref()
            .map(|path| self.directory.join(path))
    }
}

/// Final state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Canceled,
    Error { code: i32, lines: Vec<String> },
    FileAlreadyExists { path: PathBuf },
}

impl JobResult {
    /// `None` for cancellation, which is neither a success nor a failure
    pub fn is_success(&self) -> Option<bool> {
        match self {
            JobResult::Success | JobResult::FileAlreadyExists { .. } => Some(true),
            JobResult::Error { .. } => Some(false),
            JobResult::Canceled => None,
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobResult::Success => write!(f, "success"),
            JobResult::Canceled => write!(f, "canceled"),
            JobResult::Error { code, lines } => {
                write!(f, "exit code {}", code)?;
                if !lines.is_empty() {
                    write!(f, ": {}", lines.join(" | "))?;
                }
                Ok(())
            }
            JobResult::FileAlreadyExists { path } => {
                write!(f, "already exists: {}", path.display())
            }
        }
    }
}

/// Audio-only mp3 clip
#[derive(Debug, Clone, PartialEq)]
pub struct AudioJob {
    pub target: JobTarget,
    pub song: Song,
}

impl AudioJob {
    pub fn new(target: JobTarget, song: Song) -> Self {
        Self { target, song }
    }

    pub fn output_path(&self) -> PathBuf {
        audio_output_path(&self.target.directory, self.target.anime_id, &self.song.name)
    }

    pub fn args(&self) -> JobArgs {
        // A clean file is already the isolated clip
        let (input, map) = match self.target.clean_path(&self.song) {
            Some(clean) => (JobInput::new(clean, ArgMap::new()), "0:a:0".to_string()),
            None => (
                JobInput::new(&self.target.source, trim(&self.song)),
                format!("0:a:{}", self.song.override_audio_track),
            ),
        };

        JobArgs {
            global: command::global_args(),
            inputs: vec![input],
            mapping: vec![map],
            quality: audio_quality(),
            audio_filters: command::audio_filters(self.song.volume_modifier),
            video_filters: ArgMap::new(),
            output: self.output_path(),
        }
    }
}

/// webm clip scaled to a vertical resolution
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJob {
    pub target: JobTarget,
    pub song: Song,
    pub video_info: VideoInfo,
    pub resolution: u32,
}

impl VideoJob {
    pub fn new(target: JobTarget, song: Song, video_info: VideoInfo, resolution: u32) -> Self {
        Self {
            target,
            song,
            video_info,
            resolution,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        video_output_path(
            &self.target.directory,
            self.target.anime_id,
            &self.song.name,
            self.resolution,
        )
    }

    pub fn args(&self) -> Result<JobArgs, ConfigurationError> {
        let mut inputs = vec![JobInput::new(&self.target.source, trim(&self.song))];
        let mut mapping = vec![format!("0:v:{}", self.song.override_video_track)];
        match self.target.clean_path(&self.song) {
            Some(clean) => {
                inputs.push(JobInput::new(clean, ArgMap::new()));
                mapping.push("1:a:0".to_string());
            }
            None => mapping.push(format!("0:a:{}", self.song.override_audio_track)),
        }

        let video_filters = command::video_filters(
            &self.video_info,
            self.resolution,
            self.song.override_aspect_ratio,
        )?;

        Ok(JobArgs {
            global: command::global_args(),
            inputs,
            mapping,
            quality: video_quality(),
            audio_filters: command::audio_filters(self.song.volume_modifier),
            video_filters,
            output: self.output_path(),
        })
    }
}

fn trim(song: &Song) -> ArgMap {
    ArgMap::new()
        .with("ss", timespan::format(song.start))
        .with("to", timespan::format(song.end))
}

fn audio_quality() -> ArgMap {
    ArgMap::new()
        .flag("vn")
        .flag("sn")
        .with("map_metadata", "-1")
        .with("map_chapters", "-1")
        .with("c:a", "libmp3lame")
        .with("b:a", "320k")
        .with("ac", "2")
}

fn video_quality() -> ArgMap {
    ArgMap::new()
        .with("c:v", "libvpx-vp9")
        .with("b:v", "0")
        .with("crf", "20")
        .with("pix_fmt", "yuv420p")
        .with("deadline", "good")
        .with("cpu-used", "1")
        .with("row-mt", "1")
        .with("tile-columns", "2")
        .with("frame-parallel", "0")
        .with("g", "240")
        .with("threads", "4")
        .with("c:a", "libopus")
        .with("b:a", "320k")
        .with("ac", "2")
        .flag("sn")
        .with("map_metadata", "-1")
        .with("map_chapters", "-1")
        .flag("shortest")
}

/// One unit of encoding work
#[derive(Debug, Clone, PartialEq)]
pub enum SongJob {
    Audio(AudioJob),
    Video(VideoJob),
}

impl SongJob {
    pub fn song(&self) -> &Song {
        match self {
            SongJob::Audio(job) => &job.song,
            SongJob::Video(job) => &job.song,
        }
    }

    pub fn target(&self) -> &JobTarget {
        match self {
            SongJob::Audio(job) => &job.target,
            SongJob::Video(job) => &job.target,
        }
    }

    /// Vertical resolution for video jobs
    pub fn resolution(&self) -> Option<u32> {
        match self {
            SongJob::Audio(_) => None,
            SongJob::Video(job) => Some(job.resolution),
        }
    }

    /// Output path with invalid file name characters removed
    pub fn output_path(&self) -> PathBuf {
        match self {
            SongJob::Audio(job) => job.output_path(),
            SongJob::Video(job) => job.output_path(),
        }
    }

    pub fn already_exists(&self) -> bool {
        self.output_path().exists()
    }

    pub fn args(&self) -> Result<JobArgs, ConfigurationError> {
        match self {
            SongJob::Audio(job) => Ok(job.args()),
            SongJob::Video(job) => job.args(),
        }
    }

    /// Clip length, used as the expected encode duration
    pub fn expected_duration(&self) -> Duration {
        self.song().length()
    }

    /// Run the encode.
    ///
    /// Returns `FileAlreadyExists` without spawning anything when the
    /// output is present. Progress events go to `events` when given.
    pub async fn process(
        &self,
        runner: &ProcessRunner,
        token: &CancellationToken,
        events: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<JobResult, JobError> {
        let output = self.output_path();
        if output.exists() {
            info!(job = %self, path = %output.display(), "Output already exists, skipping");
            return Ok(JobResult::FileAlreadyExists { path: output });
        }

        let args = self.args()?;
        info!(job = %self, "Starting encode");
        debug!(job = %self, command = %args, "Encoder arguments");

        let expected_duration = self.expected_duration();
        let started = Instant::now();
        let mut parser = ProgressParser::new();
        let mut parser_failed = false;
        let mut error_lines = Vec::new();

        let exit = match runner
            .run(
                &args.to_args(),
                token,
                |line| {
                    if parser_failed {
                        return;
                    }
                    match parser.push_line(&line) {
                        Ok(Some(progress)) => {
                            if let Some(sender) = events {
                                // A dropped receiver only means nobody is watching
                                let _ = sender.send(ProgressEvent {
                                    expected_duration,
                                    output_path: output.clone(),
                                    progress,
                                });
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(
                                path = %output.display(),
                                error = %e,
                                "Unreadable progress output, no further progress for this job"
                            );
                            parser_failed = true;
                        }
                    }
                },
                |line| error_lines.push(line),
            )
            .await
        {
            Ok(exit) => exit,
            Err(e) => {
                error!(job = %self, error = %e, "Encoder run failed");
                remove_partial_output(&output).await;
                return Err(e.into());
            }
        };

        let result = match exit {
            ProcessExit::Exited(0) => JobResult::Success,
            ProcessExit::Exited(ABORTED_EXIT_CODE) | ProcessExit::Canceled => JobResult::Canceled,
            ProcessExit::Exited(code) => JobResult::Error {
                code,
                lines: error_lines,
            },
            ProcessExit::Signaled => JobResult::Error {
                code: -1,
                lines: error_lines,
            },
        };

        match &result {
            JobResult::Success => info!(
                job = %self,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Encode finished"
            ),
            JobResult::Canceled => {
                warn!(job = %self, "Encode canceled");
                remove_partial_output(&output).await;
            }
            JobResult::Error { code, lines } => {
                error!(job = %self, code, lines = lines.len(), "Encode failed");
                remove_partial_output(&output).await;
            }
            JobResult::FileAlreadyExists { .. } => {}
        }

        Ok(result)
    }
}

/// Best effort; nothing else can be done if removal fails
async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Could not remove partial output"),
    }
}

impl fmt::Display for SongJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let song = self.song();
        write!(
            f,
            "[{}] {} {}",
            self.target().anime_id,
            song.full_name(),
            song.song_type.short_name()
        )?;
        match self.resolution() {
            Some(resolution) => write!(f, " {}p", resolution),
            None => write!(f, " mp3"),
        }
    }
}
