//! Catalog-wide job creation and batch execution.

use crate::error::ProcessorError;
use crate::job::{AudioJob, JobResult, JobTarget, SongJob, VideoJob};
use crate::planner::{plan_rungs, required_jobs};
use crate::progress::ProgressEvent;
use crate::runner::ProcessRunner;
use futures::stream::{self, StreamExt};
use shared::models::{Anime, Song};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outstanding work for a catalog
#[derive(Debug, Default)]
pub struct JobBatch {
    pub jobs: Vec<SongJob>,
    /// Problems that did not stop planning
    pub warnings: Vec<String>,
}

/// Execution policy chosen by the caller
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Jobs running at once; 1 runs them in order
    pub concurrency: usize,
    /// Stop starting new jobs after a failure
    pub stop_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            stop_on_error: true,
        }
    }
}

/// A job that ended in error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job: String,
    pub reason: String,
}

/// Outcome counts for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub already_existed: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Jobs never started because the batch stopped
    pub not_started: usize,
    pub failures: Vec<JobFailure>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.already_existed + self.failed + self.canceled + self.not_started
    }

    /// Every job finished without error or cancellation
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.canceled == 0 && self.not_started == 0
    }

    fn record(&mut self, job: &SongJob, outcome: Option<Result<JobResult, crate::error::JobError>>) {
        match outcome {
            None => self.not_started += 1,
            Some(Ok(JobResult::Success)) => self.succeeded += 1,
            Some(Ok(JobResult::FileAlreadyExists { .. })) => self.already_existed += 1,
            Some(Ok(JobResult::Canceled)) => self.canceled += 1,
            Some(Ok(result @ JobResult::Error { .. })) => {
                if let JobResult::Error { lines, .. } = &result {
                    for line in lines {
                        error!(job = %job, "{}", line);
                    }
                }
                self.failed += 1;
                self.failures.push(JobFailure {
                    job: job.to_string(),
                    reason: result.to_string(),
                });
            }
            Some(Err(e)) => {
                error!(job = %job, error = %e, "Job could not run");
                self.failed += 1;
                self.failures.push(JobFailure {
                    job: job.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Plans and runs encode jobs
#[derive(Debug, Clone)]
pub struct SongProcessor {
    runner: ProcessRunner,
}

impl SongProcessor {
    /// Create a processor running ffmpeg through `runner`
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Work out every job still needed across `animes`.
    ///
    /// An anime whose configured source file is missing stops planning
    /// altogether. Jobs whose output already exists are left out.
    pub fn create_jobs(&self, animes: &[Anime]) -> Result<JobBatch, ProcessorError> {
        let mut batch = JobBatch::default();

        for anime in animes {
            let mut warn_for = |message: String| {
                let warning = format!("[{}] {}: {}", anime.id, anime.name, message);
                warn!(anime_id = anime.id, "{}", warning);
                batch.warnings.push(warning);
            };

            let Some(source) = anime.absolute_source() else {
                warn_for("source is not set, skipping".to_string());
                continue;
            };
            if !source.exists() {
                return Err(ProcessorError::SourceMissing {
                    anime_id: anime.id,
                    path: source,
                });
            }

            let video_info = anime.video_info();
            let plan = plan_rungs(video_info.map(|info| info.height));
            for warning in &plan.warnings {
                warn_for(warning.to_string());
            }

            let mut songs: Vec<&Song> = Vec::new();
            for song in &anime.songs {
                if song.should_ignore {
                    warn_for(format!("{} is ignored", song.full_name()));
                } else if !song.has_timestamp() {
                    warn_for(format!("{} has no timestamp", song.full_name()));
                } else {
                    songs.push(song);
                }
            }

            let target = JobTarget {
                anime_id: anime.id,
                directory: anime.directory().to_path_buf(),
                source,
            };

            let mut created = 0usize;
            for (song, rung) in required_jobs(&plan, &songs) {
                let job = match (rung.resolution(), video_info) {
                    (None, _) => SongJob::Audio(AudioJob::new(target.clone(), song.clone())),
                    (Some(resolution), Some(info)) => SongJob::Video(VideoJob::new(
                        target.clone(),
                        song.clone(),
                        info.clone(),
                        resolution,
                    )),
                    // video rungs are only planned from probed info
                    (Some(_), None) => continue,
                };

                if job.already_exists() {
                    debug!(job = %job, "Output already present, not queued");
                    continue;
                }
                batch.jobs.push(job);
                created += 1;
            }

            debug!(anime_id = anime.id, jobs = created, "Planned anime");
        }

        info!(
            animes = animes.len(),
            jobs = batch.jobs.len(),
            warnings = batch.warnings.len(),
            "Job creation finished"
        );

        Ok(batch)
    }

    /// Run `jobs` under `options`.
    ///
    /// No new job starts after a cancellation, or after a failure when
    /// `stop_on_error` is set; running jobs are left to finish.
    pub async fn process_jobs(
        &self,
        jobs: Vec<SongJob>,
        options: RunOptions,
        token: &CancellationToken,
        events: Option<&UnboundedSender<ProgressEvent>>,
    ) -> BatchSummary {
        let total = jobs.len();
        let halted = AtomicBool::new(false);
        info!(
            jobs = total,
            concurrency = options.concurrency,
            stop_on_error = options.stop_on_error,
            "Processing jobs"
        );

        let halted = &halted;
        let results = stream::iter(jobs)
            .map(|job| async move {
                if halted.load(Ordering::SeqCst) || token.is_cancelled() {
                    return (job, None);
                }

                let outcome = job.process(&self.runner, token, events).await;
                let stop = match &outcome {
                    Ok(JobResult::Canceled) => true,
                    Ok(JobResult::Error { .. }) | Err(_) => options.stop_on_error,
                    _ => false,
                };
                if stop {
                    halted.store(true, Ordering::SeqCst);
                }
                (job, Some(outcome))
            })
            .buffer_unordered(options.concurrency.max(1));
        let mut results = std::pin::pin!(results);

        let mut summary = BatchSummary::default();
        while let Some((job, outcome)) = results.next().await {
            summary.record(&job, outcome);
            debug!(done = summary.total(), total, "Job finished");
        }

        info!(
            succeeded = summary.succeeded,
            already_existed = summary.already_existed,
            failed = summary.failed,
            canceled = summary.canceled,
            not_started = summary.not_started,
            "Processing finished"
        );

        summary
    }
}
