//! Song processor CLI.
//!
//! Encodes theme songs for every anime in the catalog, writes the fixes
//! report, probes single files and imports new anime entries.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::{
    Anime, CatalogStore, Config, DataPaths, GatherOptions, JsonCatalogStore, JsonFileGatherer,
    MetadataGatherer, SaveNewOptions,
};
use song_processor::report::{export_fixes, render_fixes};
use song_processor::{
    FfprobeService, ProbeService, ProcessRunner, ProgressEvent, RunOptions, SongProcessor,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode every missing mp3 and video for the catalog
    Run {
        /// Number of concurrent encodes
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Keep going after a failed job
        #[arg(long)]
        keep_going: bool,

        /// Print the ffmpeg commands without running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the report of songs that are not submitted yet
    Fixes {
        /// Report path, defaults to the configured fixes file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print stream information for a media file as JSON
    Probe {
        file: PathBuf,

        /// Stream index within its type
        #[arg(short, long, default_value_t = 0)]
        track: u32,

        /// Probe an audio stream instead of video
        #[arg(long, conflicts_with = "volume")]
        audio: bool,

        /// Measure the loudness of an audio stream
        #[arg(long)]
        volume: bool,
    },

    /// Create a catalog entry from a metadata file named `{id}.json`
    Import {
        /// Directory holding the metadata files
        #[arg(long)]
        from: PathBuf,

        /// Anime id
        #[arg(long)]
        id: u32,

        #[arg(long)]
        no_openings: bool,

        #[arg(long)]
        no_endings: bool,

        #[arg(long)]
        no_inserts: bool,

        /// Create the entry without any songs
        #[arg(long)]
        no_songs: bool,

        /// Put the entry in its own "Name (Year)" directory
        #[arg(long)]
        name_directory: bool,

        /// Replace an existing info file
        #[arg(long, conflicts_with = "duplicate")]
        overwrite: bool,

        /// Write a numbered copy next to an existing info file
        #[arg(long)]
        duplicate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let mut log_config = shared::LogConfig::from_config(&config, "song_processor");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let data_paths = DataPaths::new(config.data_dir(), config.catalog_dir());
    data_paths
        .create_dirs()
        .context("Failed to create data directories")?;

    match args.command {
        Commands::Run {
            jobs,
            keep_going,
            dry_run,
        } => {
            let options = RunOptions {
                concurrency: jobs.unwrap_or(config.processing.max_concurrent_jobs),
                stop_on_error: config.processing.stop_on_error && !keep_going,
            };
            run(&config, &data_paths, options, dry_run).await
        }
        Commands::Fixes { output } => {
            let output = output.unwrap_or_else(|| config.fixes_file());
            fixes(&data_paths, &output)
        }
        Commands::Probe {
            file,
            track,
            audio,
            volume,
        } => probe(&config, &file, track, audio, volume).await,
        Commands::Import {
            from,
            id,
            no_openings,
            no_endings,
            no_inserts,
            no_songs,
            name_directory,
            overwrite,
            duplicate,
        } => {
            let gather = GatherOptions {
                add_openings: !no_openings,
                add_endings: !no_endings,
                add_inserts: !no_inserts,
                add_songs: !no_songs,
            };
            let save = SaveNewOptions {
                add_name_directory: name_directory,
                allow_overwrite: overwrite,
                create_duplicate_file: duplicate,
            };
            import(&data_paths, &from, id, gather, save).await
        }
    }
}

fn probe_service(config: &Config) -> Result<FfprobeService> {
    Ok(FfprobeService::new(
        ProcessRunner::new(config.ffprobe_path()?),
        ProcessRunner::new(config.ffmpeg_path()?),
    ))
}

async fn run(config: &Config, data_paths: &DataPaths, options: RunOptions, dry_run: bool) -> Result<()> {
    let store = JsonCatalogStore::new();
    let mut animes = store.load_all(data_paths)?;

    let probe = probe_service(config)?;
    refresh_video_info(&store, &probe, &mut animes).await?;

    let ffmpeg = ProcessRunner::new(config.ffmpeg_path()?);
    let processor = SongProcessor::new(ffmpeg);
    let batch = processor.create_jobs(&animes)?;

    for warning in &batch.warnings {
        println!("warning: {}", warning);
    }
    if batch.jobs.is_empty() {
        info!("No jobs to process, exiting");
        return Ok(());
    }

    if dry_run {
        for job in &batch.jobs {
            match job.args() {
                Ok(job_args) => println!(
                    "{}\n  {} {}",
                    job,
                    processor.runner().program().display(),
                    job_args
                ),
                Err(e) => println!("{}\n  cannot build command: {}", job, e),
            }
        }
        info!(jobs = batch.jobs.len(), "Dry run finished");
        return Ok(());
    }

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling running jobs");
            interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_progress(rx));

    let summary = processor
        .process_jobs(batch.jobs, options, &token, Some(&tx))
        .await;
    drop(tx);
    if let Err(e) = reporter.await {
        error!(error = %e, "Progress reporter panicked");
    }

    info!("=== Processing Complete ===");
    info!("Succeeded: {}", summary.succeeded);
    info!("Already existed: {}", summary.already_existed);
    info!("Failed: {}", summary.failed);
    info!("Canceled: {}", summary.canceled);
    info!("Not started: {}", summary.not_started);
    for failure in &summary.failures {
        error!(job = %failure.job, "{}", failure.reason);
    }

    if !summary.is_complete() {
        bail!(
            "{} of {} jobs did not complete",
            summary.failed + summary.canceled + summary.not_started,
            summary.total()
        );
    }
    Ok(())
}

/// Probe sources that have no video info yet and persist the result
async fn refresh_video_info(
    store: &impl CatalogStore,
    probe: &impl ProbeService,
    animes: &mut [Anime],
) -> Result<()> {
    for anime in animes.iter_mut() {
        if anime.video_info().is_some() {
            continue;
        }
        let Some(source) = anime.absolute_source() else {
            continue;
        };
        if !source.exists() {
            // Reported by job creation
            continue;
        }

        match probe.probe_video(&source, 0).await {
            Ok(info) => {
                anime.set_video_info(Some(info));
                store.save(anime)?;
            }
            Err(e) => warn!(anime_id = anime.id, error = %e, "Could not probe source"),
        }
    }
    Ok(())
}

/// Log each job at every tenth of completion
async fn report_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut logged: HashMap<PathBuf, u32> = HashMap::new();
    while let Some(event) = rx.recv().await {
        let step = (event.percentage() * 10.0).floor() as u32;
        let last = logged.entry(event.output_path.clone()).or_insert(0);
        if step > *last || (event.progress.is_end && *last < 10) {
            *last = if event.progress.is_end { 10 } else { step };
            info!(
                output = %event.output_path.display(),
                percent = (event.percentage() * 100.0).round() as u32,
                speed = event.progress.speed,
                eta_secs = event.completion_eta().as_secs(),
                "Encoding"
            );
        }
    }
}

fn fixes(data_paths: &DataPaths, output: &Path) -> Result<()> {
    let store = JsonCatalogStore::new();
    let animes = store.load_all(data_paths)?;

    let entries = export_fixes(&animes);
    let report = render_fixes(&entries, Utc::now());
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(output, report)
        .with_context(|| format!("Failed to write fixes report: {}", output.display()))?;

    info!(songs = entries.len(), path = %output.display(), "Fixes report written");
    Ok(())
}

async fn probe(config: &Config, file: &Path, track: u32, audio: bool, volume: bool) -> Result<()> {
    let service = probe_service(config)?;
    let json = if volume {
        serde_json::to_string_pretty(&service.probe_volume(file, track).await?)?
    } else if audio {
        serde_json::to_string_pretty(&service.probe_audio(file, track).await?)?
    } else {
        serde_json::to_string_pretty(&service.probe_video(file, track).await?)?
    };
    println!("{}", json);
    Ok(())
}

async fn import(
    data_paths: &DataPaths,
    from: &Path,
    id: u32,
    gather: GatherOptions,
    save: SaveNewOptions,
) -> Result<()> {
    let gatherer = JsonFileGatherer::new(from);
    let base = gatherer.get(id, gather).await?;

    let store = JsonCatalogStore::new();
    match store.save_new(data_paths.catalog_dir(), &base, save)? {
        Some(path) => println!("{}", path.display()),
        None => warn!(anime_id = id, "Entry already exists, nothing written"),
    }
    Ok(())
}
