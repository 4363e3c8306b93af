//! Source probing through ffprobe and ffmpeg.

use crate::runner::ProcessRunner;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared::models::{AudioInfo, VideoInfo, VolumeInfo};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

static MEAN_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"mean_volume:\s*(-?[\d.]+|-inf) dB").expect("valid mean volume regex"));
static MAX_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"max_volume:\s*(-?[\d.]+|-inf) dB").expect("valid max volume regex"));
static SAMPLE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"n_samples:\s*(\d+)").expect("valid sample count regex"));
static HISTOGRAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"histogram_(\d+)db:\s*(\d+)").expect("valid histogram regex"));

/// ffmpeg's message for a `-map` that selects nothing
const NO_STREAM_MESSAGE: &str = "matches no streams";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    fn selector(&self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GatheringErrorKind {
    #[error("file not found")]
    FileNotFound,

    #[error("{0}")]
    Process(String),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("stream is {found}, expected {expected}")]
    WrongStreamType { expected: StreamKind, found: String },

    #[error("no such stream")]
    NoStream,
}

/// Probing failed; carries the file and stream for diagnostics
#[derive(Debug, Error)]
#[error("Failed to probe {stream} stream {track} of {}: {kind}", path.display())]
pub struct GatheringError {
    pub path: PathBuf,
    pub stream: StreamKind,
    pub track: u32,
    pub kind: GatheringErrorKind,
}

/// Reads stream characteristics of media files
#[async_trait]
pub trait ProbeService: Send + Sync {
    async fn probe_video(&self, path: &Path, track: u32) -> Result<VideoInfo, GatheringError>;

    async fn probe_audio(&self, path: &Path, track: u32) -> Result<AudioInfo, GatheringError>;

    /// Loudness statistics of an audio track
    async fn probe_volume(&self, path: &Path, track: u32) -> Result<VolumeInfo, GatheringError>;
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<serde_json::Value>,
}

/// Probe service backed by the ffprobe and ffmpeg executables
#[derive(Debug, Clone)]
pub struct FfprobeService {
    ffprobe: ProcessRunner,
    ffmpeg: ProcessRunner,
}

impl FfprobeService {
    pub fn new(ffprobe: ProcessRunner, ffmpeg: ProcessRunner) -> Self {
        Self { ffprobe, ffmpeg }
    }

    async fn probe_stream<T: DeserializeOwned>(
        &self,
        path: &Path,
        stream: StreamKind,
        track: u32,
    ) -> Result<T, GatheringError> {
        let fail = |kind| GatheringError {
            path: path.to_path_buf(),
            stream,
            track,
            kind,
        };
        if !path.exists() {
            return Err(fail(GatheringErrorKind::FileNotFound));
        }

        debug!(path = %path.display(), %stream, track, "Probing stream");
        let output = self
            .ffprobe
            .command()
            .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams"])
            .arg(format!("{}:{}", stream.selector(), track))
            .arg(path)
            .output()
            .await
            .map_err(|e| fail(GatheringErrorKind::Process(e.to_string())))?;

        if !output.status.success() {
            return Err(fail(GatheringErrorKind::Process(format!(
                "ffprobe exited with {}",
                output.status
            ))));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| fail(GatheringErrorKind::MalformedOutput(e.to_string())))?;
        let value = parsed
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| fail(GatheringErrorKind::NoStream))?;

        let codec_type = value["codec_type"].as_str().unwrap_or("unknown");
        if codec_type != stream.to_string() {
            return Err(fail(GatheringErrorKind::WrongStreamType {
                expected: stream,
                found: codec_type.to_string(),
            }));
        }
        if value["disposition"]["attached_pic"].as_i64() == Some(1) {
            return Err(fail(GatheringErrorKind::WrongStreamType {
                expected: stream,
                found: "attached picture".to_string(),
            }));
        }

        serde_json::from_value(value).map_err(|e| fail(GatheringErrorKind::MalformedOutput(e.to_string())))
    }
}

#[async_trait]
impl ProbeService for FfprobeService {
    async fn probe_video(&self, path: &Path, track: u32) -> Result<VideoInfo, GatheringError> {
        let info: VideoInfo = self.probe_stream(path, StreamKind::Video, track).await?;
        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            dar = ?info.display_aspect_ratio,
            "Probed video"
        );
        Ok(info)
    }

    async fn probe_audio(&self, path: &Path, track: u32) -> Result<AudioInfo, GatheringError> {
        self.probe_stream(path, StreamKind::Audio, track).await
    }

    async fn probe_volume(&self, path: &Path, track: u32) -> Result<VolumeInfo, GatheringError> {
        let fail = |kind| GatheringError {
            path: path.to_path_buf(),
            stream: StreamKind::Audio,
            track,
            kind,
        };
        if !path.exists() {
            return Err(fail(GatheringErrorKind::FileNotFound));
        }

        let output = self
            .ffmpeg
            .command()
            .args(["-hide_banner", "-nostdin", "-i"])
            .arg(path)
            .arg("-map")
            .arg(format!("0:a:{}", track))
            .args(["-af", "volumedetect", "-vn", "-sn", "-f", "null", "-"])
            .output()
            .await
            .map_err(|e| fail(GatheringErrorKind::Process(e.to_string())))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(NO_STREAM_MESSAGE) {
            return Err(fail(GatheringErrorKind::NoStream));
        }
        if !output.status.success() {
            let last = stderr.lines().last().unwrap_or_default().to_string();
            return Err(fail(GatheringErrorKind::Process(format!(
                "ffmpeg exited with {}: {}",
                output.status, last
            ))));
        }

        parse_volumedetect(&stderr).ok_or_else(|| {
            fail(GatheringErrorKind::MalformedOutput(
                "volumedetect statistics not found".to_string(),
            ))
        })
    }
}

/// Pull the volumedetect summary out of ffmpeg's log output
pub fn parse_volumedetect(log: &str) -> Option<VolumeInfo> {
    let decibels = |regex: &Regex| -> Option<f64> {
        let raw = regex.captures(log)?.get(1)?.as_str();
        if raw == "-inf" {
            Some(f64::NEG_INFINITY)
        } else {
            raw.parse().ok()
        }
    };

    let mean_volume = decibels(&MEAN_VOLUME)?;
    let max_volume = decibels(&MAX_VOLUME)?;
    let sample_count = SAMPLE_COUNT
        .captures(log)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let histogram = HISTOGRAM
        .captures_iter(log)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
        .collect();

    Some(VolumeInfo {
        mean_volume,
        max_volume,
        sample_count,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::scalars::AspectRatio;
    use tempfile::TempDir;

    const VOLUMEDETECT: &str = "\
[Parsed_volumedetect_0 @ 0x55d0c8c0] n_samples: 7938048
[Parsed_volumedetect_0 @ 0x55d0c8c0] mean_volume: -16.2 dB
[Parsed_volumedetect_0 @ 0x55d0c8c0] max_volume: -0.4 dB
[Parsed_volumedetect_0 @ 0x55d0c8c0] histogram_0db: 112
[Parsed_volumedetect_0 @ 0x55d0c8c0] histogram_1db: 1480
[Parsed_volumedetect_0 @ 0x55d0c8c0] histogram_2db: 6012
";

    #[test]
    fn test_parse_volumedetect() {
        let info = parse_volumedetect(VOLUMEDETECT).unwrap();
        assert_eq!(info.mean_volume, -16.2);
        assert_eq!(info.max_volume, -0.4);
        assert_eq!(info.sample_count, 7_938_048);
        assert_eq!(info.histogram.get(&1), Some(&1480));
        assert_eq!(info.histogram.len(), 3);

        assert!(parse_volumedetect("Output #0, null, to 'pipe:':").is_none());
    }

    #[test]
    fn test_silent_track() {
        let log = "mean_volume: -inf dB\nmax_volume: -inf dB\n";
        let info = parse_volumedetect(log).unwrap();
        assert_eq!(info.max_volume, f64::NEG_INFINITY);
        assert!(info.histogram.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let service = FfprobeService::new(ProcessRunner::new("ffprobe"), ProcessRunner::new("ffmpeg"));
        let error = service
            .probe_video(Path::new("/nonexistent/ep01.mkv"), 0)
            .await
            .unwrap_err();

        assert_eq!(error.kind, GatheringErrorKind::FileNotFound);
        assert_eq!(error.stream, StreamKind::Video);
        assert_eq!(error.path, PathBuf::from("/nonexistent/ep01.mkv"));
    }

    /// Service whose ffprobe prints `json` and whose ffmpeg prints `log` to stderr
    #[cfg(unix)]
    fn fake_service(dir: &Path, json: &str, log: &str) -> anyhow::Result<FfprobeService> {
        let probe_script = dir.join("ffprobe.sh");
        std::fs::write(&probe_script, format!("cat <<'EOF'\n{}\nEOF\n", json))?;
        let volume_script = dir.join("ffmpeg.sh");
        std::fs::write(&volume_script, format!("cat >&2 <<'EOF'\n{}\nEOF\n", log))?;

        let runner = |script: PathBuf| {
            ProcessRunner::new("sh").with_base_args([script.to_string_lossy().into_owned()])
        };
        Ok(FfprobeService::new(runner(probe_script), runner(volume_script)))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_video() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("ep01.mkv");
        std::fs::write(&source, b"video")?;

        let json = r#"{"streams": [{
            "index": 0, "codec_name": "h264", "codec_type": "video",
            "width": 1440, "height": 1080,
            "sample_aspect_ratio": "4:3", "display_aspect_ratio": "16:9",
            "duration": "1420.000000"
        }]}"#;
        let service = fake_service(temp_dir.path(), json, "")?;

        let info = service.probe_video(&source, 0).await?;
        assert_eq!(info.height, 1080);
        assert_eq!(info.sample_aspect_ratio, Some(AspectRatio::new(4, 3)?));
        assert_eq!(info.display_aspect_ratio, Some(AspectRatio::new(16, 9)?));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_errors() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("ep01.mkv");
        std::fs::write(&source, b"video")?;

        let service = fake_service(temp_dir.path(), r#"{"streams": []}"#, "")?;
        let error = service.probe_audio(&source, 2).await.unwrap_err();
        assert_eq!(error.kind, GatheringErrorKind::NoStream);
        assert_eq!(error.track, 2);

        let cover = r#"{"streams": [{"codec_type": "video", "width": 600, "height": 600,
            "disposition": {"attached_pic": 1}}]}"#;
        let service = fake_service(temp_dir.path(), cover, "")?;
        let error = service.probe_video(&source, 0).await.unwrap_err();
        assert!(matches!(error.kind, GatheringErrorKind::WrongStreamType { .. }));

        let service = fake_service(temp_dir.path(), "Invalid data found", "")?;
        let error = service.probe_video(&source, 0).await.unwrap_err();
        assert!(matches!(error.kind, GatheringErrorKind::MalformedOutput(_)));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_volume() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("ep01.mkv");
        std::fs::write(&source, b"video")?;

        let service = fake_service(temp_dir.path(), "{}", VOLUMEDETECT)?;
        let info = service.probe_volume(&source, 0).await?;
        assert_eq!(info.mean_volume, -16.2);

        let service = fake_service(
            temp_dir.path(),
            "{}",
            "Stream map '0:a:3' matches no streams.",
        )?;
        let error = service.probe_volume(&source, 3).await.unwrap_err();
        assert_eq!(error.kind, GatheringErrorKind::NoStream);
        Ok(())
    }
}
