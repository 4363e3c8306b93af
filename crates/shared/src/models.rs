//! Data models for the song catalog.
//!
//! This module defines the records persisted in catalog info files (anime
//! and their songs), the probed characteristics of source files, and the
//! plain shape produced by metadata gatherers.

use crate::scalars::{
    deserialize_lenient_ratio, timespan, AspectRatio, ScalarParseError, SongTypeAndPosition,
    VolumeModifier,
};
use anyhow::{bail, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Completion status of a song, stored as a set of flags.
///
/// `NOT_SUBMITTED` (no flags) means the song does not exist in the public
/// system yet; `SUBMITTED` means it exists but nothing has been encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(u8);

impl Status {
    pub const NOT_SUBMITTED: Status = Status(0);
    pub const SUBMITTED: Status = Status(1);
    pub const MP3: Status = Status(1 << 1);
    pub const RES_480: Status = Status(1 << 2);
    pub const RES_720: Status = Status(1 << 3);

    const NAMED: [(Status, &'static str); 4] = [
        (Status::SUBMITTED, "Submitted"),
        (Status::MP3, "Mp3"),
        (Status::RES_480, "Res480"),
        (Status::RES_720, "Res720"),
    ];

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every flag of `other` is set
    pub fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag of `other` is set
    pub fn intersects(&self, other: Status) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Status) -> Status {
        Status(self.0 & rhs.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NotSubmitted");
        }

        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

impl FromStr for Status {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut status = Status::NOT_SUBMITTED;
        for part in s.split(',').map(str::trim) {
            if part.eq_ignore_ascii_case("NotSubmitted") {
                continue;
            }
            let (flag, _) = Self::NAMED
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .ok_or_else(|| ScalarParseError::Status(s.to_string()))?;
            status |= *flag;
        }
        Ok(status)
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Theme song entry of an anime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Song {
    pub name: String,
    pub artist: String,

    // Position within the source video
    #[serde(with = "timespan", default)]
    pub start: Duration,
    #[serde(with = "timespan", default)]
    pub end: Duration,

    #[serde(rename = "Type")]
    pub song_type: SongTypeAndPosition,
    #[serde(default)]
    pub status: Status,

    /// Already isolated audio used instead of the source's audio track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_path: Option<PathBuf>,

    #[serde(default)]
    pub override_audio_track: u32,
    #[serde(default)]
    pub override_video_track: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_aspect_ratio: Option<AspectRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_modifier: Option<VolumeModifier>,

    #[serde(default)]
    pub should_ignore: bool,

    /// Other anime ids that use this exact song
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub also_in: BTreeSet<u32>,
}

impl Song {
    pub fn new(name: impl Into<String>, artist: impl Into<String>, song_type: SongTypeAndPosition) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            start: Duration::ZERO,
            end: Duration::ZERO,
            song_type,
            status: Status::NOT_SUBMITTED,
            clean_path: None,
            override_audio_track: 0,
            override_video_track: 0,
            override_aspect_ratio: None,
            volume_modifier: None,
            should_ignore: false,
            also_in: BTreeSet::new(),
        }
    }

    /// A start of zero means the timestamp has not been set yet
    pub fn has_timestamp(&self) -> bool {
        !self.start.is_zero()
    }

    pub fn length(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// True if none of the flags in `status` are set on this song
    pub fn is_missing(&self, status: Status) -> bool {
        !self.status.intersects(status)
    }

    pub fn full_name(&self) -> String {
        format!("{} ({})", self.name, self.artist)
    }
}

impl From<&SongBase> for Song {
    fn from(base: &SongBase) -> Self {
        Song::new(base.name.clone(), base.artist.clone(), base.song_type)
    }
}

/// Anime entry backed by an info file on disk.
///
/// Relative paths (source, clean paths) resolve against the directory that
/// holds the info file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Anime {
    pub id: u32,
    pub name: String,
    pub year: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,

    #[serde(default)]
    pub songs: Vec<Song>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_info: Option<VideoInfo>,

    #[serde(skip)]
    absolute_info_path: PathBuf,
}

impl Anime {
    /// Create an anime anchored at `absolute_info_path` from gathered metadata
    pub fn new(absolute_info_path: impl Into<PathBuf>, base: &AnimeBase) -> Result<Self> {
        let mut anime = Self {
            id: base.id,
            name: base.name.clone(),
            year: base.year,
            source: None,
            songs: base.songs.iter().map(Song::from).collect(),
            video_info: None,
            absolute_info_path: PathBuf::new(),
        };
        anime.set_info_path(absolute_info_path)?;
        Ok(anime)
    }

    /// Anchor the anime at an info file path
    pub fn set_info_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if !path.is_absolute() {
            bail!("Info path must be absolute: {}", path.display());
        }
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {}
            _ => bail!("Info path has no directory component: {}", path.display()),
        }
        self.absolute_info_path = path;
        Ok(())
    }

    pub fn info_path(&self) -> &Path {
        &self.absolute_info_path
    }

    /// Directory that relative paths resolve against
    pub fn directory(&self) -> &Path {
        self.absolute_info_path
            .parent()
            .unwrap_or(&self.absolute_info_path)
    }

    /// Resolve a possibly relative path against the anime directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.directory().join(path)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn absolute_source(&self) -> Option<PathBuf> {
        self.source.as_deref().map(|source| self.resolve(source))
    }

    /// Change the source; probed video info no longer applies and is cleared
    pub fn set_source(&mut self, source: Option<PathBuf>) {
        if self.source != source {
            self.video_info = None;
        }
        self.source = source;
    }

    pub fn video_info(&self) -> Option<&VideoInfo> {
        self.video_info.as_ref()
    }

    pub fn set_video_info(&mut self, info: Option<VideoInfo>) {
        self.video_info = info;
    }

    /// Copy with absolute paths beneath the anime directory made relative,
    /// which is the form written to disk.
    pub(crate) fn relativized(&self) -> Anime {
        let directory = self.directory().to_path_buf();
        let relative = |path: &Path| -> PathBuf {
            match path.strip_prefix(&directory) {
                Ok(stripped) if path.is_absolute() => stripped.to_path_buf(),
                _ => path.to_path_buf(),
            }
        };

        let mut copy = self.clone();
        copy.source = self.source.as_deref().map(relative);
        for song in &mut copy.songs {
            song.clean_path = song.clean_path.as_deref().map(relative);
        }
        copy
    }
}

/// Accepts ffprobe's numbers-as-strings as well as plain numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Text(String),
    Number(f64),
}

impl LooseNumber {
    fn value(&self) -> Option<f64> {
        match self {
            LooseNumber::Text(text) => text.trim().parse().ok(),
            LooseNumber::Number(number) => Some(*number),
        }
    }
}

fn deserialize_loose_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw: Option<LooseNumber> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|number| number.value())
        .filter(|value| *value >= 0.0)
        .map(|value| value as u64))
}

/// Durations as decimal seconds, the way ffprobe prints them
mod seconds {
    use super::LooseNumber;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&format!("{:.6}", duration.as_secs_f64())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<LooseNumber> = Option::deserialize(deserializer)?;
        Ok(raw
            .and_then(|number| number.value())
            .and_then(|value| Duration::try_from_secs_f64(value).ok()))
    }
}

/// Probed characteristics of a video stream.
///
/// Field names follow ffprobe's JSON so a stream object deserializes as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_ratio",
        skip_serializing_if = "Option::is_none"
    )]
    pub sample_aspect_ratio: Option<AspectRatio>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_ratio",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_aspect_ratio: Option<AspectRatio>,
    #[serde(default, with = "seconds", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pix_fmt: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_loose_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub bit_rate: Option<u64>,
}

/// Probed characteristics of an audio stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub channels: u32,
    #[serde(default, deserialize_with = "deserialize_loose_u64")]
    pub sample_rate: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_loose_u64")]
    pub bit_rate: Option<u64>,
}

/// Loudness statistics from ffmpeg's volumedetect filter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Mean volume in dB
    pub mean_volume: f64,
    /// Peak volume in dB
    pub max_volume: f64,
    pub sample_count: u64,
    /// Samples per dB bucket below full scale (0 = loudest)
    pub histogram: BTreeMap<u32, u64>,
}

/// Song as produced by a metadata gatherer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SongBase {
    pub name: String,
    pub artist: String,
    #[serde(rename = "Type")]
    pub song_type: SongTypeAndPosition,
}

/// Anime as produced by a metadata gatherer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnimeBase {
    pub id: u32,
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub songs: Vec<SongBase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AnimeBase {
        AnimeBase {
            id: 5114,
            name: "Fullmetal Alchemist: Brotherhood".to_string(),
            year: 2009,
            songs: vec![SongBase {
                name: "Again".to_string(),
                artist: "YUI".to_string(),
                song_type: SongTypeAndPosition::opening(1),
            }],
        }
    }

    #[test]
    fn test_status_flags() {
        let status = Status::MP3 | Status::RES_480;
        assert!(status.contains(Status::MP3));
        assert!(!status.contains(Status::RES_720));
        assert!(status.intersects(Status::RES_480 | Status::RES_720));
        assert!(Status::NOT_SUBMITTED.is_empty());
    }

    #[test]
    fn test_status_string_form() {
        let status = Status::SUBMITTED | Status::MP3 | Status::RES_720;
        assert_eq!(status.to_string(), "Submitted, Mp3, Res720");
        assert_eq!("Submitted, Mp3, Res720".parse::<Status>().unwrap(), status);
        assert_eq!(Status::NOT_SUBMITTED.to_string(), "NotSubmitted");
        assert_eq!("NotSubmitted".parse::<Status>().unwrap(), Status::NOT_SUBMITTED);
        assert!("Res1080".parse::<Status>().is_err());
    }

    #[test]
    fn test_song_helpers() {
        let mut song = Song::new("Again", "YUI", SongTypeAndPosition::opening(1));
        assert!(!song.has_timestamp());

        song.start = Duration::from_secs(90);
        song.end = Duration::from_secs(180);
        song.status = Status::MP3;

        assert!(song.has_timestamp());
        assert_eq!(song.length(), Duration::from_secs(90));
        assert!(!song.is_missing(Status::MP3));
        assert!(song.is_missing(Status::RES_480));
        assert_eq!(song.full_name(), "Again (YUI)");
    }

    #[test]
    fn test_anime_requires_absolute_info_path() {
        assert!(Anime::new("relative/info.amq", &base()).is_err());

        let anime = Anime::new("/catalog/fma/info.amq", &base()).unwrap();
        assert_eq!(anime.directory(), Path::new("/catalog/fma"));
        assert_eq!(anime.songs.len(), 1);
    }

    #[test]
    fn test_source_resolution_and_reset() {
        let mut anime = Anime::new("/catalog/fma/info.amq", &base()).unwrap();
        assert_eq!(anime.absolute_source(), None);

        anime.set_source(Some(PathBuf::from("ep01.mkv")));
        assert_eq!(anime.absolute_source(), Some(PathBuf::from("/catalog/fma/ep01.mkv")));

        anime.set_video_info(Some(VideoInfo {
            codec_name: None,
            width: 1920,
            height: 1080,
            sample_aspect_ratio: None,
            display_aspect_ratio: None,
            duration: None,
            pix_fmt: None,
            bit_rate: None,
        }));
        anime.set_source(Some(PathBuf::from("ep01.mkv")));
        assert!(anime.video_info().is_some());

        anime.set_source(Some(PathBuf::from("ep02.mkv")));
        assert!(anime.video_info().is_none());
    }

    #[test]
    fn test_video_info_from_ffprobe_stream() {
        let json = r#"{
            "index": 0,
            "codec_name": "h264",
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "sample_aspect_ratio": "1:1",
            "display_aspect_ratio": "16:9",
            "pix_fmt": "yuv420p",
            "duration": "1420.003000",
            "bit_rate": "3500000"
        }"#;

        let info: VideoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.height, 1080);
        assert_eq!(info.sample_aspect_ratio, Some(AspectRatio::SQUARE));
        assert_eq!(info.display_aspect_ratio, Some(AspectRatio::new(16, 9).unwrap()));
        let duration = info.duration.unwrap().as_secs_f64();
        assert!((duration - 1420.003).abs() < 1e-6);
        assert_eq!(info.bit_rate, Some(3_500_000));

        let stored = serde_json::to_string(&info).unwrap();
        let restored: VideoInfo = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, info);
    }

    #[test]
    fn test_song_persisted_form() {
        let json = r#"{
            "Name": "Again",
            "Artist": "YUI",
            "Start": "00:01:30",
            "End": "00:03:00.5000000",
            "Type": "Opening 1",
            "Status": "Submitted, Mp3",
            "OverrideAspectRatio": "4:3",
            "VolumeModifier": "-2dB",
            "AlsoIn": [6702, 121]
        }"#;

        let song: Song = serde_json::from_str(json).unwrap();
        assert_eq!(song.start, Duration::from_secs(90));
        assert_eq!(song.end, Duration::from_millis(180_500));
        assert_eq!(song.status, Status::SUBMITTED | Status::MP3);
        assert_eq!(song.override_aspect_ratio, Some(AspectRatio::new(4, 3).unwrap()));
        assert_eq!(song.volume_modifier, Some(VolumeModifier::Decibels(-2.0)));
        assert_eq!(song.also_in.iter().copied().collect::<Vec<_>>(), vec![121, 6702]);
        assert!(!song.should_ignore);

        let stored = serde_json::to_string(&song).unwrap();
        let restored: Song = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, song);
    }
}
