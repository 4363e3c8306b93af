//! Scalar value types stored in catalog files.
//!
//! Every type here serializes as a plain string so catalog files stay
//! readable and round-trip losslessly.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error raised when a scalar cannot be parsed from its string form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScalarParseError {
    #[error("invalid aspect ratio: {0:?}")]
    AspectRatio(String),
    #[error("invalid volume modifier: {0:?}")]
    VolumeModifier(String),
    #[error("invalid song type: {0:?}")]
    SongType(String),
    #[error("invalid time span: {0:?}")]
    TimeSpan(String),
    #[error("invalid status: {0:?}")]
    Status(String),
}

// ========== AspectRatio ==========

/// Width:height pair as reported by ffprobe.
///
/// Equality compares the exact pair, so `16:9` and `32:18` are different
/// values even though they describe the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    width: u32,
    height: u32,
}

impl AspectRatio {
    /// Square pixels (1:1)
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    /// Create a new aspect ratio, both sides must be strictly positive
    pub fn new(width: u32, height: u32) -> Result<Self, ScalarParseError> {
        if width == 0 || height == 0 {
            return Err(ScalarParseError::AspectRatio(format!("{}:{}", width, height)));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width divided by height
    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// The `W/H` form used inside ffmpeg filter arguments
    pub fn filter_value(&self) -> String {
        format!("{}/{}", self.width, self.height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScalarParseError::AspectRatio(s.to_string());
        let (width, height) = s.trim().split_once([':', '/']).ok_or_else(invalid)?;
        let width = width.trim().parse().map_err(|_| invalid())?;
        let height = height.trim().parse().map_err(|_| invalid())?;
        Self::new(width, height).map_err(|_| invalid())
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Deserialize an optional aspect ratio, treating anything unparseable
/// (ffprobe's `0:1` or `N/A`) as unknown.
pub fn deserialize_lenient_ratio<'de, D>(deserializer: D) -> Result<Option<AspectRatio>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

// ========== VolumeModifier ==========

/// Gain adjustment applied through ffmpeg's `volume` filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeModifier {
    /// Gain in decibels, e.g. `-3dB`
    Decibels(f64),
    /// Linear multiplier, e.g. `0.5` for half volume
    Percentage(f64),
}

impl fmt::Display for VolumeModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeModifier::Decibels(value) => write!(f, "{}dB", value),
            VolumeModifier::Percentage(value) => write!(f, "{}", value),
        }
    }
}

impl FromStr for VolumeModifier {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScalarParseError::VolumeModifier(s.to_string());
        let trimmed = s.trim();

        let lower = trimmed.to_ascii_lowercase();
        if let Some(number) = lower.strip_suffix("db") {
            let value: f64 = number.trim().parse().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            return Ok(VolumeModifier::Decibels(value));
        }

        let value: f64 = trimmed.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        Ok(VolumeModifier::Percentage(value))
    }
}

impl Serialize for VolumeModifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VolumeModifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ========== SongType ==========

/// Kind of theme song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SongType {
    Opening,
    Ending,
    Insert,
}

impl SongType {
    fn short_prefix(&self) -> &'static str {
        match self {
            SongType::Opening => "OP",
            SongType::Ending => "ED",
            SongType::Insert => "IN",
        }
    }
}

impl fmt::Display for SongType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SongType::Opening => write!(f, "Opening"),
            SongType::Ending => write!(f, "Ending"),
            SongType::Insert => write!(f, "Insert"),
        }
    }
}

impl FromStr for SongType {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opening" => Ok(SongType::Opening),
            "ending" => Ok(SongType::Ending),
            "insert" => Ok(SongType::Insert),
            _ => Err(ScalarParseError::SongType(s.to_string())),
        }
    }
}

/// Song type plus its position in the series (Opening 2, Ending 1, ...).
///
/// Inserts are never numbered; constructing one with a position drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongTypeAndPosition {
    song_type: SongType,
    position: Option<u32>,
}

impl SongTypeAndPosition {
    pub fn new(song_type: SongType, position: Option<u32>) -> Self {
        let position = match song_type {
            SongType::Insert => None,
            _ => position,
        };
        Self {
            song_type,
            position,
        }
    }

    pub fn opening(position: u32) -> Self {
        Self::new(SongType::Opening, Some(position))
    }

    pub fn ending(position: u32) -> Self {
        Self::new(SongType::Ending, Some(position))
    }

    pub fn insert() -> Self {
        Self::new(SongType::Insert, None)
    }

    pub fn song_type(&self) -> SongType {
        self.song_type
    }

    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Compact form used in reports: `OP1`, `ED`, `IN`
    pub fn short_name(&self) -> String {
        match self.position {
            Some(position) => format!("{}{}", self.song_type.short_prefix(), position),
            None => self.song_type.short_prefix().to_string(),
        }
    }
}

impl fmt::Display for SongTypeAndPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "{} {}", self.song_type, position),
            None => write!(f, "{}", self.song_type),
        }
    }
}

impl FromStr for SongTypeAndPosition {
    type Err = ScalarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScalarParseError::SongType(s.to_string());
        let mut parts = s.split_whitespace();

        let song_type: SongType = parts.next().ok_or_else(invalid)?.parse()?;
        let position = match parts.next() {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(song_type, position))
    }
}

impl Serialize for SongTypeAndPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SongTypeAndPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ========== TimeSpan ==========

/// `Duration` in the `[d.]hh:mm:ss[.fffffff]` time span format.
///
/// Use with `#[serde(with = "timespan")]`. Precision is 100ns ticks.
pub mod timespan {
    use super::ScalarParseError;
    use once_cell::sync::Lazy;
    use regex::Regex;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const NANOS_PER_TICK: u64 = 100;
    const TICKS_PER_SECOND: u64 = 10_000_000;

    static TIME_SPAN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:(\d+)\.)?(\d{1,2}):(\d{2}):(\d{2})(?:\.(\d{1,7}))?$")
            .expect("time span pattern is valid")
    });

    /// Format a duration, e.g. `00:01:30.5000000`
    pub fn format(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let days = total_seconds / 86_400;
        let hours = (total_seconds / 3_600) % 24;
        let minutes = (total_seconds / 60) % 60;
        let seconds = total_seconds % 60;
        let ticks = duration.subsec_nanos() as u64 / NANOS_PER_TICK;

        let mut out = String::new();
        if days > 0 {
            out.push_str(&format!("{}.", days));
        }
        out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
        if ticks > 0 {
            out.push_str(&format!(".{:07}", ticks));
        }
        out
    }

    /// Parse a time span string; plain seconds (`90.5`) are accepted too
    pub fn parse(s: &str) -> Result<Duration, ScalarParseError> {
        let invalid = || ScalarParseError::TimeSpan(s.to_string());
        let trimmed = s.trim();

        let Some(caps) = TIME_SPAN.captures(trimmed) else {
            let seconds: f64 = trimmed.parse().map_err(|_| invalid())?;
            return Duration::try_from_secs_f64(seconds).map_err(|_| invalid());
        };

        let number = |index: usize| -> Result<u64, ScalarParseError> {
            caps.get(index)
                .map(|m| m.as_str().parse::<u64>().map_err(|_| invalid()))
                .unwrap_or(Ok(0))
        };

        let days = number(1)?;
        let hours = number(2)?;
        let minutes = number(3)?;
        let seconds = number(4)?;
        if hours > 23 || minutes > 59 || seconds > 59 {
            return Err(invalid());
        }

        let ticks = match caps.get(5) {
            Some(fraction) => {
                let padded = format!("{:0<7}", fraction.as_str());
                padded.parse::<u64>().map_err(|_| invalid())?
            }
            None => 0,
        };

        let whole = days * 86_400 + hours * 3_600 + minutes * 60 + seconds;
        Ok(Duration::from_secs(whole)
            + Duration::from_nanos((ticks % TICKS_PER_SECOND) * NANOS_PER_TICK))
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }
}
