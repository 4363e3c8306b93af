//! Parser for ffmpeg's `-progress` output.
//!
//! ffmpeg writes one `key=value` pair per line and closes every reporting
//! cycle with `progress=continue` (or `progress=end` for the last one).
//! [`ProgressParser`] accumulates the pairs of a cycle and yields one
//! [`Progress`] per sentinel.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Literal ffmpeg prints for values it cannot compute yet
const NOT_AVAILABLE: &str = "N/A";

static STREAM_QUALITY_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^stream_(\d+)_(\d+)_q$").expect("valid stream quality regex"));

#[derive(Debug, Error, PartialEq)]
pub enum ProgressParseError {
    #[error("Progress line is not a key=value pair: {0:?}")]
    MalformedLine(String),

    #[error("Unknown progress key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for progress key {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Frame,
    Fps,
    Bitrate,
    TotalSize,
    OutTimeUs,
    OutTimeMs,
    OutTime,
    DupFrames,
    DropFrames,
    Speed,
    Progress,
    StreamQuality { file: u32, stream: u32 },
}

impl FromStr for Key {
    type Err = ProgressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s {
            "frame" => Key::Frame,
            "fps" => Key::Fps,
            "bitrate" => Key::Bitrate,
            "total_size" => Key::TotalSize,
            "out_time_us" => Key::OutTimeUs,
            "out_time_ms" => Key::OutTimeMs,
            "out_time" => Key::OutTime,
            "dup_frames" => Key::DupFrames,
            "drop_frames" => Key::DropFrames,
            "speed" => Key::Speed,
            "progress" => Key::Progress,
            other => {
                let captures = STREAM_QUALITY_KEY
                    .captures(other)
                    .ok_or_else(|| ProgressParseError::UnknownKey(other.to_string()))?;
                let index = |i: usize| {
                    captures[i]
                        .parse::<u32>()
                        .map_err(|_| ProgressParseError::UnknownKey(other.to_string()))
                };
                Key::StreamQuality {
                    file: index(1)?,
                    stream: index(2)?,
                }
            }
        };
        Ok(key)
    }
}

/// One reporting cycle of an encode
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Progress {
    pub frame: u64,
    pub fps: f64,
    /// Output bitrate in kbit/s
    pub bitrate: f64,
    /// Bytes written so far
    pub total_size: u64,
    /// Position reached in the output
    pub out_time: Duration,
    pub dup_frames: u64,
    pub drop_frames: u64,
    /// Encode speed as a multiple of realtime
    pub speed: f64,
    /// Quantizer per `(input file, stream)`
    pub stream_quality: BTreeMap<(u32, u32), f64>,
    /// Set on the final cycle of an encode
    pub is_end: bool,
}

/// Line-oriented accumulator for ffmpeg progress output
#[derive(Debug, Default)]
pub struct ProgressParser {
    values: HashMap<Key, String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a record when the line closes a cycle.
    ///
    /// Unknown keys fail immediately. A failed cycle is discarded so the
    /// next cycle parses from a clean state.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Progress>, ProgressParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some((raw_key, value)) = line.split_once('=') else {
            self.values.clear();
            return Err(ProgressParseError::MalformedLine(line.to_string()));
        };
        let raw_key = raw_key.trim();
        let key = match raw_key.parse::<Key>() {
            Ok(key) => key,
            Err(e) => {
                self.values.clear();
                return Err(e);
            }
        };
        self.values.insert(key, value.trim().to_string());

        if key != Key::Progress {
            return Ok(None);
        }

        let values = std::mem::take(&mut self.values);
        build(&values).map(Some)
    }
}

fn build(values: &HashMap<Key, String>) -> Result<Progress, ProgressParseError> {
    let mut progress = Progress {
        frame: field(values, Key::Frame, "frame", parse_number)?,
        fps: field(values, Key::Fps, "fps", parse_number)?,
        bitrate: field(values, Key::Bitrate, "bitrate", |v| {
            parse_number(v.trim_end_matches("kbits/s"))
        })?,
        total_size: field(values, Key::TotalSize, "total_size", parse_number)?,
        out_time: Duration::ZERO,
        dup_frames: field(values, Key::DupFrames, "dup_frames", parse_number)?,
        drop_frames: field(values, Key::DropFrames, "drop_frames", parse_number)?,
        speed: field(values, Key::Speed, "speed", |v| parse_number(v.trim_end_matches('x')))?,
        stream_quality: BTreeMap::new(),
        is_end: false,
    };

    // out_time_ms carries microseconds as well
    progress.out_time = if values.contains_key(&Key::OutTimeUs) {
        field(values, Key::OutTimeUs, "out_time_us", parse_micros)?
    } else if values.contains_key(&Key::OutTimeMs) {
        field(values, Key::OutTimeMs, "out_time_ms", parse_micros)?
    } else {
        field(values, Key::OutTime, "out_time", parse_clock)?
    };

    for (key, value) in values {
        if let Key::StreamQuality { file, stream } = key {
            let name = format!("stream_{}_{}_q", file, stream);
            let quality = parse_value(&name, value, parse_number)?;
            progress.stream_quality.insert((*file, *stream), quality);
        }
    }

    let state = values.get(&Key::Progress).map(String::as_str).unwrap_or_default();
    progress.is_end = match state {
        "end" => true,
        "continue" => false,
        other => {
            return Err(ProgressParseError::InvalidValue {
                key: "progress".to_string(),
                value: other.to_string(),
            })
        }
    };

    Ok(progress)
}

fn field<T: Default>(
    values: &HashMap<Key, String>,
    key: Key,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ProgressParseError> {
    match values.get(&key) {
        Some(value) => parse_value(name, value, parse),
        None => Ok(T::default()),
    }
}

fn parse_value<T: Default>(
    name: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ProgressParseError> {
    if value == NOT_AVAILABLE {
        return Ok(T::default());
    }
    parse(value).ok_or_else(|| ProgressParseError::InvalidValue {
        key: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

/// Microsecond count; ffmpeg reports negative positions before the first frame
fn parse_micros(value: &str) -> Option<Duration> {
    let micros: i64 = value.trim().parse().ok()?;
    Some(Duration::from_micros(micros.max(0) as u64))
}

/// `[-]h:mm:ss.ffffff`
fn parse_clock(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, value) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    if negative {
        return Some(Duration::ZERO);
    }
    let fraction = Duration::try_from_secs_f64(seconds).ok()?;
    Some(Duration::from_secs(hours * 3600 + minutes * 60) + fraction)
}

/// Progress of one job as delivered to callers
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Length of the clip being produced
    pub expected_duration: Duration,
    pub output_path: PathBuf,
    pub progress: Progress,
}

impl ProgressEvent {
    /// Fraction complete in `0.0..=1.0`
    pub fn percentage(&self) -> f64 {
        if self.expected_duration.is_zero() {
            return 1.0;
        }
        let done = self.progress.out_time.as_secs_f64() / self.expected_duration.as_secs_f64();
        done.min(1.0)
    }

    /// Estimated time left at the current speed
    pub fn completion_eta(&self) -> Duration {
        let remaining = self.expected_duration.saturating_sub(self.progress.out_time);
        let speed = self.progress.speed.max(0.001);
        Duration::try_from_secs_f64(remaining.as_secs_f64() / speed).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLE: &str = "frame=240
fps=47.95
stream_0_0_q=28.0
bitrate=1843.2kbits/s
total_size=2306867
out_time_us=10010000
out_time_ms=10010000
out_time=00:00:10.010000
dup_frames=0
drop_frames=2
speed=2.01x
progress=continue
";

    fn feed(parser: &mut ProgressParser, text: &str) -> Vec<Result<Option<Progress>, ProgressParseError>> {
        text.lines().map(|line| parser.push_line(line)).collect()
    }

    #[test]
    fn test_full_cycle() {
        let mut parser = ProgressParser::new();
        let results = feed(&mut parser, CYCLE);

        let (last, rest) = results.split_last().unwrap();
        assert!(rest.iter().all(|r| matches!(r, Ok(None))));

        let progress = last.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(progress.frame, 240);
        assert_eq!(progress.fps, 47.95);
        assert_eq!(progress.bitrate, 1843.2);
        assert_eq!(progress.total_size, 2_306_867);
        assert_eq!(progress.out_time, Duration::from_millis(10_010));
        assert_eq!(progress.dup_frames, 0);
        assert_eq!(progress.drop_frames, 2);
        assert_eq!(progress.speed, 2.01);
        assert_eq!(progress.stream_quality.get(&(0, 0)), Some(&28.0));
        assert!(!progress.is_end);
    }

    #[test]
    fn test_one_record_per_cycle() {
        let mut parser = ProgressParser::new();
        let text = format!("{}{}", CYCLE, CYCLE.replace("progress=continue", "progress=end"));

        let records: Vec<Progress> = feed(&mut parser, &text)
            .into_iter()
            .filter_map(|r| r.unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert!(!records[0].is_end);
        assert!(records[1].is_end);
    }

    #[test]
    fn test_back_to_back_sentinels() {
        let mut parser = ProgressParser::new();
        parser.push_line("frame=12").unwrap();

        let first = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(first.frame, 12);

        let second = parser.push_line("progress=end").unwrap().unwrap();
        assert_eq!(
            second,
            Progress {
                is_end: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut parser = ProgressParser::new();
        parser.push_line("frame=1").unwrap();
        assert_eq!(
            parser.push_line("frames_per_minute=3"),
            Err(ProgressParseError::UnknownKey("frames_per_minute".to_string()))
        );

        // first line of a cycle too
        let mut parser = ProgressParser::new();
        assert!(matches!(
            parser.push_line("color=red"),
            Err(ProgressParseError::UnknownKey(_))
        ));

        // the discarded cycle does not leak into the next one
        let next = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(next.frame, 0);
    }

    #[test]
    fn test_not_available_values() {
        let mut parser = ProgressParser::new();
        let text = "frame=0
fps=N/A
bitrate=N/A
total_size=N/A
out_time_us=N/A
out_time_ms=N/A
out_time=N/A
speed=N/A
progress=continue";

        let progress = feed(&mut parser, text).pop().unwrap().unwrap().unwrap();
        assert_eq!(progress.bitrate, 0.0);
        assert_eq!(progress.speed, 0.0);
        assert_eq!(progress.total_size, 0);
        assert_eq!(progress.out_time, Duration::ZERO);
    }

    #[test]
    fn test_negative_out_time_clamps_to_zero() {
        let mut parser = ProgressParser::new();
        parser.push_line("out_time_us=-23220").unwrap();
        let progress = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(progress.out_time, Duration::ZERO);

        parser.push_line("out_time=-00:00:00.023220").unwrap();
        let progress = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(progress.out_time, Duration::ZERO);
    }

    #[test]
    fn test_out_time_clock_form() {
        let mut parser = ProgressParser::new();
        parser.push_line("  out_time = 1:02:03.500000 ").unwrap();
        let progress = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(progress.out_time, Duration::from_millis(3_723_500));
    }

    #[test]
    fn test_malformed_input() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.push_line("   "), Ok(None));
        assert!(matches!(
            parser.push_line("frame 12"),
            Err(ProgressParseError::MalformedLine(_))
        ));

        parser.push_line("frame=twelve").unwrap();
        assert!(matches!(
            parser.push_line("progress=continue"),
            Err(ProgressParseError::InvalidValue { .. })
        ));

        assert!(matches!(
            parser.push_line("progress=paused"),
            Err(ProgressParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_line_discards_cycle() {
        let mut parser = ProgressParser::new();
        parser.push_line("frame=240").unwrap();
        parser.push_line("out_time_us=5000000").unwrap();
        assert!(parser.push_line("garbage").is_err());

        let progress = parser.push_line("progress=continue").unwrap().unwrap();
        assert_eq!(progress.frame, 0);
        assert_eq!(progress.out_time, Duration::ZERO);
    }

    #[test]
    fn test_event_percentage_and_eta() {
        let event = ProgressEvent {
            expected_duration: Duration::from_secs(90),
            output_path: PathBuf::from("/catalog/fma/[5114] Again.mp3"),
            progress: Progress {
                out_time: Duration::from_secs(30),
                speed: 2.0,
                ..Default::default()
            },
        };
        assert!((event.percentage() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(event.completion_eta(), Duration::from_secs(30));

        let stalled = ProgressEvent {
            progress: Progress {
                out_time: Duration::from_secs(120),
                speed: 0.0,
                ..Default::default()
            },
            ..event
        };
        assert_eq!(stalled.percentage(), 1.0);
        assert_eq!(stalled.completion_eta(), Duration::ZERO);
    }
}
