//! ffmpeg command construction.
//!
//! Everything here is pure: jobs describe their inputs, stream mapping,
//! codec settings and filters as data, and [`JobArgs`] renders them into
//! an argument vector or a printable command line.

use crate::error::ConfigurationError;
use shared::models::VideoInfo;
use shared::scalars::{AspectRatio, VolumeModifier};
use std::fmt;
use std::path::PathBuf;

/// Ordered set of `-key value` pairs; an empty value renders as a bare flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap(Vec<(String, String)>);

impl ArgMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ArgMap::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder form for a valueless flag
    pub fn flag(self, key: impl Into<String>) -> Self {
        self.with(key, String::new())
    }

    /// Set `key`, keeping its original position if it was already present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Filter syntax: `k1=v1,k2=v2`
    fn filter_chain(&self) -> String {
        self.iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.to_string()
                } else {
                    format!("{}={}", key, value)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArgMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ArgMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// One input file with the arguments that precede its `-i`
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub path: PathBuf,
    pub args: ArgMap,
}

impl JobInput {
    pub fn new(path: impl Into<PathBuf>, args: ArgMap) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }
}

/// Complete description of an ffmpeg invocation
#[derive(Debug, Clone, PartialEq)]
pub struct JobArgs {
    pub global: ArgMap,
    pub inputs: Vec<JobInput>,
    /// Stream specifiers, one `-map` each
    pub mapping: Vec<String>,
    pub quality: ArgMap,
    pub audio_filters: ArgMap,
    pub video_filters: ArgMap,
    pub output: PathBuf,
}

enum Token {
    Plain(String),
    Quoted(String),
}

impl JobArgs {
    fn tokens(&self) -> Vec<Token> {
        fn push_map(tokens: &mut Vec<Token>, map: &ArgMap) {
            for (key, value) in map.iter() {
                tokens.push(Token::Plain(format!("-{}", key)));
                if !value.is_empty() {
                    tokens.push(Token::Plain(value.to_string()));
                }
            }
        }

        let mut tokens = Vec::new();
        push_map(&mut tokens, &self.global);

        for input in &self.inputs {
            push_map(&mut tokens, &input.args);
            tokens.push(Token::Plain("-i".to_string()));
            tokens.push(Token::Quoted(input.path.to_string_lossy().into_owned()));
        }

        for spec in &self.mapping {
            tokens.push(Token::Plain("-map".to_string()));
            tokens.push(Token::Plain(spec.clone()));
        }

        push_map(&mut tokens, &self.quality);

        if !self.audio_filters.is_empty() {
            tokens.push(Token::Plain("-filter:a".to_string()));
            tokens.push(Token::Quoted(self.audio_filters.filter_chain()));
        }
        if !self.video_filters.is_empty() {
            tokens.push(Token::Plain("-filter:v".to_string()));
            tokens.push(Token::Quoted(self.video_filters.filter_chain()));
        }

        tokens.push(Token::Quoted(self.output.to_string_lossy().into_owned()));
        tokens
    }

    /// Argument vector for spawning the process (no shell quoting)
    pub fn to_args(&self) -> Vec<String> {
        self.tokens()
            .into_iter()
            .map(|token| match token {
                Token::Plain(text) | Token::Quoted(text) => text,
            })
            .collect()
    }
}

impl fmt::Display for JobArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .tokens()
            .into_iter()
            .map(|token| match token {
                Token::Plain(text) => text,
                Token::Quoted(text) => format!("\"{}\"", text),
            })
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// Arguments shared by every job.
///
/// stdout carries only `-progress` output and stderr only errors; `-n`
/// refuses to overwrite an existing output.
pub fn global_args() -> ArgMap {
    ArgMap::new()
        .flag("hide_banner")
        .flag("nostdin")
        .flag("n")
        .with("v", "level+error")
        .flag("nostats")
        .with("progress", "pipe:1")
}

/// Volume adjustment, if any
pub fn audio_filters(volume: Option<VolumeModifier>) -> ArgMap {
    match volume {
        Some(modifier) => ArgMap::new().with("volume", modifier.to_string()),
        None => ArgMap::new(),
    }
}

/// Scaling chain needed to bring the source to `target` lines.
///
/// Empty when the source already has the target height, square pixels and
/// the wanted display aspect ratio.
pub fn video_filters(
    info: &VideoInfo,
    target: u32,
    override_dar: Option<AspectRatio>,
) -> Result<ArgMap, ConfigurationError> {
    let square_pixels = info.sample_aspect_ratio == Some(AspectRatio::SQUARE);
    let dar_changes = override_dar.is_some() && override_dar != info.display_aspect_ratio;
    if info.height == target && square_pixels && !dar_changes {
        return Ok(ArgMap::new());
    }

    let dar = override_dar
        .or(info.display_aspect_ratio)
        .ok_or(ConfigurationError::MissingAspectRatio { resolution: target })?;

    let mut width = (target as f64 * dar.ratio()).round() as u32;
    if width % 2 == 1 {
        width += 1;
    }

    Ok(ArgMap::new()
        .with("setsar", AspectRatio::SQUARE.filter_value())
        .with("setdar", dar.filter_value())
        .with("scale", format!("{}:{}", width, target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(height: u32, sar: Option<AspectRatio>, dar: Option<AspectRatio>) -> VideoInfo {
        VideoInfo {
            codec_name: Some("h264".to_string()),
            width: 1920,
            height,
            sample_aspect_ratio: sar,
            display_aspect_ratio: dar,
            duration: None,
            pix_fmt: None,
            bit_rate: None,
        }
    }

    fn ratio(width: u32, height: u32) -> AspectRatio {
        AspectRatio::new(width, height).unwrap()
    }

    #[test]
    fn test_video_filters_scale_down() {
        let source = info(1080, Some(AspectRatio::SQUARE), Some(ratio(16, 9)));
        let filters = video_filters(&source, 480, None).unwrap();

        assert_eq!(filters.get("setsar"), Some("1/1"));
        assert_eq!(filters.get("setdar"), Some("16/9"));
        assert_eq!(filters.get("scale"), Some("854:480"));
        assert_eq!(filters.filter_chain(), "setsar=1/1,setdar=16/9,scale=854:480");
    }

    #[test]
    fn test_video_filters_not_needed() {
        let source = info(720, Some(AspectRatio::SQUARE), Some(ratio(16, 9)));
        assert!(video_filters(&source, 720, None).unwrap().is_empty());
        assert!(video_filters(&source, 720, Some(ratio(16, 9))).unwrap().is_empty());
    }

    #[test]
    fn test_video_filters_triggers() {
        // anamorphic source at the target height
        let anamorphic = info(480, Some(ratio(32, 27)), Some(ratio(16, 9)));
        let filters = video_filters(&anamorphic, 480, None).unwrap();
        assert_eq!(filters.get("scale"), Some("854:480"));

        // unknown SAR counts as non-square
        let unknown_sar = info(480, None, Some(ratio(4, 3)));
        let filters = video_filters(&unknown_sar, 480, None).unwrap();
        assert_eq!(filters.get("scale"), Some("640:480"));

        // override differing from the source DAR
        let square = info(480, Some(AspectRatio::SQUARE), Some(ratio(16, 9)));
        let filters = video_filters(&square, 480, Some(ratio(4, 3))).unwrap();
        assert_eq!(filters.get("setdar"), Some("4/3"));
        assert_eq!(filters.get("scale"), Some("640:480"));
    }

    #[test]
    fn test_video_filters_missing_dar() {
        let source = info(1080, Some(AspectRatio::SQUARE), None);
        assert!(matches!(
            video_filters(&source, 480, None),
            Err(ConfigurationError::MissingAspectRatio { resolution: 480 })
        ));

        // an override stands in for the missing source value
        let filters = video_filters(&source, 480, Some(ratio(16, 9))).unwrap();
        assert_eq!(filters.get("scale"), Some("854:480"));
    }

    #[test]
    fn test_odd_width_rounds_up() {
        // 300 * 16/9 = 533.3 -> 533 -> 534
        let source = info(1080, Some(AspectRatio::SQUARE), Some(ratio(16, 9)));
        let filters = video_filters(&source, 300, None).unwrap();
        assert_eq!(filters.get("scale"), Some("534:300"));
    }

    #[test]
    fn test_arg_map_keeps_first_position() {
        let mut map = ArgMap::new().with("c:a", "libopus").with("b:a", "320k");
        map.insert("c:a", "libmp3lame");

        let pairs: Vec<(&str, &str)> = map.iter().collect();
        assert_eq!(pairs, vec![("c:a", "libmp3lame"), ("b:a", "320k")]);
        assert_eq!(map.len(), 2);
    }

    fn sample_args() -> JobArgs {
        JobArgs {
            global: ArgMap::new().flag("hide_banner").with("v", "level+error"),
            inputs: vec![
                JobInput::new(
                    "/catalog/fma/ep 01.mkv",
                    ArgMap::new().with("ss", "00:01:30").with("to", "00:03:00"),
                ),
                JobInput::new("/catalog/fma/clean.flac", ArgMap::new()),
            ],
            mapping: vec!["0:v:0".to_string(), "1:a:0".to_string()],
            quality: ArgMap::new().with("c:v", "libvpx-vp9").flag("shortest"),
            audio_filters: audio_filters(Some(VolumeModifier::Decibels(-3.0))),
            video_filters: ArgMap::new().with("scale", "854:480"),
            output: PathBuf::from("/catalog/fma/[5114] Again [480p].webm"),
        }
    }

    #[test]
    fn test_display_rendering() {
        assert_eq!(
            sample_args().to_string(),
            "-hide_banner -v level+error \
             -ss 00:01:30 -to 00:03:00 -i \"/catalog/fma/ep 01.mkv\" \
             -i \"/catalog/fma/clean.flac\" \
             -map 0:v:0 -map 1:a:0 \
             -c:v libvpx-vp9 -shortest \
             -filter:a \"volume=-3dB\" -filter:v \"scale=854:480\" \
             \"/catalog/fma/[5114] Again [480p].webm\""
        );
    }

    #[test]
    fn test_argument_vector() {
        let args = sample_args().to_args();
        assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("/catalog/fma/[5114] Again [480p].webm")
        );
        assert!(args.contains(&"/catalog/fma/ep 01.mkv".to_string()));
        assert!(args.contains(&"volume=-3dB".to_string()));
        assert!(!args.iter().any(|arg| arg.contains('"')));
    }

    #[test]
    fn test_global_args() {
        let args = JobArgs {
            global: global_args(),
            inputs: Vec::new(),
            mapping: Vec::new(),
            quality: ArgMap::new(),
            audio_filters: audio_filters(None),
            video_filters: ArgMap::new(),
            output: PathBuf::from("out.mp3"),
        };
        assert_eq!(
            args.to_string(),
            "-hide_banner -nostdin -n -v level+error -nostats -progress pipe:1 \"out.mp3\""
        );
    }
}
