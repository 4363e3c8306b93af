//! Configuration management for the song processor.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Catalog settings
    pub catalog: CatalogConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// External tool settings
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,

    /// Job execution settings
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory searched for info files (relative to data directory or absolute)
    pub dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// External tool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to ffmpeg; empty means look it up on PATH
    #[serde(default)]
    pub ffmpeg_path: String,

    /// Path to ffprobe; empty means look it up on PATH
    #[serde(default)]
    pub ffprobe_path: String,
}

/// Job execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum encodes running at once
    pub max_concurrent_jobs: usize,

    /// Stop scheduling new jobs after the first failure
    pub stop_on_error: bool,

    /// Fixes report path (relative to data directory or absolute)
    pub fixes_file: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            stop_on_error: true,
            fixes_file: "fixes.txt".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            catalog: CatalogConfig {
                dir: "catalog".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            ffmpeg: FfmpegConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    fn under_data_dir(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }

    /// Get the path for the catalog directory
    pub fn catalog_dir(&self) -> PathBuf {
        self.under_data_dir(&self.catalog.dir)
    }

    /// Get the path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.under_data_dir(&self.logging.log_dir)
    }

    /// Get the path for the fixes report
    pub fn fixes_file(&self) -> PathBuf {
        self.under_data_dir(&self.processing.fixes_file)
    }

    /// Resolve ffmpeg, falling back to a PATH lookup
    pub fn ffmpeg_path(&self) -> Result<PathBuf> {
        resolve_tool(&self.ffmpeg.ffmpeg_path, "ffmpeg")
    }

    /// Resolve ffprobe, falling back to a PATH lookup
    pub fn ffprobe_path(&self) -> Result<PathBuf> {
        resolve_tool(&self.ffmpeg.ffprobe_path, "ffprobe")
    }
}

fn resolve_tool(configured: &str, name: &str) -> Result<PathBuf> {
    if !configured.trim().is_empty() {
        return Ok(PathBuf::from(configured));
    }

    let path = which::which(name).with_context(|| format!("{} not found on PATH", name))?;
    tracing::debug!(tool = name, path = %path.display(), "Resolved tool on PATH");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.root_dir, "data");
        assert_eq!(config.catalog.dir, "catalog");
        assert_eq!(config.processing.max_concurrent_jobs, 1);
        assert!(config.processing.stop_on_error);
        assert!(config.ffmpeg.ffmpeg_path.is_empty());
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.ffmpeg.ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg".to_string();
        original_config.processing.max_concurrent_jobs = 3;
        original_config.save(&config_path)?;

        assert!(config_path.exists());

        let loaded_config = Config::from_file(&config_path)?;
        assert_eq!(loaded_config.data.root_dir, original_config.data.root_dir);
        assert_eq!(loaded_config.ffmpeg.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(loaded_config.processing.max_concurrent_jobs, 3);

        Ok(())
    }

    #[test]
    fn test_optional_sections_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[data]
root_dir = "/srv/amq"

[catalog]
dir = "anime"

[logging]
log_dir = "logs"
default_level = "debug"
console = true
file = false
json_format = false
"#,
        )?;

        let config = Config::from_file(&config_path)?;
        assert_eq!(config.catalog_dir(), PathBuf::from("/srv/amq/anime"));
        assert_eq!(config.processing.fixes_file, "fixes.txt");
        assert!(config.ffmpeg.ffprobe_path.is_empty());

        Ok(())
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        // Should return default config without error
        assert_eq!(config.data.root_dir, "data");
    }

    #[test]
    fn test_path_resolution() {
        let mut config = Config::default();

        assert!(config.catalog_dir().ends_with("data/catalog"));
        assert!(config.log_dir().ends_with("data/logs"));
        assert!(config.fixes_file().ends_with("data/fixes.txt"));

        config.processing.fixes_file = "/tmp/fixes.txt".to_string();
        assert_eq!(config.fixes_file(), PathBuf::from("/tmp/fixes.txt"));
    }

    #[test]
    fn test_configured_tool_path_is_used_verbatim() -> Result<()> {
        let mut config = Config::default();
        config.ffmpeg.ffprobe_path = "/custom/ffprobe".to_string();
        assert_eq!(config.ffprobe_path()?, PathBuf::from("/custom/ffprobe"));
        Ok(())
    }
}
