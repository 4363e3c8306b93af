//! File path utilities for the catalog and encoder outputs.
//!
//! This module centralizes how info files, anime directories and encoded
//! output files are named, and how filesystem-invalid characters are removed.

use crate::models::AnimeBase;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File name of an anime's catalog entry
pub const INFO_FILE_NAME: &str = "info.amq";

/// Characters that are invalid in a file name on at least one platform
const INVALID_FILE_NAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// File path manager for data files
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
    catalog: PathBuf,
}

impl DataPaths {
    /// Create a new DataPaths with the given root and catalog directories
    pub fn new(root: impl AsRef<Path>, catalog: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            catalog: catalog.as_ref().to_path_buf(),
        }
    }

    /// Get the root data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the directory holding anime directories and their info files
    pub fn catalog_dir(&self) -> &Path {
        &self.catalog
    }

    /// Find every info file beneath the catalog directory, sorted by path
    pub fn discover_info_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.catalog)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable catalog entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == INFO_FILE_NAME)
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    /// Create all necessary directories
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.root, &self.catalog] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Info file path inside an anime directory
pub fn info_file(dir: &Path) -> PathBuf {
    dir.join(INFO_FILE_NAME)
}

/// Directory name for a newly gathered anime: `[year] name`
pub fn anime_directory_name(anime: &AnimeBase) -> String {
    sanitize_file_name(&format!("[{}] {}", anime.year, anime.name))
}

/// Output path of an anime's mp3 clip: `[id] name.mp3`
pub fn audio_output_path(dir: &Path, anime_id: u32, song_name: &str) -> PathBuf {
    dir.join(sanitize_file_name(&format!("[{}] {}.mp3", anime_id, song_name)))
}

/// Output path of an anime's video clip: `[id] name [res]p.webm`
pub fn video_output_path(dir: &Path, anime_id: u32, song_name: &str, resolution: u32) -> PathBuf {
    dir.join(sanitize_file_name(&format!(
        "[{}] {} [{}p].webm",
        anime_id, song_name, resolution
    )))
}

/// Remove filesystem-invalid characters from a file name
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !INVALID_FILE_NAME_CHARS.contains(c) && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// First path of the form `stem (n).ext` that does not exist yet
pub fn next_available_file(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
