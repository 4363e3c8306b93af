//! Catalog storage backed by JSON info files.
//!
//! Each anime lives in its own directory with an `info.amq` file; songs,
//! the source path and the probed video info are stored inside it.

use crate::models::{Anime, AnimeBase};
use crate::paths::{anime_directory_name, info_file, next_available_file, DataPaths};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for writing a freshly gathered anime
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveNewOptions {
    /// Create a `[year] name` directory for the anime inside the target directory
    pub add_name_directory: bool,
    /// Replace an existing info file
    pub allow_overwrite: bool,
    /// Write `info (n).amq` next to an existing info file instead of giving up
    pub create_duplicate_file: bool,
}

/// Loads and saves anime records
pub trait CatalogStore: Send + Sync {
    /// Load an anime; `None` if the file is absent or empty
    fn load(&self, path: &Path) -> Result<Option<Anime>>;

    /// Save an anime to its info path
    fn save(&self, anime: &Anime) -> Result<()>;

    /// Write a new anime into `dir`, returning the info file written (if any)
    fn save_new(&self, dir: &Path, anime: &AnimeBase, options: SaveNewOptions) -> Result<Option<PathBuf>>;

    /// Load every anime found beneath the catalog directory
    fn load_all(&self, paths: &DataPaths) -> Result<Vec<Anime>> {
        let mut animes = Vec::new();
        for file in paths.discover_info_files() {
            if let Some(anime) = self.load(&file)? {
                animes.push(anime);
            }
        }
        info!(count = animes.len(), catalog = %paths.catalog_dir().display(), "Catalog loaded");
        Ok(animes)
    }
}

/// Catalog store writing pretty-printed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCatalogStore;

impl JsonCatalogStore {
    pub fn new() -> Self {
        Self
    }
}

impl CatalogStore for JsonCatalogStore {
    fn load(&self, path: &Path) -> Result<Option<Anime>> {
        if !path.exists() {
            debug!(path = %path.display(), "Info file not found");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read info file: {}", path.display()))?;
        if content.trim().is_empty() {
            warn!(path = %path.display(), "Info file is empty");
            return Ok(None);
        }

        let mut anime: Anime = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse info file: {}", path.display()))?;

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join(path)
        };
        anime.set_info_path(absolute)?;

        debug!(path = %path.display(), anime_id = anime.id, songs = anime.songs.len(), "Loaded anime");
        Ok(Some(anime))
    }

    fn save(&self, anime: &Anime) -> Result<()> {
        let path = anime.info_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create anime directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(&anime.relativized())
            .context("Failed to serialize anime")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write info file: {}", path.display()))?;

        debug!(path = %path.display(), anime_id = anime.id, "Saved anime");
        Ok(())
    }

    fn save_new(&self, dir: &Path, anime: &AnimeBase, options: SaveNewOptions) -> Result<Option<PathBuf>> {
        let dir = if options.add_name_directory {
            dir.join(anime_directory_name(anime))
        } else {
            dir.to_path_buf()
        };

        let mut path = info_file(&dir);
        if path.exists() && !options.allow_overwrite {
            if !options.create_duplicate_file {
                info!(path = %path.display(), anime_id = anime.id, "Info file already exists, not overwriting");
                return Ok(None);
            }
            path = next_available_file(&path);
        }

        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join(path)
        };

        let record = Anime::new(&absolute, anime)?;
        self.save(&record)?;

        info!(path = %absolute.display(), anime_id = anime.id, name = %anime.name, "Created anime entry");
        Ok(Some(absolute))
    }
}
