//! Metadata gatherer contract.
//!
//! A gatherer produces the plain [`AnimeBase`] shape for an anime id. Only
//! the local JSON implementation lives here.

use crate::models::AnimeBase;
use crate::scalars::SongType;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which song kinds a gatherer keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherOptions {
    pub add_openings: bool,
    pub add_endings: bool,
    pub add_inserts: bool,
    /// When false no songs are kept at all
    pub add_songs: bool,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            add_openings: true,
            add_endings: true,
            add_inserts: true,
            add_songs: true,
        }
    }
}

impl GatherOptions {
    pub fn keeps(&self, song_type: SongType) -> bool {
        self.add_songs
            && match song_type {
                SongType::Opening => self.add_openings,
                SongType::Ending => self.add_endings,
                SongType::Insert => self.add_inserts,
            }
    }

    /// Drop the songs these options exclude
    pub fn apply(&self, mut anime: AnimeBase) -> AnimeBase {
        anime
            .songs
            .retain(|song| self.keeps(song.song_type.song_type()));
        anime
    }
}

/// Source of anime metadata
#[async_trait]
pub trait MetadataGatherer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn get(&self, id: u32, options: GatherOptions) -> Result<AnimeBase>;
}

/// Gatherer reading `{id}.json` files in the [`AnimeBase`] shape
#[derive(Debug, Clone)]
pub struct JsonFileGatherer {
    dir: PathBuf,
}

impl JsonFileGatherer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl MetadataGatherer for JsonFileGatherer {
    fn name(&self) -> &str {
        "json"
    }

    async fn get(&self, id: u32, options: GatherOptions) -> Result<AnimeBase> {
        let path = self.file_for(id);
        debug!(gatherer = self.name(), path = %path.display(), "Reading anime metadata");

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read metadata file: {}", path.display()))?;
        let anime: AnimeBase = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse metadata file: {}", path.display()))?;

        if anime.id != id {
            bail!(
                "Metadata file {} describes anime {} instead of {}",
                path.display(),
                anime.id,
                id
            );
        }

        let total = anime.songs.len();
        let anime = options.apply(anime);
        info!(
            gatherer = self.name(),
            anime_id = id,
            name = %anime.name,
            songs = anime.songs.len(),
            filtered = total - anime.songs.len(),
            "Gathered anime metadata"
        );

        Ok(anime)
    }
}
