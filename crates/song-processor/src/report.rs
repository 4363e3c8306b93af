//! Report of songs that still have to be submitted.

use chrono::{DateTime, Utc};
use shared::models::Anime;
use shared::scalars::{timespan, SongTypeAndPosition};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::time::Duration;

/// A not yet submitted song plus the other anime sharing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixEntry {
    pub anime_id: u32,
    pub anime_name: String,
    pub year: i32,
    pub song_type: SongTypeAndPosition,
    pub song_name: String,
    pub artist: String,
    pub start: Duration,
    pub end: Duration,
    /// Sorted ids of other anime with the same song
    pub also_in: Vec<u32>,
}

/// Collect every non-ignored song still at `NotSubmitted`.
///
/// Songs are shared when name and artist match exactly, or when listed
/// in a song's `also_in` ids.
pub fn export_fixes(animes: &[Anime]) -> Vec<FixEntry> {
    let mut shared_by: HashMap<(&str, &str), BTreeSet<u32>> = HashMap::new();
    for anime in animes {
        for song in anime.songs.iter().filter(|song| !song.should_ignore) {
            shared_by
                .entry((song.name.as_str(), song.artist.as_str()))
                .or_default()
                .insert(anime.id);
        }
    }

    let mut entries = Vec::new();
    for anime in animes {
        for song in &anime.songs {
            if song.should_ignore || !song.status.is_empty() {
                continue;
            }

            let mut others: BTreeSet<u32> = shared_by
                .get(&(song.name.as_str(), song.artist.as_str()))
                .cloned()
                .unwrap_or_default();
            others.extend(song.also_in.iter().copied());
            others.remove(&anime.id);

            entries.push(FixEntry {
                anime_id: anime.id,
                anime_name: anime.name.clone(),
                year: anime.year,
                song_type: song.song_type,
                song_name: song.name.clone(),
                artist: song.artist.clone(),
                start: song.start,
                end: song.end,
                also_in: others.into_iter().collect(),
            });
        }
    }

    entries
}

/// Human-readable form of the entries, grouped by anime
pub fn render_fixes(entries: &[FixEntry], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Fixes generated {}",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "{} song(s) not submitted", entries.len());

    let mut current = None;
    for entry in entries {
        if current != Some(entry.anime_id) {
            current = Some(entry.anime_id);
            let _ = writeln!(out);
            let _ = writeln!(out, "[{}] {} ({})", entry.anime_id, entry.anime_name, entry.year);
        }

        let timing = if entry.start.is_zero() {
            "no timestamp".to_string()
        } else {
            format!("{} - {}", timespan::format(entry.start), timespan::format(entry.end))
        };
        let _ = write!(
            out,
            "  {} \"{}\" by {} [{}]",
            entry.song_type.short_name(),
            entry.song_name,
            entry.artist,
            timing
        );
        if !entry.also_in.is_empty() {
            let ids: Vec<String> = entry.also_in.iter().map(u32::to_string).collect();
            let _ = write!(out, " also in: {}", ids.join(", "));
        }
        let _ = writeln!(out);
    }

    out
}
