//! Local track catalog: walks the configured music directories and reads tags.
//!
//! Scanning is slow on large libraries and does blocking IO.  Callers run it
//! off their event loop (`spawn_blocking`).

use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::track::Track;

pub const AUDIO_EXTENSIONS: [&str; 10] = [
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "wma", "aiff", "aif",
];

pub const UNKNOWN_ARTIST: &str = "<unknown>";

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// Every audio file under `root`.  Unreadable directories are skipped, a
/// missing root yields nothing.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("skipping {}: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_audio_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort_unstable();
    files
}

/// Scan all roots and return tracks sorted by title, then path.  Never fails:
/// no directories or no audio simply means an empty list.
pub fn scan_library(roots: &[PathBuf]) -> Vec<Track> {
    let mut tracks: Vec<Track> = roots
        .iter()
        .flat_map(|root| collect_audio_files(root))
        .map(|path| read_track(&path))
        .collect();
    tracks.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.path.cmp(&b.path))
    });
    tracks.dedup_by(|a, b| a.path == b.path);
    debug!("catalog scan found {} tracks", tracks.len());
    tracks
}

/// Build a track from tags, falling back to the file name when the file has
/// no readable tags.
pub fn read_track(path: &Path) -> Track {
    let path_str = path.to_string_lossy().to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());
    let folder = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut title = None;
    let mut artist = None;
    let mut album = None;
    let mut duration_ms = 0;

    match Probe::open(path).and_then(|p| p.read()) {
        Ok(tagged) => {
            duration_ms = tagged.properties().duration().as_millis() as u64;
            if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                let text = |key: &ItemKey| {
                    tag.get_string(key)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                };
                title = text(&ItemKey::TrackTitle);
                artist = text(&ItemKey::TrackArtist);
                album = text(&ItemKey::AlbumTitle);
            }
        }
        Err(e) => debug!("no tags for {}: {}", path.display(), e),
    }

    let artist = artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = album.unwrap_or(folder);
    Track {
        id: track_id(&path_str),
        title: title.unwrap_or(stem),
        artwork_uri: artwork_uri(&artist, &album),
        artist,
        path: path_str,
        duration_ms,
    }
}

pub fn track_id(path: &str) -> u64 {
    fnv1a(path.as_bytes())
}

/// `albumart:<album id>`; the same album by the same artist always maps to
/// the same reference.
pub fn artwork_uri(artist: &str, album: &str) -> String {
    let mut key = Vec::with_capacity(artist.len() + album.len() + 1);
    key.extend_from_slice(artist.as_bytes());
    key.push(0);
    key.extend_from_slice(album.as_bytes());
    format!("albumart:{:016x}", fnv1a(&key))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Indices of tracks whose title or artist contains `query`, ignoring case.
/// An empty query matches everything.
pub fn filter_tracks(tracks: &[Track], query: &str) -> Vec<usize> {
    let needle = query.trim().to_lowercase();
    tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            needle.is_empty()
                || t.title.to_lowercase().contains(&needle)
                || t.artist.to_lowercase().contains(&needle)
        })
        .map(|(i, _)| i)
        .collect()
}
