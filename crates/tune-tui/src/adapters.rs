//! List adapters: in-memory rows for the list screens, plus per-row dirty
//! tracking so the renderer only rebuilds rows that actually changed.

use std::collections::{BTreeSet, HashSet};

use tune_proto::track::{Playlist, Track};

/// What a tap on a row asks for; the screen decides what that means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Click(usize),
    LongClick(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistAction {
    Open(i64),
    ConfirmDelete(i64),
}

#[derive(Debug, Default)]
struct DirtyRows {
    rows: BTreeSet<usize>,
}

impl DirtyRows {
    fn mark(&mut self, row: usize) {
        self.rows.insert(row);
    }

    fn mark_all(&mut self, len: usize) {
        self.rows.extend(0..len);
    }

    fn take(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.rows).into_iter().collect()
    }
}

// ── TrackListAdapter ──────────────────────────────────────────────────────────

/// Read-only track rows with an externally driven highlight.
#[derive(Debug, Default)]
pub struct TrackListAdapter {
    tracks: Vec<Track>,
    highlight: Option<String>,
    dirty: DirtyRows,
}

impl TrackListAdapter {
    pub fn new(tracks: Vec<Track>) -> Self {
        let mut adapter = Self::default();
        adapter.set_tracks(tracks);
        adapter
    }

    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.dirty.mark_all(self.tracks.len());
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, row: usize) -> Option<&Track> {
        self.tracks.get(row)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Highlight the row whose path matches; only the old and new rows
    /// become dirty.
    pub fn set_highlight_path(&mut self, path: Option<&str>) {
        if self.highlight.as_deref() == path {
            return;
        }
        if let Some(old) = self.highlighted_row() {
            self.dirty.mark(old);
        }
        self.highlight = path.map(str::to_string);
        if let Some(new) = self.highlighted_row() {
            self.dirty.mark(new);
        }
    }

    pub fn highlighted_row(&self) -> Option<usize> {
        let path = self.highlight.as_deref()?;
        self.tracks.iter().position(|t| t.path == path)
    }

    pub fn is_highlighted(&self, row: usize) -> bool {
        match (&self.highlight, self.tracks.get(row)) {
            (Some(path), Some(track)) => track.path == *path,
            _ => false,
        }
    }

    pub fn click(&self, row: usize) -> Option<RowAction> {
        (row < self.tracks.len()).then_some(RowAction::Click(row))
    }

    pub fn long_click(&self, row: usize) -> Option<RowAction> {
        (row < self.tracks.len()).then_some(RowAction::LongClick(row))
    }

    pub fn take_dirty_rows(&mut self) -> Vec<usize> {
        self.dirty.take()
    }
}

// ── SelectTracksAdapter ───────────────────────────────────────────────────────

/// Multi-select rows, keyed by track path.
#[derive(Debug, Default)]
pub struct SelectTracksAdapter {
    tracks: Vec<Track>,
    selected: HashSet<String>,
    dirty: DirtyRows,
}

impl SelectTracksAdapter {
    pub fn new(tracks: Vec<Track>) -> Self {
        let mut dirty = DirtyRows::default();
        dirty.mark_all(tracks.len());
        Self {
            tracks,
            selected: HashSet::new(),
            dirty,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Flip one row.  Returns whether it is now selected.
    pub fn toggle(&mut self, row: usize) -> bool {
        let Some(track) = self.tracks.get(row) else {
            return false;
        };
        let now_selected = if self.selected.remove(&track.path) {
            false
        } else {
            self.selected.insert(track.path.clone());
            true
        };
        self.dirty.mark(row);
        now_selected
    }

    pub fn is_selected(&self, row: usize) -> bool {
        self.tracks
            .get(row)
            .is_some_and(|t| self.selected.contains(&t.path))
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Selected tracks in list order.
    pub fn selected_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| self.selected.contains(&t.path))
            .cloned()
            .collect()
    }

    pub fn take_dirty_rows(&mut self) -> Vec<usize> {
        self.dirty.take()
    }
}

// ── PlaylistListAdapter ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PlaylistListAdapter {
    playlists: Vec<Playlist>,
    dirty: DirtyRows,
}

impl PlaylistListAdapter {
    pub fn set_playlists(&mut self, playlists: Vec<Playlist>) {
        self.playlists = playlists;
        self.dirty.mark_all(self.playlists.len());
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn click(&self, row: usize) -> Option<PlaylistAction> {
        self.playlists.get(row).map(|p| PlaylistAction::Open(p.id))
    }

    pub fn long_click(&self, row: usize) -> Option<PlaylistAction> {
        self.playlists
            .get(row)
            .map(|p| PlaylistAction::ConfirmDelete(p.id))
    }

    pub fn take_dirty_rows(&mut self) -> Vec<usize> {
        self.dirty.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                title: format!("Song {}", i),
                artist: "Band".into(),
                path: format!("/m/{}.mp3", i),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_highlight_marks_only_old_and_new_rows() {
        let mut adapter = TrackListAdapter::new(tracks(5));
        assert_eq!(adapter.take_dirty_rows(), vec![0, 1, 2, 3, 4]);

        adapter.set_highlight_path(Some("/m/1.mp3"));
        assert_eq!(adapter.take_dirty_rows(), vec![1]);

        adapter.set_highlight_path(Some("/m/3.mp3"));
        assert_eq!(adapter.take_dirty_rows(), vec![1, 3]);
        assert_eq!(adapter.highlighted_row(), Some(3));
        assert!(adapter.is_highlighted(3));

        adapter.set_highlight_path(Some("/m/3.mp3"));
        assert!(adapter.take_dirty_rows().is_empty());

        adapter.set_highlight_path(Some("/elsewhere.mp3"));
        assert_eq!(adapter.take_dirty_rows(), vec![3]);
        assert_eq!(adapter.highlighted_row(), None);
    }

    #[test]
    fn test_clicks_out_of_range_are_ignored() {
        let adapter = TrackListAdapter::new(tracks(2));
        assert_eq!(adapter.click(1), Some(RowAction::Click(1)));
        assert_eq!(adapter.long_click(0), Some(RowAction::LongClick(0)));
        assert_eq!(adapter.click(2), None);
    }

    #[test]
    fn test_toggle_marks_one_row_and_keeps_list_order() {
        let mut adapter = SelectTracksAdapter::new(tracks(4));
        adapter.take_dirty_rows();

        assert!(adapter.toggle(3));
        assert!(adapter.toggle(0));
        assert_eq!(adapter.take_dirty_rows(), vec![0, 3]);

        let selected: Vec<String> = adapter
            .selected_tracks()
            .into_iter()
            .map(|t| t.path)
            .collect();
        assert_eq!(selected, vec!["/m/0.mp3", "/m/3.mp3"]);

        assert!(!adapter.toggle(3));
        assert_eq!(adapter.take_dirty_rows(), vec![3]);
        assert_eq!(adapter.selected_count(), 1);
        assert!(adapter.is_selected(0));
        assert!(!adapter.is_selected(3));
    }

    #[test]
    fn test_playlist_actions() {
        let mut adapter = PlaylistListAdapter::default();
        adapter.set_playlists(vec![
            Playlist {
                id: 4,
                name: "Gym".into(),
            },
            Playlist {
                id: 9,
                name: "Chill".into(),
            },
        ]);
        assert_eq!(adapter.click(1), Some(PlaylistAction::Open(9)));
        assert_eq!(adapter.long_click(0), Some(PlaylistAction::ConfirmDelete(4)));
        assert_eq!(adapter.click(2), None);
        assert_eq!(adapter.take_dirty_rows(), vec![0, 1]);
    }
}
