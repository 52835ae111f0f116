//! Playlist persistence on SQLite.
//!
//! One `PlaylistStore` is opened per process and handed around as a
//! [`SharedStore`].  Calls block, so the UI and the HTTP API run them on a
//! blocking worker.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::track::{Playlist, PlaylistWithTracks, Track};

pub type SharedStore = Arc<Mutex<PlaylistStore>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(i64),

    /// A previous holder of the shared handle panicked mid-operation.
    #[error("Store handle poisoned")]
    Poisoned,
}

/// Result of adding a track that may already be in the playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyMember,
}

pub struct PlaylistStore {
    conn: Connection,
}

impl PlaylistStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        // The daemon and the client each hold a connection to the same file
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracks (
                path TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                artwork_uri TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS playlist_track (
                playlist_id INTEGER NOT NULL REFERENCES playlists(id),
                path TEXT NOT NULL REFERENCES tracks(path),
                PRIMARY KEY (playlist_id, path)
            );",
        )
    }

    pub fn create_playlist(&self, name: &str) -> Result<i64, StoreError> {
        self.conn
            .execute("INSERT INTO playlists (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_playlists(&self) -> Result<Vec<Playlist>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM playlists ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Playlist {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>, StoreError> {
        let playlist = self
            .conn
            .query_row(
                "SELECT id, name FROM playlists WHERE id = ?1",
                params![playlist_id],
                |row| {
                    Ok(Playlist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(playlist)
    }

    /// `None` for an unknown id; an existing playlist with no members comes
    /// back with an empty track list.  Tracks are in insertion order.
    pub fn get_playlist_with_tracks(
        &self,
        playlist_id: i64,
    ) -> Result<Option<PlaylistWithTracks>, StoreError> {
        let Some(playlist) = self.get_playlist(playlist_id)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT t.path, t.title, t.artist, t.duration_ms, t.artwork_uri
             FROM playlist_track pt
             JOIN tracks t ON t.path = pt.path
             WHERE pt.playlist_id = ?1
             ORDER BY pt.rowid",
        )?;
        let rows = stmt.query_map(params![playlist_id], |row| {
            let duration: i64 = row.get(3)?;
            Ok(Track {
                id: 0,
                path: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                duration_ms: duration.max(0) as u64,
                artwork_uri: row.get(4)?,
            })
        })?;
        let tracks = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PlaylistWithTracks { playlist, tracks }))
    }

    /// 0 or 1, since (playlist, path) is the primary key.
    pub fn count_memberships(&self, playlist_id: i64, path: &str) -> Result<u32, StoreError> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM playlist_track WHERE playlist_id = ?1 AND path = ?2",
            params![playlist_id, path],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn add_track_to_playlist(
        &mut self,
        playlist_id: i64,
        track: &Track,
    ) -> Result<AddOutcome, StoreError> {
        let tx = self.conn.transaction()?;
        let outcome = add_in_tx(&tx, playlist_id, track)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Add many tracks at once.  Returns how many were not already members.
    pub fn add_tracks_to_playlist(
        &mut self,
        playlist_id: i64,
        tracks: &[Track],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        for track in tracks {
            if add_in_tx(&tx, playlist_id, track)? == AddOutcome::Added {
                added += 1;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Returns whether a row was removed; removing a non-member is a no-op.
    pub fn remove_track_from_playlist(
        &self,
        playlist_id: i64,
        path: &str,
    ) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM playlist_track WHERE playlist_id = ?1 AND path = ?2",
            params![playlist_id, path],
        )?;
        Ok(n > 0)
    }

    /// Associations go first, then the playlist row, in one transaction.
    pub fn delete_playlist(&mut self, playlist_id: i64) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_track WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        let n = tx.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
        tx.commit()?;
        Ok(n > 0)
    }
}

fn add_in_tx(
    tx: &rusqlite::Transaction<'_>,
    playlist_id: i64,
    track: &Track,
) -> Result<AddOutcome, StoreError> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM playlists WHERE id = ?1)",
        params![playlist_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::PlaylistNotFound(playlist_id));
    }

    let members: u32 = tx.query_row(
        "SELECT COUNT(*) FROM playlist_track WHERE playlist_id = ?1 AND path = ?2",
        params![playlist_id, track.path],
        |row| row.get(0),
    )?;
    if members > 0 {
        return Ok(AddOutcome::AlreadyMember);
    }

    tx.execute(
        "INSERT OR IGNORE INTO tracks (path, title, artist, duration_ms, artwork_uri)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            track.path,
            track.title,
            track.artist,
            track.duration_ms as i64,
            track.artwork_uri
        ],
    )?;
    tx.execute(
        "INSERT INTO playlist_track (playlist_id, path) VALUES (?1, ?2)",
        params![playlist_id, track.path],
    )?;
    Ok(AddOutcome::Added)
}

/// Lock the shared handle, mapping poisoning to a store error.
pub fn lock(store: &SharedStore) -> Result<std::sync::MutexGuard<'_, PlaylistStore>, StoreError> {
    store.lock().map_err(|_| StoreError::Poisoned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(path: &str) -> Track {
        Track {
            id: 7,
            title: "Song".into(),
            artist: "Band".into(),
            path: path.into(),
            duration_ms: 181_000,
            artwork_uri: "albumart:1".into(),
        }
    }

    #[test]
    fn test_second_handle_waits_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.db");
        let writer = PlaylistStore::open(&path).unwrap();
        let other = PlaylistStore::open(&path).unwrap();
        let timeout: i64 = other
            .conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 2000);

        writer.conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        let waiting = std::thread::spawn(move || other.create_playlist("Later"));
        std::thread::sleep(Duration::from_millis(200));
        writer.conn.execute_batch("COMMIT").unwrap();

        assert!(waiting.join().unwrap().is_ok());
        assert_eq!(writer.list_playlists().unwrap().len(), 1);
    }

    #[test]
    fn test_playlist_ids_increase() {
        let store = PlaylistStore::open_in_memory().unwrap();
        let a = store.create_playlist("Same").unwrap();
        let b = store.create_playlist("Same").unwrap();
        assert!(b > a);
        assert_eq!(store.list_playlists().unwrap().len(), 2);
    }

    #[test]
    fn test_track_row_is_shared_between_playlists() {
        let mut store = PlaylistStore::open_in_memory().unwrap();
        let a = store.create_playlist("A").unwrap();
        let b = store.create_playlist("B").unwrap();
        let t = track("/music/x.mp3");
        assert_eq!(store.add_track_to_playlist(a, &t).unwrap(), AddOutcome::Added);
        assert_eq!(store.add_track_to_playlist(b, &t).unwrap(), AddOutcome::Added);

        let loaded = store.get_playlist_with_tracks(b).unwrap().unwrap();
        assert_eq!(loaded.tracks[0].duration_ms, 181_000);
        assert_eq!(loaded.tracks[0].artwork_uri, "albumart:1");
        // numeric source id is not persisted
        assert_eq!(loaded.tracks[0].id, 0);
    }

    #[test]
    fn test_add_to_missing_playlist_is_rejected() {
        let mut store = PlaylistStore::open_in_memory().unwrap();
        let err = store
            .add_track_to_playlist(99, &track("/music/x.mp3"))
            .unwrap_err();
        assert!(matches!(err, StoreError::PlaylistNotFound(99)));
    }

    #[test]
    fn test_bulk_add_counts_only_new_members() {
        let mut store = PlaylistStore::open_in_memory().unwrap();
        let id = store.create_playlist("Mix").unwrap();
        store
            .add_track_to_playlist(id, &track("/music/1.mp3"))
            .unwrap();
        let added = store
            .add_tracks_to_playlist(
                id,
                &[track("/music/1.mp3"), track("/music/2.mp3"), track("/music/3.mp3")],
            )
            .unwrap();
        assert_eq!(added, 2);
        let loaded = store.get_playlist_with_tracks(id).unwrap().unwrap();
        let paths: Vec<_> = loaded.tracks.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, ["/music/1.mp3", "/music/2.mp3", "/music/3.mp3"]);
    }
}
