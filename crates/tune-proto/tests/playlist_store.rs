//! Playlist store behaviour against an on-disk database.

use tune_proto::store::{AddOutcome, PlaylistStore};
use tune_proto::track::Track;

fn track(name: &str) -> Track {
    Track {
        id: 1,
        title: name.to_string(),
        artist: "Artist".to_string(),
        path: format!("/music/{}.mp3", name),
        duration_ms: 200_000,
        artwork_uri: "albumart:42".to_string(),
    }
}

fn open() -> (tempfile::TempDir, PlaylistStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = PlaylistStore::open(&dir.path().join("db").join("playlists.db")).unwrap();
    (dir, store)
}

#[test]
fn test_double_add_reports_already_member() {
    let (_dir, mut store) = open();
    let p = store.create_playlist("Road trip").unwrap();
    let t = track("a");

    assert_eq!(store.add_track_to_playlist(p, &t).unwrap(), AddOutcome::Added);
    assert_eq!(
        store.add_track_to_playlist(p, &t).unwrap(),
        AddOutcome::AlreadyMember
    );
    assert_eq!(store.count_memberships(p, &t.path).unwrap(), 1);
}

#[test]
fn test_delete_playlist_removes_associations() {
    let (_dir, mut store) = open();
    let p = store.create_playlist("Old").unwrap();
    let keep = store.create_playlist("Keep").unwrap();
    store.add_track_to_playlist(p, &track("a")).unwrap();
    store.add_track_to_playlist(p, &track("b")).unwrap();
    store.add_track_to_playlist(keep, &track("a")).unwrap();

    assert!(store.delete_playlist(p).unwrap());
    assert!(store.get_playlist_with_tracks(p).unwrap().is_none());
    assert_eq!(store.count_memberships(p, "/music/a.mp3").unwrap(), 0);
    assert_eq!(store.count_memberships(p, "/music/b.mp3").unwrap(), 0);

    // other playlists are untouched
    let kept = store.get_playlist_with_tracks(keep).unwrap().unwrap();
    assert_eq!(kept.tracks.len(), 1);

    // deleting again is harmless
    assert!(!store.delete_playlist(p).unwrap());
}

#[test]
fn test_remove_is_idempotent() {
    let (_dir, mut store) = open();
    let p = store.create_playlist("P").unwrap();
    let t = track("a");
    store.add_track_to_playlist(p, &t).unwrap();

    assert!(store.remove_track_from_playlist(p, &t.path).unwrap());
    assert_eq!(store.count_memberships(p, &t.path).unwrap(), 0);
    assert!(!store.remove_track_from_playlist(p, &t.path).unwrap());
    assert_eq!(store.count_memberships(p, &t.path).unwrap(), 0);
}

#[test]
fn test_gym_scenario() {
    let (_dir, mut store) = open();
    let gym = store.create_playlist("Gym").unwrap();
    let empty = store.get_playlist_with_tracks(gym).unwrap().unwrap();
    assert_eq!(empty.playlist.name, "Gym");
    assert!(empty.tracks.is_empty());

    let a = track("a");
    assert_eq!(store.add_track_to_playlist(gym, &a).unwrap(), AddOutcome::Added);
    assert_eq!(
        store.add_track_to_playlist(gym, &a).unwrap(),
        AddOutcome::AlreadyMember
    );
    assert_eq!(store.count_memberships(gym, &a.path).unwrap(), 1);

    store.remove_track_from_playlist(gym, &a.path).unwrap();
    let after = store.get_playlist_with_tracks(gym).unwrap().unwrap();
    assert!(after.tracks.is_empty());
}

#[test]
fn test_reopen_keeps_playlists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("playlists.db");
    let id = {
        let mut store = PlaylistStore::open(&path).unwrap();
        let id = store.create_playlist("Persisted").unwrap();
        store.add_track_to_playlist(id, &track("a")).unwrap();
        id
    };

    let store = PlaylistStore::open(&path).unwrap();
    let loaded = store.get_playlist_with_tracks(id).unwrap().unwrap();
    assert_eq!(loaded.playlist.name, "Persisted");
    assert_eq!(loaded.tracks[0].title, "a");
}
