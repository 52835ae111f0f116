use serde::{Deserialize, Serialize};

/// A single playable audio file.  The path is the identity; everything else is
/// read from tags at scan time and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Track {
    /// Numeric id from the catalog scan.  Not persisted by the store.
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub artist: String,
    pub path: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artwork_uri: String,
}

impl Track {
    /// "Title - Artist", the form used in notifications and toasts.
    pub fn display_line(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistWithTracks {
    pub playlist: Playlist,
    pub tracks: Vec<Track>,
}

/// Format milliseconds as `m:ss` (or `h:mm:ss` past the hour).
pub fn format_ms(ms: u64) -> String {
    let total = ms / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "0:00");
        assert_eq!(format_ms(61_500), "1:01");
        assert_eq!(format_ms(3_723_000), "1:02:03");
    }

    #[test]
    fn test_display_line_without_artist() {
        let t = Track {
            title: "Intro".into(),
            ..Default::default()
        };
        assert_eq!(t.display_line(), "Intro");
    }
}
