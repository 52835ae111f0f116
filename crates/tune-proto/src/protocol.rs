use serde::{Deserialize, Serialize};

use crate::track::Track;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The client checks this on connect and refuses to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Replace the whole queue and start at `start_index`.
    LoadQueue {
        tracks: Vec<Track>,
        start_index: usize,
    },
    Play,
    Pause,
    TogglePause,
    Next,
    Previous,
    Seek { position_ms: u64 },
    JumpTo { index: usize },
    ToggleShuffle,
    ToggleRepeat,
    Stop,
    GetState,
}

/// Messages sent from daemon to client (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full session snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: SessionState,
    },
    State {
        state: SessionState,
    },
    /// Now-playing notification refresh; `None` clears it (empty session).
    NowPlaying {
        notification: Option<NowPlaying>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Transport status as seen by the session coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    Idle, // nothing loaded / explicitly stopped
    Preparing, // queue handed to the engine, waiting for the first file
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    /// Off -> One -> All -> Off.
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}

/// Health of the playback engine process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineHealth {
    /// Engine does not exist yet (before first use).
    #[default]
    Absent,
    Starting,
    Running,
    /// Process exited or its socket closed.
    Dead,
}

impl EngineHealth {
    /// Short label for the status bar.
    pub fn badge_label(&self) -> Option<&str> {
        match self {
            EngineHealth::Absent | EngineHealth::Running => None,
            EngineHealth::Starting => Some("INIT"),
            EngineHealth::Dead => Some("DEAD"),
        }
    }
}

/// Full playback session.  `rev` is a monotonically increasing counter
/// incremented every time the session changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub queue: Vec<Track>,
    pub current_index: Option<usize>,
    pub status: TransportStatus,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    #[serde(default)]
    pub position_ms: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub engine_health: EngineHealth,
    /// Last playback failure (e.g. an unreadable file).  Cleared on the next
    /// successful start.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SessionState {
    /// Track at the current index, or `None` for an empty queue.  Callers
    /// treat `None` as "leave the view alone".
    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.queue.get(i))
    }

    pub fn is_playing(&self) -> bool {
        self.status == TransportStatus::Playing
    }

    /// Queue position of `path`.  The engine reports files, not indices, and
    /// its own order diverges from ours once shuffle is on.
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.queue.iter().position(|t| t.path == path)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlayPauseIcon {
    Play,
    Pause,
}

/// Content of the now-playing notification.  `icon` is the action the button
/// performs, so a playing session shows `Pause`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub icon: PlayPauseIcon,
}

impl NowPlaying {
    pub fn from_state(state: &SessionState) -> Option<Self> {
        let track = state.current_track()?;
        let icon = if state.is_playing() {
            PlayPauseIcon::Pause
        } else {
            PlayPauseIcon::Play
        };
        Some(Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            icon,
        })
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

/// Largest frame body either side accepts.  A peer announcing more is
/// dropped rather than buffered.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Pull every complete frame out of `buf`, leaving any partial tail in place.
pub fn drain_frames(buf: &mut Vec<u8>) -> anyhow::Result<Vec<Message>> {
    let mut out = Vec::new();
    while buf.len() >= 4 {
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
        }
        if buf.len() < 4 + len {
            break;
        }
        let (msg, consumed) = Message::decode(buf)?;
        buf.drain(..consumed);
        out.push(msg);
    }
    Ok(out)
}
