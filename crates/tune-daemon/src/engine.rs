//! The playback engine seam.  The engine owns decoding, buffering, the play
//! order (including shuffle) and repeat handling; the session coordinator
//! only tells it what to do and listens to what it reports.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tune_proto::protocol::RepeatMode;

/// Why the engine stopped playing a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Stop,
    Quit,
    Error,
    Redirect,
    Unknown,
}

impl EndReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "eof" => EndReason::Eof,
            "stop" => EndReason::Stop,
            "quit" => EndReason::Quit,
            "error" => EndReason::Error,
            "redirect" => EndReason::Redirect,
            _ => EndReason::Unknown,
        }
    }
}

/// Unsolicited engine notifications, delivered in the order the engine
/// raised them.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine switched to `path` (next, previous, auto-advance, jump).
    FileStarted { path: String },
    /// The current file is decoded and playing (or paused) from here on.
    Ready,
    PauseChanged(bool),
    /// `true` when the engine has nothing left to play.
    IdleChanged(bool),
    Position(u64),
    Duration(u64),
    EndFile {
        reason: EndReason,
        error: Option<String>,
    },
    /// The engine process went away.
    Exited,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("playback engine unavailable: {0}")]
    Unavailable(String),
    #[error("playback engine command failed: {0}")]
    Command(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Command(e.to_string())
    }
}

#[async_trait]
pub trait PlaybackEngine: Send {
    /// Make sure the engine is running, (re)starting it if needed.  Events
    /// go to `events` from then on.
    async fn ensure_started(
        &mut self,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(), EngineError>;

    /// Liveness check for the heartbeat; must not block for long.
    fn is_alive(&mut self) -> bool;

    /// Replace the engine's queue and start playing `paths[start_index]`.
    async fn load(&mut self, paths: &[String], start_index: usize) -> Result<(), EngineError>;

    async fn set_paused(&mut self, paused: bool) -> Result<(), EngineError>;

    async fn next(&mut self) -> Result<(), EngineError>;

    async fn previous(&mut self) -> Result<(), EngineError>;

    /// Play the queue entry for `path`, wherever the engine's order put it.
    async fn jump_to(&mut self, path: &str) -> Result<(), EngineError>;

    async fn seek(&mut self, position_ms: u64) -> Result<(), EngineError>;

    async fn set_shuffle(&mut self, shuffle: bool) -> Result<(), EngineError>;

    async fn set_repeat(&mut self, repeat: RepeatMode) -> Result<(), EngineError>;

    /// Stop and drop the engine's queue.
    async fn stop(&mut self) -> Result<(), EngineError>;

    /// Release the engine for good.
    async fn shutdown(&mut self);
}
