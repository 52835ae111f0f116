/// DaemonCore: the playback session coordinator.
///
/// Single-owner event loop for the session.  Client commands (socket, HTTP)
/// arrive as `DaemonEvent`s, engine notifications arrive on their own
/// channel; both are handled one at a time, in arrival order, and nothing
/// else touches the engine or the session state.
///
/// After every handled input the loop compares the transport status and the
/// current track with what they were before.  If either changed, the
/// now-playing notification is refreshed exactly once and clients get a
/// `StateUpdated`.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tune_proto::config::{PlaybackConfig, PrepareErrorPolicy};
use tune_proto::protocol::{Command, EngineHealth, RepeatMode, SessionState, TransportStatus};
use tune_proto::state::StateManager;
use tune_proto::track::Track;

use crate::engine::{EndReason, EngineError, EngineEvent, PlaybackEngine};
use crate::notify::NowPlayingPublisher;
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// Inputs into the DaemonCore loop other than engine events.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Heartbeat: check engine liveness.
    HeartbeatTick,
    Shutdown,
}

/// What a refresh-worthy transition is made of.
type TransitionKey = (TransportStatus, Option<String>);

fn transition_key(state: &SessionState) -> TransitionKey {
    (state.status, state.current_track().map(|t| t.path.clone()))
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<E: PlaybackEngine> {
    playback: PlaybackConfig,
    state_manager: Arc<StateManager>,
    engine: E,
    engine_tx: mpsc::Sender<EngineEvent>,
    engine_rx: mpsc::Receiver<EngineEvent>,
    /// Own sender, for the heartbeat task.
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    now_playing: NowPlayingPublisher,
    engine_paused: bool,
    /// Set by a (re)load until the engine reports the first file; idle
    /// notifications from tearing down the previous queue are ignored.
    awaiting_start: bool,
    /// Set when a failed file halted the session; engine transport events
    /// are ignored until the next load.
    halted: bool,
    /// Whole seconds of the last broadcast position, to throttle updates.
    last_position_secs: Option<u64>,
}

impl<E: PlaybackEngine> DaemonCore<E> {
    pub fn new(
        playback: PlaybackConfig,
        engine: E,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::channel(256);
        Self {
            playback,
            state_manager: Arc::new(StateManager::new()),
            engine,
            engine_tx,
            engine_rx,
            event_tx,
            now_playing: NowPlayingPublisher::new(broadcast_tx.clone()),
            broadcast_tx,
            engine_paused: false,
            awaiting_start: false,
            halted: false,
            last_position_secs: None,
        }
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// has gone away.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("DaemonCore: event channel closed, shutting down");
                        break;
                    }
                    Some(DaemonEvent::Shutdown) => {
                        info!("DaemonCore: shutdown requested");
                        break;
                    }
                    Some(DaemonEvent::ClientCommand(cmd)) => self.on_command(cmd).await,
                    Some(DaemonEvent::HeartbeatTick) => self.on_heartbeat().await,
                },
                Some(evt) = self.engine_rx.recv() => self.on_engine_event(evt).await,
            }
        }

        self.cleanup().await;
        Ok(())
    }

    pub async fn on_command(&mut self, cmd: Command) {
        info!("DaemonCore: command {}", describe(&cmd));
        let before = self.current_key().await;
        if let Err(e) = self.handle_command(cmd).await {
            error!("DaemonCore: command error: {}", e);
            self.report_error(e.to_string()).await;
        }
        self.finish(before, true).await;
    }

    pub async fn on_engine_event(&mut self, evt: EngineEvent) {
        let before = self.current_key().await;
        let changed = self.handle_engine_event(evt).await;
        self.finish(before, changed).await;
    }

    async fn on_heartbeat(&mut self) {
        let before = self.current_key().await;
        let state = self.state_manager.get_state().await;
        if state.engine_health == EngineHealth::Running && !self.engine.is_alive() {
            warn!("DaemonCore: heartbeat: playback engine died");
            self.engine_lost().await;
            self.finish(before, true).await;
        }
    }

    async fn current_key(&self) -> TransitionKey {
        let state = self.state_manager.arc();
        let guard = state.read().await;
        transition_key(&guard)
    }

    /// Refresh the notification once if the transition key moved, then tell
    /// clients about the new state.
    async fn finish(&mut self, before: TransitionKey, state_changed: bool) {
        let state = self.state_manager.get_state().await;
        let transitioned = transition_key(&state) != before;
        if transitioned {
            debug!("DaemonCore: transition {:?} → {:?}", before, transition_key(&state));
            self.now_playing.refresh(&state);
        }
        if transitioned || state_changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn report_error(&mut self, message: String) {
        self.state_manager.set_error(Some(message.clone())).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    // ── engine management ─────────────────────────────────────────────────────

    /// Start the engine if it is not running.  Returns `true` when it was
    /// (re)started, in which case it has no queue loaded.
    async fn ensure_engine(&mut self) -> Result<bool, EngineError> {
        if self.engine.is_alive() {
            return Ok(false);
        }
        self.state_manager
            .set_engine_health(EngineHealth::Starting)
            .await;
        if let Err(e) = self.engine.ensure_started(self.engine_tx.clone()).await {
            warn!("DaemonCore: failed to start playback engine: {}", e);
            self.state_manager.set_engine_health(EngineHealth::Dead).await;
            return Err(e);
        }
        self.state_manager
            .set_engine_health(EngineHealth::Running)
            .await;
        self.engine_paused = false;

        let state = self.state_manager.get_state().await;
        self.engine.set_shuffle(state.shuffle).await?;
        self.engine.set_repeat(state.repeat).await?;
        Ok(true)
    }

    async fn engine_lost(&mut self) {
        self.state_manager.set_engine_health(EngineHealth::Dead).await;
        let state = self.state_manager.get_state().await;
        if state.status != TransportStatus::Idle {
            self.state_manager.set_status(TransportStatus::Idle).await;
            self.report_error("Playback engine exited".to_string()).await;
        }
        self.awaiting_start = false;
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> Result<(), EngineError> {
        match cmd {
            Command::LoadQueue {
                tracks,
                start_index,
            } => self.load_queue(tracks, start_index).await?,
            Command::Play => self.play().await?,
            Command::Pause => self.pause().await?,
            Command::TogglePause => {
                if self.state_manager.get_state().await.is_playing() {
                    self.pause().await?
                } else {
                    self.play().await?
                }
            }
            Command::Next => self.step(true).await?,
            Command::Previous => self.step(false).await?,
            Command::Seek { position_ms } => {
                if self.prepare_transport().await? {
                    self.engine.seek(position_ms).await?;
                }
            }
            Command::JumpTo { index } => self.jump_to(index).await?,
            Command::ToggleShuffle => {
                let shuffle = !self.state_manager.get_state().await.shuffle;
                if self.engine.is_alive() {
                    self.engine.set_shuffle(shuffle).await?;
                }
                self.state_manager.set_shuffle(shuffle).await;
            }
            Command::ToggleRepeat => {
                let repeat = self.state_manager.get_state().await.repeat.next();
                if self.engine.is_alive() {
                    self.engine.set_repeat(repeat).await?;
                }
                self.state_manager.set_repeat(repeat).await;
            }
            Command::Stop => self.stop().await?,
            Command::GetState => {
                // State is broadcast after every command anyway
            }
        }
        Ok(())
    }

    /// Replace the whole session.  Whatever was playing before is dropped.
    async fn load_queue(&mut self, tracks: Vec<Track>, start_index: usize) -> Result<(), EngineError> {
        if tracks.is_empty() {
            return self.stop().await;
        }
        let start = if start_index < tracks.len() {
            start_index
        } else {
            warn!(
                "DaemonCore: start index {} out of range for {} tracks, using 0",
                start_index,
                tracks.len()
            );
            0
        };
        self.state_manager.load_queue(tracks, start).await;
        self.start_engine_at(start).await
    }

    /// Hand the current queue to the engine, starting at `index`.
    async fn start_engine_at(&mut self, index: usize) -> Result<(), EngineError> {
        let state = self.state_manager.get_state().await;
        let paths: Vec<String> = state.queue.iter().map(|t| t.path.clone()).collect();
        self.state_manager.set_status(TransportStatus::Preparing).await;
        self.halted = false;
        self.awaiting_start = true;
        self.last_position_secs = None;

        let result = match self.ensure_engine().await {
            Ok(_) => self.engine.load(&paths, index).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.awaiting_start = false;
            self.state_manager.set_status(TransportStatus::Idle).await;
            return Err(e);
        }
        Ok(())
    }

    /// Common guard for transport commands: `false` means there is nothing
    /// to act on.  Restarts a dead or halted engine with the current queue.
    async fn prepare_transport(&mut self) -> Result<bool, EngineError> {
        let state = self.state_manager.get_state().await;
        let Some(index) = state.current_index.filter(|i| *i < state.queue.len()) else {
            debug!("DaemonCore: empty session, ignoring transport command");
            return Ok(false);
        };
        if self.halted || !self.engine.is_alive() {
            self.start_engine_at(index).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Next/previous.  A halted engine has an empty playlist, so the
    /// neighbour is picked from the queue and the engine restarted there.
    async fn step(&mut self, forward: bool) -> Result<(), EngineError> {
        if self.halted {
            let state = self.state_manager.get_state().await;
            let Some(index) = state.current_index.filter(|i| *i < state.queue.len()) else {
                return Ok(());
            };
            let len = state.queue.len();
            let wrap = state.repeat == RepeatMode::All;
            let target = if forward {
                if index + 1 < len {
                    Some(index + 1)
                } else if wrap {
                    Some(0)
                } else {
                    None
                }
            } else if index > 0 {
                Some(index - 1)
            } else if wrap {
                Some(len - 1)
            } else {
                Some(0)
            };
            return match target {
                Some(target) => self.start_engine_at(target).await,
                None => {
                    debug!("DaemonCore: halted on the last track, nothing after it");
                    Ok(())
                }
            };
        }
        if self.prepare_transport().await? {
            if forward {
                self.engine.next().await?;
            } else {
                self.engine.previous().await?;
            }
        }
        Ok(())
    }

    async fn play(&mut self) -> Result<(), EngineError> {
        let state = self.state_manager.get_state().await;
        match state.status {
            TransportStatus::Paused => {
                if self.prepare_transport().await? {
                    self.engine.set_paused(false).await?;
                }
            }
            TransportStatus::Idle => {
                if let Some(index) = state.current_index.filter(|i| *i < state.queue.len()) {
                    self.start_engine_at(index).await?;
                }
            }
            TransportStatus::Playing | TransportStatus::Preparing => {}
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        let state = self.state_manager.get_state().await;
        if state.status == TransportStatus::Playing && self.engine.is_alive() {
            self.engine.set_paused(true).await?;
        }
        Ok(())
    }

    async fn jump_to(&mut self, index: usize) -> Result<(), EngineError> {
        let state = self.state_manager.get_state().await;
        let Some(track) = state.queue.get(index) else {
            debug!("DaemonCore: jump to {} outside queue of {}", index, state.queue.len());
            return Ok(());
        };
        if self.engine.is_alive() && !self.halted {
            self.engine.jump_to(&track.path).await
        } else {
            self.start_engine_at(index).await
        }
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.awaiting_start = false;
        self.halted = false;
        self.state_manager.clear().await;
        if self.engine.is_alive() {
            self.engine.stop().await?;
        }
        Ok(())
    }

    // ── engine event handler ──────────────────────────────────────────────────

    /// Apply one engine notification.  Returns whether clients should hear
    /// about it.
    async fn handle_engine_event(&mut self, evt: EngineEvent) -> bool {
        let state = self.state_manager.get_state().await;
        match evt {
            EngineEvent::FileStarted { path } => {
                if self.halted {
                    return false;
                }
                let Some(index) = state.index_of(&path) else {
                    debug!("DaemonCore: engine started {} which is not queued", path);
                    return false;
                };
                self.awaiting_start = false;
                self.last_position_secs = None;
                self.state_manager.set_current_index(Some(index)).await;
                true
            }
            EngineEvent::Ready => {
                if self.halted {
                    return false;
                }
                if state.last_error.is_some() {
                    self.state_manager.set_error(None).await;
                }
                let status = if self.engine_paused {
                    TransportStatus::Paused
                } else {
                    TransportStatus::Playing
                };
                self.state_manager.set_status(status).await
            }
            EngineEvent::PauseChanged(paused) => {
                self.engine_paused = paused;
                let status = match state.status {
                    TransportStatus::Playing | TransportStatus::Paused if paused => {
                        TransportStatus::Paused
                    }
                    TransportStatus::Playing | TransportStatus::Paused => TransportStatus::Playing,
                    other => other,
                };
                self.state_manager.set_status(status).await
            }
            EngineEvent::IdleChanged(idle) => {
                if !idle || self.awaiting_start || state.status == TransportStatus::Idle {
                    return false;
                }
                info!("DaemonCore: engine idle, end of queue");
                self.state_manager.set_status(TransportStatus::Idle).await
            }
            EngineEvent::Position(ms) => {
                self.state_manager.set_position(ms).await;
                let secs = ms / 1000;
                let changed = self.last_position_secs != Some(secs);
                self.last_position_secs = Some(secs);
                changed
            }
            EngineEvent::Duration(ms) => {
                self.state_manager.set_duration(ms).await;
                true
            }
            EngineEvent::EndFile {
                reason: EndReason::Error,
                error,
            } => {
                self.on_prepare_failure(&state, error).await;
                true
            }
            EngineEvent::EndFile { reason, .. } => {
                debug!("DaemonCore: end-file {:?}", reason);
                false
            }
            EngineEvent::Exited => {
                if self.engine.is_alive() {
                    // a previous engine instance winding down
                    return false;
                }
                warn!("DaemonCore: playback engine exited");
                self.engine_lost().await;
                true
            }
        }
    }

    /// The engine could not open the current file.  Always surfaced to the
    /// user; what happens next depends on `playback.on_prepare_error`.
    async fn on_prepare_failure(&mut self, state: &SessionState, error: Option<String>) {
        if self.halted {
            return;
        }
        let what = state
            .current_track()
            .map(|t| t.display_line())
            .unwrap_or_else(|| "track".to_string());
        let message = format!(
            "Could not play {}: {}",
            what,
            error.as_deref().unwrap_or("unreadable file")
        );
        warn!("DaemonCore: {}", message);
        self.report_error(message).await;
        self.awaiting_start = false;

        match self.playback.on_prepare_error {
            // The engine moves on by itself; at the end of the queue it goes idle.
            PrepareErrorPolicy::Skip => {}
            PrepareErrorPolicy::Halt => {
                self.halted = true;
                if let Err(e) = self.engine.stop().await {
                    warn!("DaemonCore: stop after failure: {}", e);
                }
                self.state_manager.set_status(TransportStatus::Idle).await;
            }
        }
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: releasing playback engine");
        self.engine.shutdown().await;
    }

    #[cfg(test)]
    async fn pump_engine_events(&mut self) {
        while let Ok(evt) = self.engine_rx.try_recv() {
            self.on_engine_event(evt).await;
        }
    }

    #[cfg(test)]
    fn refresh_count(&self) -> u64 {
        self.now_playing.refresh_count()
    }
}

/// Log-friendly command summary; queues can be long.
fn describe(cmd: &Command) -> String {
    match cmd {
        Command::LoadQueue {
            tracks,
            start_index,
        } => format!("LoadQueue({} tracks, start {})", tracks.len(), start_index),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tune_proto::protocol::PlayPauseIcon;

    /// Engine double that behaves like mpv's playlist: advances on its own,
    /// honours repeat-all at the ends, skips files it cannot open.
    #[derive(Default)]
    struct FakeEngine {
        alive: bool,
        events: Option<mpsc::Sender<EngineEvent>>,
        paths: Vec<String>,
        index: usize,
        repeat: RepeatMode,
        paused: bool,
        failing: HashSet<String>,
        start_calls: usize,
        loads: usize,
    }

    impl FakeEngine {
        fn emit(&self, evt: EngineEvent) {
            if let Some(tx) = &self.events {
                tx.try_send(evt).unwrap();
            }
        }

        fn start_at(&mut self, mut index: usize) {
            loop {
                self.index = index;
                let path = self.paths[index].clone();
                self.emit(EngineEvent::FileStarted { path: path.clone() });
                if !self.failing.contains(&path) {
                    self.emit(EngineEvent::Ready);
                    return;
                }
                self.emit(EngineEvent::EndFile {
                    reason: EndReason::Error,
                    error: Some("unrecognized file format".into()),
                });
                if index + 1 < self.paths.len() {
                    index += 1;
                } else {
                    self.emit(EngineEvent::IdleChanged(true));
                    return;
                }
            }
        }
    }

    #[async_trait]
    impl PlaybackEngine for FakeEngine {
        async fn ensure_started(
            &mut self,
            events: mpsc::Sender<EngineEvent>,
        ) -> Result<(), EngineError> {
            self.alive = true;
            self.events = Some(events);
            self.start_calls += 1;
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        async fn load(&mut self, paths: &[String], start_index: usize) -> Result<(), EngineError> {
            self.emit(EngineEvent::IdleChanged(true));
            self.loads += 1;
            self.paths = paths.to_vec();
            if self.paused {
                self.paused = false;
                self.emit(EngineEvent::PauseChanged(false));
            }
            self.start_at(start_index);
            Ok(())
        }

        async fn set_paused(&mut self, paused: bool) -> Result<(), EngineError> {
            if self.paused != paused {
                self.paused = paused;
                self.emit(EngineEvent::PauseChanged(paused));
            }
            Ok(())
        }

        async fn next(&mut self) -> Result<(), EngineError> {
            if self.index + 1 < self.paths.len() {
                self.start_at(self.index + 1);
            } else if self.repeat == RepeatMode::All && !self.paths.is_empty() {
                self.start_at(0);
            }
            Ok(())
        }

        async fn previous(&mut self) -> Result<(), EngineError> {
            if self.index > 0 {
                self.start_at(self.index - 1);
            } else if self.repeat == RepeatMode::All && !self.paths.is_empty() {
                self.start_at(self.paths.len() - 1);
            }
            Ok(())
        }

        async fn jump_to(&mut self, path: &str) -> Result<(), EngineError> {
            let index = self
                .paths
                .iter()
                .position(|p| p == path)
                .ok_or_else(|| EngineError::Command("not queued".into()))?;
            self.start_at(index);
            Ok(())
        }

        async fn seek(&mut self, position_ms: u64) -> Result<(), EngineError> {
            self.emit(EngineEvent::Position(position_ms));
            Ok(())
        }

        async fn set_shuffle(&mut self, _shuffle: bool) -> Result<(), EngineError> {
            Ok(())
        }

        async fn set_repeat(&mut self, repeat: RepeatMode) -> Result<(), EngineError> {
            self.repeat = repeat;
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), EngineError> {
            self.paths.clear();
            self.emit(EngineEvent::IdleChanged(true));
            Ok(())
        }

        async fn shutdown(&mut self) {
            self.alive = false;
        }
    }

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                id: i as u64,
                title: format!("Song {}", i),
                artist: "Band".into(),
                path: format!("/music/{}.mp3", i),
                ..Default::default()
            })
            .collect()
    }

    fn core_with(
        engine: FakeEngine,
        policy: PrepareErrorPolicy,
    ) -> (DaemonCore<FakeEngine>, broadcast::Receiver<BroadcastMessage>) {
        let (broadcast_tx, broadcast_rx) = broadcast::channel(256);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let playback = PlaybackConfig {
            on_prepare_error: policy,
        };
        (
            DaemonCore::new(playback, engine, broadcast_tx, event_tx),
            broadcast_rx,
        )
    }

    fn core() -> DaemonCore<FakeEngine> {
        core_with(FakeEngine::default(), PrepareErrorPolicy::Skip).0
    }

    async fn send(core: &mut DaemonCore<FakeEngine>, cmd: Command) {
        core.on_command(cmd).await;
        core.pump_engine_events().await;
    }

    async fn current_path(core: &DaemonCore<FakeEngine>) -> Option<String> {
        core.state_manager
            .get_state()
            .await
            .current_track()
            .map(|t| t.path.clone())
    }

    #[tokio::test]
    async fn test_load_queue_plays_start_index() {
        let mut core = core();
        let queue = tracks(4);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.clone(),
                start_index: 2,
            },
        )
        .await;

        let state = core.state_manager.get_state().await;
        assert_eq!(state.current_track(), Some(&queue[2]));
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(state.engine_health, EngineHealth::Running);
        // Idle → Preparing, Preparing → Playing
        assert_eq!(core.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_next_twice_then_wrap_with_repeat_all() {
        let mut core = core();
        let queue = tracks(3);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.clone(),
                start_index: 0,
            },
        )
        .await;

        send(&mut core, Command::Next).await;
        send(&mut core, Command::Next).await;
        assert_eq!(current_path(&core).await, Some(queue[2].path.clone()));

        // without repeat the engine stays on the last track
        send(&mut core, Command::Next).await;
        assert_eq!(current_path(&core).await, Some(queue[2].path.clone()));

        send(&mut core, Command::ToggleRepeat).await; // One
        send(&mut core, Command::ToggleRepeat).await; // All
        send(&mut core, Command::Next).await;
        assert_eq!(current_path(&core).await, Some(queue[0].path.clone()));
    }

    #[tokio::test]
    async fn test_repeat_cycle_closes() {
        let mut core = core();
        let start = core.state_manager.get_state().await.repeat;
        for _ in 0..3 {
            send(&mut core, Command::ToggleRepeat).await;
        }
        assert_eq!(core.state_manager.get_state().await.repeat, start);
        assert_eq!(start, RepeatMode::Off);
    }

    #[tokio::test]
    async fn test_pause_and_play_refresh_once_each() {
        let (mut core, mut rx) = core_with(FakeEngine::default(), PrepareErrorPolicy::Skip);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: tracks(2),
                start_index: 0,
            },
        )
        .await;
        let base = core.refresh_count();

        send(&mut core, Command::Pause).await;
        assert_eq!(core.refresh_count(), base + 1);
        assert_eq!(
            core.state_manager.get_state().await.status,
            TransportStatus::Paused
        );

        // already paused: no-op
        send(&mut core, Command::Pause).await;
        assert_eq!(core.refresh_count(), base + 1);

        send(&mut core, Command::TogglePause).await;
        assert_eq!(core.refresh_count(), base + 2);
        assert!(core.state_manager.get_state().await.is_playing());

        send(&mut core, Command::Play).await;
        assert_eq!(core.refresh_count(), base + 2);

        let mut last_icon = None;
        while let Ok(msg) = rx.try_recv() {
            if let BroadcastMessage::NowPlaying(Some(n)) = msg {
                last_icon = Some(n.icon);
            }
        }
        assert_eq!(last_icon, Some(PlayPauseIcon::Pause));
    }

    #[tokio::test]
    async fn test_position_updates_do_not_refresh_notification() {
        let mut core = core();
        send(
            &mut core,
            Command::LoadQueue {
                tracks: tracks(1),
                start_index: 0,
            },
        )
        .await;
        let base = core.refresh_count();
        send(&mut core, Command::Seek { position_ms: 42_000 }).await;
        assert_eq!(core.refresh_count(), base);
        assert_eq!(core.state_manager.get_state().await.position_ms, 42_000);
    }

    #[tokio::test]
    async fn test_load_replaces_running_session() {
        let mut core = core();
        send(
            &mut core,
            Command::LoadQueue {
                tracks: tracks(5),
                start_index: 4,
            },
        )
        .await;
        let other: Vec<Track> = tracks(2)
            .into_iter()
            .map(|mut t| {
                t.path = t.path.replace("/music/", "/other/");
                t
            })
            .collect();
        send(
            &mut core,
            Command::LoadQueue {
                tracks: other.clone(),
                start_index: 1,
            },
        )
        .await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.queue, other);
        assert_eq!(state.current_track(), Some(&other[1]));
        assert!(state.is_playing());
    }

    #[tokio::test]
    async fn test_empty_session_ignores_transport() {
        let mut core = core();
        send(&mut core, Command::Next).await;
        send(&mut core, Command::Play).await;
        send(&mut core, Command::Seek { position_ms: 10 }).await;
        let state = core.state_manager.get_state().await;
        assert!(state.current_track().is_none());
        assert_eq!(state.status, TransportStatus::Idle);
        assert_eq!(core.refresh_count(), 0);
        assert_eq!(core.engine.start_calls, 0);
    }

    #[tokio::test]
    async fn test_failed_file_is_reported_and_skipped() {
        let engine = FakeEngine {
            failing: ["/music/0.mp3".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (mut core, mut rx) = core_with(engine, PrepareErrorPolicy::Skip);
        let queue = tracks(3);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.clone(),
                start_index: 0,
            },
        )
        .await;

        let state = core.state_manager.get_state().await;
        assert_eq!(state.current_track(), Some(&queue[1]));
        assert!(state.is_playing());
        // cleared once the next file played
        assert!(state.last_error.is_none());

        let mut errors = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let BroadcastMessage::Error(m) = msg {
                errors.push(m);
            }
        }
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Song 0"));
    }

    #[tokio::test]
    async fn test_failed_last_file_goes_idle() {
        let engine = FakeEngine {
            failing: ["/music/1.mp3".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (mut core, _rx) = core_with(engine, PrepareErrorPolicy::Skip);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: tracks(2),
                start_index: 1,
            },
        )
        .await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.status, TransportStatus::Idle);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_halt_policy_stops_on_failure() {
        let engine = FakeEngine {
            failing: ["/music/0.mp3".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (mut core, _rx) = core_with(engine, PrepareErrorPolicy::Halt);
        let queue = tracks(3);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.clone(),
                start_index: 0,
            },
        )
        .await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.status, TransportStatus::Idle);
        assert_eq!(state.current_track(), Some(&queue[0]));
        assert_eq!(state.queue.len(), 3);
        assert!(state.last_error.as_deref().unwrap_or("").contains("Song 0"));

        // the user can carry on from another entry
        send(&mut core, Command::JumpTo { index: 2 }).await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.current_track(), Some(&queue[2]));
        assert!(state.is_playing());
    }

    async fn halted_on_first(queue: &[Track], repeat: bool) -> DaemonCore<FakeEngine> {
        let engine = FakeEngine {
            failing: ["/music/0.mp3".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (mut core, _rx) = core_with(engine, PrepareErrorPolicy::Halt);
        if repeat {
            // off -> one -> all
            send(&mut core, Command::ToggleRepeat).await;
            send(&mut core, Command::ToggleRepeat).await;
        }
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.to_vec(),
                start_index: 0,
            },
        )
        .await;
        assert_eq!(core.state_manager.get_state().await.status, TransportStatus::Idle);
        core
    }

    #[tokio::test]
    async fn test_next_after_halt_restarts_on_following_track() {
        let queue = tracks(3);
        let mut core = halted_on_first(&queue, false).await;

        send(&mut core, Command::Next).await;
        let state = core.state_manager.get_state().await;
        assert!(state.is_playing(), "status={:?}", state.status);
        assert_eq!(state.current_track(), Some(&queue[1]));
    }

    #[tokio::test]
    async fn test_previous_after_halt_wraps_with_repeat_all() {
        let queue = tracks(3);
        let mut core = halted_on_first(&queue, true).await;
        assert_eq!(core.state_manager.get_state().await.repeat, RepeatMode::All);

        send(&mut core, Command::Previous).await;
        let state = core.state_manager.get_state().await;
        assert!(state.is_playing());
        assert_eq!(state.current_track(), Some(&queue[2]));
    }

    #[tokio::test]
    async fn test_seek_after_halt_retries_current_track() {
        let queue = tracks(3);
        let mut core = halted_on_first(&queue, false).await;
        let loads = core.engine.loads;

        send(&mut core, Command::Seek { position_ms: 10_000 }).await;
        assert_eq!(core.engine.loads, loads + 1);
        let state = core.state_manager.get_state().await;
        // the broken file fails again and the session stays halted on it
        assert_eq!(state.status, TransportStatus::Idle);
        assert_eq!(state.current_track(), Some(&queue[0]));
    }

    #[tokio::test]
    async fn test_stop_clears_notification() {
        let (mut core, mut rx) = core_with(FakeEngine::default(), PrepareErrorPolicy::Skip);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: tracks(2),
                start_index: 0,
            },
        )
        .await;
        send(&mut core, Command::Stop).await;

        let mut last = None;
        while let Ok(msg) = rx.try_recv() {
            if let BroadcastMessage::NowPlaying(n) = msg {
                last = Some(n);
            }
        }
        assert_eq!(last, Some(None));
        assert!(core.state_manager.get_state().await.queue.is_empty());
    }

    #[tokio::test]
    async fn test_engine_exit_goes_idle_and_restarts_on_play() {
        let mut core = core();
        let queue = tracks(3);
        send(
            &mut core,
            Command::LoadQueue {
                tracks: queue.clone(),
                start_index: 1,
            },
        )
        .await;

        core.engine.alive = false;
        core.on_engine_event(EngineEvent::Exited).await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.status, TransportStatus::Idle);
        assert_eq!(state.engine_health, EngineHealth::Dead);

        send(&mut core, Command::Play).await;
        let state = core.state_manager.get_state().await;
        assert_eq!(state.current_track(), Some(&queue[1]));
        assert!(state.is_playing());
        assert_eq!(core.engine.start_calls, 2);
    }
}
