//! Player screen presenter.
//!
//! Sits between the player view and the daemon session plus the playlist
//! store.  It never blocks the UI loop: store work goes through the screen's
//! [`StoreWorker`], recognition runs on its own task, and every result comes
//! back as a [`PresenterEvent`] on the UI channel, to be fed to
//! [`PlayerPresenter::handle_event`].

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tune_proto::config::RecognitionConfig;
use tune_proto::protocol::{Command, RepeatMode, SessionState};
use tune_proto::recognition::{self, RecognitionOutcome};
use tune_proto::store::AddOutcome;
use tune_proto::track::{Playlist, Track};

use crate::connection::{SessionEvent, SessionLink};
use crate::worker::StoreWorker;

/// Everything the presenter can ask of the player screen.
pub trait PlayerView {
    fn show_track_details(&mut self, track: &Track);
    fn update_progress(&mut self, position_ms: u64, duration_ms: u64);
    fn show_play_icon(&mut self);
    fn show_pause_icon(&mut self);
    fn update_shuffle_repeat(&mut self, shuffle: bool, repeat: RepeatMode);
    fn update_queue(&mut self, queue: &[Track]);
    fn highlight_track(&mut self, path: Option<&str>);
    fn scroll_to(&mut self, index: usize);
    fn set_details_visible(&mut self, visible: bool);
    fn set_details_title(&mut self, title: &str);
    fn show_playlist_picker(&mut self, playlists: Vec<Playlist>);
    fn show_message(&mut self, message: &str);
    fn show_error(&mut self, message: &str);
}

#[derive(Debug)]
pub enum PresenterEvent {
    Session(SessionEvent),
    ProgressTick,
    PlaylistsLoaded(Result<Vec<Playlist>, String>),
    PlaylistAddFinished {
        playlist: String,
        result: Result<AddOutcome, String>,
    },
    Recognized {
        message: String,
        identified: bool,
    },
}

const SEEK_STEP_MS: i64 = 5_000;

pub struct PlayerPresenter<V: PlayerView, S: SessionLink> {
    view: Option<V>,
    link: Option<S>,
    worker: StoreWorker,
    ui_tx: mpsc::Sender<PresenterEvent>,
    recognition: RecognitionConfig,
    /// Last state pushed to the view, for diffing.
    last: Option<SessionState>,
    progress: Option<CancellationToken>,
    listener: Option<CancellationToken>,
    details_visible: bool,
    /// Track waiting for a playlist choice.
    pending_add: Option<Track>,
}

impl<V: PlayerView, S: SessionLink> PlayerPresenter<V, S> {
    pub fn new(
        worker: StoreWorker,
        ui_tx: mpsc::Sender<PresenterEvent>,
        recognition: RecognitionConfig,
    ) -> Self {
        Self {
            view: None,
            link: None,
            worker,
            ui_tx,
            recognition,
            last: None,
            progress: None,
            listener: None,
            details_visible: true,
            pending_add: None,
        }
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    pub fn attach(&mut self, view: V) {
        self.view = Some(view);
        if self.listener.is_none() {
            if let Some(link) = &self.link {
                self.listener = Some(Self::listen(link, self.ui_tx.clone()));
            }
        }
        if let Some(state) = self.link.as_ref().and_then(|l| l.snapshot()) {
            self.last = Some(state.clone());
            self.full_refresh(&state);
        }
    }

    /// Stop all scheduled work and hand the view back.
    pub fn detach(&mut self) -> Option<V> {
        self.stop_progress();
        if let Some(token) = self.listener.take() {
            token.cancel();
        }
        self.view.take()
    }

    pub fn view(&self) -> Option<&V> {
        self.view.as_ref()
    }

    pub fn view_mut(&mut self) -> Option<&mut V> {
        self.view.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn on_session_connected(&mut self, link: S) {
        if let Some(token) = self.listener.take() {
            token.cancel();
        }
        self.listener = Some(Self::listen(&link, self.ui_tx.clone()));

        let snapshot = link.snapshot();
        self.link = Some(link);
        self.last = snapshot.clone();
        if let Some(state) = snapshot {
            self.full_refresh(&state);
        }
    }

    /// Forward session events onto the UI queue until the token is cancelled.
    fn listen(link: &S, tx: mpsc::Sender<PresenterEvent>) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut events = link.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    evt = events.recv() => match evt {
                        Ok(evt) => {
                            if tx.send(PresenterEvent::Session(evt)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Presenter missed {} session events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        token
    }

    pub fn on_session_disconnected(&mut self) {
        if let Some(token) = self.listener.take() {
            token.cancel();
        }
        self.stop_progress();
        self.link = None;
        self.last = None;
        self.with_view(|v| v.show_play_icon());
    }

    // ── events ───────────────────────────────────────────────────────────────

    pub fn handle_event(&mut self, evt: PresenterEvent) {
        match evt {
            PresenterEvent::Session(SessionEvent::StateChanged(state)) => self.apply_state(state),
            PresenterEvent::Session(other) => {
                debug!("Presenter: ignoring {:?}", other);
            }
            PresenterEvent::ProgressTick => {
                let Some(state) = self.link.as_ref().and_then(|l| l.snapshot()) else {
                    return;
                };
                self.with_view(|v| v.update_progress(state.position_ms, state.duration_ms));
            }
            PresenterEvent::PlaylistsLoaded(Ok(playlists)) => {
                if playlists.is_empty() {
                    self.pending_add = None;
                    self.with_view(|v| v.show_message("No playlists yet."));
                } else {
                    self.with_view(|v| v.show_playlist_picker(playlists));
                }
            }
            PresenterEvent::PlaylistsLoaded(Err(e)) => {
                self.pending_add = None;
                self.with_view(|v| v.show_error(&format!("Could not load playlists: {}", e)));
            }
            PresenterEvent::PlaylistAddFinished { playlist, result } => match result {
                Ok(AddOutcome::Added) => {
                    self.with_view(|v| v.show_message(&format!("Added to '{}'", playlist)))
                }
                Ok(AddOutcome::AlreadyMember) => {
                    self.with_view(|v| v.show_message(&format!("Already in '{}'", playlist)))
                }
                Err(e) => self.with_view(|v| {
                    v.show_error(&format!("Could not add to '{}': {}", playlist, e))
                }),
            },
            PresenterEvent::Recognized {
                message,
                identified,
            } => self.with_view(|v| {
                if identified {
                    v.show_message(&message)
                } else {
                    v.show_error(&message)
                }
            }),
        }
    }

    fn apply_state(&mut self, state: SessionState) {
        let Some(prev) = self.last.replace(state.clone()) else {
            self.full_refresh(&state);
            return;
        };

        if prev.queue != state.queue || prev.current_index != state.current_index {
            self.full_refresh(&state);
        } else {
            if prev.status != state.status {
                self.update_transport(&state);
            }
            if prev.shuffle != state.shuffle || prev.repeat != state.repeat {
                self.with_view(|v| v.update_shuffle_repeat(state.shuffle, state.repeat));
            }
            if prev.duration_ms != state.duration_ms {
                self.with_view(|v| v.update_progress(state.position_ms, state.duration_ms));
            }
        }

        if let Some(error) = &state.last_error {
            if prev.last_error.as_ref() != Some(error) {
                self.with_view(|v| v.show_error(error));
            }
        }
    }

    /// Bring every part of the view in line with `state` in one go.
    fn full_refresh(&mut self, state: &SessionState) {
        let details_visible = self.details_visible;
        self.with_view(|v| {
            v.update_queue(&state.queue);
            v.update_shuffle_repeat(state.shuffle, state.repeat);
            v.set_details_visible(details_visible);
            match (state.current_index, state.current_track()) {
                (Some(index), Some(track)) => {
                    v.show_track_details(track);
                    v.set_details_title(&track.display_line());
                    v.highlight_track(Some(&track.path));
                    v.scroll_to(index);
                    v.update_progress(state.position_ms, state.duration_ms);
                }
                _ => v.highlight_track(None),
            }
        });
        self.update_transport(state);
    }

    fn update_transport(&mut self, state: &SessionState) {
        if state.is_playing() {
            self.with_view(|v| v.show_pause_icon());
            self.start_progress();
        } else {
            self.with_view(|v| v.show_play_icon());
            self.stop_progress();
        }
    }

    // ── progress task ────────────────────────────────────────────────────────

    fn start_progress(&mut self) {
        if self.progress.is_some() || self.view.is_none() {
            return;
        }
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.ui_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(PresenterEvent::ProgressTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.progress = Some(token);
    }

    fn stop_progress(&mut self) {
        if let Some(token) = self.progress.take() {
            token.cancel();
        }
    }

    fn with_view(&mut self, f: impl FnOnce(&mut V)) {
        if let Some(view) = self.view.as_mut() {
            f(view);
        }
    }

    fn send(&self, cmd: Command) {
        match &self.link {
            Some(link) => link.send(cmd),
            None => debug!("Presenter: not connected, dropping {:?}", cmd),
        }
    }

    // ── user intents ─────────────────────────────────────────────────────────

    pub fn on_play_pause_clicked(&self) {
        self.send(Command::TogglePause);
    }

    pub fn on_next_clicked(&self) {
        self.send(Command::Next);
    }

    pub fn on_previous_clicked(&self) {
        self.send(Command::Previous);
    }

    pub fn on_seek(&self, position_ms: u64) {
        self.send(Command::Seek { position_ms });
    }

    /// Seek `steps` × 5 s from the current position, kept inside the track.
    pub fn on_seek_step(&self, steps: i64) {
        let Some(state) = self.link.as_ref().and_then(|l| l.snapshot()) else {
            return;
        };
        if state.current_track().is_none() {
            return;
        }
        let target = (state.position_ms as i64 + steps * SEEK_STEP_MS).max(0) as u64;
        let target = if state.duration_ms > 0 {
            target.min(state.duration_ms)
        } else {
            target
        };
        self.on_seek(target);
    }

    pub fn on_shuffle_clicked(&self) {
        self.send(Command::ToggleShuffle);
    }

    pub fn on_repeat_clicked(&self) {
        self.send(Command::ToggleRepeat);
    }

    pub fn on_queue_item_clicked(&self, index: usize) {
        self.send(Command::JumpTo { index });
    }

    pub fn on_details_toggled(&mut self) {
        self.details_visible = !self.details_visible;
        let visible = self.details_visible;
        self.with_view(|v| v.set_details_visible(visible));
    }

    /// Start the add-to-playlist flow for the current track.
    pub fn on_add_to_playlist_clicked(&mut self) {
        let Some(track) = self
            .link
            .as_ref()
            .and_then(|l| l.snapshot())
            .and_then(|s| s.current_track().cloned())
        else {
            return;
        };
        self.pending_add = Some(track);
        let tx = self.ui_tx.clone();
        self.worker.submit(
            |store| store.list_playlists(),
            move |result| {
                let _ = tx.blocking_send(PresenterEvent::PlaylistsLoaded(
                    result.map_err(|e| e.to_string()),
                ));
            },
        );
    }

    pub fn on_playlist_selected(&mut self, playlist: Playlist) {
        let Some(track) = self.pending_add.take() else {
            return;
        };
        info!("Adding {} to playlist {}", track.path, playlist.id);
        let tx = self.ui_tx.clone();
        let Playlist { id, name } = playlist;
        self.worker.submit(
            move |store| store.add_track_to_playlist(id, &track),
            move |result| {
                let _ = tx.blocking_send(PresenterEvent::PlaylistAddFinished {
                    playlist: name,
                    result: result.map_err(|e| e.to_string()),
                });
            },
        );
    }

    pub fn on_playlist_picker_dismissed(&mut self) {
        self.pending_add = None;
    }

    pub fn on_recognize_clicked(&mut self) {
        self.with_view(|v| v.show_message("Listening…"));
        let config = self.recognition.clone();
        let tx = self.ui_tx.clone();
        tokio::spawn(async move {
            let result = recognition::recognize(&config).await;
            if let Err(e) = &result {
                warn!("Recognition failed: {}", e);
            }
            let identified = matches!(result, Ok(RecognitionOutcome::Identified { .. }));
            let message = recognition::user_message(&result);
            let _ = tx
                .send(PresenterEvent::Recognized {
                    message,
                    identified,
                })
                .await;
        });
    }
}
