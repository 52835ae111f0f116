//! Terminal front end: the Library, Playlists and Player tabs.
//!
//! One select loop owns all UI state.  Keyboard input, daemon session events,
//! store results and presenter events all arrive as messages; nothing here
//! blocks on IO.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListState, Paragraph, Tabs},
    Frame, Terminal,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tune_proto::catalog;
use tune_proto::config::RecognitionConfig;
use tune_proto::protocol::{Command, NowPlaying, PlayPauseIcon};
use tune_proto::store::{PlaylistStore, SharedStore, StoreError};
use tune_proto::track::{Playlist, PlaylistWithTracks, Track};

use crate::adapters::{
    PlaylistAction, PlaylistListAdapter, RowAction, SelectTracksAdapter, TrackListAdapter,
};
use crate::connection::{DaemonLink, SessionEvent, SessionLink};
use crate::player::{move_list_selection, PlayerScreen};
use crate::presenter::{PlayerPresenter, PresenterEvent};
use crate::rows::{select_row, track_row, RowCache};
use crate::theme::{
    style_accent, style_default, style_focused_border, style_muted, style_pending,
    style_playing, style_secondary, style_selected,
};
use crate::widgets::text_input::{InputAction, TextInput};
use crate::widgets::toast::{Severity, ToastManager};
use crate::worker::StoreWorker;

const DELETE_CONFIRM_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug)]
enum AppMessage {
    Event(Event),
    Session(SessionEvent),
    LibraryLoaded(Vec<Track>),
    Store(StoreReply),
}

#[derive(Debug)]
enum StoreReply {
    Playlists(Result<Vec<Playlist>, String>),
    Opened(Result<Option<PlaylistWithTracks>, String>),
    Created {
        name: String,
        result: Result<i64, String>,
    },
    Deleted(Result<bool, String>),
    Removed {
        playlist_id: i64,
        result: Result<bool, String>,
    },
    BulkAdded {
        playlist_id: i64,
        result: Result<usize, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Library,
    Playlists,
    Player,
}

impl Tab {
    const ALL: [Tab; 3] = [Tab::Library, Tab::Playlists, Tab::Player];

    fn title(self) -> &'static str {
        match self {
            Tab::Library => "1 Library",
            Tab::Playlists => "2 Playlists",
            Tab::Player => "3 Player",
        }
    }

    fn index(self) -> usize {
        Tab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }
}

// ── Library ─────────────────────────────────────────────────────────────────

struct LibraryView {
    all: Vec<Track>,
    visible: TrackListAdapter,
    rows: RowCache,
    list: ListState,
    filter: TextInput,
    scanning: bool,
}

impl LibraryView {
    fn new() -> Self {
        Self {
            all: Vec::new(),
            visible: TrackListAdapter::default(),
            rows: RowCache::default(),
            list: ListState::default(),
            filter: TextInput::new("/", "filter by title or artist"),
            scanning: false,
        }
    }

    fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.all = tracks;
        self.apply_filter();
    }

    /// Rebuild the visible rows from the current filter text.
    fn apply_filter(&mut self) {
        let matches = catalog::filter_tracks(&self.all, self.filter.text());
        let tracks: Vec<Track> = matches.into_iter().map(|i| self.all[i].clone()).collect();
        let empty = tracks.is_empty();
        self.visible.set_tracks(tracks);
        self.list.select(if empty { None } else { Some(0) });
    }
}

// ── Playlists ───────────────────────────────────────────────────────────────

/// Two presses of a destructive key on the same item within the window.
#[derive(Debug)]
struct DeleteConfirm<K> {
    pending: Option<(K, Instant)>,
}

impl<K> Default for DeleteConfirm<K> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<K: PartialEq> DeleteConfirm<K> {
    /// Returns `true` when this press confirms an earlier one.
    fn press(&mut self, key: K, now: Instant) -> bool {
        match self.pending.take() {
            Some((pending, at)) if pending == key && now.duration_since(at) <= DELETE_CONFIRM_WINDOW => {
                true
            }
            _ => {
                self.pending = Some((key, now));
                false
            }
        }
    }
}

struct PlaylistDetail {
    playlist: Playlist,
    tracks: TrackListAdapter,
    rows: RowCache,
    list: ListState,
    /// Keyed by track path.
    remove: DeleteConfirm<String>,
}

struct SelectView {
    playlist_id: i64,
    tracks: SelectTracksAdapter,
    rows: RowCache,
    list: ListState,
}

struct PlaylistsView {
    adapter: PlaylistListAdapter,
    rows: RowCache,
    list: ListState,
    delete: DeleteConfirm<i64>,
    name_prompt: TextInput,
    detail: Option<PlaylistDetail>,
    select: Option<SelectView>,
}

impl PlaylistsView {
    fn new() -> Self {
        Self {
            adapter: PlaylistListAdapter::default(),
            rows: RowCache::default(),
            list: ListState::default(),
            delete: DeleteConfirm::default(),
            name_prompt: TextInput::new("name:", "new playlist name"),
            detail: None,
            select: None,
        }
    }

    fn selected(&self) -> Option<&Playlist> {
        self.list
            .selected()
            .and_then(|row| self.adapter.playlists().get(row))
    }
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct App {
    link: DaemonLink,
    worker: StoreWorker,
    presenter: PlayerPresenter<PlayerScreen, DaemonLink>,
    presenter_rx: Option<mpsc::Receiver<PresenterEvent>>,
    tx: Option<mpsc::Sender<AppMessage>>,
    music_dirs: Vec<PathBuf>,
    tab: Tab,
    library: LibraryView,
    playlists: PlaylistsView,
    connected: bool,
    now_playing: Option<NowPlaying>,
    highlight: Option<String>,
    toast: ToastManager,
    should_quit: bool,
}

impl App {
    pub fn new(
        link: DaemonLink,
        store: SharedStore,
        music_dirs: Vec<PathBuf>,
        recognition: RecognitionConfig,
    ) -> Self {
        let (presenter_tx, presenter_rx) = mpsc::channel(256);
        // One worker per screen
        let worker = StoreWorker::new(store.clone());
        let mut presenter =
            PlayerPresenter::new(StoreWorker::new(store), presenter_tx, recognition);
        presenter.attach(PlayerScreen::default());

        Self {
            link,
            worker,
            presenter,
            presenter_rx: Some(presenter_rx),
            tx: None,
            music_dirs,
            tab: Tab::Library,
            library: LibraryView::new(),
            playlists: PlaylistsView::new(),
            connected: false,
            now_playing: None,
            highlight: None,
            toast: ToastManager::new(),
            should_quit: false,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let (tx, mut rx) = mpsc::channel::<AppMessage>(1024);
        self.tx = Some(tx.clone());
        let mut presenter_rx = self
            .presenter_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("app is already running"))?;

        // ── Background task: keyboard events ─────────────────────────────────
        let event_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: session events ─────────────────────────────────
        let mut session_rx = self.link.subscribe();
        let session_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match session_rx.recv().await {
                    Ok(evt) => {
                        if session_tx.send(AppMessage::Session(evt)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Session receiver lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Connected before we subscribed
        if self.link.snapshot().is_some() {
            self.on_connected();
        }

        self.rescan_library();
        self.reload_playlists();

        let mut toast_tick = tokio::time::interval(Duration::from_millis(100));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ───────────────────────────────────────────────────────
        loop {
            terminal.draw(|f| self.draw(f))?;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => self.handle_message(msg),
                Some(evt) = presenter_rx.recv() => {
                    self.presenter.handle_event(evt);
                    self.flush_player_messages();
                }
                _ = toast_tick.tick() => self.toast.tick(),
            }
        }

        // ── Teardown ────────────────────────────────────────────────────────
        self.presenter.detach();
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        info!("Client closed");
        Ok(())
    }

    fn handle_message(&mut self, msg: AppMessage) {
        match msg {
            AppMessage::Event(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                self.handle_key(key);
                self.flush_player_messages();
            }
            AppMessage::Event(_) => {}
            AppMessage::Session(evt) => self.handle_session(evt),
            AppMessage::LibraryLoaded(tracks) => {
                info!("Library scan found {} tracks", tracks.len());
                self.library.scanning = false;
                let count = tracks.len();
                self.library.set_tracks(tracks);
                self.library
                    .visible
                    .set_highlight_path(self.highlight.as_deref());
                if count == 0 {
                    self.toast.warning("No audio files found in the music folders");
                } else {
                    self.toast.info(format!("{} tracks", count));
                }
            }
            AppMessage::Store(reply) => self.handle_store(reply),
        }
    }

    fn handle_session(&mut self, evt: SessionEvent) {
        match evt {
            SessionEvent::Connected => self.on_connected(),
            SessionEvent::StateChanged(state) => {
                let path = state.current_track().map(|t| t.path.clone());
                if path != self.highlight {
                    self.highlight = path;
                    let highlight = self.highlight.as_deref();
                    self.library.visible.set_highlight_path(highlight);
                    if let Some(detail) = self.playlists.detail.as_mut() {
                        detail.tracks.set_highlight_path(highlight);
                    }
                }
            }
            SessionEvent::NowPlaying(notification) => self.now_playing = notification,
            SessionEvent::Error(message) => self.toast.error(message),
            SessionEvent::Log(message) => debug!("daemon: {}", message),
            SessionEvent::Disconnected(reason) => {
                if self.connected {
                    self.toast.warning(format!("Disconnected: {}", reason));
                }
                self.connected = false;
                self.now_playing = None;
                self.presenter.on_session_disconnected();
            }
        }
    }

    fn on_connected(&mut self) {
        self.connected = true;
        self.presenter.on_session_connected(self.link.clone());
    }

    /// Move presenter messages into toasts.
    fn flush_player_messages(&mut self) {
        let Some(screen) = self.presenter.view_mut() else {
            return;
        };
        for (message, severity) in screen.take_messages() {
            match severity {
                Severity::Error => self.toast.error(message),
                Severity::Warning => self.toast.warning(message),
                Severity::Info => self.toast.info(message),
                Severity::Success => self.toast.success(message),
            }
        }
    }

    // ── Store work ──────────────────────────────────────────────────────────

    /// Queue `job` on the worker and post its result back as a [`StoreReply`].
    fn store_job<T, F>(&self, job: F, reply: impl FnOnce(Result<T, String>) -> StoreReply + Send + 'static)
    where
        T: Send + 'static,
        F: FnOnce(&mut PlaylistStore) -> Result<T, StoreError> + Send + 'static,
    {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        self.worker.submit(job, move |result| {
            let msg = AppMessage::Store(reply(result.map_err(|e| e.to_string())));
            let _ = tx.blocking_send(msg);
        });
    }

    fn reload_playlists(&self) {
        self.store_job(|store| store.list_playlists(), StoreReply::Playlists);
    }

    fn open_playlist(&self, playlist_id: i64) {
        self.store_job(
            move |store| store.get_playlist_with_tracks(playlist_id),
            StoreReply::Opened,
        );
    }

    fn handle_store(&mut self, reply: StoreReply) {
        match reply {
            StoreReply::Playlists(Ok(playlists)) => {
                let len = playlists.len();
                self.playlists.adapter.set_playlists(playlists);
                let selected = self.playlists.list.selected().unwrap_or(0);
                self.playlists
                    .list
                    .select(if len == 0 { None } else { Some(selected.min(len - 1)) });
            }
            StoreReply::Opened(Ok(Some(PlaylistWithTracks { playlist, tracks }))) => {
                let mut adapter = TrackListAdapter::new(tracks);
                adapter.set_highlight_path(self.highlight.as_deref());
                let mut list = ListState::default();
                let keep = self
                    .playlists
                    .detail
                    .as_ref()
                    .filter(|d| d.playlist.id == playlist.id)
                    .and_then(|d| d.list.selected());
                if adapter.len() > 0 {
                    list.select(Some(keep.unwrap_or(0).min(adapter.len() - 1)));
                }
                self.playlists.detail = Some(PlaylistDetail {
                    playlist,
                    tracks: adapter,
                    rows: RowCache::default(),
                    list,
                    remove: DeleteConfirm::default(),
                });
            }
            StoreReply::Opened(Ok(None)) => {
                self.playlists.detail = None;
                self.toast.warning("That playlist no longer exists");
                self.reload_playlists();
            }
            StoreReply::Created { name, result: Ok(_) } => {
                self.toast.success(format!("Created '{}'", name));
                self.reload_playlists();
            }
            StoreReply::Created { name, result: Err(e) } => {
                self.toast.error(format!("Could not create '{}': {}", name, e));
            }
            StoreReply::Deleted(Ok(deleted)) => {
                if deleted {
                    self.toast.success("Playlist deleted");
                }
                self.reload_playlists();
            }
            StoreReply::Removed { playlist_id, result: Ok(removed) } => {
                if removed {
                    self.toast.info("Removed from playlist");
                }
                self.open_playlist(playlist_id);
            }
            StoreReply::BulkAdded { playlist_id, result: Ok(added) } => {
                self.toast.success(format!("{} new tracks added", added));
                self.open_playlist(playlist_id);
            }
            StoreReply::Playlists(Err(e))
            | StoreReply::Opened(Err(e))
            | StoreReply::Deleted(Err(e))
            | StoreReply::Removed { result: Err(e), .. }
            | StoreReply::BulkAdded { result: Err(e), .. } => {
                warn!("Store error: {}", e);
                self.toast.error(e);
            }
        }
    }

    fn rescan_library(&mut self) {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        if self.library.scanning {
            return;
        }
        self.library.scanning = true;
        let dirs = self.music_dirs.clone();
        tokio::task::spawn_blocking(move || {
            let tracks = catalog::scan_library(&dirs);
            let _ = tx.blocking_send(AppMessage::LibraryLoaded(tracks));
        });
    }

    // ── Keys ────────────────────────────────────────────────────────────────

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        // Text prompts take every key while open
        if self.library.filter.is_active() {
            if let InputAction::Changed(_) = self.library.filter.handle_key(key) {
                self.library.apply_filter();
            }
            return;
        }
        if self.playlists.name_prompt.is_active() {
            if let InputAction::Confirmed(name) = self.playlists.name_prompt.handle_key(key) {
                self.playlists.name_prompt.clear();
                self.create_playlist(name);
            }
            return;
        }
        if self.picker_open() {
            self.handle_picker_key(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                return;
            }
            KeyCode::Char('1') => {
                self.tab = Tab::Library;
                return;
            }
            KeyCode::Char('2') => {
                self.tab = Tab::Playlists;
                return;
            }
            KeyCode::Char('3') => {
                self.tab = Tab::Player;
                return;
            }
            KeyCode::Tab => {
                self.tab = self.tab.next();
                return;
            }
            KeyCode::Char('?') => {
                self.presenter.on_recognize_clicked();
                self.flush_player_messages();
                return;
            }
            _ => {}
        }

        match self.tab {
            Tab::Library => self.handle_library_key(key),
            Tab::Playlists => {
                if self.playlists.select.is_some() {
                    self.handle_select_key(key);
                } else if self.playlists.detail.is_some() {
                    self.handle_detail_key(key);
                } else {
                    self.handle_playlists_key(key);
                }
            }
            Tab::Player => self.handle_player_key(key),
        }
    }

    fn handle_library_key(&mut self, key: KeyEvent) {
        let lib = &mut self.library;
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => move_list_selection(&mut lib.list, lib.visible.len(), 1),
            KeyCode::Up | KeyCode::Char('k') => move_list_selection(&mut lib.list, lib.visible.len(), -1),
            KeyCode::PageDown => move_list_selection(&mut lib.list, lib.visible.len(), 10),
            KeyCode::PageUp => move_list_selection(&mut lib.list, lib.visible.len(), -10),
            KeyCode::Char('/') => lib.filter.activate(),
            KeyCode::Esc => {
                if !lib.filter.text().is_empty() {
                    lib.filter.clear();
                    lib.apply_filter();
                }
            }
            KeyCode::Char('R') => {
                self.toast.info("Rescanning library…");
                self.rescan_library();
            }
            KeyCode::Enter => {
                let action = lib.list.selected().and_then(|row| lib.visible.click(row));
                if let Some(RowAction::Click(row)) = action {
                    let tracks = lib.visible.tracks().to_vec();
                    self.play_list(tracks, row);
                }
            }
            _ => {}
        }
    }

    fn handle_playlists_key(&mut self, key: KeyEvent) {
        let view = &mut self.playlists;
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => move_list_selection(&mut view.list, view.adapter.len(), 1),
            KeyCode::Up | KeyCode::Char('k') => move_list_selection(&mut view.list, view.adapter.len(), -1),
            KeyCode::Char('n') => view.name_prompt.activate(),
            KeyCode::Enter => {
                let action = view.list.selected().and_then(|row| view.adapter.click(row));
                if let Some(PlaylistAction::Open(id)) = action {
                    self.open_playlist(id);
                }
            }
            KeyCode::Char('d') => {
                let Some(row) = view.list.selected() else {
                    return;
                };
                let Some(PlaylistAction::ConfirmDelete(id)) = view.adapter.long_click(row) else {
                    return;
                };
                let name = view.selected().map(|p| p.name.clone()).unwrap_or_default();
                if view.delete.press(id, Instant::now()) {
                    info!("Deleting playlist {}", id);
                    self.store_job(move |store| store.delete_playlist(id), StoreReply::Deleted);
                } else {
                    self.toast.warning(format!("Press d again to delete '{}'", name));
                }
            }
            _ => {}
        }
    }

    fn handle_detail_key(&mut self, key: KeyEvent) {
        let Some(detail) = self.playlists.detail.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => move_list_selection(&mut detail.list, detail.tracks.len(), 1),
            KeyCode::Up | KeyCode::Char('k') => move_list_selection(&mut detail.list, detail.tracks.len(), -1),
            KeyCode::Esc | KeyCode::Backspace => self.playlists.detail = None,
            KeyCode::Enter => {
                let action = detail.list.selected().and_then(|row| detail.tracks.click(row));
                if let Some(RowAction::Click(row)) = action {
                    let tracks = detail.tracks.tracks().to_vec();
                    self.play_list(tracks, row);
                }
            }
            KeyCode::Char('x') => {
                let playlist_id = detail.playlist.id;
                let Some((path, title)) = detail
                    .list
                    .selected()
                    .and_then(|row| detail.tracks.get(row))
                    .map(|t| (t.path.clone(), t.title.clone()))
                else {
                    return;
                };
                if !detail.remove.press(path.clone(), Instant::now()) {
                    self.toast.warning(format!("Press x again to remove '{}'", title));
                    return;
                }
                info!("Removing {} from playlist {}", path, playlist_id);
                self.store_job(
                    move |store| store.remove_track_from_playlist(playlist_id, &path),
                    move |result| StoreReply::Removed { playlist_id, result },
                );
            }
            KeyCode::Char('A') => {
                if self.library.all.is_empty() {
                    self.toast.info("Library is empty");
                    return;
                }
                let mut list = ListState::default();
                list.select(Some(0));
                self.playlists.select = Some(SelectView {
                    playlist_id: detail.playlist.id,
                    tracks: SelectTracksAdapter::new(self.library.all.clone()),
                    rows: RowCache::default(),
                    list,
                });
            }
            _ => {}
        }
    }

    fn handle_select_key(&mut self, key: KeyEvent) {
        let Some(select) = self.playlists.select.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => move_list_selection(&mut select.list, select.tracks.len(), 1),
            KeyCode::Up | KeyCode::Char('k') => move_list_selection(&mut select.list, select.tracks.len(), -1),
            KeyCode::Char(' ') => {
                if let Some(row) = select.list.selected() {
                    select.tracks.toggle(row);
                    move_list_selection(&mut select.list, select.tracks.len(), 1);
                }
            }
            KeyCode::Esc => self.playlists.select = None,
            KeyCode::Enter => {
                let playlist_id = select.playlist_id;
                let tracks = select.tracks.selected_tracks();
                self.playlists.select = None;
                if tracks.is_empty() {
                    return;
                }
                self.store_job(
                    move |store| store.add_tracks_to_playlist(playlist_id, &tracks),
                    move |result| StoreReply::BulkAdded { playlist_id, result },
                );
            }
            _ => {}
        }
    }

    fn handle_player_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char(' ') => self.presenter.on_play_pause_clicked(),
            KeyCode::Char('n') => self.presenter.on_next_clicked(),
            KeyCode::Char('p') => self.presenter.on_previous_clicked(),
            KeyCode::Left => self.presenter.on_seek_step(-1),
            KeyCode::Right => self.presenter.on_seek_step(1),
            KeyCode::Char('s') => self.presenter.on_shuffle_clicked(),
            KeyCode::Char('r') => self.presenter.on_repeat_clicked(),
            KeyCode::Char('i') => self.presenter.on_details_toggled(),
            KeyCode::Char('a') => self.presenter.on_add_to_playlist_clicked(),
            KeyCode::Down | KeyCode::Char('j') => {
                if let Some(screen) = self.presenter.view_mut() {
                    screen.move_selection(1);
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if let Some(screen) = self.presenter.view_mut() {
                    screen.move_selection(-1);
                }
            }
            KeyCode::Enter => {
                let row = self.presenter.view().and_then(|s| s.selected_queue_row());
                if let Some(row) = row {
                    self.presenter.on_queue_item_clicked(row);
                }
            }
            _ => {}
        }
    }

    fn picker_open(&self) -> bool {
        self.tab == Tab::Player
            && self
                .presenter
                .view()
                .is_some_and(|s| s.picker.is_some())
    }

    fn handle_picker_key(&mut self, key: KeyEvent) {
        let Some(screen) = self.presenter.view_mut() else {
            return;
        };
        let Some(picker) = screen.picker.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                move_list_selection(&mut picker.list, picker.playlists.len(), 1)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                move_list_selection(&mut picker.list, picker.playlists.len(), -1)
            }
            KeyCode::Enter => {
                let choice = picker
                    .list
                    .selected()
                    .and_then(|row| picker.playlists.get(row).cloned());
                screen.picker = None;
                match choice {
                    Some(playlist) => self.presenter.on_playlist_selected(playlist),
                    None => self.presenter.on_playlist_picker_dismissed(),
                }
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                screen.picker = None;
                self.presenter.on_playlist_picker_dismissed();
            }
            _ => {}
        }
    }

    fn play_list(&mut self, tracks: Vec<Track>, start_index: usize) {
        if !self.connected {
            self.toast.warning("Not connected to the daemon");
            return;
        }
        self.link.send(Command::LoadQueue { tracks, start_index });
        self.tab = Tab::Player;
    }

    fn create_playlist(&mut self, name: String) {
        let name = name.trim().to_string();
        if name.is_empty() {
            self.toast.warning("Playlist name cannot be empty");
            return;
        }
        let label = name.clone();
        self.store_job(
            move |store| store.create_playlist(&name),
            move |result| StoreReply::Created { name: label, result },
        );
    }

    // ── Drawing ─────────────────────────────────────────────────────────────

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let chunks = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

        let tabs = Tabs::new(Tab::ALL.iter().map(|t| t.title()))
            .select(self.tab.index())
            .style(style_secondary())
            .highlight_style(style_accent());
        frame.render_widget(tabs, chunks[0]);

        match self.tab {
            Tab::Library => self.draw_library(frame, chunks[1]),
            Tab::Playlists => self.draw_playlists(frame, chunks[1]),
            Tab::Player => {
                if let Some(screen) = self.presenter.view_mut() {
                    screen.draw(frame, chunks[1]);
                }
            }
        }

        self.draw_status(frame, chunks[2]);
        self.toast.draw(frame, area);
    }

    fn draw_library(&mut self, frame: &mut Frame, area: Rect) {
        let lib = &mut self.library;
        let (list_area, filter_area) = if lib.filter.is_active() || !lib.filter.text().is_empty() {
            let parts = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(area);
            (parts[0], Some(parts[1]))
        } else {
            (area, None)
        };

        let dirty = lib.visible.take_dirty_rows();
        let visible = &lib.visible;
        lib.rows.sync(visible.len(), dirty, |row| {
            visible
                .get(row)
                .map(|t| track_row(t, visible.is_highlighted(row)))
                .unwrap_or_default()
        });

        let title = if lib.scanning {
            " Library (scanning…) ".to_string()
        } else if lib.visible.len() == lib.all.len() {
            format!(" Library ({}) ", lib.all.len())
        } else {
            format!(" Library ({}/{}) ", lib.visible.len(), lib.all.len())
        };
        let list = List::new(lib.rows.rows().to_vec())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(style_focused_border())
                    .title(title),
            )
            .highlight_style(style_selected());
        frame.render_stateful_widget(list, list_area, &mut lib.list);

        if let Some(filter_area) = filter_area {
            lib.filter.draw(frame, filter_area);
        }
    }

    fn draw_playlists(&mut self, frame: &mut Frame, area: Rect) {
        let view = &mut self.playlists;

        if let Some(select) = view.select.as_mut() {
            let dirty = select.tracks.take_dirty_rows();
            let tracks = &select.tracks;
            select.rows.sync(tracks.len(), dirty, |row| {
                tracks
                    .tracks()
                    .get(row)
                    .map(|t| select_row(t, tracks.is_selected(row)))
                    .unwrap_or_default()
            });
            let title = format!(" Add tracks ({} selected) ", select.tracks.selected_count());
            let list = List::new(select.rows.rows().to_vec())
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(style_focused_border())
                        .title(title),
                )
                .highlight_style(style_selected());
            frame.render_stateful_widget(list, area, &mut select.list);
            return;
        }

        if let Some(detail) = view.detail.as_mut() {
            let dirty = detail.tracks.take_dirty_rows();
            let tracks = &detail.tracks;
            detail.rows.sync(tracks.len(), dirty, |row| {
                tracks
                    .get(row)
                    .map(|t| track_row(t, tracks.is_highlighted(row)))
                    .unwrap_or_default()
            });
            let title = format!(" {} ({}) ", detail.playlist.name, detail.tracks.len());
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(style_focused_border())
                .title(title);
            if detail.tracks.is_empty() {
                let hint = Paragraph::new(Line::from(Span::styled(
                    "Empty playlist. Press A to add tracks.",
                    style_muted(),
                )))
                .block(block);
                frame.render_widget(hint, area);
            } else {
                let list = List::new(detail.rows.rows().to_vec())
                    .block(block)
                    .highlight_style(style_selected());
                frame.render_stateful_widget(list, area, &mut detail.list);
            }
            return;
        }

        let (list_area, prompt_area) = if view.name_prompt.is_active() {
            let parts = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(area);
            (parts[0], Some(parts[1]))
        } else {
            (area, None)
        };

        let dirty = view.adapter.take_dirty_rows();
        let playlists = view.adapter.playlists();
        view.rows.sync(playlists.len(), dirty, |row| {
            playlists
                .get(row)
                .map(|p| Line::from(Span::styled(format!("  {}", p.name), style_default())))
                .unwrap_or_default()
        });

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(style_focused_border())
            .title(format!(" Playlists ({}) ", view.adapter.len()));
        if view.adapter.len() == 0 {
            let hint = Paragraph::new(Line::from(Span::styled(
                "No playlists yet. Press n to create one.",
                style_muted(),
            )))
            .block(block);
            frame.render_widget(hint, list_area);
        } else {
            let list = List::new(view.rows.rows().to_vec())
                .block(block)
                .highlight_style(style_selected());
            frame.render_stateful_widget(list, list_area, &mut view.list);
        }

        if let Some(prompt_area) = prompt_area {
            view.name_prompt.draw(frame, prompt_area);
        }
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let mut spans = Vec::new();
        if self.connected {
            spans.push(Span::styled(" ● ", style_playing()));
        } else {
            spans.push(Span::styled(" ○ connecting ", style_pending()));
        }
        let badge = self
            .link
            .snapshot()
            .and_then(|s| s.engine_health.badge_label().map(str::to_string));
        if let Some(badge) = badge {
            spans.push(Span::styled(format!("[{}] ", badge), style_accent()));
        }
        if let Some(np) = &self.now_playing {
            let glyph = match np.icon {
                PlayPauseIcon::Pause => "▶",
                PlayPauseIcon::Play => "⏸",
            };
            spans.push(Span::styled(format!("{} {}", glyph, np.title), style_default()));
            spans.push(Span::styled(format!(" · {}", np.artist), style_secondary()));
        }
        let hints = match self.tab {
            Tab::Library => "  enter play  / filter  R rescan  ? identify  q quit",
            Tab::Playlists if self.playlists.select.is_some() => "  space select  enter add  esc back",
            Tab::Playlists if self.playlists.detail.is_some() => "  enter play  x remove  A add  esc back",
            Tab::Playlists => "  enter open  n new  d delete",
            Tab::Player => "  space ⏯  n/p  ←/→ seek  s r  i  a add  ? identify",
        };
        spans.push(Span::styled(hints, style_muted()));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }
}
