//! The player screen: what the presenter draws into.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListState, Paragraph},
    Frame,
};
use tune_proto::protocol::RepeatMode;
use tune_proto::track::{format_ms, Playlist, Track};

use crate::adapters::TrackListAdapter;
use crate::presenter::PlayerView;
use crate::rows::{track_row, RowCache};
use crate::theme::{
    style_accent, style_default, style_focused_border, style_muted, style_playing,
    style_secondary, style_selected, style_unfocused_border, C_PLAYING,
};
use crate::widgets::toast::Severity;

pub struct PlaylistPicker {
    pub playlists: Vec<Playlist>,
    pub list: ListState,
}

#[derive(Default)]
pub struct PlayerScreen {
    track: Option<Track>,
    title: String,
    details_visible: bool,
    position_ms: u64,
    duration_ms: u64,
    /// `true` while the pause button is showing.
    playing: bool,
    shuffle: bool,
    repeat: RepeatMode,
    queue: TrackListAdapter,
    queue_rows: RowCache,
    pub queue_list: ListState,
    pub picker: Option<PlaylistPicker>,
    /// Messages for the toast layer, drained by the app.
    outbox: Vec<(String, Severity)>,
}

impl PlayerScreen {
    pub fn take_messages(&mut self) -> Vec<(String, Severity)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn selected_queue_row(&self) -> Option<usize> {
        self.queue_list.selected()
    }

    pub fn move_selection(&mut self, delta: isize) {
        move_list_selection(&mut self.queue_list, self.queue.len(), delta);
    }

    pub fn draw(&mut self, frame: &mut Frame, area: Rect) {
        let details_height = if self.details_visible { 5 } else { 0 };
        let chunks = Layout::vertical([
            Constraint::Length(details_height),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(3),
        ])
        .split(area);

        if self.details_visible {
            self.draw_details(frame, chunks[0]);
        }
        self.draw_progress(frame, chunks[1]);
        self.draw_modes(frame, chunks[2]);
        self.draw_queue(frame, chunks[3]);

        if self.picker.is_some() {
            self.draw_picker(frame, area);
        }
    }

    fn draw_details(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(style_unfocused_border())
            .title(Span::styled(format!(" {} ", self.title), style_accent()));
        let lines = match &self.track {
            Some(track) => vec![
                Line::from(Span::styled(track.title.clone(), style_playing())),
                Line::from(Span::styled(track.artist.clone(), style_secondary())),
                Line::from(Span::styled(track.path.clone(), style_muted())),
            ],
            None => vec![Line::from(Span::styled("Nothing queued", style_muted()))],
        };
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_progress(&self, frame: &mut Frame, area: Rect) {
        let ratio = if self.duration_ms > 0 {
            (self.position_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let label = format!(
            "{} / {}",
            format_ms(self.position_ms),
            format_ms(self.duration_ms)
        );
        let gauge = Gauge::default()
            .gauge_style(ratatui::style::Style::default().fg(C_PLAYING))
            .ratio(ratio)
            .label(label);
        frame.render_widget(gauge, area);
    }

    fn draw_modes(&self, frame: &mut Frame, area: Rect) {
        let icon = if self.playing { "⏸ pause" } else { "▶ play" };
        let shuffle = if self.shuffle { "shuffle on" } else { "shuffle off" };
        let line = Line::from(vec![
            Span::styled(format!(" {}", icon), style_default()),
            Span::styled(format!("   {}", shuffle), style_secondary()),
            Span::styled(format!("   repeat {}", self.repeat.label()), style_secondary()),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_queue(&mut self, frame: &mut Frame, area: Rect) {
        let dirty = self.queue.take_dirty_rows();
        let queue = &self.queue;
        self.queue_rows.sync(queue.len(), dirty, |row| {
            queue
                .get(row)
                .map(|t| track_row(t, queue.is_highlighted(row)))
                .unwrap_or_default()
        });

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(style_focused_border())
            .title(format!(" Queue ({}) ", self.queue.len()));
        let list = List::new(self.queue_rows.rows().to_vec())
            .block(block)
            .highlight_style(style_selected());
        frame.render_stateful_widget(list, area, &mut self.queue_list);
    }

    fn draw_picker(&mut self, frame: &mut Frame, area: Rect) {
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        let height = (picker.playlists.len() as u16 + 2).min(area.height.saturating_sub(2)).max(3);
        let width = area.width.min(40);
        let popup = Rect {
            x: area.x + (area.width.saturating_sub(width)) / 2,
            y: area.y + (area.height.saturating_sub(height)) / 2,
            width,
            height,
        };
        let items: Vec<Line<'static>> = picker
            .playlists
            .iter()
            .map(|p| Line::from(format!(" {}", p.name)))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(style_focused_border())
                    .title(" Add to playlist "),
            )
            .highlight_style(style_selected());
        frame.render_widget(Clear, popup);
        frame.render_stateful_widget(list, popup, &mut picker.list);
    }
}

impl PlayerView for PlayerScreen {
    fn show_track_details(&mut self, track: &Track) {
        self.track = Some(track.clone());
    }

    fn update_progress(&mut self, position_ms: u64, duration_ms: u64) {
        self.position_ms = position_ms;
        self.duration_ms = duration_ms;
    }

    fn show_play_icon(&mut self) {
        self.playing = false;
    }

    fn show_pause_icon(&mut self) {
        self.playing = true;
    }

    fn update_shuffle_repeat(&mut self, shuffle: bool, repeat: RepeatMode) {
        self.shuffle = shuffle;
        self.repeat = repeat;
    }

    fn update_queue(&mut self, queue: &[Track]) {
        if queue.is_empty() {
            self.track = None;
            self.title.clear();
            self.position_ms = 0;
            self.duration_ms = 0;
        }
        self.queue.set_tracks(queue.to_vec());
        if self.queue_list.selected().map_or(true, |s| s >= queue.len()) {
            self.queue_list
                .select(if queue.is_empty() { None } else { Some(0) });
        }
    }

    fn highlight_track(&mut self, path: Option<&str>) {
        self.queue.set_highlight_path(path);
    }

    fn scroll_to(&mut self, index: usize) {
        if index < self.queue.len() {
            self.queue_list.select(Some(index));
        }
    }

    fn set_details_visible(&mut self, visible: bool) {
        self.details_visible = visible;
    }

    fn set_details_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn show_playlist_picker(&mut self, playlists: Vec<Playlist>) {
        let mut list = ListState::default();
        list.select(Some(0));
        self.picker = Some(PlaylistPicker { playlists, list });
    }

    fn show_message(&mut self, message: &str) {
        self.outbox.push((message.to_string(), Severity::Success));
    }

    fn show_error(&mut self, message: &str) {
        self.outbox.push((message.to_string(), Severity::Error));
    }
}

/// Move a list cursor by `delta`, clamped to `len` rows.
pub fn move_list_selection(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1);
    state.select(Some(next as usize));
}
