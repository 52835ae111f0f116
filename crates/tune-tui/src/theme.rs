//! Colours and the handful of styles every screen shares.

use ratatui::style::{Color, Modifier, Style};

// Base
pub const C_PRIMARY: Color = Color::Rgb(222, 218, 206);
pub const C_SECONDARY: Color = Color::Rgb(140, 134, 120);
pub const C_MUTED: Color = Color::Rgb(88, 84, 76);
pub const C_ACCENT: Color = Color::Rgb(235, 130, 70);

// Playback
pub const C_PLAYING: Color = Color::Rgb(120, 190, 110);
pub const C_PENDING: Color = Color::Rgb(230, 190, 90);

// Panels
pub const C_SELECTION_BG: Color = Color::Rgb(44, 40, 34);
pub const C_PANEL_BORDER: Color = Color::Rgb(60, 56, 48);
pub const C_PANEL_BORDER_FOCUSED: Color = Color::Rgb(180, 140, 90);
pub const C_FILTER_BG: Color = Color::Rgb(30, 28, 24);
pub const C_FILTER_FG: Color = Color::Rgb(240, 210, 120);

// Toasts
pub const C_TOAST_INFO: Color = Color::Rgb(110, 170, 200);
pub const C_TOAST_SUCCESS: Color = C_PLAYING;
pub const C_TOAST_WARNING: Color = C_PENDING;
pub const C_TOAST_ERROR: Color = Color::Rgb(220, 90, 80);

fn fg(color: Color) -> Style {
    Style::new().fg(color)
}

pub fn style_default() -> Style {
    fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    fg(C_SECONDARY)
}

pub fn style_muted() -> Style {
    fg(C_MUTED)
}

pub fn style_accent() -> Style {
    fg(C_ACCENT).add_modifier(Modifier::BOLD)
}

/// The row or title of whatever is playing now.
pub fn style_playing() -> Style {
    fg(C_PLAYING).add_modifier(Modifier::BOLD)
}

pub fn style_pending() -> Style {
    fg(C_PENDING)
}

pub fn style_selected() -> Style {
    style_default()
        .bg(C_SELECTION_BG)
        .add_modifier(Modifier::BOLD)
}

pub fn style_focused_border() -> Style {
    fg(C_PANEL_BORDER_FOCUSED)
}

pub fn style_unfocused_border() -> Style {
    fg(C_PANEL_BORDER)
}
