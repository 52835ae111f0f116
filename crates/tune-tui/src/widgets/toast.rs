//! Transient status messages in the top-right corner.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::theme::{C_TOAST_ERROR, C_TOAST_INFO, C_TOAST_SUCCESS, C_TOAST_WARNING};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

struct Toast {
    message: String,
    severity: Severity,
    expires: Instant,
}

pub struct ToastManager {
    toasts: VecDeque<Toast>,
    max_visible: usize,
}

impl ToastManager {
    pub fn new() -> Self {
        Self {
            toasts: VecDeque::new(),
            max_visible: 4,
        }
    }

    pub fn push(&mut self, message: impl Into<String>, severity: Severity, duration: Duration) {
        // Same text twice (e.g. daemon error + state diff) shows once
        let msg = message.into();
        self.toasts.retain(|t| t.message != msg);
        self.toasts.push_back(Toast {
            message: msg,
            severity,
            expires: Instant::now() + duration,
        });
        while self.toasts.len() > self.max_visible * 2 {
            self.toasts.pop_front();
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Info, Duration::from_secs(3));
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Success, Duration::from_secs(3));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Warning, Duration::from_secs(4));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(message, Severity::Error, Duration::from_secs(5));
    }

    /// Drop expired toasts.  Call each tick.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.toasts.retain(|t| t.expires > now);
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.toasts.iter().map(|t| t.message.as_str())
    }

    /// Newest first, stacked down the right edge of `area`.
    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let widest = (area.width / 2).clamp(30, 60);
        let rows = self
            .toasts
            .iter()
            .rev()
            .take(self.max_visible)
            .zip(area.y + 1..area.y + area.height);

        for (toast, y) in rows {
            let (color, mark) = severity_look(toast.severity);
            let width = (toast.message.width() as u16 + 4).min(widest).min(area.width);
            let slot = Rect::new(area.right().saturating_sub(width + 1), y, width, 1);
            let text = Span::styled(
                format!(" {} {} ", mark, toast.message),
                Style::new().fg(color).add_modifier(Modifier::BOLD),
            );
            frame.render_widget(Clear, slot);
            frame.render_widget(Paragraph::new(Line::from(text)), slot);
        }
    }
}

fn severity_look(severity: Severity) -> (Color, &'static str) {
    match severity {
        Severity::Info => (C_TOAST_INFO, "i"),
        Severity::Success => (C_TOAST_SUCCESS, "+"),
        Severity::Warning => (C_TOAST_WARNING, "!"),
        Severity::Error => (C_TOAST_ERROR, "x"),
    }
}

impl Default for ToastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let mut toasts = ToastManager::new();
        toasts.error("Could not play");
        toasts.info("Added to 'Gym'");
        toasts.error("Could not play");
        let messages: Vec<&str> = toasts.messages().collect();
        assert_eq!(messages, vec!["Added to 'Gym'", "Could not play"]);
    }

    #[test]
    fn test_expired_toasts_are_dropped() {
        let mut toasts = ToastManager::new();
        toasts.push("gone", Severity::Info, Duration::ZERO);
        toasts.success("kept");
        toasts.tick();
        assert_eq!(toasts.messages().collect::<Vec<_>>(), vec!["kept"]);
    }
}
