//! One-line prompt on top of tui-input, used for the library filter and the
//! new-playlist name.

use ratatui::crossterm::event::{Event, KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tui_input::{backend::crossterm::EventHandler, Input};

use crate::theme::{C_FILTER_BG, C_FILTER_FG, C_MUTED};

#[derive(Debug, PartialEq)]
pub enum InputAction {
    Changed(String),
    Confirmed(String),
    Cancelled,
}

pub struct TextInput {
    input: Input,
    active: bool,
    prefix: &'static str,
    placeholder: String,
}

impl TextInput {
    pub fn new(prefix: &'static str, placeholder: impl Into<String>) -> Self {
        Self {
            input: Input::default(),
            active: false,
            prefix,
            placeholder: placeholder.into(),
        }
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn clear(&mut self) {
        self.input = Input::default();
    }

    pub fn text(&self) -> &str {
        self.input.value()
    }

    /// Esc clears the text first and closes the prompt when already empty.
    /// Enter closes it and hands back the value.
    pub fn handle_key(&mut self, key: KeyEvent) -> InputAction {
        match key.code {
            KeyCode::Esc => {
                if self.input.value().is_empty() {
                    self.active = false;
                    InputAction::Cancelled
                } else {
                    self.clear();
                    InputAction::Changed(String::new())
                }
            }
            KeyCode::Enter => {
                self.active = false;
                InputAction::Confirmed(self.input.value().to_string())
            }
            _ => {
                self.input.handle_event(&Event::Key(key));
                InputAction::Changed(self.input.value().to_string())
            }
        }
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let lead = self.prefix.chars().count() + 1;
        let scroll = self
            .input
            .visual_scroll((area.width as usize).saturating_sub(lead + 2));
        let value = self.input.value();
        let span = if value.is_empty() {
            Span::styled(
                format!("{} {}", self.prefix, self.placeholder),
                Style::default().fg(C_MUTED),
            )
        } else {
            let visible: String = value.chars().skip(scroll).collect();
            Span::styled(
                format!("{} {}", self.prefix, visible),
                Style::default().fg(C_FILTER_FG),
            )
        };
        frame.render_widget(
            Paragraph::new(Line::from(vec![span])).style(Style::default().bg(C_FILTER_BG)),
            area,
        );

        if self.active && area.width > 0 {
            let cursor_x = area.x + (lead + self.input.visual_cursor().saturating_sub(scroll)) as u16;
            frame.set_cursor_position((cursor_x.min(area.x + area.width - 1), area.y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_typing_then_escape_twice() {
        let mut input = TextInput::new("/", "filter");
        input.activate();
        input.handle_key(key(KeyCode::Char('g')));
        assert_eq!(
            input.handle_key(key(KeyCode::Char('y'))),
            InputAction::Changed("gy".into())
        );
        assert_eq!(
            input.handle_key(key(KeyCode::Esc)),
            InputAction::Changed(String::new())
        );
        assert!(input.is_active());
        assert_eq!(input.handle_key(key(KeyCode::Esc)), InputAction::Cancelled);
        assert!(!input.is_active());
    }

    #[test]
    fn test_enter_confirms_value() {
        let mut input = TextInput::new(">", "name");
        input.activate();
        for c in "Gym".chars() {
            input.handle_key(key(KeyCode::Char(c)));
        }
        assert_eq!(
            input.handle_key(key(KeyCode::Enter)),
            InputAction::Confirmed("Gym".into())
        );
        assert!(!input.is_active());
    }
}
