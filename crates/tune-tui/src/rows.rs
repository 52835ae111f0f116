//! Pre-rendered list rows.  Adapters report which rows changed; only those
//! are formatted again before the next frame.

use ratatui::text::{Line, Span};
use tune_proto::track::{format_ms, Track};

use crate::theme::{style_default, style_muted, style_playing, style_secondary};

#[derive(Default)]
pub struct RowCache {
    rows: Vec<Line<'static>>,
}

impl RowCache {
    /// Resize to `len` and re-render the `dirty` rows.
    pub fn sync(&mut self, len: usize, dirty: Vec<usize>, render: impl Fn(usize) -> Line<'static>) {
        self.rows.resize(len, Line::default());
        for row in dirty.into_iter().filter(|r| *r < len) {
            self.rows[row] = render(row);
        }
    }

    pub fn rows(&self) -> &[Line<'static>] {
        &self.rows
    }
}

pub fn track_row(track: &Track, highlighted: bool) -> Line<'static> {
    let (marker, title_style) = if highlighted {
        ("▶ ", style_playing())
    } else {
        ("  ", style_default())
    };
    let mut spans = vec![
        Span::styled(format!("{}{}", marker, track.title), title_style),
        Span::styled(format!("  {}", track.artist), style_secondary()),
    ];
    if track.duration_ms > 0 {
        spans.push(Span::styled(
            format!("  {}", format_ms(track.duration_ms)),
            style_muted(),
        ));
    }
    Line::from(spans)
}

pub fn select_row(track: &Track, selected: bool) -> Line<'static> {
    let mark = if selected { "[x] " } else { "[ ] " };
    let style = if selected { style_playing() } else { style_default() };
    Line::from(vec![
        Span::styled(format!("{}{}", mark, track.title), style),
        Span::styled(format!("  {}", track.artist), style_secondary()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dirty_rows_are_rendered() {
        let mut cache = RowCache::default();
        cache.sync(3, vec![0, 1, 2], |r| Line::from(format!("row {}", r)));
        cache.sync(3, vec![1], |r| Line::from(format!("new {}", r)));
        let text: Vec<String> = cache.rows().iter().map(|l| l.to_string()).collect();
        assert_eq!(text, vec!["row 0", "new 1", "row 2"]);

        cache.sync(1, vec![5], |r| Line::from(format!("x {}", r)));
        assert_eq!(cache.rows().len(), 1);
    }
}
