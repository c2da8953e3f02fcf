use anyhow::Error;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

/// Produce a rectangle centered within `area` that spans the requested percent
/// of the width and height. Used for modal dialogs.
pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(horizontal[1]);

    vertical[1]
}

/// Extract the most relevant error message from a chained error.
pub(crate) fn surface_error(err: &Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}

/// Footer key hint, `key` in bold cyan followed by its action.
pub(crate) fn key_hint(key: &'static str, action: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(
            key,
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {action}  ")),
    ]
}

pub(crate) fn money(value: f64) -> String {
    format!("{value:.2}")
}

pub(crate) fn optional_money(value: Option<f64>) -> String {
    value.map(money).unwrap_or_else(|| "-".to_string())
}

/// Clamp `current + delta` to `0..len`.
pub(crate) fn step_index(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let next = current as isize + delta;
    next.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_index_stays_in_bounds() {
        assert_eq!(step_index(0, -1, 5), 0);
        assert_eq!(step_index(3, 10, 5), 4);
        assert_eq!(step_index(2, 1, 5), 3);
        assert_eq!(step_index(4, 1, 0), 0);
    }

    #[test]
    fn surface_error_shows_root_cause() {
        let err = anyhow::anyhow!("disk full").context("saving product");
        assert_eq!(surface_error(&err), "disk full");
    }
}
