use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use super::app::App;

/// Input poll interval. Scanner wedges type a whole code well inside it.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Spin up the terminal backend, enter the draw loop, and keep processing input
/// until the user quits.
pub fn run_app(app: &mut App) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode().context("failed to enable raw mode")?;
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;

    let result = loop {
        if let Err(err) = terminal.draw(|frame| app.draw(frame)) {
            break Err::<(), _>(err).context("failed to draw frame");
        }

        match poll_key() {
            Ok(Some(code)) => match app.handle_key(code) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(err) => break Err(err),
            },
            Ok(None) => {}
            Err(err) => break Err(err),
        }
    };

    cleanup_terminal(&mut terminal)?;
    result
}

fn poll_key() -> Result<Option<crossterm::event::KeyCode>> {
    if !event::poll(POLL_INTERVAL).context("event polling failed")? {
        return Ok(None);
    }
    match event::read().context("failed to read event")? {
        Event::Key(key_event) if key_event.kind == KeyEventKind::Press => Ok(Some(key_event.code)),
        _ => Ok(None),
    }
}

fn cleanup_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal
        .show_cursor()
        .context("failed to restore cursor visibility")
}
