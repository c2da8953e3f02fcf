//! Terminal front end. `App` owns the connection and all view state;
//! `run_app` drives it from crossterm key events.

mod app;
mod forms;
mod helpers;
mod screens;
mod terminal;

pub use app::App;
pub use terminal::run_app;
