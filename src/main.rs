//! Binary entry point: resolve configuration, start file logging, open the
//! store and hand it to the terminal UI until the user quits.
use anyhow::Context;
use inventory_tracker::{ensure_schema, logging, run_app, App, Config};

fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    logging::init(&config.log_path)?;
    tracing::info!(db = %config.db_path.display(), "starting inventory tracker");

    let conn = ensure_schema(&config.db_path)?;
    let mut app = App::new(conn, config)?;
    let result = run_app(&mut app);

    if let Err(err) = &result {
        tracing::error!(error = %err, "terminal session ended with an error");
    }
    result
}
