//! Inventory and event stock tracker backed by SQLite.
//!
//! Every stock movement goes through the ledger in [`db::inventory`]; event
//! reservations in [`db::reservations`] hold stock back from the shelf without
//! moving it. The terminal front end in [`ui`] is one consumer of these
//! operations; import and reporting sit beside it.
pub mod barcode;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod reports;
pub mod ui;

pub use config::Config;
pub use db::ensure_schema;
pub use error::{InventoryError, InventoryResult};

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
