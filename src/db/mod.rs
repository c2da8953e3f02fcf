//! Persistence module split across logical submodules. Functions take a
//! borrowed connection; the ones that change more than one row take
//! `&mut Connection` and run inside their own transaction.

mod annual;
mod connection;
mod events;
pub mod inventory;
pub(crate) mod products;
pub mod reservations;
mod suppliers;

pub use annual::{fetch_annual_events, insert_annual_event};
pub use connection::{apply_schema, ensure_schema, open_in_memory};
pub use events::{
    create_event, delete_event, fetch_event, fetch_events, fetch_events_in_year,
    find_event_by_name, update_event,
};
pub use inventory::{
    add_stock, available_stock, get_activity, get_inventory_status, get_low_stock_items,
    get_transaction_history, remove_stock, stock_level, HistoryFilter,
};
pub use products::{
    create_product, fetch_product, find_product_by_barcode, find_product_by_sku, search_products,
    set_location, update_product,
};
pub use reservations::{
    assign_product, assign_products, assigned_total, fetch_event_product, fetch_event_products,
    fetch_event_sales, record_sale, remove_assignment, update_assignment, SaleRequest,
};
pub use suppliers::{
    create_supplier, fetch_suppliers, find_or_create_supplier, find_supplier_by_name,
    update_supplier,
};
