//! Error type shared by every library operation. Validation failures carry
//! enough detail for the UI to show a useful message; database failures wrap
//! the underlying `rusqlite` error untouched.

use thiserror::Error;

/// Result alias used across the persistence and scanning layers.
pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
    /// Quantities handed to ledger or reservation operations must be positive.
    #[error("quantity must be greater than zero (got {0})")]
    InvalidQuantity(i64),

    /// Not enough available stock to satisfy the request.
    #[error("not enough stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        available: i64,
        requested: i64,
    },

    /// Adding this many units would push on-hand past what an `i64` holds.
    #[error("cannot add {requested} units to product {product_id}: {on_hand} already on hand")]
    StockOverflow {
        product_id: i64,
        on_hand: i64,
        requested: i64,
    },

    /// Releasing more than is reserved would break the reservation invariant.
    #[error("cannot release {requested} units of product {product_id}: only {reserved} reserved")]
    OverRelease {
        product_id: i64,
        reserved: i64,
        requested: i64,
    },

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("supplier {0} not found")]
    SupplierNotFound(i64),

    #[error("event {0} not found")]
    EventNotFound(i64),

    /// Events with recorded sales keep their history and cannot be deleted.
    #[error("event {0} has recorded sales")]
    EventHasSales(i64),

    #[error("product {product_id} is not assigned to event {event_id}")]
    NotAssigned { event_id: i64, product_id: i64 },

    #[error("invalid barcode format: {0:?}")]
    InvalidBarcode(String),

    /// A unique column (EAN/UPC) already holds this value.
    #[error("duplicate value: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl InventoryError {
    /// Whether the failure came from input validation rather than storage.
    pub fn is_validation(&self) -> bool {
        !matches!(self, InventoryError::Database(_))
    }
}
