use rusqlite::{params, Connection, Error as SqlError, ErrorCode, OptionalExtension, Row};

use crate::error::{InventoryError, InventoryResult};
use crate::models::{NewProduct, Product, StockLevel};

/// Column list shared by every query that hydrates a `Product` at offset 0.
pub(crate) const PRODUCT_COLUMNS: &str = "p.id, p.supplier_id, p.sku, p.ean_upc, p.name, \
     p.description, p.category, p.subcategory, p.purchase_price, p.selling_price, p.status";
/// Number of columns in `PRODUCT_COLUMNS`.
pub(crate) const PRODUCT_WIDTH: usize = 11;

/// Base query for stock listings: product, supplier name, inventory row.
pub(crate) const STOCK_SELECT: &str = "SELECT p.id, p.supplier_id, p.sku, p.ean_upc, p.name, \
     p.description, p.category, p.subcategory, p.purchase_price, p.selling_price, p.status, \
     s.name, i.quantity, i.reserved, i.location, i.last_updated \
     FROM products p \
     JOIN inventory i ON i.product_id = p.id \
     LEFT JOIN suppliers s ON s.id = p.supplier_id";

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        supplier_id: row.get(1)?,
        sku: row.get(2)?,
        ean_upc: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        category: row.get(6)?,
        subcategory: row.get(7)?,
        purchase_price: row.get(8)?,
        selling_price: row.get(9)?,
        status: row.get(10)?,
    })
}

pub(crate) fn stock_from_row(row: &Row<'_>) -> rusqlite::Result<StockLevel> {
    Ok(StockLevel {
        product: product_from_row(row)?,
        supplier_name: row.get(PRODUCT_WIDTH)?,
        on_hand: row.get(PRODUCT_WIDTH + 1)?,
        reserved: row.get(PRODUCT_WIDTH + 2)?,
        location: row.get(PRODUCT_WIDTH + 3)?,
        last_updated: row.get(PRODUCT_WIDTH + 4)?,
    })
}

/// Look up a single product by id.
pub fn fetch_product(conn: &Connection, id: i64) -> InventoryResult<Product> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?1");
    conn.query_row(&sql, [id], product_from_row)
        .optional()?
        .ok_or(InventoryError::ProductNotFound(id))
}

/// Product and stock for an exact EAN/UPC match.
pub fn find_product_by_barcode(conn: &Connection, barcode: &str) -> InventoryResult<Option<StockLevel>> {
    let sql = format!("{STOCK_SELECT} WHERE p.ean_upc = ?1");
    Ok(conn.query_row(&sql, [barcode], stock_from_row).optional()?)
}

/// Product and stock for an exact SKU match. SKUs are not unique in older
/// price lists, so the lowest id wins.
pub fn find_product_by_sku(conn: &Connection, sku: &str) -> InventoryResult<Option<StockLevel>> {
    let sql = format!("{STOCK_SELECT} WHERE p.sku = ?1 ORDER BY p.id LIMIT 1");
    Ok(conn.query_row(&sql, [sku], stock_from_row).optional()?)
}

/// Substring search over name, description, SKU and barcode.
pub fn search_products(conn: &Connection, term: &str) -> InventoryResult<Vec<StockLevel>> {
    let pattern = format!("%{}%", term.trim());
    let sql = format!(
        "{STOCK_SELECT}
         WHERE p.name LIKE ?1 OR p.description LIKE ?1 OR p.sku LIKE ?1 OR p.ean_upc LIKE ?1
         ORDER BY p.name COLLATE NOCASE"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([pattern], stock_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create a product together with its empty inventory row.
pub fn create_product(conn: &mut Connection, new: &NewProduct) -> InventoryResult<Product> {
    let tx = conn.transaction()?;
    let product = insert_product(&tx, new)?;
    tx.commit()?;
    tracing::info!(product_id = product.id, name = %product.name, "created product");
    Ok(product)
}

/// Insert inside the caller's transaction. New products start at zero stock.
pub(crate) fn insert_product(conn: &Connection, new: &NewProduct) -> InventoryResult<Product> {
    conn.execute(
        "INSERT INTO products
            (supplier_id, sku, ean_upc, name, description, category, subcategory,
             purchase_price, selling_price, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.supplier_id,
            new.sku,
            new.ean_upc,
            new.name,
            new.description,
            new.category,
            new.subcategory,
            new.purchase_price,
            new.selling_price,
            new.status
        ],
    )
    .map_err(|err| map_unique_constraint(err, new.ean_upc.as_deref()))?;

    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO inventory (product_id, quantity, reserved) VALUES (?1, 0, 0)",
        [id],
    )?;

    Ok(Product {
        id,
        supplier_id: new.supplier_id,
        sku: new.sku.clone(),
        ean_upc: new.ean_upc.clone(),
        name: new.name.clone(),
        description: new.description.clone(),
        category: new.category.clone(),
        subcategory: new.subcategory.clone(),
        purchase_price: new.purchase_price,
        selling_price: new.selling_price,
        status: new.status.clone(),
    })
}

/// Overwrite the fields that are `Some` in `changes`; `None` keeps the stored
/// value. The name is always written.
pub fn update_product(conn: &Connection, id: i64, changes: &NewProduct) -> InventoryResult<()> {
    let updated = conn
        .execute(
            "UPDATE products SET
                supplier_id = COALESCE(?1, supplier_id),
                sku = COALESCE(?2, sku),
                ean_upc = COALESCE(?3, ean_upc),
                name = ?4,
                description = COALESCE(?5, description),
                category = COALESCE(?6, category),
                subcategory = COALESCE(?7, subcategory),
                purchase_price = COALESCE(?8, purchase_price),
                selling_price = COALESCE(?9, selling_price),
                status = COALESCE(?10, status),
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?11",
            params![
                changes.supplier_id,
                changes.sku,
                changes.ean_upc,
                changes.name,
                changes.description,
                changes.category,
                changes.subcategory,
                changes.purchase_price,
                changes.selling_price,
                changes.status,
                id
            ],
        )
        .map_err(|err| map_unique_constraint(err, changes.ean_upc.as_deref()))?;

    if updated == 0 {
        Err(InventoryError::ProductNotFound(id))
    } else {
        Ok(())
    }
}

/// Record where a product is shelved.
pub fn set_location(conn: &Connection, product_id: i64, location: Option<&str>) -> InventoryResult<()> {
    let updated = conn.execute(
        "UPDATE inventory SET location = ?1, last_updated = CURRENT_TIMESTAMP WHERE product_id = ?2",
        params![location, product_id],
    )?;
    if updated == 0 {
        Err(InventoryError::ProductNotFound(product_id))
    } else {
        Ok(())
    }
}

/// Turn a uniqueness violation on `ean_upc` into a readable error.
fn map_unique_constraint(err: SqlError, ean_upc: Option<&str>) -> InventoryError {
    if matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation)) {
        InventoryError::Duplicate(format!(
            "EAN/UPC {} already exists",
            ean_upc.unwrap_or("<none>")
        ))
    } else {
        err.into()
    }
}
