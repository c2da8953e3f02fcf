use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Table definitions, applied in order. Every statement is idempotent so the
/// list doubles as the lazy migration run on each start.
const SCHEMA: &[(&str, &str)] = &[
    (
        "suppliers",
        "CREATE TABLE IF NOT EXISTS suppliers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            contact_person TEXT,
            email TEXT,
            phone TEXT,
            address TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    ),
    (
        "products",
        "CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            supplier_id INTEGER,
            sku TEXT,
            ean_upc TEXT UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            subcategory TEXT,
            purchase_price REAL,
            selling_price REAL,
            status TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(supplier_id) REFERENCES suppliers(id)
        )",
    ),
    (
        "inventory",
        "CREATE TABLE IF NOT EXISTS inventory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL UNIQUE,
            quantity INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
            reserved INTEGER NOT NULL DEFAULT 0 CHECK (reserved >= 0 AND reserved <= quantity),
            location TEXT,
            last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(product_id) REFERENCES products(id)
        )",
    ),
    (
        "inventory_transactions",
        "CREATE TABLE IF NOT EXISTS inventory_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            transaction_type TEXT NOT NULL CHECK (transaction_type IN ('in', 'out')),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            reference TEXT,
            notes TEXT,
            transaction_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            user TEXT,
            FOREIGN KEY(product_id) REFERENCES products(id)
        )",
    ),
    (
        "activity_log",
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activity_type TEXT NOT NULL,
            description TEXT NOT NULL,
            related_id INTEGER,
            user TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    ),
    (
        "events",
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            location TEXT,
            description TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    ),
    (
        "event_products",
        "CREATE TABLE IF NOT EXISTS event_products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            quantity_assigned INTEGER NOT NULL CHECK (quantity_assigned > 0),
            event_sale_price REAL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(event_id, product_id),
            FOREIGN KEY(event_id) REFERENCES events(id),
            FOREIGN KEY(product_id) REFERENCES products(id)
        )",
    ),
    (
        "event_sales",
        "CREATE TABLE IF NOT EXISTS event_sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            sale_price REAL NOT NULL,
            sale_date TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(event_id) REFERENCES events(id),
            FOREIGN KEY(product_id) REFERENCES products(id)
        )",
    ),
    (
        "annual_events",
        "CREATE TABLE IF NOT EXISTS annual_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            periodo TEXT,
            accordo TEXT,
            num_eventi INTEGER,
            data TEXT,
            expo_periodo TEXT,
            nome TEXT,
            mezzo_trasporto TEXT,
            disciplina TEXT,
            localita TEXT,
            regione TEXT,
            expo_brand TEXT,
            addetto TEXT,
            pernotto REAL,
            vitto_alloggio REAL,
            treno REAL,
            spazio_varie REAL,
            incassi_2024 REAL,
            caschi REAL,
            occhiali REAL,
            pneumatici REAL,
            bdg_incassi REAL,
            bdg_costi REAL,
            km REAL,
            gasolio REAL,
            autostrada REAL,
            costi_reali REAL,
            incassi REAL,
            pos REAL,
            cash REAL,
            extra REAL,
            vendita_privati_agenti REAL,
            ffwd TEXT
        )",
    ),
];

/// Ensure the database file exists, run lazy migrations, and return a live
/// connection with foreign keys enforced.
pub fn ensure_schema(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open SQLite database {}", db_path.display()))?;
    apply_schema(&conn)?;

    tracing::info!(path = %db_path.display(), "inventory database ready");
    Ok(conn)
}

/// Throwaway database used by tests and dry runs.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Enable foreign keys and create every table that is missing.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("failed to enable foreign keys")?;

    for (table, ddl) in SCHEMA {
        conn.execute(ddl, [])
            .with_context(|| format!("failed to create {table} table"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables as usize, SCHEMA.len());
    }

    #[test]
    fn inventory_quantity_cannot_go_negative_at_the_storage_level() {
        let conn = open_in_memory().unwrap();
        conn.execute("INSERT INTO products (name) VALUES ('Helmet')", [])
            .unwrap();
        conn.execute("INSERT INTO inventory (product_id, quantity) VALUES (1, 0)", [])
            .unwrap();

        let result = conn.execute("UPDATE inventory SET quantity = -1 WHERE product_id = 1", []);
        assert!(result.is_err());
    }
}
