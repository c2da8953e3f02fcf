use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{InventoryError, InventoryResult};
use crate::models::{NewSupplier, Supplier};

fn supplier_from_row(row: &Row<'_>) -> rusqlite::Result<Supplier> {
    Ok(Supplier {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_person: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
    })
}

/// Every supplier, alphabetically.
pub fn fetch_suppliers(conn: &Connection) -> InventoryResult<Vec<Supplier>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, contact_person, email, phone, address
         FROM suppliers
         ORDER BY name COLLATE NOCASE",
    )?;

    let suppliers = stmt
        .query_map([], supplier_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(suppliers)
}

pub fn find_supplier_by_name(conn: &Connection, name: &str) -> InventoryResult<Option<Supplier>> {
    let supplier = conn
        .query_row(
            "SELECT id, name, contact_person, email, phone, address
             FROM suppliers WHERE name = ?1",
            [name],
            supplier_from_row,
        )
        .optional()?;
    Ok(supplier)
}

/// Insert a supplier and echo the hydrated row.
pub fn create_supplier(conn: &Connection, new: &NewSupplier) -> InventoryResult<Supplier> {
    conn.execute(
        "INSERT INTO suppliers (name, contact_person, email, phone, address)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![new.name, new.contact_person, new.email, new.phone, new.address],
    )?;

    Ok(Supplier {
        id: conn.last_insert_rowid(),
        name: new.name.clone(),
        contact_person: new.contact_person.clone(),
        email: new.email.clone(),
        phone: new.phone.clone(),
        address: new.address.clone(),
    })
}

/// Imports name suppliers by text; reuse the existing row when there is one.
pub fn find_or_create_supplier(conn: &Connection, name: &str) -> InventoryResult<Supplier> {
    if let Some(existing) = find_supplier_by_name(conn, name)? {
        return Ok(existing);
    }
    let supplier = create_supplier(
        conn,
        &NewSupplier {
            name: name.to_string(),
            ..NewSupplier::default()
        },
    )?;
    tracing::info!(supplier_id = supplier.id, name, "created supplier");
    Ok(supplier)
}

pub fn update_supplier(conn: &Connection, id: i64, new: &NewSupplier) -> InventoryResult<()> {
    let updated = conn.execute(
        "UPDATE suppliers
         SET name = ?1, contact_person = ?2, email = ?3, phone = ?4, address = ?5,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?6",
        params![
            new.name,
            new.contact_person,
            new.email,
            new.phone,
            new.address,
            id
        ],
    )?;

    if updated == 0 {
        Err(InventoryError::SupplierNotFound(id))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn find_or_create_reuses_existing_rows() {
        let conn = open_in_memory().unwrap();
        let first = find_or_create_supplier(&conn, "FFWD").unwrap();
        let second = find_or_create_supplier(&conn, "FFWD").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(fetch_suppliers(&conn).unwrap().len(), 1);
    }

    #[test]
    fn update_reports_missing_supplier() {
        let conn = open_in_memory().unwrap();
        let payload = NewSupplier {
            name: "Ghost".into(),
            ..NewSupplier::default()
        };
        assert!(update_supplier(&conn, 42, &payload).is_err());
    }
}
