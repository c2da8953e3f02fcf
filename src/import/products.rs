use rusqlite::{Connection, ErrorCode};

use super::columns::{detect_column_mapping, parse_price, ColumnMapping};
use super::{detect_header_row, ImportSummary, Record, Sheet};
use crate::barcode;
use crate::db::products::insert_product;
use crate::db::{find_or_create_supplier, find_product_by_barcode, find_product_by_sku, update_product};
use crate::error::{InventoryError, InventoryResult};
use crate::models::NewProduct;

/// Load a supplier price list into the catalog. Rows are matched to existing
/// products by barcode, then SKU; matches are updated, the rest inserted with
/// zero stock. A row that trips a uniqueness or integrity rule is logged,
/// recorded in `errors` and skipped without stopping the import.
///
/// `supplier` applies to every row; without it, a supplier column is used when
/// the sheet has one.
pub fn import_products(
    conn: &mut Connection,
    sheet: &Sheet,
    supplier: Option<&str>,
) -> InventoryResult<ImportSummary> {
    let header_index = detect_header_row(sheet);
    let mapping = detect_column_mapping(sheet.header(header_index));
    let mut summary = ImportSummary::default();

    let mut tx = conn.transaction()?;
    let fixed_supplier = match supplier.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => Some(find_or_create_supplier(&tx, name)?.id),
        None => None,
    };

    for record in sheet.records(header_index) {
        let Some(mut product) = product_from_record(&record, &mapping) else {
            summary.skipped += 1;
            continue;
        };

        product.supplier_id = match (fixed_supplier, field(&record, mapping.supplier)) {
            (Some(id), _) => Some(id),
            (None, Some(name)) => Some(find_or_create_supplier(&tx, name)?.id),
            (None, None) => None,
        };

        let savepoint = tx.savepoint()?;
        match upsert(&savepoint, &product) {
            Ok(Upserted::Added) => {
                savepoint.commit()?;
                summary.added += 1;
            }
            Ok(Upserted::Updated) => {
                savepoint.commit()?;
                summary.updated += 1;
            }
            Err(err) if is_integrity_failure(&err) => {
                tracing::warn!(line = record.line, name = %product.name, error = %err, "skipped import row");
                summary.errors.push(format!("line {}: {err}", record.line));
            }
            Err(err) => return Err(err),
        }
    }

    tx.commit()?;
    tracing::info!(
        added = summary.added,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.errors.len(),
        "imported price list"
    );
    Ok(summary)
}

enum Upserted {
    Added,
    Updated,
}

fn upsert(conn: &Connection, product: &NewProduct) -> InventoryResult<Upserted> {
    let by_barcode = match product.ean_upc.as_deref() {
        Some(code) => find_product_by_barcode(conn, code)?,
        None => None,
    };
    let existing = match (by_barcode, product.sku.as_deref()) {
        (Some(found), _) => Some(found),
        (None, Some(sku)) => find_product_by_sku(conn, sku)?,
        (None, None) => None,
    };

    match existing {
        Some(stock) => {
            update_product(conn, stock.product.id, product)?;
            Ok(Upserted::Updated)
        }
        None => {
            insert_product(conn, product)?;
            Ok(Upserted::Added)
        }
    }
}

fn product_from_record(record: &Record<'_>, mapping: &ColumnMapping) -> Option<NewProduct> {
    let name = field(record, mapping.name)?;

    Some(NewProduct {
        supplier_id: None,
        sku: field(record, mapping.sku).map(clean_code),
        ean_upc: field(record, mapping.ean_upc).and_then(clean_barcode),
        name: name.to_string(),
        description: field(record, mapping.description).map(str::to_string),
        category: field(record, mapping.category).map(str::to_string),
        subcategory: None,
        purchase_price: field(record, mapping.purchase_price).and_then(parse_price),
        selling_price: field(record, mapping.selling_price).and_then(parse_price),
        status: field(record, mapping.status).map(str::to_string),
    })
}

fn field<'a>(record: &Record<'a>, column: Option<usize>) -> Option<&'a str> {
    column.and_then(|index| record.cell(index))
}

/// Codes exported from numeric cells come through as `5901234123457.0`.
fn clean_code(raw: &str) -> String {
    raw.strip_suffix(".0").unwrap_or(raw).trim().to_string()
}

/// Barcodes are stored as bare digits so scans and lookups match them.
fn clean_barcode(raw: &str) -> Option<String> {
    let digits = barcode::normalize(&clean_code(raw));
    (!digits.is_empty()).then_some(digits)
}

fn is_integrity_failure(err: &InventoryError) -> bool {
    match err {
        InventoryError::Duplicate(_) => true,
        InventoryError::Database(db) => {
            matches!(db.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fetch_suppliers, open_in_memory, search_products};

    fn bolle_list() -> Sheet {
        Sheet::new(vec![
            vec!["Bollé 2025", "", "", "", ""],
            vec!["Article", "EAN Code", "Model Name", "Dealer Price", "Retail Price"],
            vec!["B100", "5901234123457.0", "Helmet X1", "80,00", "€ 150"],
            vec!["B200", "", "Glasses G2", "40", "90"],
            vec!["B300", "", "", "10", "20"],
        ])
    }

    #[test]
    fn new_rows_are_added_with_zero_stock() {
        let mut conn = open_in_memory().unwrap();
        let summary = import_products(&mut conn, &bolle_list(), Some("Bollé")).unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.skipped, 1);
        assert!(summary.errors.is_empty());

        let helmet = find_product_by_barcode(&conn, "5901234123457").unwrap().unwrap();
        assert_eq!(helmet.product.name, "Helmet X1");
        assert_eq!(helmet.product.purchase_price, Some(80.0));
        assert_eq!(helmet.product.selling_price, Some(150.0));
        assert_eq!(helmet.supplier_name.as_deref(), Some("Bollé"));
        assert_eq!(helmet.on_hand, 0);
    }

    #[test]
    fn reimport_updates_by_barcode_then_sku() {
        let mut conn = open_in_memory().unwrap();
        import_products(&mut conn, &bolle_list(), Some("Bollé")).unwrap();

        let revised = Sheet::new(vec![
            vec!["SKU", "EAN", "Name", "Retail Price"],
            vec!["B100-NEW", "5901234123457", "Helmet X1 MIPS", "160"],
            vec!["B200", "", "Glasses G2", "95"],
        ]);
        let summary = import_products(&mut conn, &revised, None).unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(summary.updated, 2);

        let helmet = find_product_by_barcode(&conn, "5901234123457").unwrap().unwrap();
        assert_eq!(helmet.product.name, "Helmet X1 MIPS");
        assert_eq!(helmet.product.selling_price, Some(160.0));
        assert_eq!(helmet.product.purchase_price, Some(80.0));

        let glasses = find_product_by_sku(&conn, "B200").unwrap().unwrap();
        assert_eq!(glasses.product.selling_price, Some(95.0));
        assert_eq!(search_products(&conn, "").unwrap().len(), 2);
    }

    #[test]
    fn supplier_column_is_used_without_explicit_supplier() {
        let mut conn = open_in_memory().unwrap();
        let sheet = Sheet::new(vec![
            vec!["SKU", "EAN", "Name", "Brand"],
            vec!["B100", "5901234123457", "Helmet X1", "Bollé"],
            vec!["T400", "", "Tyre T1", "Premium"],
        ]);
        let summary = import_products(&mut conn, &sheet, None).unwrap();

        assert_eq!(summary.added, 2);
        let names: Vec<_> = fetch_suppliers(&conn).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Bollé", "Premium"]);
        let tyre = find_product_by_sku(&conn, "T400").unwrap().unwrap();
        assert_eq!(tyre.supplier_name.as_deref(), Some("Premium"));
    }

    #[test]
    fn spaced_barcodes_are_stored_as_digits() {
        let mut conn = open_in_memory().unwrap();
        let sheet = Sheet::new(vec![
            vec!["SKU", "EAN", "Name"],
            vec!["B100", "590 1234 12345 7", "Helmet X1"],
            vec!["B200", "n/a", "Glasses G2"],
        ]);
        let summary = import_products(&mut conn, &sheet, None).unwrap();
        assert_eq!(summary.added, 2);

        let helmet = find_product_by_barcode(&conn, "5901234123457").unwrap().unwrap();
        assert_eq!(helmet.product.sku.as_deref(), Some("B100"));
        let glasses = find_product_by_sku(&conn, "B200").unwrap().unwrap();
        assert_eq!(glasses.product.ean_upc, None);
    }

    #[test]
    fn rejected_row_is_counted_and_the_rest_imports() {
        let mut conn = open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_broken BEFORE INSERT ON products
             WHEN NEW.name = 'Broken'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let sheet = Sheet::new(vec![
            vec!["SKU", "EAN", "Name"],
            vec!["B100", "5901234123457", "Helmet X1"],
            vec!["B101", "", "Broken"],
            vec!["B102", "", "Glasses G2"],
        ]);
        let summary = import_products(&mut conn, &sheet, None).unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("line 3"));
        assert!(find_product_by_sku(&conn, "B101").unwrap().is_none());
        assert!(find_product_by_sku(&conn, "B102").unwrap().is_some());
    }
}
