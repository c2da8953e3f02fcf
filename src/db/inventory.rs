//! The stock ledger. On-hand quantities only move through `add_stock` and
//! `remove_stock` (plus the sale path in `reservations`), and each movement
//! writes exactly one `inventory_transactions` row in the same SQLite
//! transaction. Reservations adjust `inventory.reserved` and leave on-hand and
//! the ledger alone.

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::db::products::{stock_from_row, STOCK_SELECT};
use crate::error::{InventoryError, InventoryResult};
use crate::models::{ActivityEntry, InventoryTransaction, StockLevel, StockMove, TransactionKind};

/// Timestamp layout SQLite's `CURRENT_TIMESTAMP` produces; bounds passed to
/// history queries are rendered the same way so text comparison orders them.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Page size used when a filter leaves `limit` unset.
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

const TRANSACTION_SELECT: &str = "SELECT t.id, t.product_id, p.name, t.transaction_type, \
     t.quantity, t.reference, t.notes, t.user, t.transaction_date \
     FROM inventory_transactions t \
     JOIN products p ON p.id = t.product_id";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryTransaction> {
    let kind_raw: String = row.get(3)?;
    let kind = TransactionKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown transaction type {kind_raw:?}").into(),
        )
    })?;

    Ok(InventoryTransaction {
        id: row.get(0)?,
        product_id: row.get(1)?,
        product_name: row.get(2)?,
        kind,
        quantity: row.get(4)?,
        reference: row.get(5)?,
        notes: row.get(6)?,
        user: row.get(7)?,
        transaction_date: row.get(8)?,
    })
}

/// Increase on-hand stock and append an `in` ledger entry.
///
/// Fails without touching the database when `quantity <= 0` or the product
/// has no inventory row.
pub fn add_stock(
    conn: &mut Connection,
    product_id: i64,
    quantity: i64,
    movement: &StockMove,
) -> InventoryResult<InventoryTransaction> {
    if quantity <= 0 {
        tracing::warn!(product_id, quantity, "rejected stock-in with non-positive quantity");
        return Err(InventoryError::InvalidQuantity(quantity));
    }

    let tx = conn.transaction()?;
    let transaction_id = stock_in(&tx, product_id, quantity, movement)?;
    let record = fetch_transaction(&tx, transaction_id)?;
    tx.commit()?;

    tracing::info!(product_id, quantity, transaction_id, "stock in");
    Ok(record)
}

/// Decrease on-hand stock and append an `out` ledger entry.
///
/// Stock reserved for events cannot be taken this way; the request must fit
/// in `on_hand - reserved`. On failure nothing is written.
pub fn remove_stock(
    conn: &mut Connection,
    product_id: i64,
    quantity: i64,
    movement: &StockMove,
) -> InventoryResult<InventoryTransaction> {
    if quantity <= 0 {
        tracing::warn!(product_id, quantity, "rejected stock-out with non-positive quantity");
        return Err(InventoryError::InvalidQuantity(quantity));
    }

    let tx = conn.transaction()?;
    let (on_hand, reserved) = quantities(&tx, product_id)?;
    let available = on_hand - reserved;
    if available < quantity {
        tracing::warn!(product_id, available, requested = quantity, "insufficient stock for stock-out");
        return Err(InventoryError::InsufficientStock {
            product_id,
            available,
            requested: quantity,
        });
    }

    let transaction_id = stock_out(&tx, product_id, quantity, movement)?;
    let record = fetch_transaction(&tx, transaction_id)?;
    tx.commit()?;

    tracing::info!(product_id, quantity, transaction_id, "stock out");
    Ok(record)
}

/// Ledger write for an incoming movement, run inside the caller's transaction.
pub(crate) fn stock_in(
    conn: &Connection,
    product_id: i64,
    quantity: i64,
    movement: &StockMove,
) -> InventoryResult<i64> {
    let (on_hand, _) = quantities(conn, product_id)?;
    // SQLite silently promotes an overflowing integer sum to REAL.
    if on_hand.checked_add(quantity).is_none() {
        tracing::warn!(product_id, on_hand, quantity, "stock in would overflow");
        return Err(InventoryError::StockOverflow {
            product_id,
            on_hand,
            requested: quantity,
        });
    }

    let updated = conn.execute(
        "UPDATE inventory
         SET quantity = quantity + ?1, last_updated = CURRENT_TIMESTAMP
         WHERE product_id = ?2",
        params![quantity, product_id],
    )?;
    if updated == 0 {
        return Err(InventoryError::ProductNotFound(product_id));
    }

    let transaction_id = append_transaction(conn, product_id, TransactionKind::In, quantity, movement)?;
    log_activity(
        conn,
        "stock_in",
        &format!("Added {quantity} units to stock"),
        Some(transaction_id),
        movement.user.as_deref(),
    )?;
    Ok(transaction_id)
}

/// Ledger write for an outgoing movement. The caller has already checked that
/// enough stock exists; the table constraints catch anything that slips by.
pub(crate) fn stock_out(
    conn: &Connection,
    product_id: i64,
    quantity: i64,
    movement: &StockMove,
) -> InventoryResult<i64> {
    let updated = conn.execute(
        "UPDATE inventory
         SET quantity = quantity - ?1, last_updated = CURRENT_TIMESTAMP
         WHERE product_id = ?2",
        params![quantity, product_id],
    )?;
    if updated == 0 {
        return Err(InventoryError::ProductNotFound(product_id));
    }

    let transaction_id = append_transaction(conn, product_id, TransactionKind::Out, quantity, movement)?;
    log_activity(
        conn,
        "stock_out",
        &format!("Removed {quantity} units from stock"),
        Some(transaction_id),
        movement.user.as_deref(),
    )?;
    Ok(transaction_id)
}

fn append_transaction(
    conn: &Connection,
    product_id: i64,
    kind: TransactionKind,
    quantity: i64,
    movement: &StockMove,
) -> InventoryResult<i64> {
    conn.execute(
        "INSERT INTO inventory_transactions
            (product_id, transaction_type, quantity, reference, notes, user)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            product_id,
            kind.as_str(),
            quantity,
            movement.reference,
            movement.notes,
            movement.user
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Commit `quantity` units of available stock to an event.
pub(crate) fn reserve_stock(
    conn: &Connection,
    product_id: i64,
    quantity: i64,
    note: &str,
    user: Option<&str>,
) -> InventoryResult<()> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }

    let (on_hand, reserved) = quantities(conn, product_id)?;
    let available = on_hand - reserved;
    if available < quantity {
        return Err(InventoryError::InsufficientStock {
            product_id,
            available,
            requested: quantity,
        });
    }

    conn.execute(
        "UPDATE inventory
         SET reserved = reserved + ?1, last_updated = CURRENT_TIMESTAMP
         WHERE product_id = ?2",
        params![quantity, product_id],
    )?;
    log_activity(conn, "reserve", &format!("{note}: {quantity} units"), Some(product_id), user)?;

    tracing::debug!(product_id, quantity, "reserved stock");
    Ok(())
}

/// Hand `quantity` reserved units back to available stock.
pub(crate) fn release_stock(
    conn: &Connection,
    product_id: i64,
    quantity: i64,
    note: &str,
    user: Option<&str>,
) -> InventoryResult<()> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }

    let (_, reserved) = quantities(conn, product_id)?;
    if reserved < quantity {
        return Err(InventoryError::OverRelease {
            product_id,
            reserved,
            requested: quantity,
        });
    }

    conn.execute(
        "UPDATE inventory
         SET reserved = reserved - ?1, last_updated = CURRENT_TIMESTAMP
         WHERE product_id = ?2",
        params![quantity, product_id],
    )?;
    log_activity(conn, "release", &format!("{note}: {quantity} units"), Some(product_id), user)?;

    tracing::debug!(product_id, quantity, "released stock");
    Ok(())
}

/// `(on_hand, reserved)` for a product.
pub(crate) fn quantities(conn: &Connection, product_id: i64) -> InventoryResult<(i64, i64)> {
    conn.query_row(
        "SELECT quantity, reserved FROM inventory WHERE product_id = ?1",
        [product_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or(InventoryError::ProductNotFound(product_id))
}

/// On-hand minus reserved.
pub fn available_stock(conn: &Connection, product_id: i64) -> InventoryResult<i64> {
    let (on_hand, reserved) = quantities(conn, product_id)?;
    Ok(on_hand - reserved)
}

pub fn stock_level(conn: &Connection, product_id: i64) -> InventoryResult<StockLevel> {
    let sql = format!("{STOCK_SELECT} WHERE p.id = ?1");
    conn.query_row(&sql, [product_id], stock_from_row)
        .optional()?
        .ok_or(InventoryError::ProductNotFound(product_id))
}

/// Products whose on-hand quantity is at or below `threshold`, emptiest first.
pub fn get_low_stock_items(conn: &Connection, threshold: i64) -> InventoryResult<Vec<StockLevel>> {
    let sql = format!("{STOCK_SELECT} WHERE i.quantity <= ?1 ORDER BY i.quantity ASC, p.name COLLATE NOCASE");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([threshold], stock_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One page of the stock listing, ordered by product name.
pub fn get_inventory_status(conn: &Connection, limit: i64, offset: i64) -> InventoryResult<Vec<StockLevel>> {
    let sql = format!("{STOCK_SELECT} ORDER BY p.name COLLATE NOCASE LIMIT ?1 OFFSET ?2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit, offset], stock_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Narrowing options for `get_transaction_history`. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub product_id: Option<i64>,
    pub kind: Option<TransactionKind>,
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl HistoryFilter {
    pub fn for_product(product_id: i64) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }
}

/// Read the ledger newest first. Pure read; nothing is written.
pub fn get_transaction_history(
    conn: &Connection,
    filter: &HistoryFilter,
) -> InventoryResult<Vec<InventoryTransaction>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(product_id) = filter.product_id {
        conditions.push("t.product_id = ?");
        values.push(Value::Integer(product_id));
    }
    if let Some(kind) = filter.kind {
        conditions.push("t.transaction_type = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(since) = filter.since {
        conditions.push("t.transaction_date >= ?");
        values.push(Value::Text(since.format(TIMESTAMP_FORMAT).to_string()));
    }
    if let Some(until) = filter.until {
        conditions.push("t.transaction_date <= ?");
        values.push(Value::Text(until.format(TIMESTAMP_FORMAT).to_string()));
    }

    let mut sql = TRANSACTION_SELECT.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY t.transaction_date DESC, t.id DESC LIMIT ? OFFSET ?");
    values.push(Value::Integer(filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)));
    values.push(Value::Integer(filter.offset.unwrap_or(0)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn fetch_transaction(conn: &Connection, id: i64) -> InventoryResult<InventoryTransaction> {
    let sql = format!("{TRANSACTION_SELECT} WHERE t.id = ?1");
    Ok(conn.query_row(&sql, [id], transaction_from_row)?)
}

pub(crate) fn log_activity(
    conn: &Connection,
    activity_type: &str,
    description: &str,
    related_id: Option<i64>,
    user: Option<&str>,
) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO activity_log (activity_type, description, related_id, user)
         VALUES (?1, ?2, ?3, ?4)",
        params![activity_type, description, related_id, user],
    )?;
    Ok(())
}

/// Latest audit lines, optionally restricted to one activity type.
pub fn get_activity(
    conn: &Connection,
    activity_type: Option<&str>,
    limit: i64,
) -> InventoryResult<Vec<ActivityEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, activity_type, description, related_id, user, created_at
         FROM activity_log
         WHERE ?1 IS NULL OR activity_type = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![activity_type, limit], |row| {
            Ok(ActivityEntry {
                id: row.get(0)?,
                activity_type: row.get(1)?,
                description: row.get(2)?,
                related_id: row.get(3)?,
                user: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_product, open_in_memory};
    use crate::models::NewProduct;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn product(conn: &mut Connection, name: &str) -> i64 {
        create_product(
            conn,
            &NewProduct {
                name: name.into(),
                ..NewProduct::default()
            },
        )
        .unwrap()
        .id
    }

    fn ledger_sum(conn: &Connection, product_id: i64) -> i64 {
        let filter = HistoryFilter {
            product_id: Some(product_id),
            limit: Some(i64::MAX),
            ..HistoryFilter::default()
        };
        get_transaction_history(conn, &filter)
            .unwrap()
            .iter()
            .map(InventoryTransaction::signed_quantity)
            .sum()
    }

    #[test]
    fn add_stock_records_an_in_transaction() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Helmet");

        let movement = StockMove {
            reference: Some("PO-17".into()),
            notes: Some("spring order".into()),
            user: Some("anna".into()),
        };
        let record = add_stock(&mut conn, id, 10, &movement).unwrap();

        assert_eq!(record.kind, TransactionKind::In);
        assert_eq!(record.quantity, 10);
        assert_eq!(record.reference.as_deref(), Some("PO-17"));
        assert_eq!(record.product_name, "Helmet");
        assert_eq!(stock_level(&conn, id).unwrap().on_hand, 10);
        assert_eq!(get_activity(&conn, Some("stock_in"), 10).unwrap().len(), 1);
    }

    #[test]
    fn non_positive_quantities_are_rejected_without_writes() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Helmet");

        assert!(matches!(
            add_stock(&mut conn, id, 0, &StockMove::default()),
            Err(InventoryError::InvalidQuantity(0))
        ));
        assert!(matches!(
            remove_stock(&mut conn, id, -3, &StockMove::default()),
            Err(InventoryError::InvalidQuantity(-3))
        ));
        assert!(get_transaction_history(&conn, &HistoryFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stock_in_that_would_overflow_is_rejected() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Pump");
        add_stock(&mut conn, id, i64::MAX, &StockMove::default()).unwrap();

        let err = add_stock(&mut conn, id, 1, &StockMove::default()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::StockOverflow { on_hand: i64::MAX, requested: 1, .. }
        ));
        assert_eq!(stock_level(&conn, id).unwrap().on_hand, i64::MAX);
        assert_eq!(
            get_transaction_history(&conn, &HistoryFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn remove_more_than_on_hand_fails_and_changes_nothing() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Glasses");
        add_stock(&mut conn, id, 4, &StockMove::default()).unwrap();

        let err = remove_stock(&mut conn, id, 5, &StockMove::default()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                available: 4,
                requested: 5,
                ..
            }
        ));
        assert_eq!(stock_level(&conn, id).unwrap().on_hand, 4);
        assert_eq!(ledger_sum(&conn, id), 4);
    }

    #[test]
    fn unknown_product_is_not_found() {
        let mut conn = open_in_memory().unwrap();
        assert!(matches!(
            add_stock(&mut conn, 77, 1, &StockMove::default()),
            Err(InventoryError::ProductNotFound(77))
        ));
        assert!(get_transaction_history(&conn, &HistoryFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn reserved_stock_cannot_be_removed() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Wheels");
        add_stock(&mut conn, id, 5, &StockMove::default()).unwrap();
        reserve_stock(&conn, id, 3, "test", None).unwrap();

        assert_eq!(available_stock(&conn, id).unwrap(), 2);
        assert!(remove_stock(&mut conn, id, 3, &StockMove::default()).is_err());
        remove_stock(&mut conn, id, 2, &StockMove::default()).unwrap();
        assert_eq!(stock_level(&conn, id).unwrap().on_hand, 3);
    }

    #[test]
    fn release_cannot_exceed_reservation() {
        let mut conn = open_in_memory().unwrap();
        let id = product(&mut conn, "Saddle");
        add_stock(&mut conn, id, 5, &StockMove::default()).unwrap();
        reserve_stock(&conn, id, 2, "test", None).unwrap();

        assert!(matches!(
            release_stock(&conn, id, 3, "test", None),
            Err(InventoryError::OverRelease { reserved: 2, .. })
        ));
        release_stock(&conn, id, 2, "test", None).unwrap();
        assert_eq!(available_stock(&conn, id).unwrap(), 5);
    }

    #[test]
    fn low_stock_items_are_sorted_ascending() {
        let mut conn = open_in_memory().unwrap();
        let a = product(&mut conn, "A");
        let b = product(&mut conn, "B");
        let c = product(&mut conn, "C");
        add_stock(&mut conn, a, 4, &StockMove::default()).unwrap();
        add_stock(&mut conn, b, 1, &StockMove::default()).unwrap();
        add_stock(&mut conn, c, 20, &StockMove::default()).unwrap();

        let low = get_low_stock_items(&conn, 5).unwrap();
        let ids: Vec<i64> = low.iter().map(|s| s.product.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn history_filters_and_paginates() {
        let mut conn = open_in_memory().unwrap();
        let a = product(&mut conn, "A");
        let b = product(&mut conn, "B");
        for _ in 0..3 {
            add_stock(&mut conn, a, 2, &StockMove::default()).unwrap();
        }
        add_stock(&mut conn, b, 1, &StockMove::default()).unwrap();
        remove_stock(&mut conn, a, 1, &StockMove::default()).unwrap();

        let only_a = get_transaction_history(&conn, &HistoryFilter::for_product(a)).unwrap();
        assert_eq!(only_a.len(), 4);
        assert_eq!(only_a[0].kind, TransactionKind::Out);

        let outs = HistoryFilter {
            kind: Some(TransactionKind::Out),
            ..HistoryFilter::default()
        };
        assert_eq!(get_transaction_history(&conn, &outs).unwrap().len(), 1);

        let page = HistoryFilter {
            limit: Some(2),
            offset: Some(1),
            ..HistoryFilter::default()
        };
        let rows = get_transaction_history(&conn, &page).unwrap();
        assert_eq!(rows.len(), 2);

        let far_past = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let bounded = HistoryFilter {
            until: Some(far_past),
            ..HistoryFilter::default()
        };
        assert!(get_transaction_history(&conn, &bounded).unwrap().is_empty());
        let open_ended = HistoryFilter {
            since: Some(far_past),
            ..HistoryFilter::default()
        };
        assert_eq!(get_transaction_history(&conn, &open_ended).unwrap().len(), 5);
    }

    #[test]
    fn inventory_status_pages_by_name() {
        let mut conn = open_in_memory().unwrap();
        for name in ["Delta", "alpha", "Charlie", "bravo"] {
            product(&mut conn, name);
        }
        let first = get_inventory_status(&conn, 2, 0).unwrap();
        let second = get_inventory_status(&conn, 2, 2).unwrap();
        let names: Vec<&str> = first
            .iter()
            .chain(second.iter())
            .map(|s| s.product.name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "bravo", "Charlie", "Delta"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of stock-in and stock-out is attempted,
        /// on-hand never goes negative and equals the signed ledger sum.
        #[test]
        fn on_hand_matches_ledger(ops in prop::collection::vec((any::<bool>(), -3i64..15), 1..40)) {
            let mut conn = open_in_memory().unwrap();
            let id = product(&mut conn, "Prop");

            for (is_in, quantity) in ops {
                let before = stock_level(&conn, id).unwrap().on_hand;
                let result = if is_in {
                    add_stock(&mut conn, id, quantity, &StockMove::default())
                } else {
                    remove_stock(&mut conn, id, quantity, &StockMove::default())
                };
                let after = stock_level(&conn, id).unwrap().on_hand;

                if result.is_err() {
                    prop_assert_eq!(before, after);
                }
                prop_assert!(after >= 0);
                prop_assert_eq!(after, ledger_sum(&conn, id));
            }
        }
    }
}
