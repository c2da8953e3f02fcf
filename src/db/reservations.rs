//! Products assigned to events. Assigning reserves stock, reducing or removing
//! an assignment releases it, and a sale turns reserved units into an actual
//! stock-out. Each public call is one SQLite transaction: either the
//! assignment row and the inventory reservation both change, or neither does.
//!
//! Invariant: for every product, `inventory.reserved` equals the sum of
//! `quantity_assigned` over its `event_products` rows, and never exceeds
//! on-hand.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::events::fetch_event;
use crate::db::inventory::{quantities, release_stock, reserve_stock, stock_out};
use crate::db::products::{product_from_row, PRODUCT_COLUMNS, PRODUCT_WIDTH};
use crate::error::{InventoryError, InventoryResult};
use crate::models::{EventProduct, EventSale, Selection, StockMove};

fn event_product_from_row(row: &Row<'_>) -> rusqlite::Result<EventProduct> {
    Ok(EventProduct {
        product: product_from_row(row)?,
        supplier_name: row.get(PRODUCT_WIDTH)?,
        event_id: row.get(PRODUCT_WIDTH + 1)?,
        quantity_assigned: row.get(PRODUCT_WIDTH + 2)?,
        event_sale_price: row.get(PRODUCT_WIDTH + 3)?,
        on_hand: row.get(PRODUCT_WIDTH + 4)?,
    })
}

fn event_product_select() -> String {
    format!(
        "SELECT {PRODUCT_COLUMNS}, s.name, ep.event_id, ep.quantity_assigned, ep.event_sale_price, i.quantity
         FROM event_products ep
         JOIN products p ON p.id = ep.product_id
         JOIN inventory i ON i.product_id = p.id
         LEFT JOIN suppliers s ON s.id = p.supplier_id"
    )
}

/// Products assigned to an event, grouped by category then name.
pub fn fetch_event_products(conn: &Connection, event_id: i64) -> InventoryResult<Vec<EventProduct>> {
    let sql = format!(
        "{} WHERE ep.event_id = ?1 ORDER BY p.category COLLATE NOCASE, p.name COLLATE NOCASE",
        event_product_select()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([event_id], event_product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_event_product(
    conn: &Connection,
    event_id: i64,
    product_id: i64,
) -> InventoryResult<Option<EventProduct>> {
    let sql = format!(
        "{} WHERE ep.event_id = ?1 AND ep.product_id = ?2",
        event_product_select()
    );
    Ok(conn
        .query_row(&sql, params![event_id, product_id], event_product_from_row)
        .optional()?)
}

/// Sum of quantities assigned to events for a product.
pub fn assigned_total(conn: &Connection, product_id: i64) -> InventoryResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(quantity_assigned), 0) FROM event_products WHERE product_id = ?1",
        [product_id],
        |row| row.get(0),
    )?)
}

/// Assign `quantity` units of a product to an event, adding to any existing
/// assignment, and reserve them. A `sale_price` overrides the catalog price
/// for this event; `None` keeps whatever override is already stored.
pub fn assign_product(
    conn: &mut Connection,
    event_id: i64,
    product_id: i64,
    quantity: i64,
    sale_price: Option<f64>,
) -> InventoryResult<()> {
    let tx = conn.transaction()?;
    assign_within(
        &tx,
        event_id,
        &Selection {
            product_id,
            quantity,
            sale_price,
        },
    )?;
    tx.commit()?;

    tracing::info!(event_id, product_id, quantity, "assigned product to event");
    Ok(())
}

/// Assign several products at once. Either every selection is applied or,
/// on the first failure, none are.
pub fn assign_products(conn: &mut Connection, event_id: i64, selections: &[Selection]) -> InventoryResult<usize> {
    let tx = conn.transaction()?;
    for selection in selections {
        assign_within(&tx, event_id, selection)?;
    }
    tx.commit()?;

    tracing::info!(event_id, count = selections.len(), "assigned products to event");
    Ok(selections.len())
}

fn assign_within(conn: &Connection, event_id: i64, selection: &Selection) -> InventoryResult<()> {
    let Selection {
        product_id,
        quantity,
        sale_price,
    } = *selection;

    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }
    fetch_event(conn, event_id)?;

    let (on_hand, reserved) = quantities(conn, product_id)?;
    let available = on_hand - reserved;
    if available < quantity {
        tracing::warn!(event_id, product_id, available, requested = quantity, "assignment rejected");
        return Err(InventoryError::InsufficientStock {
            product_id,
            available,
            requested: quantity,
        });
    }

    conn.execute(
        "INSERT INTO event_products (event_id, product_id, quantity_assigned, event_sale_price)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(event_id, product_id) DO UPDATE SET
            quantity_assigned = quantity_assigned + excluded.quantity_assigned,
            event_sale_price = COALESCE(excluded.event_sale_price, event_sale_price),
            updated_at = CURRENT_TIMESTAMP",
        params![event_id, product_id, quantity, sale_price],
    )?;

    reserve_stock(
        conn,
        product_id,
        quantity,
        &format!("Reserved for event #{event_id}"),
        None,
    )
}

fn current_assignment(conn: &Connection, event_id: i64, product_id: i64) -> InventoryResult<i64> {
    conn.query_row(
        "SELECT quantity_assigned FROM event_products WHERE event_id = ?1 AND product_id = ?2",
        params![event_id, product_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(InventoryError::NotAssigned {
        event_id,
        product_id,
    })
}

/// Set the assigned quantity to `new_quantity`, reserving or releasing the
/// difference. Zero removes the assignment altogether.
pub fn update_assignment(
    conn: &mut Connection,
    event_id: i64,
    product_id: i64,
    new_quantity: i64,
) -> InventoryResult<()> {
    if new_quantity < 0 {
        return Err(InventoryError::InvalidQuantity(new_quantity));
    }
    if new_quantity == 0 {
        return remove_assignment(conn, event_id, product_id).map(|_| ());
    }

    let tx = conn.transaction()?;
    let current = current_assignment(&tx, event_id, product_id)?;
    let delta = new_quantity - current;

    if delta > 0 {
        reserve_stock(
            &tx,
            product_id,
            delta,
            &format!("Additional reservation for event #{event_id}"),
            None,
        )?;
    } else if delta < 0 {
        release_stock(
            &tx,
            product_id,
            -delta,
            &format!("Released from event #{event_id}"),
            None,
        )?;
    }

    tx.execute(
        "UPDATE event_products
         SET quantity_assigned = ?1, updated_at = CURRENT_TIMESTAMP
         WHERE event_id = ?2 AND product_id = ?3",
        params![new_quantity, event_id, product_id],
    )?;
    tx.commit()?;

    tracing::info!(event_id, product_id, from = current, to = new_quantity, "updated event assignment");
    Ok(())
}

/// Drop an assignment and release everything it reserved. Returns the
/// quantity handed back to available stock.
pub fn remove_assignment(conn: &mut Connection, event_id: i64, product_id: i64) -> InventoryResult<i64> {
    let tx = conn.transaction()?;
    let current = current_assignment(&tx, event_id, product_id)?;

    release_stock(
        &tx,
        product_id,
        current,
        &format!("Released from event #{event_id}"),
        None,
    )?;
    tx.execute(
        "DELETE FROM event_products WHERE event_id = ?1 AND product_id = ?2",
        params![event_id, product_id],
    )?;
    tx.commit()?;

    tracing::info!(event_id, product_id, released = current, "removed product from event");
    Ok(current)
}

/// A sale made at an event.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRequest {
    pub event_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price; defaults to the event override, then the catalog price.
    pub price: Option<f64>,
    pub sale_date: NaiveDate,
    pub user: Option<String>,
}

/// Record a sale out of the stock reserved for the event. The sold units are
/// released from the reservation and leave on-hand through the ledger, so the
/// sale shows up in the transaction history as an `out` movement.
pub fn record_sale(conn: &mut Connection, sale: &SaleRequest) -> InventoryResult<EventSale> {
    let SaleRequest {
        event_id,
        product_id,
        quantity,
        ..
    } = *sale;

    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }

    let tx = conn.transaction()?;
    let assignment = fetch_event_product(&tx, event_id, product_id)?.ok_or(InventoryError::NotAssigned {
        event_id,
        product_id,
    })?;
    if assignment.quantity_assigned < quantity {
        return Err(InventoryError::InsufficientStock {
            product_id,
            available: assignment.quantity_assigned,
            requested: quantity,
        });
    }

    let price = sale.price.or(assignment.effective_price()).unwrap_or(0.0);

    tx.execute(
        "INSERT INTO event_sales (event_id, product_id, quantity, sale_price, sale_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_id, product_id, quantity, price, sale.sale_date],
    )?;
    let sale_id = tx.last_insert_rowid();

    release_stock(
        &tx,
        product_id,
        quantity,
        &format!("Sold at event #{event_id}"),
        sale.user.as_deref(),
    )?;
    let movement = StockMove {
        reference: Some(format!("Event #{event_id} sale #{sale_id}")),
        notes: None,
        user: sale.user.clone(),
    };
    stock_out(&tx, product_id, quantity, &movement)?;

    let remaining = assignment.quantity_assigned - quantity;
    if remaining == 0 {
        tx.execute(
            "DELETE FROM event_products WHERE event_id = ?1 AND product_id = ?2",
            params![event_id, product_id],
        )?;
    } else {
        tx.execute(
            "UPDATE event_products
             SET quantity_assigned = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE event_id = ?2 AND product_id = ?3",
            params![remaining, event_id, product_id],
        )?;
    }
    tx.commit()?;

    tracing::info!(event_id, product_id, quantity, price, sale_id, "recorded event sale");
    Ok(EventSale {
        id: sale_id,
        event_id,
        product_id,
        product_name: assignment.product.name,
        quantity,
        sale_price: price,
        sale_date: sale.sale_date,
    })
}

/// Every sale recorded for an event, oldest first.
pub fn fetch_event_sales(conn: &Connection, event_id: i64) -> InventoryResult<Vec<EventSale>> {
    let mut stmt = conn.prepare(
        "SELECT es.id, es.event_id, es.product_id, p.name, es.quantity, es.sale_price, es.sale_date
         FROM event_sales es
         JOIN products p ON p.id = es.product_id
         WHERE es.event_id = ?1
         ORDER BY es.sale_date, es.id",
    )?;
    let rows = stmt
        .query_map([event_id], |row| {
            Ok(EventSale {
                id: row.get(0)?,
                event_id: row.get(1)?,
                product_id: row.get(2)?,
                product_name: row.get(3)?,
                quantity: row.get(4)?,
                sale_price: row.get(5)?,
                sale_date: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::inventory::{add_stock, available_stock, get_transaction_history, stock_level, HistoryFilter};
    use crate::db::{create_event, create_product, delete_event, open_in_memory};
    use crate::models::{NewEvent, NewProduct, TransactionKind};
    use proptest::prelude::*;

    struct Fixture {
        conn: Connection,
        event: i64,
        other_event: i64,
        product: i64,
    }

    fn fixture(stock: i64) -> Fixture {
        let mut conn = open_in_memory().unwrap();
        let product = create_product(
            &mut conn,
            &NewProduct {
                sku: Some("SKU003".into()),
                name: "Carbon Wheels".into(),
                category: Some("Wheels".into()),
                selling_price: Some(1200.0),
                ..NewProduct::default()
            },
        )
        .unwrap()
        .id;
        if stock > 0 {
            add_stock(&mut conn, product, stock, &StockMove::default()).unwrap();
        }
        let event = create_event(
            &conn,
            &NewEvent {
                name: "Bike Expo".into(),
                ..NewEvent::default()
            },
        )
        .unwrap()
        .id;
        let other_event = create_event(
            &conn,
            &NewEvent {
                name: "Summer Fair".into(),
                ..NewEvent::default()
            },
        )
        .unwrap()
        .id;
        Fixture {
            conn,
            event,
            other_event,
            product,
        }
    }

    fn assert_invariant(conn: &Connection, product_id: i64) {
        let level = stock_level(conn, product_id).unwrap();
        assert_eq!(level.reserved, assigned_total(conn, product_id).unwrap());
        assert!(level.on_hand >= level.reserved);
    }

    #[test]
    fn assign_reserves_and_accumulates() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(10);

        assign_product(&mut conn, event, product, 3, None).unwrap();
        assign_product(&mut conn, event, product, 2, Some(999.0)).unwrap();

        let assignment = fetch_event_product(&conn, event, product).unwrap().unwrap();
        assert_eq!(assignment.quantity_assigned, 5);
        assert_eq!(assignment.effective_price(), Some(999.0));
        assert_eq!(available_stock(&conn, product).unwrap(), 5);
        assert_eq!(stock_level(&conn, product).unwrap().on_hand, 10);
        assert_invariant(&conn, product);
    }

    #[test]
    fn assign_beyond_available_fails_without_mutation() {
        let Fixture {
            mut conn,
            event,
            other_event,
            product,
        } = fixture(4);

        assign_product(&mut conn, event, product, 3, None).unwrap();
        let err = assign_product(&mut conn, other_event, product, 2, None).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                available: 1,
                requested: 2,
                ..
            }
        ));
        assert!(fetch_event_product(&conn, other_event, product).unwrap().is_none());
        assert_eq!(available_stock(&conn, product).unwrap(), 1);
        assert_invariant(&conn, product);
    }

    #[test]
    fn assign_to_missing_event_is_rejected() {
        let Fixture {
            mut conn, product, ..
        } = fixture(4);
        assert!(matches!(
            assign_product(&mut conn, 404, product, 1, None),
            Err(InventoryError::EventNotFound(404))
        ));
        assert_eq!(available_stock(&conn, product).unwrap(), 4);
    }

    #[test]
    fn batch_assignment_is_all_or_nothing() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(5);

        let selections = [
            Selection {
                product_id: product,
                quantity: 3,
                sale_price: None,
            },
            Selection {
                product_id: product,
                quantity: 3,
                sale_price: None,
            },
        ];
        assert!(assign_products(&mut conn, event, &selections).is_err());
        assert!(fetch_event_product(&conn, event, product).unwrap().is_none());
        assert_eq!(available_stock(&conn, product).unwrap(), 5);

        assert_eq!(assign_products(&mut conn, event, &selections[..1]).unwrap(), 1);
        assert_invariant(&conn, product);
    }

    #[test]
    fn update_releases_exactly_the_delta_and_remove_restores_all() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(10);

        assign_product(&mut conn, event, product, 6, None).unwrap();
        update_assignment(&mut conn, event, product, 4).unwrap();
        assert_eq!(available_stock(&conn, product).unwrap(), 6);

        update_assignment(&mut conn, event, product, 9).unwrap();
        assert_eq!(available_stock(&conn, product).unwrap(), 1);
        assert!(update_assignment(&mut conn, event, product, 12).is_err());
        assert_eq!(
            fetch_event_product(&conn, event, product)
                .unwrap()
                .unwrap()
                .quantity_assigned,
            9
        );

        assert_eq!(remove_assignment(&mut conn, event, product).unwrap(), 9);
        assert_eq!(available_stock(&conn, product).unwrap(), 10);
        assert!(fetch_event_products(&conn, event).unwrap().is_empty());
        assert_invariant(&conn, product);
    }

    #[test]
    fn update_to_zero_removes_the_row() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(3);
        assign_product(&mut conn, event, product, 2, None).unwrap();
        update_assignment(&mut conn, event, product, 0).unwrap();
        assert!(fetch_event_product(&conn, event, product).unwrap().is_none());
        assert_eq!(available_stock(&conn, product).unwrap(), 3);
    }

    #[test]
    fn missing_assignment_is_reported() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(3);
        assert!(matches!(
            remove_assignment(&mut conn, event, product),
            Err(InventoryError::NotAssigned { .. })
        ));
        assert!(matches!(
            update_assignment(&mut conn, event, product, 2),
            Err(InventoryError::NotAssigned { .. })
        ));
    }

    #[test]
    fn sale_consumes_reservation_and_writes_ledger() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(10);
        assign_product(&mut conn, event, product, 4, Some(1100.0)).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 16).unwrap();
        let sale = record_sale(
            &mut conn,
            &SaleRequest {
                event_id: event,
                product_id: product,
                quantity: 3,
                price: None,
                sale_date: date,
                user: Some("marco".into()),
            },
        )
        .unwrap();
        assert_eq!(sale.sale_price, 1100.0);
        assert_eq!(sale.total(), 3300.0);

        let level = stock_level(&conn, product).unwrap();
        assert_eq!(level.on_hand, 7);
        assert_eq!(level.reserved, 1);

        let history = get_transaction_history(&conn, &HistoryFilter::for_product(product)).unwrap();
        assert_eq!(history[0].kind, TransactionKind::Out);
        assert_eq!(history[0].quantity, 3);

        let over = SaleRequest {
            event_id: event,
            product_id: product,
            quantity: 2,
            price: None,
            sale_date: date,
            user: None,
        };
        assert!(record_sale(&mut conn, &over).is_err());

        let last = SaleRequest { quantity: 1, ..over };
        record_sale(&mut conn, &last).unwrap();
        assert!(fetch_event_product(&conn, event, product).unwrap().is_none());
        assert_eq!(fetch_event_sales(&conn, event).unwrap().len(), 2);
        assert_invariant(&conn, product);
    }

    #[test]
    fn deleting_an_event_releases_its_reservations() {
        let Fixture {
            mut conn,
            event,
            other_event,
            product,
        } = fixture(8);
        assign_product(&mut conn, event, product, 3, None).unwrap();
        assign_product(&mut conn, other_event, product, 2, None).unwrap();

        delete_event(&mut conn, event).unwrap();
        assert_eq!(available_stock(&conn, product).unwrap(), 6);
        assert_invariant(&conn, product);
    }

    #[test]
    fn events_with_sales_cannot_be_deleted() {
        let Fixture {
            mut conn,
            event,
            product,
            ..
        } = fixture(2);
        assign_product(&mut conn, event, product, 2, None).unwrap();
        record_sale(
            &mut conn,
            &SaleRequest {
                event_id: event,
                product_id: product,
                quantity: 1,
                price: Some(10.0),
                sale_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                user: None,
            },
        )
        .unwrap();

        assert!(matches!(
            delete_event(&mut conn, event),
            Err(InventoryError::EventHasSales(_))
        ));
        assert_eq!(stock_level(&conn, product).unwrap().reserved, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Assign(bool, i64),
        Update(bool, i64),
        Remove(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<bool>(), -1i64..6).prop_map(|(e, q)| Op::Assign(e, q)),
            (any::<bool>(), -1i64..8).prop_map(|(e, q)| Op::Update(e, q)),
            any::<bool>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: reserved stock always equals the sum of assignments and
        /// never exceeds on-hand, whichever operations succeed or fail.
        #[test]
        fn reservation_invariant_holds(ops in prop::collection::vec(op(), 1..30)) {
            let Fixture { mut conn, event, other_event, product } = fixture(10);
            let pick = |first: bool| if first { event } else { other_event };

            for op in ops {
                let _ = match op {
                    Op::Assign(e, q) => assign_product(&mut conn, pick(e), product, q, None),
                    Op::Update(e, q) => update_assignment(&mut conn, pick(e), product, q),
                    Op::Remove(e) => remove_assignment(&mut conn, pick(e), product).map(|_| ()),
                };

                let level = stock_level(&conn, product).unwrap();
                prop_assert_eq!(level.reserved, assigned_total(&conn, product).unwrap());
                prop_assert!(level.on_hand >= level.reserved);
                for row in fetch_event_products(&conn, event).unwrap() {
                    prop_assert!(row.quantity_assigned > 0);
                }
            }
        }
    }
}
