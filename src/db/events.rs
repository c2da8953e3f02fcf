use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::inventory::release_stock;
use crate::error::{InventoryError, InventoryResult};
use crate::models::{Event, NewEvent};

const EVENT_SELECT: &str =
    "SELECT id, name, start_date, end_date, location, description FROM events";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        location: row.get(4)?,
        description: row.get(5)?,
    })
}

/// Every event, soonest first; undated events sort last.
pub fn fetch_events(conn: &Connection) -> InventoryResult<Vec<Event>> {
    let sql = format!("{EVENT_SELECT} ORDER BY start_date IS NULL, start_date, name COLLATE NOCASE");
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map([], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Events starting in the given calendar year.
pub fn fetch_events_in_year(conn: &Connection, year: i32) -> InventoryResult<Vec<Event>> {
    let sql = format!("{EVENT_SELECT} WHERE substr(start_date, 1, 4) = ?1 ORDER BY start_date, name COLLATE NOCASE");
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map([format!("{year:04}")], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

pub fn fetch_event(conn: &Connection, id: i64) -> InventoryResult<Event> {
    let sql = format!("{EVENT_SELECT} WHERE id = ?1");
    conn.query_row(&sql, [id], event_from_row)
        .optional()?
        .ok_or(InventoryError::EventNotFound(id))
}

pub fn find_event_by_name(conn: &Connection, name: &str) -> InventoryResult<Option<Event>> {
    let sql = format!("{EVENT_SELECT} WHERE name = ?1 ORDER BY id LIMIT 1");
    Ok(conn.query_row(&sql, [name], event_from_row).optional()?)
}

pub fn create_event(conn: &Connection, new: &NewEvent) -> InventoryResult<Event> {
    conn.execute(
        "INSERT INTO events (name, start_date, end_date, location, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new.name,
            new.start_date,
            new.end_date,
            new.location,
            new.description
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::info!(event_id = id, name = %new.name, "created event");
    Ok(Event {
        id,
        name: new.name.clone(),
        start_date: new.start_date,
        end_date: new.end_date,
        location: new.location.clone(),
        description: new.description.clone(),
    })
}

pub fn update_event(conn: &Connection, id: i64, new: &NewEvent) -> InventoryResult<()> {
    let updated = conn.execute(
        "UPDATE events
         SET name = ?1, start_date = ?2, end_date = ?3, location = ?4, description = ?5
         WHERE id = ?6",
        params![
            new.name,
            new.start_date,
            new.end_date,
            new.location,
            new.description,
            id
        ],
    )?;

    if updated == 0 {
        Err(InventoryError::EventNotFound(id))
    } else {
        Ok(())
    }
}

/// Delete an event, handing every reservation it still holds back to stock.
/// Events with recorded sales are kept so their history stays intact.
pub fn delete_event(conn: &mut Connection, id: i64) -> InventoryResult<()> {
    let tx = conn.transaction()?;
    fetch_event(&tx, id)?;

    let sales: i64 = tx.query_row(
        "SELECT COUNT(*) FROM event_sales WHERE event_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if sales > 0 {
        return Err(InventoryError::EventHasSales(id));
    }

    let assignments = {
        let mut stmt =
            tx.prepare("SELECT product_id, quantity_assigned FROM event_products WHERE event_id = ?1")?;
        let rows = stmt
            .query_map([id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let note = format!("Released from deleted event #{id}");
    for (product_id, quantity) in &assignments {
        release_stock(&tx, *product_id, *quantity, &note, None)?;
    }

    tx.execute("DELETE FROM event_products WHERE event_id = ?1", [id])?;
    tx.execute("DELETE FROM events WHERE id = ?1", [id])?;
    tx.commit()?;

    tracing::info!(event_id = id, released = assignments.len(), "deleted event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::NaiveDate;

    fn expo(name: &str, date: Option<(i32, u32, u32)>) -> NewEvent {
        NewEvent {
            name: name.into(),
            start_date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            location: Some("Milan".into()),
            ..NewEvent::default()
        }
    }

    #[test]
    fn events_round_trip_dates_and_sort_undated_last() {
        let conn = open_in_memory().unwrap();
        create_event(&conn, &expo("Later", Some((2025, 9, 5)))).unwrap();
        create_event(&conn, &expo("Undated", None)).unwrap();
        let first = create_event(&conn, &expo("Bike Expo", Some((2025, 3, 15)))).unwrap();

        let names: Vec<String> = fetch_events(&conn)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Bike Expo", "Later", "Undated"]);

        let stored = fetch_event(&conn, first.id).unwrap();
        assert_eq!(stored.start_date, NaiveDate::from_ymd_opt(2025, 3, 15));
        assert_eq!(fetch_events_in_year(&conn, 2025).unwrap().len(), 2);
        assert!(fetch_events_in_year(&conn, 2024).unwrap().is_empty());
    }

    #[test]
    fn update_and_delete_missing_event() {
        let mut conn = open_in_memory().unwrap();
        assert!(matches!(
            update_event(&conn, 3, &expo("x", None)),
            Err(InventoryError::EventNotFound(3))
        ));
        assert!(matches!(
            delete_event(&mut conn, 3),
            Err(InventoryError::EventNotFound(3))
        ));
    }
}
