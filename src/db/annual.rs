//! The yearly events programme: one row per expo with its costs, takings and
//! units sold. Rows are append-only; the programme is re-imported each season.

use rusqlite::{named_params, Connection, Row};

use crate::error::InventoryResult;
use crate::models::AnnualEvent;

const ANNUAL_SELECT: &str = "SELECT id, periodo, accordo, num_eventi, data, expo_periodo, nome, \
     mezzo_trasporto, disciplina, localita, regione, expo_brand, addetto, pernotto, \
     vitto_alloggio, treno, spazio_varie, incassi_2024, caschi, occhiali, pneumatici, \
     bdg_incassi, bdg_costi, km, gasolio, autostrada, costi_reali, incassi, pos, cash, extra, \
     vendita_privati_agenti, ffwd FROM annual_events";

fn annual_from_row(row: &Row<'_>) -> rusqlite::Result<AnnualEvent> {
    Ok(AnnualEvent {
        id: row.get(0)?,
        period: row.get(1)?,
        agreement: row.get(2)?,
        event_count: row.get(3)?,
        date: row.get(4)?,
        expo_period: row.get(5)?,
        name: row.get(6)?,
        transport: row.get(7)?,
        discipline: row.get(8)?,
        location: row.get(9)?,
        region: row.get(10)?,
        expo_brand: row.get(11)?,
        staff: row.get(12)?,
        overnight: row.get(13)?,
        board_lodging: row.get(14)?,
        train: row.get(15)?,
        space_misc: row.get(16)?,
        previous_income: row.get(17)?,
        helmets: row.get(18)?,
        glasses: row.get(19)?,
        tyres: row.get(20)?,
        budget_income: row.get(21)?,
        budget_costs: row.get(22)?,
        km: row.get(23)?,
        diesel: row.get(24)?,
        motorway: row.get(25)?,
        actual_costs: row.get(26)?,
        income: row.get(27)?,
        pos: row.get(28)?,
        cash: row.get(29)?,
        extra: row.get(30)?,
        private_agent_sales: row.get(31)?,
        ffwd: row.get(32)?,
    })
}

/// Append one programme row and return its id.
pub fn insert_annual_event(conn: &Connection, event: &AnnualEvent) -> InventoryResult<i64> {
    conn.execute(
        "INSERT INTO annual_events (
            periodo, accordo, num_eventi, data, expo_periodo, nome, mezzo_trasporto,
            disciplina, localita, regione, expo_brand, addetto, pernotto, vitto_alloggio,
            treno, spazio_varie, incassi_2024, caschi, occhiali, pneumatici, bdg_incassi,
            bdg_costi, km, gasolio, autostrada, costi_reali, incassi, pos, cash, extra,
            vendita_privati_agenti, ffwd
         ) VALUES (
            :period, :agreement, :event_count, :date, :expo_period, :name, :transport,
            :discipline, :location, :region, :expo_brand, :staff, :overnight, :board_lodging,
            :train, :space_misc, :previous_income, :helmets, :glasses, :tyres, :budget_income,
            :budget_costs, :km, :diesel, :motorway, :actual_costs, :income, :pos, :cash, :extra,
            :private_agent_sales, :ffwd
         )",
        named_params! {
            ":period": event.period,
            ":agreement": event.agreement,
            ":event_count": event.event_count,
            ":date": event.date,
            ":expo_period": event.expo_period,
            ":name": event.name,
            ":transport": event.transport,
            ":discipline": event.discipline,
            ":location": event.location,
            ":region": event.region,
            ":expo_brand": event.expo_brand,
            ":staff": event.staff,
            ":overnight": event.overnight,
            ":board_lodging": event.board_lodging,
            ":train": event.train,
            ":space_misc": event.space_misc,
            ":previous_income": event.previous_income,
            ":helmets": event.helmets,
            ":glasses": event.glasses,
            ":tyres": event.tyres,
            ":budget_income": event.budget_income,
            ":budget_costs": event.budget_costs,
            ":km": event.km,
            ":diesel": event.diesel,
            ":motorway": event.motorway,
            ":actual_costs": event.actual_costs,
            ":income": event.income,
            ":pos": event.pos,
            ":cash": event.cash,
            ":extra": event.extra,
            ":private_agent_sales": event.private_agent_sales,
            ":ffwd": event.ffwd,
        },
    )?;
    Ok(conn.last_insert_rowid())
}

/// Programme rows whose date text starts with `year`, in date order.
pub fn fetch_annual_events(conn: &Connection, year: i32) -> InventoryResult<Vec<AnnualEvent>> {
    let sql = format!("{ANNUAL_SELECT} WHERE data LIKE ?1 || '%' ORDER BY data, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([format!("{year:04}")], annual_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn rows_are_filtered_by_year_prefix() {
        let conn = open_in_memory().unwrap();
        for (date, name) in [("2025-04-12", "Sea Otter"), ("2024-05-01", "Old"), ("2025-02-01", "Winter")] {
            insert_annual_event(
                &conn,
                &AnnualEvent {
                    date: Some(date.into()),
                    name: Some(name.into()),
                    income: Some(1200.5),
                    ..AnnualEvent::default()
                },
            )
            .unwrap();
        }

        let rows = fetch_annual_events(&conn, 2025).unwrap();
        let names: Vec<_> = rows.iter().filter_map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec!["Winter", "Sea Otter"]);
        assert_eq!(rows[0].income, Some(1200.5));
    }
}
