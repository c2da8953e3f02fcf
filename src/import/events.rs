use chrono::NaiveDate;
use rusqlite::Connection;

use super::columns::parse_price;
use super::{ImportSummary, Record, Sheet};
use crate::db::{assign_product, fetch_event, find_product_by_sku, insert_annual_event};
use crate::error::InventoryResult;
use crate::models::AnnualEvent;

const PICK_LIST_COLUMNS: [&str; 2] = ["SKU", "Quantity"];
const SALE_PRICE_COLUMN: &str = "Sale Price";
const HEADER_SCAN_ROWS: usize = 20;

/// Outcome of loading an event pick list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentImport {
    pub imported: usize,
    pub errors: Vec<String>,
}

/// Assign products to an event from a pick list with `SKU` and `Quantity`
/// columns and an optional `Sale Price`. Each row is its own assignment, so
/// one bad row does not undo the others.
pub fn import_event_assignments(
    conn: &mut Connection,
    event_id: i64,
    sheet: &Sheet,
) -> InventoryResult<AssignmentImport> {
    fetch_event(conn, event_id)?;

    let header_index = sheet.rows().iter().take(HEADER_SCAN_ROWS).position(|row| {
        PICK_LIST_COLUMNS
            .iter()
            .all(|required| row.iter().any(|cell| cell.eq_ignore_ascii_case(required)))
    });

    let Some(header_index) = header_index else {
        let header = sheet.header(0);
        let missing: Vec<&str> = PICK_LIST_COLUMNS
            .iter()
            .copied()
            .filter(|required| !header.iter().any(|cell| cell.eq_ignore_ascii_case(required)))
            .collect();
        return Ok(AssignmentImport {
            imported: 0,
            errors: vec![format!("Missing required columns: {}", missing.join(", "))],
        });
    };

    let mut report = AssignmentImport::default();
    for record in sheet.records(header_index) {
        match assign_record(conn, event_id, &record) {
            Ok(()) => report.imported += 1,
            Err(message) => {
                tracing::warn!(event_id, line = record.line, %message, "skipped pick list row");
                report.errors.push(format!("line {}: {message}", record.line));
            }
        }
    }

    tracing::info!(
        event_id,
        imported = report.imported,
        failed = report.errors.len(),
        "imported event pick list"
    );
    Ok(report)
}

fn assign_record(conn: &mut Connection, event_id: i64, record: &Record<'_>) -> Result<(), String> {
    let sku = record
        .get(PICK_LIST_COLUMNS[0])
        .ok_or_else(|| "missing SKU".to_string())?;
    let raw_quantity = record.get(PICK_LIST_COLUMNS[1]).unwrap_or_default();
    let quantity = parse_quantity(raw_quantity)
        .ok_or_else(|| format!("SKU '{sku}': invalid quantity '{raw_quantity}'"))?;
    let sale_price = record.get(SALE_PRICE_COLUMN).and_then(parse_price);

    let stock = find_product_by_sku(conn, sku)
        .map_err(|err| format!("SKU '{sku}': {err}"))?
        .ok_or_else(|| format!("Product with SKU '{sku}' not found"))?;

    assign_product(conn, event_id, stock.product.id, quantity, sale_price)
        .map_err(|err| format!("SKU '{sku}': {err}"))
}

/// Whole numbers only; spreadsheets often export `3` as `3.0`.
fn parse_quantity(raw: &str) -> Option<i64> {
    let value = raw.trim().parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.is_finite()).then_some(value as i64)
}

/// Columns of the yearly programme, keyed by normalized header text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnnualColumn {
    Period,
    Agreement,
    EventCount,
    Date,
    ExpoPeriod,
    Name,
    Transport,
    Discipline,
    Location,
    Region,
    ExpoBrand,
    Staff,
    Overnight,
    BoardLodging,
    Train,
    SpaceMisc,
    PreviousIncome,
    Helmets,
    Glasses,
    Tyres,
    BudgetIncome,
    BudgetCosts,
    Km,
    Diesel,
    Motorway,
    ActualCosts,
    Income,
    Pos,
    Cash,
    Extra,
    PrivateAgentSales,
    Ffwd,
}

impl AnnualColumn {
    fn from_header(normalized: &str) -> Option<Self> {
        use AnnualColumn::*;
        let column = match normalized {
            "periodo" => Period,
            "accordo" | "accordi" => Agreement,
            "num_eventi" | "n_eventi" => EventCount,
            "data" => Date,
            "expo_periodo" | "expo" => ExpoPeriod,
            "nome" => Name,
            "mezzo_trasporto" => Transport,
            "disciplina" => Discipline,
            "localita" | "località" => Location,
            "regione" => Region,
            "expo_brand" => ExpoBrand,
            "addetto" => Staff,
            "pernotto" => Overnight,
            "vitto_alloggio" | "vitto_and_alloggio" => BoardLodging,
            "treno" => Train,
            "spazio_varie" => SpaceMisc,
            "incassi_2024" => PreviousIncome,
            "caschi" => Helmets,
            "occhiali" => Glasses,
            "pneumatici" => Tyres,
            "bdg_incassi" => BudgetIncome,
            "bdg_costi" => BudgetCosts,
            "km" => Km,
            "gasolio" => Diesel,
            "autostrada" => Motorway,
            "costi_reali" => ActualCosts,
            "incassi" => Income,
            "pos" => Pos,
            "cash" => Cash,
            "extra" => Extra,
            "vendita_privati_agenti" => PrivateAgentSales,
            "ffwd" => Ffwd,
            _ => return None,
        };
        Some(column)
    }

    fn apply(self, event: &mut AnnualEvent, raw: &str) {
        use AnnualColumn::*;
        let text = Some(raw.to_string());
        let number = parse_price(raw);
        match self {
            Period => event.period = text,
            Agreement => event.agreement = text,
            EventCount => event.event_count = number.map(|n| n.round() as i64),
            Date => event.date = Some(normalize_date(raw)),
            ExpoPeriod => event.expo_period = text,
            Name => event.name = text,
            Transport => event.transport = text,
            Discipline => event.discipline = text,
            Location => event.location = text,
            Region => event.region = text,
            ExpoBrand => event.expo_brand = text,
            Staff => event.staff = text,
            Overnight => event.overnight = number,
            BoardLodging => event.board_lodging = number,
            Train => event.train = number,
            SpaceMisc => event.space_misc = number,
            PreviousIncome => event.previous_income = number,
            Helmets => event.helmets = number,
            Glasses => event.glasses = number,
            Tyres => event.tyres = number,
            BudgetIncome => event.budget_income = number,
            BudgetCosts => event.budget_costs = number,
            Km => event.km = number,
            Diesel => event.diesel = number,
            Motorway => event.motorway = number,
            ActualCosts => event.actual_costs = number,
            Income => event.income = number,
            Pos => event.pos = number,
            Cash => event.cash = number,
            Extra => event.extra = number,
            PrivateAgentSales => event.private_agent_sales = number,
            Ffwd => event.ffwd = text,
        }
    }
}

/// Lowercase, spaces and slashes to underscores, `&` spelled out, dots and
/// degree signs dropped, runs of underscores collapsed.
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for c in header.trim().to_lowercase().chars() {
        match c {
            ' ' | '/' | '_' => {
                if !out.ends_with('_') {
                    out.push('_');
                }
            }
            '&' => out.push_str("and"),
            '.' | '°' => {}
            other => out.push(other),
        }
    }
    out.trim_matches('_').to_string()
}

/// `YYYY-MM-DD` for the date layouts seen in the programme, the raw text
/// otherwise.
fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    let date_part = raw.split_whitespace().next().unwrap_or(raw);
    ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Map each header cell to a programme column. The sheet carries two `EXPO`
/// columns: the first is the expo period, the second the brand on show.
fn map_annual_headers(header: &[String]) -> Vec<Option<AnnualColumn>> {
    let mut seen_expo = false;
    header
        .iter()
        .map(|cell| {
            let normalized = normalize_header(cell);
            let column = AnnualColumn::from_header(&normalized)?;
            if normalized == "expo" {
                if seen_expo {
                    return Some(AnnualColumn::ExpoBrand);
                }
                seen_expo = true;
            }
            Some(column)
        })
        .collect()
}

/// Append the rows of the yearly programme to `annual_events`. Unknown
/// headers are ignored; integrity failures are logged per row.
pub fn import_annual_events(conn: &mut Connection, sheet: &Sheet) -> InventoryResult<ImportSummary> {
    let header_index = sheet
        .rows()
        .iter()
        .take(HEADER_SCAN_ROWS)
        .position(|row| {
            row.iter()
                .filter(|cell| AnnualColumn::from_header(&normalize_header(cell)).is_some())
                .count()
                >= 3
        })
        .unwrap_or(0);
    let columns = map_annual_headers(sheet.header(header_index));

    let mut summary = ImportSummary::default();
    let mut tx = conn.transaction()?;

    for record in sheet.records(header_index) {
        let mut event = AnnualEvent::default();
        let mut filled = false;
        for (index, column) in columns.iter().enumerate() {
            if let (Some(column), Some(value)) = (column, record.cell(index)) {
                column.apply(&mut event, value);
                filled = true;
            }
        }
        if !filled {
            summary.skipped += 1;
            continue;
        }

        let savepoint = tx.savepoint()?;
        match insert_annual_event(&savepoint, &event) {
            Ok(_) => {
                savepoint.commit()?;
                summary.added += 1;
            }
            Err(err) => {
                tracing::warn!(line = record.line, error = %err, "skipped programme row");
                summary.errors.push(format!("line {}: {err}", record.line));
            }
        }
    }

    tx.commit()?;
    tracing::info!(added = summary.added, skipped = summary.skipped, "imported annual programme");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{add_stock, create_event, create_product, fetch_annual_events, fetch_event_products, open_in_memory};
    use crate::error::InventoryError;
    use crate::models::{NewEvent, NewProduct, StockMove};

    fn stocked(conn: &mut Connection, sku: &str, quantity: i64) -> i64 {
        let product = create_product(
            conn,
            &NewProduct {
                sku: Some(sku.into()),
                name: format!("Product {sku}"),
                selling_price: Some(100.0),
                ..NewProduct::default()
            },
        )
        .unwrap();
        add_stock(conn, product.id, quantity, &StockMove::default()).unwrap();
        product.id
    }

    fn expo(conn: &Connection) -> i64 {
        create_event(
            conn,
            &NewEvent {
                name: "Bike Expo".into(),
                ..NewEvent::default()
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn pick_list_rows_are_assigned_independently() {
        let mut conn = open_in_memory().unwrap();
        stocked(&mut conn, "B100", 10);
        stocked(&mut conn, "B200", 1);
        let event_id = expo(&conn);

        let sheet = Sheet::new(vec![
            vec!["SKU", "Quantity", "Sale Price"],
            vec!["B100", "3", "129,90"],
            vec!["B200", "5", ""],
            vec!["NOPE", "1", ""],
            vec!["B100", "two", ""],
        ]);
        let report = import_event_assignments(&mut conn, event_id, &sheet).unwrap();

        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[1].contains("Product with SKU 'NOPE' not found"));

        let assigned = fetch_event_products(&conn, event_id).unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].quantity_assigned, 3);
        assert_eq!(assigned[0].event_sale_price, Some(129.9));
    }

    #[test]
    fn pick_list_without_required_columns_reports_them() {
        let mut conn = open_in_memory().unwrap();
        let event_id = expo(&conn);
        let sheet = Sheet::new(vec![vec!["SKU", "Qty"], vec!["B100", "1"]]);

        let report = import_event_assignments(&mut conn, event_id, &sheet).unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.errors, vec!["Missing required columns: Quantity".to_string()]);
    }

    #[test]
    fn pick_list_for_missing_event_fails() {
        let mut conn = open_in_memory().unwrap();
        let sheet = Sheet::new(vec![vec!["SKU", "Quantity"]]);
        assert!(matches!(
            import_event_assignments(&mut conn, 42, &sheet),
            Err(InventoryError::EventNotFound(42))
        ));
    }

    #[test]
    fn headers_normalize_to_column_names() {
        assert_eq!(normalize_header(" Vendita privati / agenti "), "vendita_privati_agenti");
        assert_eq!(normalize_header("N° eventi"), "n_eventi");
        assert_eq!(normalize_header("Vitto & alloggio"), "vitto_and_alloggio");
        assert_eq!(normalize_header("Costi Reali"), "costi_reali");
    }

    #[test]
    fn programme_rows_are_typed_and_stored() {
        let mut conn = open_in_memory().unwrap();
        let sheet = Sheet::new(vec![
            vec!["Programma eventi 2025"],
            vec!["Data", "Nome", "EXPO", "Regione", "EXPO", "Caschi", "Costi reali", "Incassi", "Note"],
            vec!["12/04/2025", "Sea Otter", "3 giorni", "Girona", "Bollé", "14", "1.250,00", "4800", "x"],
            vec!["", "", "", "", "", "", "", "", ""],
            vec!["2025-06-01", "Dolomiti", "", "Veneto", "", "3", "900", "2100", ""],
        ]);

        let summary = import_annual_events(&mut conn, &sheet).unwrap();
        assert_eq!(summary.added, 2);
        assert!(summary.errors.is_empty());

        let rows = fetch_annual_events(&conn, 2025).unwrap();
        assert_eq!(rows.len(), 2);
        let sea_otter = &rows[0];
        assert_eq!(sea_otter.date.as_deref(), Some("2025-04-12"));
        assert_eq!(sea_otter.expo_period.as_deref(), Some("3 giorni"));
        assert_eq!(sea_otter.expo_brand.as_deref(), Some("Bollé"));
        assert_eq!(sea_otter.helmets, Some(14.0));
        assert_eq!(sea_otter.actual_costs, Some(1250.0));
        assert_eq!(sea_otter.income, Some(4800.0));
        assert_eq!(rows[1].region.as_deref(), Some("Veneto"));
    }
}
