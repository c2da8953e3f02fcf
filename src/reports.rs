//! Read-only summaries: per-event sales, the yearly programme totals and the
//! product × event pivot used for planning. Everything here is derived from
//! the tables on demand; nothing is cached or written back.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row};

use crate::db::products::{product_from_row, PRODUCT_COLUMNS, PRODUCT_WIDTH};
use crate::db::{fetch_annual_events, fetch_event, fetch_events_in_year};
use crate::error::InventoryResult;
use crate::models::{Event, Product};

/// Lines listed under "top products".
pub const TOP_PRODUCTS: usize = 10;
/// Programme rows listed under "top events".
pub const TOP_EVENTS: usize = 5;

const UNCATEGORISED: &str = "Uncategorised";
const NO_SUPPLIER: &str = "No supplier";
const NO_REGION: &str = "Unknown";

/// One product's showing at an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub product: Product,
    pub supplier_name: Option<String>,
    /// Units still assigned (reserved, not yet sold).
    pub assigned: i64,
    pub sold: i64,
    pub revenue: f64,
    /// Event override if set, else the catalog selling price.
    pub effective_price: Option<f64>,
}

impl ReportLine {
    /// Revenue less purchase cost of the units sold. Unknown cost counts as 0.
    pub fn profit(&self) -> f64 {
        self.revenue - self.sold as f64 * self.product.purchase_price.unwrap_or(0.0)
    }
}

/// Aggregate over a group of report lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    pub products: usize,
    pub assigned: i64,
    pub sold: i64,
    pub revenue: f64,
    pub profit: f64,
}

impl Totals {
    fn add(&mut self, line: &ReportLine) {
        self.products += 1;
        self.assigned += line.assigned;
        self.sold += line.sold;
        self.revenue += line.revenue;
        self.profit += line.profit();
    }

    /// Share of the units brought to the event that were sold, in percent.
    pub fn sell_through(&self) -> f64 {
        let brought = self.assigned + self.sold;
        if brought == 0 {
            0.0
        } else {
            self.sold as f64 / brought as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub event: Event,
    pub lines: Vec<ReportLine>,
    pub totals: Totals,
    /// Sorted by revenue, highest first.
    pub by_category: Vec<(String, Totals)>,
    /// Sorted by revenue, highest first.
    pub by_supplier: Vec<(String, Totals)>,
    pub top_products: Vec<ReportLine>,
}

fn report_line_from_row(row: &Row<'_>) -> rusqlite::Result<ReportLine> {
    let product = product_from_row(row)?;
    let event_price: Option<f64> = row.get(PRODUCT_WIDTH + 2)?;
    Ok(ReportLine {
        effective_price: event_price.or(product.selling_price),
        supplier_name: row.get(PRODUCT_WIDTH)?,
        assigned: row.get(PRODUCT_WIDTH + 1)?,
        sold: row.get(PRODUCT_WIDTH + 3)?,
        revenue: row.get(PRODUCT_WIDTH + 4)?,
        product,
    })
}

/// Sales and stock picture for one event. Products appear when they are still
/// assigned, have been sold there, or both.
pub fn event_report(conn: &Connection, event_id: i64) -> InventoryResult<EventReport> {
    let event = fetch_event(conn, event_id)?;

    let sql = format!(
        "SELECT {PRODUCT_COLUMNS}, s.name,
                COALESCE(ep.quantity_assigned, 0), ep.event_sale_price,
                COALESCE(sa.sold, 0), COALESCE(sa.revenue, 0.0)
         FROM products p
         LEFT JOIN suppliers s ON s.id = p.supplier_id
         LEFT JOIN event_products ep ON ep.product_id = p.id AND ep.event_id = ?1
         LEFT JOIN (
             SELECT product_id, SUM(quantity) AS sold, SUM(quantity * sale_price) AS revenue
             FROM event_sales WHERE event_id = ?1 GROUP BY product_id
         ) sa ON sa.product_id = p.id
         WHERE ep.product_id IS NOT NULL OR sa.product_id IS NOT NULL
         ORDER BY p.category COLLATE NOCASE, p.name COLLATE NOCASE"
    );
    let mut stmt = conn.prepare(&sql)?;
    let lines = stmt
        .query_map(params![event_id], report_line_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut totals = Totals::default();
    let mut categories: BTreeMap<String, Totals> = BTreeMap::new();
    let mut suppliers: BTreeMap<String, Totals> = BTreeMap::new();
    for line in &lines {
        totals.add(line);
        let category = line.product.category.clone().unwrap_or_else(|| UNCATEGORISED.to_string());
        categories.entry(category).or_default().add(line);
        let supplier = line.supplier_name.clone().unwrap_or_else(|| NO_SUPPLIER.to_string());
        suppliers.entry(supplier).or_default().add(line);
    }

    let mut top_products: Vec<ReportLine> = lines.iter().filter(|line| line.sold > 0).cloned().collect();
    top_products.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
    top_products.truncate(TOP_PRODUCTS);

    Ok(EventReport {
        event,
        lines,
        totals,
        by_category: by_revenue(categories),
        by_supplier: by_revenue(suppliers),
        top_products,
    })
}

fn by_revenue(groups: BTreeMap<String, Totals>) -> Vec<(String, Totals)> {
    let mut groups: Vec<_> = groups.into_iter().collect();
    // Stable sort keeps the alphabetical order for ties.
    groups.sort_by(|a, b| b.1.revenue.total_cmp(&a.1.revenue));
    groups
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionTotals {
    pub events: usize,
    pub income: f64,
    pub costs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopEvent {
    pub name: String,
    pub date: Option<String>,
    pub income: f64,
}

/// Year-end view of the events programme.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnualSummary {
    pub year: i32,
    pub events: usize,
    pub total_income: f64,
    pub total_costs: f64,
    pub net: f64,
    /// Alphabetical by region.
    pub by_region: Vec<(String, RegionTotals)>,
    pub top_events: Vec<TopEvent>,
    pub helmets: f64,
    pub glasses: f64,
    pub tyres: f64,
}

pub fn annual_summary(conn: &Connection, year: i32) -> InventoryResult<AnnualSummary> {
    let rows = fetch_annual_events(conn, year)?;
    let mut summary = AnnualSummary {
        year,
        events: rows.len(),
        ..AnnualSummary::default()
    };

    let mut regions: BTreeMap<String, RegionTotals> = BTreeMap::new();
    for row in &rows {
        let income = row.income.unwrap_or(0.0);
        let costs = row.actual_costs.unwrap_or(0.0);
        summary.total_income += income;
        summary.total_costs += costs;
        summary.helmets += row.helmets.unwrap_or(0.0);
        summary.glasses += row.glasses.unwrap_or(0.0);
        summary.tyres += row.tyres.unwrap_or(0.0);

        let region = row
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| NO_REGION.to_string());
        let entry = regions.entry(region).or_default();
        entry.events += 1;
        entry.income += income;
        entry.costs += costs;
    }
    summary.net = summary.total_income - summary.total_costs;
    summary.by_region = regions.into_iter().collect();

    let mut ranked: Vec<TopEvent> = rows
        .iter()
        .map(|row| TopEvent {
            name: row.name.clone().unwrap_or_default(),
            date: row.date.clone(),
            income: row.income.unwrap_or(0.0),
        })
        .collect();
    ranked.sort_by(|a, b| b.income.total_cmp(&a.income));
    ranked.truncate(TOP_EVENTS);
    summary.top_events = ranked;

    Ok(summary)
}

/// Units of one product across the events of a year. `cells` is aligned
/// with [`AnnualProgramme::events`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammeRow {
    pub product: Product,
    pub cells: Vec<ProgrammeCell>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgrammeCell {
    pub assigned: i64,
    pub sold: i64,
}

impl ProgrammeRow {
    pub fn total_assigned(&self) -> i64 {
        self.cells.iter().map(|c| c.assigned).sum()
    }

    pub fn total_sold(&self) -> i64 {
        self.cells.iter().map(|c| c.sold).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnualProgramme {
    pub year: i32,
    pub events: Vec<Event>,
    pub rows: Vec<ProgrammeRow>,
}

/// Product × event pivot for the events starting in `year`. Only products
/// assigned to or sold at one of those events get a row.
pub fn annual_programme(conn: &Connection, year: i32) -> InventoryResult<AnnualProgramme> {
    let events = fetch_events_in_year(conn, year)?;
    let column_of: BTreeMap<i64, usize> = events
        .iter()
        .enumerate()
        .map(|(index, event)| (event.id, index))
        .collect();

    let sql = format!(
        "SELECT {PRODUCT_COLUMNS}, usage.event_id, SUM(usage.assigned), SUM(usage.sold)
         FROM (
             SELECT event_id, product_id, quantity_assigned AS assigned, 0 AS sold FROM event_products
             UNION ALL
             SELECT event_id, product_id, 0, quantity FROM event_sales
         ) usage
         JOIN products p ON p.id = usage.product_id
         JOIN events e ON e.id = usage.event_id
         WHERE substr(e.start_date, 1, 4) = ?1
         GROUP BY p.id, usage.event_id
         ORDER BY p.category COLLATE NOCASE, p.name COLLATE NOCASE, p.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let usage = stmt
        .query_map([format!("{year:04}")], |row| {
            Ok((
                product_from_row(row)?,
                row.get::<_, i64>(PRODUCT_WIDTH)?,
                row.get::<_, i64>(PRODUCT_WIDTH + 1)?,
                row.get::<_, i64>(PRODUCT_WIDTH + 2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows: Vec<ProgrammeRow> = Vec::new();
    for (product, event_id, assigned, sold) in usage {
        let Some(&column) = column_of.get(&event_id) else {
            continue;
        };
        if rows.last().map(|row| row.product.id) != Some(product.id) {
            rows.push(ProgrammeRow {
                product,
                cells: vec![ProgrammeCell::default(); events.len()],
            });
        }
        if let Some(row) = rows.last_mut() {
            row.cells[column] = ProgrammeCell { assigned, sold };
        }
    }

    Ok(AnnualProgramme { year, events, rows })
}
