use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::barcode::{process_batch_scan, ScanOutcome, ScanSession};
use crate::db::{
    fetch_event_products, fetch_event_sales, get_activity, get_inventory_status,
    get_low_stock_items, get_transaction_history, search_products, HistoryFilter,
};
use crate::models::{ActivityEntry, Event, EventProduct, EventSale, InventoryTransaction, StockLevel};
use crate::reports::{AnnualProgramme, AnnualSummary, EventReport};

use super::helpers::{money, optional_money, step_index};

/// Rows fetched per page of the stock listing.
pub(crate) const STOCK_PAGE_SIZE: i64 = 200;
/// Scanner results kept on screen.
const SCAN_LOG_LEN: usize = 50;
/// Ledger lines loaded into the history view.
const HISTORY_LIMIT: i64 = 500;

/// Which slice of the catalog the stock screen lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StockView {
    All { offset: i64 },
    Search(String),
    LowStock,
}

pub(crate) struct StockScreen {
    pub(crate) view: StockView,
    pub(crate) rows: Vec<StockLevel>,
    pub(crate) selected: usize,
    pub(crate) threshold: i64,
}

impl StockScreen {
    pub(crate) fn load(conn: &Connection, view: StockView, threshold: i64) -> Result<Self> {
        let mut screen = Self {
            view,
            rows: Vec::new(),
            selected: 0,
            threshold,
        };
        screen.reload(conn)?;
        Ok(screen)
    }

    pub(crate) fn reload(&mut self, conn: &Connection) -> Result<()> {
        self.rows = match &self.view {
            StockView::All { offset } => get_inventory_status(conn, STOCK_PAGE_SIZE, *offset)
                .context("failed to load inventory")?,
            StockView::Search(term) => {
                search_products(conn, term).context("failed to search products")?
            }
            StockView::LowStock => get_low_stock_items(conn, self.threshold)
                .context("failed to load low stock items")?,
        };
        self.ensure_in_bounds();
        Ok(())
    }

    pub(crate) fn title(&self) -> String {
        match &self.view {
            StockView::All { offset } => {
                let first = offset + 1;
                let last = offset + self.rows.len() as i64;
                format!("Stock ({first}-{last})")
            }
            StockView::Search(term) => format!("Stock matching \"{term}\""),
            StockView::LowStock => format!("Low stock (at or below {})", self.threshold),
        }
    }

    /// Move one page forward or back in the full listing. Returns false when
    /// there is no page in that direction.
    pub(crate) fn turn_page(&mut self, conn: &Connection, forward: bool) -> Result<bool> {
        let StockView::All { offset } = self.view else {
            return Ok(false);
        };
        let next = if forward {
            if (self.rows.len() as i64) < STOCK_PAGE_SIZE {
                return Ok(false);
            }
            offset + STOCK_PAGE_SIZE
        } else {
            if offset == 0 {
                return Ok(false);
            }
            (offset - STOCK_PAGE_SIZE).max(0)
        };
        self.view = StockView::All { offset: next };
        self.selected = 0;
        self.reload(conn)?;
        Ok(true)
    }

    pub(crate) fn current(&self) -> Option<&StockLevel> {
        self.rows.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, offset, self.rows.len());
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
    }

    fn ensure_in_bounds(&mut self) {
        self.selected = step_index(self.selected, 0, self.rows.len());
    }
}

pub(crate) struct EventsScreen {
    pub(crate) events: Vec<Event>,
    pub(crate) selected: usize,
}

impl EventsScreen {
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            selected: 0,
        }
    }

    pub(crate) fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
        self.selected = step_index(self.selected, 0, self.events.len());
    }

    pub(crate) fn current(&self) -> Option<&Event> {
        self.events.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, offset, self.events.len());
    }

    pub(crate) fn select_id(&mut self, id: i64) {
        if let Some(index) = self.events.iter().position(|event| event.id == id) {
            self.selected = index;
        }
    }
}

/// One event with its assigned products and the sales made so far.
pub(crate) struct EventDetailScreen {
    pub(crate) event: Event,
    pub(crate) products: Vec<EventProduct>,
    pub(crate) sales: Vec<EventSale>,
    pub(crate) selected: usize,
}

impl EventDetailScreen {
    pub(crate) fn load(conn: &Connection, event: Event) -> Result<Self> {
        let mut screen = Self {
            event,
            products: Vec::new(),
            sales: Vec::new(),
            selected: 0,
        };
        screen.reload(conn)?;
        Ok(screen)
    }

    pub(crate) fn reload(&mut self, conn: &Connection) -> Result<()> {
        self.products = fetch_event_products(conn, self.event.id)
            .context("failed to load event products")?;
        self.sales = fetch_event_sales(conn, self.event.id).context("failed to load event sales")?;
        self.selected = step_index(self.selected, 0, self.products.len());
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&EventProduct> {
        self.products.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step_index(self.selected, offset, self.products.len());
    }

    pub(crate) fn assigned_units(&self) -> i64 {
        self.products.iter().map(|p| p.quantity_assigned).sum()
    }

    pub(crate) fn takings(&self) -> f64 {
        self.sales.iter().map(EventSale::total).sum()
    }
}

/// Severity of a scanner log line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ScanTone {
    Good,
    Muted,
    Bad,
}

/// Live scanner: keystrokes from a barcode wedge collect in `input` until
/// Enter. In batch mode codes are queued and looked up together.
pub(crate) struct ScannerScreen {
    pub(crate) session: ScanSession,
    pub(crate) input: String,
    pub(crate) batch: Option<Vec<String>>,
    pub(crate) log: VecDeque<(ScanTone, String)>,
}

impl ScannerScreen {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            session: ScanSession::new(timeout),
            input: String::new(),
            batch: None,
            log: VecDeque::new(),
        }
    }

    pub(crate) fn toggle_batch(&mut self) -> bool {
        self.batch = match self.batch.take() {
            Some(_) => None,
            None => Some(Vec::new()),
        };
        self.batch.is_some()
    }

    /// Handle Enter: scan the typed code, queue it in batch mode, or run the
    /// queued batch when the input is empty.
    pub(crate) fn submit(&mut self, conn: &Connection) -> Result<()> {
        let code = std::mem::take(&mut self.input);
        let code = code.trim();

        if let Some(queue) = self.batch.as_mut() {
            if code.is_empty() {
                let queued = std::mem::take(queue);
                self.run_batch(conn, &queued);
            } else {
                queue.push(code.to_string());
                let message = format!("Queued {code} ({} waiting)", queue.len());
                self.push_log(ScanTone::Muted, message);
            }
            return Ok(());
        }

        if code.is_empty() {
            return Ok(());
        }
        let outcome = self.session.scan(conn, code).context("barcode lookup failed")?;
        let (tone, message) = describe_scan(&outcome);
        self.push_log(tone, message);
        Ok(())
    }

    fn run_batch(&mut self, conn: &Connection, codes: &[String]) {
        if codes.is_empty() {
            self.push_log(ScanTone::Muted, "Batch is empty.".to_string());
            return;
        }
        let report = process_batch_scan(conn, codes);
        for stock in &report.products {
            self.push_log(ScanTone::Good, describe_stock(stock));
        }
        let summary = format!(
            "Batch of {}: {} found, {} not found, {} invalid",
            report.total, report.found, report.not_found, report.invalid
        );
        let tone = if report.found == report.total {
            ScanTone::Good
        } else {
            ScanTone::Bad
        };
        self.push_log(tone, summary);
    }

    fn push_log(&mut self, tone: ScanTone, message: String) {
        self.log.push_front((tone, message));
        self.log.truncate(SCAN_LOG_LEN);
    }
}

fn describe_stock(stock: &StockLevel) -> String {
    format!(
        "{}  on hand {}  available {}  price {}",
        stock.product.display_name(),
        stock.on_hand,
        stock.available(),
        optional_money(stock.product.selling_price)
    )
}

pub(crate) fn describe_scan(outcome: &ScanOutcome) -> (ScanTone, String) {
    match outcome {
        ScanOutcome::Found(stock) => (ScanTone::Good, describe_stock(stock)),
        ScanOutcome::NotFound(code) => (ScanTone::Bad, format!("{code}: not in the catalog")),
        ScanOutcome::Invalid(code) => (ScanTone::Bad, format!("{code:?}: invalid barcode")),
        ScanOutcome::Duplicate(Some(stock)) => (
            ScanTone::Muted,
            format!("Repeat scan ignored: {}", stock.product.display_name()),
        ),
        ScanOutcome::Duplicate(None) => {
            (ScanTone::Muted, "Repeat scan ignored: not in the catalog".to_string())
        }
    }
}

/// Ledger for one product, or the whole store, with the audit log one key
/// away.
pub(crate) struct HistoryScreen {
    pub(crate) title: String,
    pub(crate) entries: Vec<InventoryTransaction>,
    pub(crate) activity: Vec<ActivityEntry>,
    pub(crate) show_activity: bool,
    pub(crate) scroll: usize,
}

impl HistoryScreen {
    pub(crate) fn load(conn: &Connection, product: Option<&StockLevel>) -> Result<Self> {
        let (title, filter) = match product {
            Some(stock) => (
                format!("History: {}", stock.product.display_name()),
                HistoryFilter {
                    limit: Some(HISTORY_LIMIT),
                    ..HistoryFilter::for_product(stock.product.id)
                },
            ),
            None => (
                "History: all products".to_string(),
                HistoryFilter {
                    limit: Some(HISTORY_LIMIT),
                    ..HistoryFilter::default()
                },
            ),
        };

        let entries = get_transaction_history(conn, &filter).context("failed to load history")?;
        let activity = get_activity(conn, None, HISTORY_LIMIT).context("failed to load activity")?;
        Ok(Self {
            title,
            entries,
            activity,
            show_activity: false,
            scroll: 0,
        })
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        if self.show_activity {
            return self
                .activity
                .iter()
                .map(|entry| {
                    format!(
                        "{}  {:<9} {}{}",
                        entry.created_at,
                        entry.activity_type,
                        entry.description,
                        entry.user.as_deref().map(|u| format!("  ({u})")).unwrap_or_default()
                    )
                })
                .collect();
        }

        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{}  {:>+6}  {}  {}",
                    entry.transaction_date,
                    entry.signed_quantity(),
                    entry.product_name,
                    entry.reference.as_deref().unwrap_or("")
                )
            })
            .collect()
    }

    pub(crate) fn scroll_by(&mut self, delta: isize) {
        let len = if self.show_activity {
            self.activity.len()
        } else {
            self.entries.len()
        };
        self.scroll = step_index(self.scroll, delta, len);
    }
}

/// Read-only text report with vertical scrolling.
pub(crate) struct ReportScreen {
    pub(crate) title: String,
    pub(crate) lines: Vec<String>,
    pub(crate) scroll: usize,
}

impl ReportScreen {
    pub(crate) fn new(title: String, lines: Vec<String>) -> Self {
        Self {
            title,
            lines,
            scroll: 0,
        }
    }

    pub(crate) fn scroll_by(&mut self, delta: isize) {
        self.scroll = step_index(self.scroll, delta, self.lines.len());
    }
}

pub(crate) fn event_report_lines(report: &EventReport) -> Vec<String> {
    let mut lines = vec![report.event.to_string()];
    if let Some(location) = &report.event.location {
        lines.push(format!("Location: {location}"));
    }
    lines.push(String::new());

    lines.push(format!(
        "{:<40} {:>8} {:>6} {:>10} {:>10}",
        "Product", "Assigned", "Sold", "Price", "Revenue"
    ));
    for line in &report.lines {
        lines.push(format!(
            "{:<40} {:>8} {:>6} {:>10} {:>10}",
            truncate(&line.product.display_name(), 40),
            line.assigned,
            line.sold,
            optional_money(line.effective_price),
            money(line.revenue)
        ));
    }

    let totals = &report.totals;
    lines.push(String::new());
    lines.push(format!("Products: {}", totals.products));
    lines.push(format!("Still assigned: {}", totals.assigned));
    lines.push(format!("Units sold: {}", totals.sold));
    lines.push(format!("Revenue: {}", money(totals.revenue)));
    lines.push(format!("Profit: {}", money(totals.profit)));
    lines.push(format!("Sell-through: {:.1}%", totals.sell_through()));

    for (heading, groups) in [("By category", &report.by_category), ("By supplier", &report.by_supplier)] {
        lines.push(String::new());
        lines.push(heading.to_string());
        for (name, group) in groups.iter() {
            lines.push(format!(
                "  {:<30} sold {:>5}  revenue {:>10}",
                truncate(name, 30),
                group.sold,
                money(group.revenue)
            ));
        }
    }

    lines.push(String::new());
    lines.push("Top products".to_string());
    for (rank, line) in report.top_products.iter().enumerate() {
        lines.push(format!(
            "  {:>2}. {:<40} {:>10}",
            rank + 1,
            truncate(&line.product.display_name(), 40),
            money(line.revenue)
        ));
    }
    lines
}

pub(crate) fn annual_summary_lines(summary: &AnnualSummary) -> Vec<String> {
    let mut lines = vec![
        format!("Events programme {}", summary.year),
        String::new(),
        format!("Events: {}", summary.events),
        format!("Income: {}", money(summary.total_income)),
        format!("Costs: {}", money(summary.total_costs)),
        format!("Net: {}", money(summary.net)),
        String::new(),
        format!(
            "Units sold: helmets {}  glasses {}  tyres {}",
            summary.helmets, summary.glasses, summary.tyres
        ),
        String::new(),
        "By region".to_string(),
    ];
    for (region, totals) in &summary.by_region {
        lines.push(format!(
            "  {:<24} {:>3} events  income {:>10}  costs {:>10}",
            truncate(region, 24),
            totals.events,
            money(totals.income),
            money(totals.costs)
        ));
    }
    lines.push(String::new());
    lines.push("Top events by income".to_string());
    for (rank, event) in summary.top_events.iter().enumerate() {
        lines.push(format!(
            "  {}. {} ({}) {}",
            rank + 1,
            event.name,
            event.date.as_deref().unwrap_or("-"),
            money(event.income)
        ));
    }
    lines
}

/// Product × event grid as `assigned/sold` cells.
pub(crate) fn programme_lines(programme: &AnnualProgramme) -> Vec<String> {
    if programme.events.is_empty() {
        return vec![format!("No events start in {}.", programme.year)];
    }

    let mut header = format!("{:<32}", "Product");
    for event in &programme.events {
        header.push_str(&format!(" {:>12}", truncate(&event.name, 12)));
    }
    header.push_str(&format!(" {:>12}", "Total"));

    let mut lines = vec![header];
    for row in &programme.rows {
        let mut line = format!("{:<32}", truncate(&row.product.display_name(), 32));
        for cell in &row.cells {
            line.push_str(&format!(" {:>12}", format!("{}/{}", cell.assigned, cell.sold)));
        }
        line.push_str(&format!(
            " {:>12}",
            format!("{}/{}", row.total_assigned(), row.total_sold())
        ));
        lines.push(line);
    }
    lines
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
