use std::mem;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Local};
use crossterm::event::KeyCode;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use rusqlite::Connection;

use crate::barcode;
use crate::config::Config;
use crate::db::{
    add_stock, assign_product, create_event, create_product, delete_event, fetch_event,
    fetch_events, find_product_by_barcode, find_product_by_sku, record_sale, remove_assignment,
    remove_stock, set_location, update_assignment, update_event, SaleRequest,
};
use crate::import::{
    guess_supplier, import_annual_events, import_event_assignments, import_products, Sheet,
};
use crate::models::StockLevel;
use crate::reports::{annual_programme, annual_summary, event_report};

use super::forms::{
    assign_form, edit_event_form, event_form, import_form, location_form, parse_assignment,
    parse_event, parse_import, parse_location, parse_product, parse_quantity, parse_sale,
    parse_stock_move, parse_year, product_form, quantity_form, sale_form, stock_move_form,
    year_form, Confirm, Form,
};
use super::helpers::{centered_rect, key_hint, money, optional_money, surface_error};
use super::screens::{
    annual_summary_lines, event_report_lines, programme_lines, EventDetailScreen, EventsScreen,
    HistoryScreen, ReportScreen, ScanTone, ScannerScreen, StockScreen, StockView,
};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp/PageDown in lists.
const PAGE_STEP: isize = 10;

/// Top-level views. The stock list is the root; every other screen is opened
/// on top of it and Esc returns to whatever was below.
enum Screen {
    Stock(StockScreen),
    Events(EventsScreen),
    EventDetail(EventDetailScreen),
    Scanner(ScannerScreen),
    History(HistoryScreen),
    Report(ReportScreen),
}

/// Fine-grained modes scoped to the current screen.
enum Mode {
    Normal,
    Searching(String),
    Editing { purpose: FormPurpose, form: Form },
    Confirming(Confirm),
}

/// What a submitted form should do.
#[derive(Copy, Clone, Debug)]
enum FormPurpose {
    StockIn { product_id: i64 },
    StockOut { product_id: i64 },
    NewProduct,
    Location { product_id: i64 },
    NewEvent,
    EditEvent { event_id: i64 },
    Assign { event_id: i64 },
    UpdateAssignment { event_id: i64, product_id: i64 },
    Sale { event_id: i64, product_id: i64 },
    ImportPriceList,
    ImportAssignments { event_id: i64 },
    ImportProgramme,
    AnnualSummary,
    AnnualProgramme,
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Central application state shared across the TUI.
pub struct App {
    conn: Connection,
    config: Config,
    screen: Screen,
    previous: Vec<Screen>,
    mode: Mode,
    status: Option<StatusMessage>,
}

impl App {
    pub fn new(conn: Connection, config: Config) -> Result<Self> {
        let stock = StockScreen::load(
            &conn,
            StockView::All { offset: 0 },
            config.low_stock_threshold,
        )?;
        Ok(Self {
            conn,
            config,
            screen: Screen::Stock(stock),
            previous: Vec::new(),
            mode: Mode::Normal,
            status: None,
        })
    }

    /// Feed one key press through the current mode. Returns true when the
    /// user asked to quit.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mode = mem::replace(&mut self.mode, Mode::Normal);

        self.mode = match mode {
            Mode::Normal => self.handle_normal_key(code, &mut exit)?,
            Mode::Searching(query) => self.handle_search(code, query)?,
            Mode::Editing { purpose, form } => self.handle_form(code, purpose, form)?,
            Mode::Confirming(confirm) => self.handle_confirm(code, confirm)?,
        };

        Ok(exit)
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let outcome = match &self.screen {
            Screen::Stock(_) => self.handle_stock_key(code, exit),
            Screen::Events(_) => self.handle_events_key(code),
            Screen::EventDetail(_) => self.handle_event_detail_key(code),
            Screen::Scanner(_) => self.handle_scanner_key(code),
            Screen::History(_) => self.handle_history_key(code),
            Screen::Report(_) => self.handle_report_key(code),
        };

        match outcome {
            Ok(mode) => Ok(mode),
            Err(err) => {
                self.set_status(surface_error(&err), StatusKind::Error);
                Ok(Mode::Normal)
            }
        }
    }

    fn handle_stock_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Stock(stock) = &mut self.screen else {
            return Ok(Mode::Normal);
        };
        let selected = stock.current().cloned();

        match code {
            KeyCode::Char('q') | KeyCode::Esc => *exit = true,
            KeyCode::Up => stock.move_selection(-1),
            KeyCode::Down => stock.move_selection(1),
            KeyCode::PageUp => stock.move_selection(-PAGE_STEP),
            KeyCode::PageDown => stock.move_selection(PAGE_STEP),
            KeyCode::Home => stock.select_first(),
            KeyCode::End => stock.select_last(),
            KeyCode::Char(']') | KeyCode::Char('[') => {
                let forward = code == KeyCode::Char(']');
                if !stock.turn_page(&self.conn, forward)? {
                    self.set_status("No more pages.", StatusKind::Info);
                }
            }
            KeyCode::Char('f') | KeyCode::Char('/') => {
                let query = match &stock.view {
                    StockView::Search(term) => term.clone(),
                    _ => String::new(),
                };
                return Ok(Mode::Searching(query));
            }
            KeyCode::Char('l') => {
                stock.view = match stock.view {
                    StockView::LowStock => StockView::All { offset: 0 },
                    _ => StockView::LowStock,
                };
                stock.selected = 0;
                stock.reload(&self.conn)?;
            }
            KeyCode::Char('r') => {
                stock.reload(&self.conn)?;
                self.set_status("Stock refreshed.", StatusKind::Info);
            }
            KeyCode::Char('+') => {
                let stock = require_product(selected)?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::StockIn {
                        product_id: stock.product.id,
                    },
                    form: stock_move_form(format!("Stock in: {}", stock.product.display_name())),
                });
            }
            KeyCode::Char('-') => {
                let stock = require_product(selected)?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::StockOut {
                        product_id: stock.product.id,
                    },
                    form: stock_move_form(format!(
                        "Stock out: {} ({} available)",
                        stock.product.display_name(),
                        stock.available()
                    )),
                });
            }
            KeyCode::Char('o') => {
                let stock = require_product(selected)?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::Location {
                        product_id: stock.product.id,
                    },
                    form: location_form(&stock.product.display_name(), stock.location.as_deref()),
                });
            }
            KeyCode::Char('n') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::NewProduct,
                    form: product_form(),
                })
            }
            KeyCode::Char('h') => {
                let history = HistoryScreen::load(&self.conn, selected.as_ref())?;
                self.open_screen(Screen::History(history));
            }
            KeyCode::Char('H') => {
                let history = HistoryScreen::load(&self.conn, None)?;
                self.open_screen(Screen::History(history));
            }
            KeyCode::Char('e') => {
                let events = fetch_events(&self.conn).context("failed to load events")?;
                self.open_screen(Screen::Events(EventsScreen::new(events)));
            }
            KeyCode::Char('s') => {
                self.open_screen(Screen::Scanner(ScannerScreen::new(self.config.scan_timeout)));
            }
            KeyCode::Char('i') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::ImportPriceList,
                    form: import_form("Import price list", true),
                })
            }
            _ => {}
        }

        Ok(Mode::Normal)
    }

    fn handle_events_key(&mut self, code: KeyCode) -> Result<Mode> {
        let Screen::Events(events) = &mut self.screen else {
            return Ok(Mode::Normal);
        };
        let selected = events.current().cloned();
        let year = Local::now().year();

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.go_back()?,
            KeyCode::Up => events.move_selection(-1),
            KeyCode::Down => events.move_selection(1),
            KeyCode::PageUp => events.move_selection(-PAGE_STEP),
            KeyCode::PageDown => events.move_selection(PAGE_STEP),
            KeyCode::Enter => {
                let event = selected.ok_or_else(|| anyhow!("No event selected."))?;
                let detail = EventDetailScreen::load(&self.conn, event)?;
                self.open_screen(Screen::EventDetail(detail));
            }
            KeyCode::Char('n') | KeyCode::Char('+') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::NewEvent,
                    form: event_form(),
                })
            }
            KeyCode::Char('u') => {
                let event = selected.ok_or_else(|| anyhow!("No event selected."))?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::EditEvent { event_id: event.id },
                    form: edit_event_form(&event),
                });
            }
            KeyCode::Char('d') | KeyCode::Char('-') => {
                let event = selected.ok_or_else(|| anyhow!("No event selected."))?;
                return Ok(Mode::Confirming(Confirm::DeleteEvent {
                    id: event.id,
                    name: event.name,
                }));
            }
            KeyCode::Char('y') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::AnnualSummary,
                    form: year_form("Annual summary", year),
                })
            }
            KeyCode::Char('p') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::AnnualProgramme,
                    form: year_form("Annual programme", year),
                })
            }
            KeyCode::Char('a') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::ImportProgramme,
                    form: import_form("Import events programme", false),
                })
            }
            _ => {}
        }

        Ok(Mode::Normal)
    }

    fn handle_event_detail_key(&mut self, code: KeyCode) -> Result<Mode> {
        let Screen::EventDetail(detail) = &mut self.screen else {
            return Ok(Mode::Normal);
        };
        let event = detail.event.clone();
        let selected = detail.current().cloned();
        let not_selected = || anyhow!("No product selected.");

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.go_back()?,
            KeyCode::Up => detail.move_selection(-1),
            KeyCode::Down => detail.move_selection(1),
            KeyCode::PageUp => detail.move_selection(-PAGE_STEP),
            KeyCode::PageDown => detail.move_selection(PAGE_STEP),
            KeyCode::Char('a') | KeyCode::Char('+') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::Assign { event_id: event.id },
                    form: assign_form(&event.name),
                })
            }
            KeyCode::Char('u') => {
                let line = selected.ok_or_else(not_selected)?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::UpdateAssignment {
                        event_id: event.id,
                        product_id: line.product.id,
                    },
                    form: quantity_form(
                        format!("Assigned {}", line.product.display_name()),
                        line.quantity_assigned,
                    ),
                });
            }
            KeyCode::Char('d') | KeyCode::Char('-') => {
                let line = selected.ok_or_else(not_selected)?;
                return Ok(Mode::Confirming(Confirm::RemoveAssignment {
                    event_id: event.id,
                    product_id: line.product.id,
                    product: line.product.display_name(),
                    quantity: line.quantity_assigned,
                }));
            }
            KeyCode::Char('s') => {
                let line = selected.ok_or_else(not_selected)?;
                return Ok(Mode::Editing {
                    purpose: FormPurpose::Sale {
                        event_id: event.id,
                        product_id: line.product.id,
                    },
                    form: sale_form(
                        format!("Sell {}", line.product.display_name()),
                        line.effective_price(),
                        Local::now().date_naive(),
                    ),
                });
            }
            KeyCode::Char('i') => {
                return Ok(Mode::Editing {
                    purpose: FormPurpose::ImportAssignments { event_id: event.id },
                    form: import_form("Import pick list", false),
                })
            }
            KeyCode::Char('r') => {
                let report = event_report(&self.conn, event.id).context("failed to build event report")?;
                let screen = ReportScreen::new(
                    format!("Report: {}", event.name),
                    event_report_lines(&report),
                );
                self.open_screen(Screen::Report(screen));
            }
            _ => {}
        }

        Ok(Mode::Normal)
    }

    fn handle_scanner_key(&mut self, code: KeyCode) -> Result<Mode> {
        let Screen::Scanner(scanner) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => self.go_back()?,
            KeyCode::Tab => {
                let batch = scanner.toggle_batch();
                let message = if batch {
                    "Batch mode: Enter queues a code, Enter on an empty line looks them all up."
                } else {
                    "Live scanning."
                };
                self.set_status(message, StatusKind::Info);
            }
            KeyCode::Backspace => {
                scanner.input.pop();
            }
            KeyCode::Enter => scanner.submit(&self.conn)?,
            KeyCode::Char(ch) if !ch.is_control() => scanner.input.push(ch),
            _ => {}
        }

        Ok(Mode::Normal)
    }

    fn handle_history_key(&mut self, code: KeyCode) -> Result<Mode> {
        let Screen::History(history) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.go_back()?,
            KeyCode::Up => history.scroll_by(-1),
            KeyCode::Down => history.scroll_by(1),
            KeyCode::PageUp => history.scroll_by(-PAGE_STEP),
            KeyCode::PageDown => history.scroll_by(PAGE_STEP),
            KeyCode::Tab => {
                history.show_activity = !history.show_activity;
                history.scroll = 0;
            }
            _ => {}
        }

        Ok(Mode::Normal)
    }

    fn handle_report_key(&mut self, code: KeyCode) -> Result<Mode> {
        let Screen::Report(report) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.go_back()?,
            KeyCode::Up => report.scroll_by(-1),
            KeyCode::Down => report.scroll_by(1),
            KeyCode::PageUp => report.scroll_by(-PAGE_STEP),
            KeyCode::PageDown => report.scroll_by(PAGE_STEP),
            KeyCode::Home => report.scroll = 0,
            _ => {}
        }

        Ok(Mode::Normal)
    }

    /// Live product search on the stock screen. Each keystroke re-queries.
    fn handle_search(&mut self, code: KeyCode, mut query: String) -> Result<Mode> {
        let Screen::Stock(stock) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                stock.view = StockView::All { offset: 0 };
                stock.reload(&self.conn)?;
                return Ok(Mode::Normal);
            }
            KeyCode::Enter => return Ok(Mode::Normal),
            KeyCode::Up => stock.move_selection(-1),
            KeyCode::Down => stock.move_selection(1),
            KeyCode::Backspace => {
                query.pop();
            }
            KeyCode::Char(ch) => query.push(ch),
            _ => return Ok(Mode::Searching(query)),
        }

        if matches!(code, KeyCode::Backspace | KeyCode::Char(_)) {
            stock.view = if query.trim().is_empty() {
                StockView::All { offset: 0 }
            } else {
                StockView::Search(query.trim().to_string())
            };
            stock.selected = 0;
            if let Err(err) = stock.reload(&self.conn) {
                self.set_status(surface_error(&err), StatusKind::Error);
            }
        }

        Ok(Mode::Searching(query))
    }

    fn handle_form(&mut self, code: KeyCode, purpose: FormPurpose, mut form: Form) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.submit_form(purpose, &form) {
                Ok(()) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if keep_open {
            Ok(Mode::Editing { purpose, form })
        } else {
            Ok(Mode::Normal)
        }
    }

    fn submit_form(&mut self, purpose: FormPurpose, form: &Form) -> Result<()> {
        match purpose {
            FormPurpose::StockIn { product_id } => {
                let (quantity, movement) = parse_stock_move(form, self.config.user.clone())?;
                add_stock(&mut self.conn, product_id, quantity, &movement)
                    .context("failed to add stock")?;
                self.refresh_screen()?;
                self.set_status(format!("Added {quantity} to stock."), StatusKind::Info);
            }
            FormPurpose::StockOut { product_id } => {
                let (quantity, movement) = parse_stock_move(form, self.config.user.clone())?;
                remove_stock(&mut self.conn, product_id, quantity, &movement)
                    .context("failed to remove stock")?;
                self.refresh_screen()?;
                self.set_status(format!("Removed {quantity} from stock."), StatusKind::Info);
            }
            FormPurpose::NewProduct => {
                let new = parse_product(form)?;
                let product = create_product(&mut self.conn, &new).context("failed to create product")?;
                self.refresh_screen()?;
                self.set_status(format!("Created {}.", product.display_name()), StatusKind::Info);
            }
            FormPurpose::Location { product_id } => {
                let location = parse_location(form)?;
                set_location(&self.conn, product_id, location.as_deref())
                    .context("failed to save location")?;
                self.refresh_screen()?;
                self.set_status("Location saved.", StatusKind::Info);
            }
            FormPurpose::NewEvent => {
                let new = parse_event(form)?;
                let event = create_event(&self.conn, &new).context("failed to create event")?;
                self.refresh_screen()?;
                if let Screen::Events(events) = &mut self.screen {
                    events.select_id(event.id);
                }
                self.set_status(format!("Created event {}.", event.name), StatusKind::Info);
            }
            FormPurpose::EditEvent { event_id } => {
                let changes = parse_event(form)?;
                update_event(&self.conn, event_id, &changes).context("failed to update event")?;
                self.refresh_screen()?;
                self.set_status("Event updated.", StatusKind::Info);
            }
            FormPurpose::Assign { event_id } => {
                let (code, quantity, price) = parse_assignment(form)?;
                let stock = self.lookup_product(&code)?;
                assign_product(&mut self.conn, event_id, stock.product.id, quantity, price)
                    .context("failed to assign product")?;
                self.refresh_screen()?;
                self.set_status(
                    format!("Reserved {quantity} x {}.", stock.product.display_name()),
                    StatusKind::Info,
                );
            }
            FormPurpose::UpdateAssignment {
                event_id,
                product_id,
            } => {
                let quantity = parse_quantity(form)?;
                update_assignment(&mut self.conn, event_id, product_id, quantity)
                    .context("failed to update assignment")?;
                self.refresh_screen()?;
                self.set_status(format!("Assignment set to {quantity}."), StatusKind::Info);
            }
            FormPurpose::Sale {
                event_id,
                product_id,
            } => {
                let (quantity, price, sale_date) = parse_sale(form)?;
                let sale = record_sale(
                    &mut self.conn,
                    &SaleRequest {
                        event_id,
                        product_id,
                        quantity,
                        price,
                        sale_date,
                        user: self.config.user.clone(),
                    },
                )
                .context("failed to record sale")?;
                self.refresh_screen()?;
                self.set_status(
                    format!(
                        "Sold {} x {} for {}.",
                        sale.quantity,
                        sale.product_name,
                        money(sale.total())
                    ),
                    StatusKind::Info,
                );
            }
            FormPurpose::ImportPriceList => {
                let (path, supplier) = parse_import(form)?;
                let sheet = Sheet::from_csv_path(Path::new(&path))?;
                let supplier = supplier.unwrap_or_else(|| guess_supplier(&path, Some(&sheet)));
                let summary = import_products(&mut self.conn, &sheet, Some(&supplier))
                    .context("price list import failed")?;
                self.refresh_screen()?;
                let message = format!(
                    "{supplier}: {} added, {} updated, {} skipped, {} failed.",
                    summary.added,
                    summary.updated,
                    summary.skipped,
                    summary.errors.len()
                );
                self.report_import(message, &summary.errors);
            }
            FormPurpose::ImportAssignments { event_id } => {
                let (path, _) = parse_import(form)?;
                let sheet = Sheet::from_csv_path(Path::new(&path))?;
                let outcome = import_event_assignments(&mut self.conn, event_id, &sheet)
                    .context("pick list import failed")?;
                self.refresh_screen()?;
                let message = format!(
                    "{} assignments imported, {} failed.",
                    outcome.imported,
                    outcome.errors.len()
                );
                self.report_import(message, &outcome.errors);
            }
            FormPurpose::ImportProgramme => {
                let (path, _) = parse_import(form)?;
                let sheet = Sheet::from_csv_path(Path::new(&path))?;
                let summary = import_annual_events(&mut self.conn, &sheet)
                    .context("events programme import failed")?;
                let message = format!(
                    "{} programme rows imported, {} skipped, {} failed.",
                    summary.added,
                    summary.skipped,
                    summary.errors.len()
                );
                self.report_import(message, &summary.errors);
            }
            FormPurpose::AnnualSummary => {
                let year = parse_year(form)?;
                let summary = annual_summary(&self.conn, year).context("failed to build summary")?;
                let screen = ReportScreen::new(
                    format!("Annual summary {year}"),
                    annual_summary_lines(&summary),
                );
                self.open_screen(Screen::Report(screen));
            }
            FormPurpose::AnnualProgramme => {
                let year = parse_year(form)?;
                let programme =
                    annual_programme(&self.conn, year).context("failed to build programme")?;
                let screen = ReportScreen::new(
                    format!("Programme {year} (assigned/sold)"),
                    programme_lines(&programme),
                );
                self.open_screen(Screen::Report(screen));
            }
        }
        Ok(())
    }

    fn handle_confirm(&mut self, code: KeyCode, confirm: Confirm) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match self.perform_confirmed(&confirm) {
                    Ok(()) => Ok(Mode::Normal),
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::Normal)
                    }
                }
            }
            _ => Ok(Mode::Confirming(confirm)),
        }
    }

    fn perform_confirmed(&mut self, confirm: &Confirm) -> Result<()> {
        match confirm {
            Confirm::DeleteEvent { id, name } => {
                delete_event(&mut self.conn, *id).context("failed to delete event")?;
                self.refresh_screen()?;
                self.set_status(format!("Deleted event {name}."), StatusKind::Info);
            }
            Confirm::RemoveAssignment {
                event_id,
                product_id,
                product,
                ..
            } => {
                let released = remove_assignment(&mut self.conn, *event_id, *product_id)
                    .context("failed to remove assignment")?;
                self.refresh_screen()?;
                self.set_status(
                    format!("Removed {product}; {released} units back in stock."),
                    StatusKind::Info,
                );
            }
        }
        Ok(())
    }

    /// Resolve user input to a product: SKU first, then barcode.
    fn lookup_product(&self, code: &str) -> Result<StockLevel> {
        if let Some(stock) = find_product_by_sku(&self.conn, code)? {
            return Ok(stock);
        }
        let normalized = barcode::normalize(code);
        if !normalized.is_empty() {
            if let Some(stock) = find_product_by_barcode(&self.conn, &normalized)? {
                return Ok(stock);
            }
        }
        Err(anyhow!("No product with SKU or barcode {code}."))
    }

    fn report_import(&mut self, message: String, errors: &[String]) {
        match errors.first() {
            Some(first) => self.set_status(format!("{message} First error: {first}"), StatusKind::Error),
            None => self.set_status(message, StatusKind::Info),
        }
    }

    fn open_screen(&mut self, screen: Screen) {
        let below = mem::replace(&mut self.screen, screen);
        self.previous.push(below);
    }

    fn go_back(&mut self) -> Result<()> {
        if let Some(below) = self.previous.pop() {
            self.screen = below;
            self.refresh_screen()?;
        }
        Ok(())
    }

    /// Re-read whatever the current screen shows from the database.
    fn refresh_screen(&mut self) -> Result<()> {
        match &mut self.screen {
            Screen::Stock(stock) => stock.reload(&self.conn),
            Screen::Events(events) => {
                let list = fetch_events(&self.conn).context("failed to load events")?;
                events.set_events(list);
                Ok(())
            }
            Screen::EventDetail(detail) => {
                detail.event = fetch_event(&self.conn, detail.event.id)?;
                detail.reload(&self.conn)
            }
            Screen::Scanner(_) | Screen::History(_) | Screen::Report(_) => Ok(()),
        }
    }

    fn set_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        match &self.screen {
            Screen::Stock(stock) => self.draw_stock(frame, content_area, stock),
            Screen::Events(events) => self.draw_events(frame, content_area, events),
            Screen::EventDetail(detail) => self.draw_event_detail(frame, content_area, detail),
            Screen::Scanner(scanner) => self.draw_scanner(frame, content_area, scanner),
            Screen::History(history) => {
                let title = if history.show_activity {
                    "Activity log".to_string()
                } else {
                    history.title.clone()
                };
                self.draw_text(frame, content_area, &title, history.lines(), history.scroll)
            }
            Screen::Report(report) => self.draw_text(
                frame,
                content_area,
                &report.title,
                report.lines.clone(),
                report.scroll,
            ),
        }

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::Searching(query) => self.draw_search_bar(frame, area, query),
            Mode::Editing { form, .. } => self.draw_form(frame, area, form),
            Mode::Confirming(confirm) => self.draw_confirm(frame, area, confirm),
            Mode::Normal => {}
        }
    }

    fn draw_stock(&self, frame: &mut Frame, area: Rect, stock: &StockScreen) {
        let block = Block::default().borders(Borders::ALL).title(stock.title());
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(inner);

        let header = format!(
            "  {:<14} {:<36} {:>7} {:>7} {:>7} {:>10}  {}",
            "SKU", "Name", "On hand", "Resvd", "Avail", "Price", "Location"
        );
        frame.render_widget(
            Paragraph::new(Span::styled(header, Style::default().add_modifier(Modifier::BOLD))),
            chunks[0],
        );

        if stock.rows.is_empty() {
            frame.render_widget(
                Paragraph::new("No products to show.").style(Style::default().fg(Color::DarkGray)),
                chunks[1],
            );
            return;
        }

        let items: Vec<ListItem> = stock
            .rows
            .iter()
            .map(|row| {
                let text = format!(
                    "{:<14} {:<36} {:>7} {:>7} {:>7} {:>10}  {}",
                    row.product.sku.as_deref().unwrap_or("-"),
                    row.product.name,
                    row.on_hand,
                    row.reserved,
                    row.available(),
                    optional_money(row.product.selling_price),
                    row.location.as_deref().unwrap_or("")
                );
                let style = if row.on_hand <= stock.threshold {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                ListItem::new(Span::styled(text, style))
            })
            .collect();

        let list = List::new(items)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default();
        list_state.select(Some(stock.selected));
        frame.render_stateful_widget(list, chunks[1], &mut list_state);
    }

    fn draw_events(&self, frame: &mut Frame, area: Rect, events: &EventsScreen) {
        let block = Block::default().borders(Borders::ALL).title("Events");
        if events.events.is_empty() {
            let paragraph = Paragraph::new("No events yet. Press n to create one.")
                .block(block)
                .style(Style::default().fg(Color::DarkGray));
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem> = events
            .events
            .iter()
            .map(|event| {
                let dates = match (event.start_date, event.end_date) {
                    (Some(start), Some(end)) if start != end => format!("{start} to {end}"),
                    (Some(start), _) => start.to_string(),
                    (None, _) => "no date".to_string(),
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{:<36}", event.name),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(format!(" {dates:<26} ")),
                    Span::styled(
                        event.location.clone().unwrap_or_default(),
                        Style::default().fg(Color::Gray),
                    ),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default();
        list_state.select(Some(events.selected));
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn draw_event_detail(&self, frame: &mut Frame, area: Rect, detail: &EventDetailScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0)])
            .split(area);

        let event = &detail.event;
        let summary = vec![
            Line::from(Span::styled(
                event.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(format!(
                "{}  {} products, {} units reserved, takings {}",
                event.location.as_deref().unwrap_or("no location"),
                detail.products.len(),
                detail.assigned_units(),
                money(detail.takings())
            )),
        ];
        frame.render_widget(
            Paragraph::new(summary)
                .block(Block::default().borders(Borders::ALL).title("Event"))
                .wrap(Wrap { trim: true }),
            chunks[0],
        );

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
            .split(chunks[1]);

        let items: Vec<ListItem> = detail
            .products
            .iter()
            .map(|line| {
                ListItem::new(format!(
                    "{:<36} {:>5} reserved  {:>10}  ({} on hand)",
                    line.product.display_name(),
                    line.quantity_assigned,
                    optional_money(line.effective_price()),
                    line.on_hand
                ))
            })
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Assigned products"))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default();
        if !detail.products.is_empty() {
            list_state.select(Some(detail.selected));
        }
        frame.render_stateful_widget(list, panes[0], &mut list_state);

        let sales: Vec<ListItem> = detail
            .sales
            .iter()
            .map(|sale| {
                ListItem::new(format!(
                    "{} {:>3} x {} @ {}",
                    sale.sale_date,
                    sale.quantity,
                    sale.product_name,
                    money(sale.sale_price)
                ))
            })
            .collect();
        frame.render_widget(
            List::new(sales).block(Block::default().borders(Borders::ALL).title("Sales")),
            panes[1],
        );
    }

    fn draw_scanner(&self, frame: &mut Frame, area: Rect, scanner: &ScannerScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);

        let title = match &scanner.batch {
            Some(queue) => format!("Scan (batch, {} queued)", queue.len()),
            None => "Scan".to_string(),
        };
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(chunks[0]);
        frame.render_widget(
            Paragraph::new(format!("Barcode: {}", scanner.input)).block(block),
            chunks[0],
        );
        let cursor_x = inner.x + "Barcode: ".len() as u16 + scanner.input.chars().count() as u16;
        frame.set_cursor_position((cursor_x, inner.y));

        let items: Vec<ListItem> = scanner
            .log
            .iter()
            .map(|(tone, message)| {
                let style = match tone {
                    ScanTone::Good => Style::default().fg(Color::Green),
                    ScanTone::Muted => Style::default().fg(Color::DarkGray),
                    ScanTone::Bad => Style::default().fg(Color::Red),
                };
                ListItem::new(Span::styled(message.clone(), style))
            })
            .collect();
        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title("Results")),
            chunks[1],
        );
    }

    fn draw_text(&self, frame: &mut Frame, area: Rect, title: &str, lines: Vec<String>, scroll: usize) {
        let block = Block::default().borders(Borders::ALL).title(title.to_string());
        let text: Vec<Line> = if lines.is_empty() {
            vec![Line::from(Span::styled(
                "Nothing recorded yet.",
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            lines.into_iter().map(Line::from).collect()
        };
        let offset = u16::try_from(scroll).unwrap_or(u16::MAX);
        frame.render_widget(Paragraph::new(text).block(block).scroll((offset, 0)), area);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let instructions = self.footer_instructions();

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        let hints: &[(&'static str, &'static str)] = match (&self.screen, &self.mode) {
            (_, Mode::Editing { .. }) => &[
                ("[Tab]", "Next field"),
                ("[Enter]", "Save"),
                ("[Esc]", "Cancel"),
            ],
            (_, Mode::Confirming(_)) => &[("[Y]", "Confirm"), ("[N]", "Cancel")],
            (_, Mode::Searching(_)) => &[("[Enter]", "Keep results"), ("[Esc]", "Clear")],
            (Screen::Stock(_), _) => &[
                ("[f]", "Find"),
                ("[l]", "Low stock"),
                ("[+/-]", "Stock in/out"),
                ("[n]", "New"),
                ("[o]", "Location"),
                ("[h/H]", "History"),
                ("[e]", "Events"),
                ("[s]", "Scan"),
                ("[i]", "Import"),
                ("[q]", "Quit"),
            ],
            (Screen::Events(_), _) => &[
                ("[Enter]", "Open"),
                ("[n]", "New"),
                ("[u]", "Edit"),
                ("[d]", "Delete"),
                ("[y]", "Summary"),
                ("[p]", "Programme"),
                ("[a]", "Import programme"),
                ("[Esc]", "Back"),
            ],
            (Screen::EventDetail(_), _) => &[
                ("[a]", "Assign"),
                ("[u]", "Quantity"),
                ("[d]", "Remove"),
                ("[s]", "Sale"),
                ("[i]", "Import pick list"),
                ("[r]", "Report"),
                ("[Esc]", "Back"),
            ],
            (Screen::Scanner(_), _) => &[
                ("[Enter]", "Scan"),
                ("[Tab]", "Batch mode"),
                ("[Esc]", "Back"),
            ],
            (Screen::History(_), _) => &[
                ("[↑↓]", "Scroll"),
                ("[Tab]", "Ledger/Activity"),
                ("[Esc]", "Back"),
            ],
            (Screen::Report(_), _) => &[("[↑↓]", "Scroll"), ("[Esc]", "Back")],
        };

        Line::from(
            hints
                .iter()
                .flat_map(|&(key, action)| key_hint(key, action))
                .collect::<Vec<_>>(),
        )
    }

    fn draw_search_bar(&self, frame: &mut Frame, area: Rect, query: &str) {
        let height = 3u16.min(area.height);
        let popup_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height,
        };
        frame.render_widget(Clear, popup_area);

        let block = Block::default().borders(Borders::ALL).title("Search");
        let paragraph = Paragraph::new(Span::raw(format!("Search: {query}")))
            .block(block.clone())
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, popup_area);

        let inner = block.inner(popup_area);
        let cursor_x = inner.x + "Search: ".len() as u16 + query.chars().count() as u16;
        frame.set_cursor_position((cursor_x, inner.y));
    }

    fn draw_form(&self, frame: &mut Frame, area: Rect, form: &Form) {
        let popup_area = centered_rect(60, 50, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(form.title.clone()).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines: Vec<Line> = (0..form.fields.len()).map(|i| form.build_line(i)).collect();
        lines.push(Line::from(""));
        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "Enter to save • Tab to switch • Esc to cancel",
                Style::default().fg(Color::Gray),
            )));
        }

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);

        if let Some(field) = form.fields.get(form.active) {
            let prefix = field.label.len() as u16 + 2;
            let cursor_x = inner.x + prefix + form.value_len(form.active) as u16;
            let cursor_y = inner.y + form.active as u16;
            frame.set_cursor_position((cursor_x, cursor_y));
        }
    }

    fn draw_confirm(&self, frame: &mut Frame, area: Rect, confirm: &Confirm) {
        let popup_area = centered_rect(50, 25, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title("Confirm").borders(Borders::ALL);
        let lines = vec![
            Line::from(confirm.prompt()),
            Line::from(""),
            Line::from(Span::styled(
                "Y/Enter to confirm • N/Esc to cancel",
                Style::default().fg(Color::Gray),
            )),
        ];
        let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, popup_area);
    }
}

fn require_product(selected: Option<StockLevel>) -> Result<StockLevel> {
    selected.ok_or_else(|| anyhow!("No product selected."))
}
