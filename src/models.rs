//! Domain models that mirror the SQLite schema and get passed between the
//! persistence layer, the scanner and the TUI. They stay plain data holders;
//! the rules about how stock may change live in `db::inventory` and
//! `db::reservations`.

use std::fmt;

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
/// A company we buy stock from.
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Fields accepted when creating or updating a supplier.
pub struct NewSupplier {
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// Catalog entry. Products are never hard-deleted; retired lines keep their
/// history and simply carry a different `status`.
pub struct Product {
    pub id: i64,
    pub supplier_id: Option<i64>,
    pub sku: Option<String>,
    /// EAN/UPC barcode, unique across the catalog when present.
    pub ean_upc: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub purchase_price: Option<f64>,
    pub selling_price: Option<f64>,
    pub status: Option<String>,
}

impl Product {
    /// `SKU - Name` when a SKU exists, otherwise just the name.
    pub fn display_name(&self) -> String {
        match self.sku.as_deref().map(str::trim) {
            Some(sku) if !sku.is_empty() => format!("{} - {}", sku, self.name),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Typed product payload used by manual entry and spreadsheet import alike.
/// `None` means "leave as is" on update.
pub struct NewProduct {
    pub supplier_id: Option<i64>,
    pub sku: Option<String>,
    pub ean_upc: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub purchase_price: Option<f64>,
    pub selling_price: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// A product together with its inventory row.
pub struct StockLevel {
    pub product: Product,
    pub supplier_name: Option<String>,
    /// Physical quantity on the shelf.
    pub on_hand: i64,
    /// Portion of `on_hand` committed to events.
    pub reserved: i64,
    pub location: Option<String>,
    pub last_updated: String,
}

impl StockLevel {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Direction of a ledger entry.
pub enum TransactionKind {
    In,
    Out,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::In => "in",
            TransactionKind::Out => "out",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in" => Some(TransactionKind::In),
            "out" => Some(TransactionKind::Out),
            _ => None,
        }
    }

    /// Sign applied to the stored (always positive) quantity.
    pub fn sign(self) -> i64 {
        match self {
            TransactionKind::In => 1,
            TransactionKind::Out => -1,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One immutable ledger line.
pub struct InventoryTransaction {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub kind: TransactionKind,
    pub quantity: i64,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub user: Option<String>,
    pub transaction_date: String,
}

impl InventoryTransaction {
    pub fn signed_quantity(&self) -> i64 {
        self.kind.sign() * self.quantity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Optional metadata attached to a stock movement.
pub struct StockMove {
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub user: Option<String>,
}

impl StockMove {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn by(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Audit line written next to every stock or reservation change.
pub struct ActivityEntry {
    pub id: i64,
    pub activity_type: String,
    pub description: String,
    pub related_id: Option<i64>,
    pub user: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
/// A trade fair, race day or shop event stock gets taken to.
pub struct Event {
    pub id: i64,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_date {
            Some(date) => write!(f, "{} ({})", self.name, date),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEvent {
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// Product assigned to an event, with the stock reserved for it.
pub struct EventProduct {
    pub event_id: i64,
    pub product: Product,
    pub supplier_name: Option<String>,
    pub quantity_assigned: i64,
    /// Event-specific override of the product selling price.
    pub event_sale_price: Option<f64>,
    pub on_hand: i64,
}

impl EventProduct {
    /// Price used at the event: the override, else the catalog price.
    pub fn effective_price(&self) -> Option<f64> {
        self.event_sale_price.or(self.product.selling_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// One line of a bulk assignment request.
pub struct Selection {
    pub product_id: i64,
    pub quantity: i64,
    pub sale_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSale {
    pub id: i64,
    pub event_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub sale_price: f64,
    pub sale_date: NaiveDate,
}

impl EventSale {
    pub fn total(&self) -> f64 {
        self.quantity as f64 * self.sale_price
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// A row of the yearly events programme. Costs and takings are tracked per
/// event; the three unit counters are helmets, glasses and tyres sold.
pub struct AnnualEvent {
    pub id: i64,
    pub period: Option<String>,
    pub agreement: Option<String>,
    pub event_count: Option<i64>,
    /// Free-form date text as typed in the programme; `YYYY-MM-DD` when known.
    pub date: Option<String>,
    pub expo_period: Option<String>,
    pub name: Option<String>,
    pub transport: Option<String>,
    pub discipline: Option<String>,
    pub location: Option<String>,
    pub region: Option<String>,
    pub expo_brand: Option<String>,
    pub staff: Option<String>,
    pub overnight: Option<f64>,
    pub board_lodging: Option<f64>,
    pub train: Option<f64>,
    pub space_misc: Option<f64>,
    pub previous_income: Option<f64>,
    pub helmets: Option<f64>,
    pub glasses: Option<f64>,
    pub tyres: Option<f64>,
    pub budget_income: Option<f64>,
    pub budget_costs: Option<f64>,
    pub km: Option<f64>,
    pub diesel: Option<f64>,
    pub motorway: Option<f64>,
    pub actual_costs: Option<f64>,
    pub income: Option<f64>,
    pub pos: Option<f64>,
    pub cash: Option<f64>,
    pub extra: Option<f64>,
    pub private_agent_sales: Option<f64>,
    pub ffwd: Option<String>,
}
