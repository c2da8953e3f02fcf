use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::barcode;
use crate::models::{Event, NewEvent, NewProduct, StockMove};

/// Input accepted by a form field.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum FieldKind {
    Text,
    Integer,
    Decimal,
    /// `YYYY-MM-DD`
    Date,
}

#[derive(Clone, Debug)]
pub(crate) struct FormField {
    pub(crate) label: &'static str,
    pub(crate) value: String,
    pub(crate) kind: FieldKind,
    pub(crate) required: bool,
}

/// Popup form: a titled stack of labelled fields with one in focus.
#[derive(Clone, Debug)]
pub(crate) struct Form {
    pub(crate) title: String,
    pub(crate) fields: Vec<FormField>,
    pub(crate) active: usize,
    pub(crate) error: Option<String>,
}

impl Form {
    pub(crate) fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
            active: 0,
            error: None,
        }
    }

    fn field(mut self, label: &'static str, kind: FieldKind, required: bool) -> Self {
        self.fields.push(FormField {
            label,
            value: String::new(),
            kind,
            required,
        });
        self
    }

    fn prefilled(mut self, value: impl Into<String>) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.value = value.into();
        }
        self
    }

    pub(crate) fn next_field(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + 1) % self.fields.len();
        }
    }

    pub(crate) fn previous_field(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + self.fields.len() - 1) % self.fields.len();
        }
    }

    /// Append a character to the active field if the field accepts it.
    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        let Some(field) = self.fields.get_mut(self.active) else {
            return false;
        };
        let accepted = match field.kind {
            FieldKind::Text => !ch.is_control(),
            FieldKind::Integer => ch.is_ascii_digit() || (ch == '-' && field.value.is_empty()),
            FieldKind::Decimal => ch.is_ascii_digit() || ch == '.' || ch == ',',
            FieldKind::Date => ch.is_ascii_digit() || ch == '-',
        };
        if accepted {
            field.value.push(ch);
        }
        accepted
    }

    pub(crate) fn backspace(&mut self) {
        if let Some(field) = self.fields.get_mut(self.active) {
            field.value.pop();
        }
    }

    pub(crate) fn value_len(&self, index: usize) -> usize {
        self.fields
            .get(index)
            .map(|field| field.value.chars().count())
            .unwrap_or(0)
    }

    /// Render one field as `Label: value`, highlighting the focused one.
    pub(crate) fn build_line(&self, index: usize) -> Line<'static> {
        let Some(field) = self.fields.get(index) else {
            return Line::from("");
        };
        let is_active = index == self.active;

        let display = match (field.value.is_empty(), field.required) {
            (false, _) => field.value.clone(),
            (true, true) => "<required>".to_string(),
            (true, false) => String::new(),
        };

        let style = if is_active {
            Style::default().fg(Color::Yellow)
        } else if field.value.is_empty() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{}: ", field.label)),
            Span::styled(display, style),
        ])
    }

    fn raw(&self, index: usize) -> Result<Option<&str>> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| anyhow!("form has no field {index}"))?;
        let value = field.value.trim();
        if value.is_empty() {
            if field.required {
                return Err(anyhow!("{} is required.", field.label));
            }
            return Ok(None);
        }
        Ok(Some(value))
    }

    fn text(&self, index: usize) -> Result<Option<String>> {
        Ok(self.raw(index)?.map(str::to_string))
    }

    fn integer(&self, index: usize) -> Result<Option<i64>> {
        let label = self.label(index);
        self.raw(index)?
            .map(|value| {
                value
                    .parse::<i64>()
                    .with_context(|| format!("{label} must be a whole number."))
            })
            .transpose()
    }

    fn decimal(&self, index: usize) -> Result<Option<f64>> {
        let label = self.label(index);
        self.raw(index)?
            .map(|value| {
                value
                    .replace(',', ".")
                    .parse::<f64>()
                    .with_context(|| format!("{label} must be a number."))
            })
            .transpose()
    }

    fn date(&self, index: usize) -> Result<Option<NaiveDate>> {
        let label = self.label(index);
        self.raw(index)?
            .map(|value| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .with_context(|| format!("{label} must look like 2025-04-12."))
            })
            .transpose()
    }

    fn label(&self, index: usize) -> &'static str {
        self.fields.get(index).map(|f| f.label).unwrap_or("Field")
    }
}

/// Quantity plus optional reference and notes for a stock movement.
pub(crate) fn stock_move_form(title: String) -> Form {
    Form::new(title)
        .field("Quantity", FieldKind::Integer, true)
        .field("Reference", FieldKind::Text, false)
        .field("Notes", FieldKind::Text, false)
}

pub(crate) fn parse_stock_move(form: &Form, user: Option<String>) -> Result<(i64, StockMove)> {
    let quantity = form.integer(0)?.unwrap_or_default();
    let movement = StockMove {
        reference: form.text(1)?,
        notes: form.text(2)?,
        user,
    };
    Ok((quantity, movement))
}

pub(crate) fn product_form() -> Form {
    Form::new("New Product")
        .field("Name", FieldKind::Text, true)
        .field("SKU", FieldKind::Text, false)
        .field("EAN/UPC", FieldKind::Text, false)
        .field("Category", FieldKind::Text, false)
        .field("Purchase price", FieldKind::Decimal, false)
        .field("Selling price", FieldKind::Decimal, false)
}

pub(crate) fn parse_product(form: &Form) -> Result<NewProduct> {
    let ean_upc = form.text(2)?.map(|raw| barcode::normalize(&raw));
    if let Some(code) = &ean_upc {
        if !barcode::is_valid(code) {
            return Err(anyhow!("EAN/UPC {code} failed validation."));
        }
    }

    Ok(NewProduct {
        name: form.text(0)?.unwrap_or_default(),
        sku: form.text(1)?,
        ean_upc,
        category: form.text(3)?,
        purchase_price: form.decimal(4)?,
        selling_price: form.decimal(5)?,
        ..NewProduct::default()
    })
}

pub(crate) fn event_form() -> Form {
    Form::new("New Event")
        .field("Name", FieldKind::Text, true)
        .field("Start date", FieldKind::Date, false)
        .field("End date", FieldKind::Date, false)
        .field("Location", FieldKind::Text, false)
        .field("Description", FieldKind::Text, false)
}

pub(crate) fn parse_event(form: &Form) -> Result<NewEvent> {
    let event = NewEvent {
        name: form.text(0)?.unwrap_or_default(),
        start_date: form.date(1)?,
        end_date: form.date(2)?,
        location: form.text(3)?,
        description: form.text(4)?,
    };
    if let (Some(start), Some(end)) = (event.start_date, event.end_date) {
        if end < start {
            return Err(anyhow!("End date is before the start date."));
        }
    }
    Ok(event)
}

pub(crate) fn edit_event_form(event: &Event) -> Form {
    let date = |d: Option<NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    Form::new(format!("Edit {}", event.name))
        .field("Name", FieldKind::Text, true)
        .prefilled(event.name.clone())
        .field("Start date", FieldKind::Date, false)
        .prefilled(date(event.start_date))
        .field("End date", FieldKind::Date, false)
        .prefilled(date(event.end_date))
        .field("Location", FieldKind::Text, false)
        .prefilled(event.location.clone().unwrap_or_default())
        .field("Description", FieldKind::Text, false)
        .prefilled(event.description.clone().unwrap_or_default())
}

pub(crate) fn location_form(product: &str, current: Option<&str>) -> Form {
    Form::new(format!("Location of {product}"))
        .field("Location", FieldKind::Text, false)
        .prefilled(current.unwrap_or_default())
}

/// Empty clears the location.
pub(crate) fn parse_location(form: &Form) -> Result<Option<String>> {
    form.text(0)
}

/// Product picked by SKU or barcode, with quantity and optional price.
pub(crate) fn assign_form(event_name: &str) -> Form {
    Form::new(format!("Assign to {event_name}"))
        .field("SKU or barcode", FieldKind::Text, true)
        .field("Quantity", FieldKind::Integer, true)
        .field("Event price", FieldKind::Decimal, false)
}

pub(crate) fn parse_assignment(form: &Form) -> Result<(String, i64, Option<f64>)> {
    let code = form.text(0)?.unwrap_or_default();
    let quantity = form.integer(1)?.unwrap_or_default();
    Ok((code, quantity, form.decimal(2)?))
}

pub(crate) fn quantity_form(title: String, current: i64) -> Form {
    Form::new(title)
        .field("Quantity", FieldKind::Integer, true)
        .prefilled(current.to_string())
}

pub(crate) fn parse_quantity(form: &Form) -> Result<i64> {
    Ok(form.integer(0)?.unwrap_or_default())
}

pub(crate) fn sale_form(title: String, price: Option<f64>, today: NaiveDate) -> Form {
    let form = Form::new(title)
        .field("Quantity", FieldKind::Integer, true)
        .prefilled("1")
        .field("Unit price", FieldKind::Decimal, false);
    let form = match price {
        Some(price) => form.prefilled(format!("{price:.2}")),
        None => form,
    };
    form.field("Date", FieldKind::Date, true)
        .prefilled(today.format("%Y-%m-%d").to_string())
}

pub(crate) fn parse_sale(form: &Form) -> Result<(i64, Option<f64>, NaiveDate)> {
    let quantity = form.integer(0)?.unwrap_or_default();
    let price = form.decimal(1)?;
    let date = form
        .date(2)?
        .ok_or_else(|| anyhow!("Date is required."))?;
    Ok((quantity, price, date))
}

/// CSV path, plus an optional supplier override for price lists.
pub(crate) fn import_form(title: &str, with_supplier: bool) -> Form {
    let form = Form::new(title).field("CSV file", FieldKind::Text, true);
    if with_supplier {
        form.field("Supplier", FieldKind::Text, false)
    } else {
        form
    }
}

pub(crate) fn parse_import(form: &Form) -> Result<(String, Option<String>)> {
    let path = form.text(0)?.unwrap_or_default();
    let supplier = if form.fields.len() > 1 { form.text(1)? } else { None };
    Ok((path, supplier))
}

pub(crate) fn year_form(title: &str, year: i32) -> Form {
    Form::new(title)
        .field("Year", FieldKind::Integer, true)
        .prefilled(year.to_string())
}

pub(crate) fn parse_year(form: &Form) -> Result<i32> {
    let year = form.integer(0)?.unwrap_or_default();
    i32::try_from(year)
        .ok()
        .filter(|year| (1900..=9999).contains(year))
        .ok_or_else(|| anyhow!("Year must be between 1900 and 9999."))
}

/// Destructive action waiting for a yes/no answer.
#[derive(Clone, Debug)]
pub(crate) enum Confirm {
    DeleteEvent { id: i64, name: String },
    RemoveAssignment {
        event_id: i64,
        product_id: i64,
        product: String,
        quantity: i64,
    },
}

impl Confirm {
    pub(crate) fn prompt(&self) -> String {
        match self {
            Confirm::DeleteEvent { name, .. } => {
                format!("Delete event \"{name}\" and release its reservations?")
            }
            Confirm::RemoveAssignment {
                product, quantity, ..
            } => format!("Remove {product} from the event? {quantity} units go back to stock."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(form: &mut Form, text: &str) {
        for ch in text.chars() {
            form.push_char(ch);
        }
    }

    #[test]
    fn integer_fields_reject_letters() {
        let mut form = stock_move_form("Stock in".into());
        assert!(!form.push_char('x'));
        typed(&mut form, "12");
        form.next_field();
        typed(&mut form, "PO-7");

        let (quantity, movement) = parse_stock_move(&form, Some("anna".into())).unwrap();
        assert_eq!(quantity, 12);
        assert_eq!(movement.reference.as_deref(), Some("PO-7"));
        assert_eq!(movement.notes, None);
        assert_eq!(movement.user.as_deref(), Some("anna"));
    }

    #[test]
    fn required_fields_are_reported_by_label() {
        let form = event_form();
        let err = parse_event(&form).unwrap_err();
        assert_eq!(err.to_string(), "Name is required.");
    }

    #[test]
    fn event_dates_must_be_ordered() {
        let mut form = event_form();
        typed(&mut form, "Expo");
        form.next_field();
        typed(&mut form, "2025-04-12");
        form.next_field();
        typed(&mut form, "2025-04-10");
        assert!(parse_event(&form).is_err());

        form.backspace();
        typed(&mut form, "4");
        let event = parse_event(&form).unwrap();
        assert_eq!(event.end_date, NaiveDate::from_ymd_opt(2025, 4, 14));
    }

    #[test]
    fn product_barcode_is_normalized_and_checked() {
        let mut form = product_form();
        typed(&mut form, "Helmet");
        form.next_field();
        form.next_field();
        typed(&mut form, "590-1234-123457");
        assert_eq!(parse_product(&form).unwrap().ean_upc.as_deref(), Some("5901234123457"));

        form.backspace();
        typed(&mut form, "8");
        assert!(parse_product(&form).is_err());
    }

    #[test]
    fn sale_form_prefills_price_and_date() {
        let today = NaiveDate::from_ymd_opt(2025, 4, 12).unwrap();
        let form = sale_form("Sale".into(), Some(150.0), today);
        let (quantity, price, date) = parse_sale(&form).unwrap();
        assert_eq!(quantity, 1);
        assert_eq!(price, Some(150.0));
        assert_eq!(date, today);
    }

    #[test]
    fn edit_form_round_trips_the_event() {
        let event = Event {
            id: 4,
            name: "Bike Expo".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 4, 12),
            end_date: None,
            location: Some("Verona".into()),
            description: None,
        };
        let parsed = parse_event(&edit_event_form(&event)).unwrap();
        assert_eq!(parsed.name, "Bike Expo");
        assert_eq!(parsed.start_date, event.start_date);
        assert_eq!(parsed.end_date, None);
        assert_eq!(parsed.location.as_deref(), Some("Verona"));
    }

    #[test]
    fn focus_wraps_both_ways() {
        let mut form = assign_form("Expo");
        form.previous_field();
        assert_eq!(form.active, 2);
        form.next_field();
        assert_eq!(form.active, 0);
    }
}
