use std::path::Path;

use super::Sheet;

/// Rows searched for a supplier name when the file name gives nothing away.
const SUPPLIER_SCAN_ROWS: usize = 10;

/// File-name and cell fragments that identify our regular suppliers.
const KNOWN_SUPPLIERS: &[(&str, &str)] = &[
    ("bolle", "Bollé"),
    ("ffwd", "FFWD"),
    ("bis", "B.I.S. Srl"),
    ("premium", "Premium"),
];

/// Which column feeds which product field, by position in the header row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub ean_upc: Option<usize>,
    pub sku: Option<usize>,
    pub name: Option<usize>,
    pub description: Option<usize>,
    pub purchase_price: Option<usize>,
    pub selling_price: Option<usize>,
    pub status: Option<usize>,
    pub category: Option<usize>,
    pub supplier: Option<usize>,
}

impl ColumnMapping {
    fn slot(&mut self, field: Field) -> &mut Option<usize> {
        match field {
            Field::EanUpc => &mut self.ean_upc,
            Field::Sku => &mut self.sku,
            Field::Name => &mut self.name,
            Field::Description => &mut self.description,
            Field::PurchasePrice => &mut self.purchase_price,
            Field::SellingPrice => &mut self.selling_price,
            Field::Status => &mut self.status,
            Field::Category => &mut self.category,
            Field::Supplier => &mut self.supplier,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    EanUpc,
    Sku,
    Name,
    Description,
    PurchasePrice,
    SellingPrice,
    Status,
    Category,
    Supplier,
}

/// Fields in the order they claim columns, each with its header fragments in
/// priority order.
const FIELD_PATTERNS: &[(Field, &[&str])] = &[
    (Field::EanUpc, &["ean", "upc", "barcode"]),
    (Field::Sku, &["sku", "article", "item", "product code"]),
    (Field::Name, &["name", "model"]),
    (Field::Description, &["description", "desc"]),
    (
        Field::PurchasePrice,
        &["dealer price", "purchase", "cost", "whs", "wholesale"],
    ),
    (Field::SellingPrice, &["retail", "price", "rrp", "selling price"]),
    (Field::Status, &["status"]),
    (Field::Category, &["category", "line", "type"]),
    (Field::Supplier, &["supplier", "vendor", "brand"]),
];

/// Map header cells to product fields by case-insensitive substring match.
/// A column claimed by an earlier field is not offered to later ones, so
/// "Dealer Price" and "Retail Price" land on different fields.
pub fn detect_column_mapping(headers: &[String]) -> ColumnMapping {
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    let mut claimed = vec![false; lowered.len()];
    let mut mapping = ColumnMapping::default();

    for (field, patterns) in FIELD_PATTERNS {
        let found = patterns.iter().find_map(|pattern| {
            lowered
                .iter()
                .enumerate()
                .find(|(index, header)| !claimed[*index] && header.contains(pattern))
                .map(|(index, _)| index)
        });

        if let Some(index) = found {
            claimed[index] = true;
            *mapping.slot(*field) = Some(index);
        }
    }

    mapping
}

/// Name the supplier from known fragments in the file name, then in the first
/// rows of the sheet, else fall back to the file stem.
pub fn guess_supplier(file_name: &str, sheet: Option<&Sheet>) -> String {
    let path = Path::new(file_name);
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if let Some(supplier) = match_known_supplier(&base) {
        return supplier.to_string();
    }

    if let Some(sheet) = sheet {
        let from_cells = sheet
            .rows()
            .iter()
            .take(SUPPLIER_SCAN_ROWS)
            .flatten()
            .find_map(|cell| match_known_supplier(&cell.to_lowercase()));
        if let Some(supplier) = from_cells {
            return supplier.to_string();
        }
    }

    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn match_known_supplier(text: &str) -> Option<&'static str> {
    KNOWN_SUPPLIERS
        .iter()
        .find(|(pattern, _)| text.contains(pattern))
        .map(|(_, supplier)| *supplier)
}

/// Lenient price parsing: currency symbols and spaces are dropped, and when
/// both separators appear the later one is the decimal mark. A lone comma is
/// read as a decimal comma.
pub fn parse_price(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (kept.rfind(','), kept.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (Some(_), None) => kept.replace(',', "."),
        _ => kept,
    };

    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn dealer_and_retail_prices_map_to_separate_fields() {
        let mapping = detect_column_mapping(&headers(&[
            "Article #",
            "EAN Code",
            "Model Name",
            "Description",
            "Dealer Price",
            "Retail Price",
            "Product Line",
            "Brand",
        ]));

        assert_eq!(mapping.sku, Some(0));
        assert_eq!(mapping.ean_upc, Some(1));
        assert_eq!(mapping.name, Some(2));
        assert_eq!(mapping.description, Some(3));
        assert_eq!(mapping.purchase_price, Some(4));
        assert_eq!(mapping.selling_price, Some(5));
        assert_eq!(mapping.category, Some(6));
        assert_eq!(mapping.supplier, Some(7));
        assert_eq!(mapping.status, None);
    }

    #[test]
    fn plain_price_column_is_the_selling_price() {
        let mapping = detect_column_mapping(&headers(&["SKU", "Name", "Price"]));
        assert_eq!(mapping.purchase_price, None);
        assert_eq!(mapping.selling_price, Some(2));
    }

    #[test]
    fn supplier_comes_from_file_name_then_cells_then_stem() {
        assert_eq!(guess_supplier("/tmp/Listino_FFWD_2025.xlsx", None), "FFWD");

        let sheet = Sheet::new(vec![vec!["Premium Bikes Srl"], vec!["SKU"]]);
        assert_eq!(guess_supplier("listino.csv", Some(&sheet)), "Premium");
        assert_eq!(guess_supplier("listino.csv", None), "listino");
    }

    #[test]
    fn prices_parse_leniently() {
        assert_eq!(parse_price("80,00"), Some(80.0));
        assert_eq!(parse_price("€ 150"), Some(150.0));
        assert_eq!(parse_price("1.234,56 €"), Some(1234.56));
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("n/a"), None);
        assert_eq!(parse_price(""), None);
    }
}
