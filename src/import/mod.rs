//! Spreadsheet import. Supplier price lists, event pick lists and the yearly
//! events programme arrive as spreadsheets; the front end exports them to CSV
//! and hands us a [`Sheet`]. Headers are only ever used to pick which typed
//! field a cell feeds, never to build SQL.

mod columns;
mod events;
mod products;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

pub use columns::{detect_column_mapping, guess_supplier, parse_price, ColumnMapping};
pub use events::{import_annual_events, import_event_assignments, AssignmentImport};
pub use products::import_products;

/// Rows inspected when looking for the header line.
const HEADER_SCAN_ROWS: usize = 20;
/// A row needs this many keyword cells to count as the header line.
const HEADER_MIN_MATCHES: usize = 3;
const HEADER_KEYWORDS: &[&str] = &[
    "sku",
    "ean",
    "upc",
    "code",
    "article",
    "name",
    "description",
    "price",
    "retail",
    "dealer",
    "product",
];

/// A rectangular-ish grid of trimmed cell text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new<R, C>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|cell| cell.as_ref().trim().to_string()).collect())
            .collect();
        Self { rows }
    }

    /// Parse CSV text. Rows may have differing widths.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.context("failed to read CSV record")?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }
        Ok(Self::new(rows))
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_csv_reader(file)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header cells at `index`, empty when out of range.
    pub fn header(&self, index: usize) -> &[String] {
        self.rows.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Data rows below the header, skipping lines with no text at all.
    pub fn records(&self, header_index: usize) -> impl Iterator<Item = Record<'_>> {
        let header = self.header(header_index);
        self.rows
            .iter()
            .enumerate()
            .skip(header_index + 1)
            .filter(|(_, row)| row.iter().any(|cell| !cell.is_empty()))
            .map(move |(index, cells)| Record {
                line: index + 1,
                header,
                cells: cells.as_slice(),
            })
    }
}

/// One data row with access to cells by header name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// 1-based line in the sheet, for error messages.
    pub line: usize,
    header: &'a [String],
    cells: &'a [String],
}

impl<'a> Record<'a> {
    pub fn cell(&self, column: usize) -> Option<&'a str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|cell| !cell.is_empty())
    }

    /// Cell under the header that equals `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let column = self
            .header
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))?;
        self.cell(column)
    }
}

/// Counters returned by the product importer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Index of the header line: the first of the opening rows with at least
/// three cells mentioning a catalog keyword. Defaults to the first row.
pub fn detect_header_row(sheet: &Sheet) -> usize {
    sheet
        .rows()
        .iter()
        .take(HEADER_SCAN_ROWS)
        .position(|row| {
            let matches = row
                .iter()
                .filter(|cell| {
                    let cell = cell.to_lowercase();
                    HEADER_KEYWORDS.iter().any(|keyword| cell.contains(keyword))
                })
                .count();
            matches >= HEADER_MIN_MATCHES
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_list() -> Sheet {
        Sheet::new(vec![
            vec!["Bollé price list 2025", "", ""],
            vec!["", "", ""],
            vec!["Article", "EAN Code", "Model Name", "Dealer Price", "Retail Price"],
            vec!["B100", "5901234123457", "Helmet X1", "80,00", "€ 150"],
        ])
    }

    #[test]
    fn header_row_is_found_below_the_title() {
        assert_eq!(detect_header_row(&price_list()), 2);
    }

    #[test]
    fn header_row_defaults_to_first_line() {
        let sheet = Sheet::new(vec![vec!["a", "b"], vec!["1", "2"]]);
        assert_eq!(detect_header_row(&sheet), 0);
        assert_eq!(detect_header_row(&Sheet::default()), 0);
    }

    #[test]
    fn records_skip_blank_lines_and_look_up_by_header() {
        let sheet = Sheet::new(vec![
            vec!["SKU", "Quantity"],
            vec!["", ""],
            vec![" B100 ", "3"],
        ]);
        let records: Vec<_> = sheet.records(0).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line, 3);
        assert_eq!(records[0].get("sku"), Some("B100"));
        assert_eq!(records[0].get("Sale Price"), None);
    }

    #[test]
    fn csv_input_is_trimmed_and_ragged_rows_are_kept() {
        let text = "Title\nSKU, Quantity ,Sale Price\nB100,2\n";
        let sheet = Sheet::from_csv_reader(text.as_bytes()).unwrap();
        assert_eq!(sheet.rows().len(), 3);
        assert_eq!(sheet.header(1), ["SKU", "Quantity", "Sale Price"]);
        assert_eq!(sheet.rows()[2], vec!["B100", "2"]);
    }
}
