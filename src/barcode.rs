//! EAN/UPC handling for the hand scanner.
//!
//! Scanners often send stray characters (prefix symbols, whitespace, a
//! trailing newline), so every input is reduced to its digits first. Lengths
//! 8, 12 and 13 carry a mod-10 check digit; 14-digit codes are accepted as-is.
//!
//! The scanner also bounces: the same code may arrive twice within a fraction
//! of a second. [`ScanSession`] remembers the last scan and answers a repeat
//! inside the suppression window from memory instead of hitting the database.

use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::config::DEFAULT_SCAN_TIMEOUT;
use crate::db::find_product_by_barcode;
use crate::error::InventoryResult;
use crate::models::StockLevel;

/// Barcode lengths the scanner accepts.
pub const VALID_LENGTHS: [usize; 4] = [8, 12, 13, 14];

/// Strip everything that is not an ASCII digit.
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Expected check digit for a code of `total_len` digits whose first
/// `total_len - 1` digits are `body`. Returns `None` for lengths without a
/// check digit or when `body` has the wrong size or non-digits.
pub fn check_digit(body: &str, total_len: usize) -> Option<u32> {
    if !matches!(total_len, 8 | 12 | 13) || body.len() + 1 != total_len {
        return None;
    }

    let digits = body
        .chars()
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()?;

    let even: u32 = digits.iter().step_by(2).sum();
    let odd: u32 = digits.iter().skip(1).step_by(2).sum();

    let total = if total_len == 13 {
        odd * 3 + even
    } else {
        even * 3 + odd
    };

    Some((10 - total % 10) % 10)
}

/// Validate an already-normalized code.
pub fn is_valid(code: &str) -> bool {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if !VALID_LENGTHS.contains(&code.len()) {
        return false;
    }
    if code.len() == 14 {
        return true;
    }

    let (body, last) = code.split_at(code.len() - 1);
    match (check_digit(body, code.len()), last.chars().next().and_then(|c| c.to_digit(10))) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Normalize then validate raw scanner input.
pub fn validate(raw: &str) -> bool {
    is_valid(&normalize(raw))
}

/// What the scanner session remembers about the previous scan.
#[derive(Debug, Clone)]
pub struct LastScan {
    pub barcode: String,
    pub scanned_at: Instant,
    pub product: Option<StockLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Input did not reduce to a valid EAN/UPC; carries the normalized text.
    Invalid(String),
    Found(StockLevel),
    /// Valid code with no catalog entry; carries the normalized code.
    NotFound(String),
    /// Same code scanned again within the window; carries the cached result
    /// of the first scan.
    Duplicate(Option<StockLevel>),
}

/// Caller-owned scanner state. One per scanning station.
#[derive(Debug, Clone)]
pub struct ScanSession {
    timeout: Duration,
    last: Option<LastScan>,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_TIMEOUT)
    }
}

impl ScanSession {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last(&self) -> Option<&LastScan> {
        self.last.as_ref()
    }

    /// Forget the previous scan so the next one always hits the catalog.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn scan(&mut self, conn: &Connection, raw: &str) -> InventoryResult<ScanOutcome> {
        self.scan_at(conn, raw, Instant::now())
    }

    /// Scan with an explicit clock reading.
    pub fn scan_at(&mut self, conn: &Connection, raw: &str, now: Instant) -> InventoryResult<ScanOutcome> {
        let barcode = normalize(raw);
        if !is_valid(&barcode) {
            tracing::debug!(raw, "rejected invalid barcode");
            return Ok(ScanOutcome::Invalid(barcode));
        }

        if let Some(last) = &self.last {
            if last.barcode == barcode && now.saturating_duration_since(last.scanned_at) < self.timeout {
                tracing::debug!(%barcode, "suppressed duplicate scan");
                return Ok(ScanOutcome::Duplicate(last.product.clone()));
            }
        }

        let product = find_product_by_barcode(conn, &barcode)?;
        self.last = Some(LastScan {
            barcode: barcode.clone(),
            scanned_at: now,
            product: product.clone(),
        });

        Ok(match product {
            Some(stock) => ScanOutcome::Found(stock),
            None => ScanOutcome::NotFound(barcode),
        })
    }
}

/// Tallies for a batch of scans. Every input lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchScanReport {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub invalid: usize,
    pub products: Vec<StockLevel>,
}

/// Look up a list of raw barcodes. Never fails: a lookup error is logged and
/// counted as not found.
pub fn process_batch_scan<S: AsRef<str>>(conn: &Connection, barcodes: &[S]) -> BatchScanReport {
    let mut report = BatchScanReport {
        total: barcodes.len(),
        ..BatchScanReport::default()
    };

    for raw in barcodes {
        let barcode = normalize(raw.as_ref());
        if !is_valid(&barcode) {
            report.invalid += 1;
            continue;
        }

        match find_product_by_barcode(conn, &barcode) {
            Ok(Some(stock)) => {
                report.found += 1;
                report.products.push(stock);
            }
            Ok(None) => report.not_found += 1,
            Err(err) => {
                tracing::warn!(%barcode, error = %err, "barcode lookup failed during batch scan");
                report.not_found += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_product, open_in_memory};
    use crate::models::NewProduct;
    use proptest::prelude::*;

    fn catalog() -> Connection {
        let mut conn = open_in_memory().unwrap();
        create_product(
            &mut conn,
            &NewProduct {
                ean_upc: Some("5901234123457".into()),
                name: "Helmet X1".into(),
                ..NewProduct::default()
            },
        )
        .unwrap();
        conn
    }

    #[test]
    fn known_ean13_validates() {
        assert!(validate("5901234123457"));
        assert!(validate(" 590-1234-12345-7\n"));
    }

    #[test]
    fn wrong_check_digit_is_rejected() {
        for last in (0..10).filter(|d| *d != 7) {
            assert!(!validate(&format!("590123412345{last}")), "digit {last}");
        }
    }

    #[test]
    fn lengths_outside_the_allowed_set_are_rejected() {
        assert!(!validate("123456"));
        assert!(!validate("ABC123456789"));
        assert!(!validate(""));
        assert!(!validate("1234567890123456"));
    }

    #[test]
    fn upc_a_and_ean8_weights() {
        assert!(validate("036000291452"));
        assert!(validate("12345670"));
        assert!(!validate("12345678"));
        assert!(validate("96385074"));
    }

    #[test]
    fn fourteen_digit_codes_skip_the_checksum() {
        assert!(validate("12345678901234"));
    }

    #[test]
    fn check_digit_requires_matching_body_length() {
        assert_eq!(check_digit("590123412345", 13), Some(7));
        assert_eq!(check_digit("59012341234", 13), None);
        assert_eq!(check_digit("1234567890123", 14), None);
    }

    #[test]
    fn duplicate_scan_inside_window_is_served_from_session() {
        let conn = catalog();
        let mut session = ScanSession::new(Duration::from_secs(2));
        let start = Instant::now();

        let first = session.scan_at(&conn, "5901234123457", start).unwrap();
        let ScanOutcome::Found(stock) = first else {
            panic!("expected a catalog hit, got {first:?}");
        };

        let second = session
            .scan_at(&conn, "5901234123457", start + Duration::from_millis(500))
            .unwrap();
        assert_eq!(second, ScanOutcome::Duplicate(Some(stock.clone())));

        let third = session
            .scan_at(&conn, "5901234123457", start + Duration::from_secs(3))
            .unwrap();
        assert_eq!(third, ScanOutcome::Found(stock));
    }

    #[test]
    fn duplicate_window_tracks_the_latest_lookup() {
        let conn = catalog();
        let mut session = ScanSession::default();
        let start = Instant::now();

        session.scan_at(&conn, "96385074", start).unwrap();
        let other = session
            .scan_at(&conn, "5901234123457", start + Duration::from_millis(100))
            .unwrap();
        assert!(matches!(other, ScanOutcome::Found(_)));
        assert_eq!(session.last().unwrap().barcode, "5901234123457");

        let miss = session
            .scan_at(&conn, "96385074", start + Duration::from_millis(200))
            .unwrap();
        assert_eq!(miss, ScanOutcome::NotFound("96385074".into()));
    }

    #[test]
    fn invalid_scan_does_not_touch_the_session() {
        let conn = catalog();
        let mut session = ScanSession::default();
        let outcome = session.scan(&conn, "123456").unwrap();
        assert_eq!(outcome, ScanOutcome::Invalid("123456".into()));
        assert!(session.last().is_none());
    }

    #[test]
    fn batch_scan_tallies_every_input() {
        let conn = catalog();

        // 12345678 fails its EAN-8 check digit (expected 0), so it joins the
        // two malformed inputs in the invalid bucket.
        let report = process_batch_scan(&conn, &["5901234123457", "12345678", "123456", "ABC123456789"]);
        assert_eq!(report.total, 4);
        assert_eq!(report.found, 1);
        assert_eq!(report.not_found, 0);
        assert_eq!(report.invalid, 3);

        let report = process_batch_scan(&conn, &["5901234123457", "12345670", "123456", "ABC123456789"]);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.found, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.products[0].product.name, "Helmet X1");
        assert_eq!(report.found + report.not_found + report.invalid, report.total);
    }

    proptest! {
        /// Property: appending the computed check digit always yields a
        /// valid EAN-13, and changing any single digit breaks it.
        #[test]
        fn ean13_round_trip(body in "[0-9]{12}", position in 0usize..13, bump in 1u32..10) {
            let check = check_digit(&body, 13).unwrap();
            let code = format!("{body}{check}");
            prop_assert!(is_valid(&code));

            let mut digits: Vec<u32> = code.chars().map(|c| c.to_digit(10).unwrap()).collect();
            digits[position] = (digits[position] + bump) % 10;
            let flipped: String = digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();
            prop_assert!(!is_valid(&flipped));
        }
    }
}
