//! Streaming CSV row reader for uploaded bank files.
//!
//! Rows are yielded lazily in file order; the file is never held in
//! memory. Header validation is fatal, per-row problems are not: a row
//! with an unparsable date, a non-positive amount, or an empty
//! description is skipped and does not count toward the batch total.

use chrono::NaiveDate;
use csv::StringRecord;
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

const DATE_COLUMN: &str = "transaction_date";
const DESCRIPTION_COLUMN: &str = "description";
const AMOUNT_COLUMN: &str = "amount";
const REFERENCE_COLUMNS: &[&str] = &["reference_number", "reference"];

/// One validated row from the upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub reference_number: Option<String>,
}

struct ColumnIndex {
    date: usize,
    description: usize,
    amount: usize,
    reference: Option<usize>,
}

pub struct CsvTransactionReader {
    records: csv::StringRecordsIntoIter<File>,
    columns: ColumnIndex,
}

impl CsvTransactionReader {
    /// Open the file and validate its header. The header must contain
    /// `transaction_date`, `description` and `amount`
    /// (case-insensitive, trimmed); anything less fails the batch.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| {
            AppError::ParseError(anyhow::anyhow!("Failed to open upload {}: {}", path.display(), e))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| AppError::ParseError(anyhow::anyhow!("Unreadable CSV header: {}", e)))?;

        let columns = Self::index_columns(headers)?;

        Ok(Self {
            records: reader.into_records(),
            columns,
        })
    }

    fn index_columns(headers: &StringRecord) -> Result<ColumnIndex, AppError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let find = |name: &str| normalized.iter().position(|h| h == name);

        let date = find(DATE_COLUMN);
        let description = find(DESCRIPTION_COLUMN);
        let amount = find(AMOUNT_COLUMN);
        let reference = REFERENCE_COLUMNS.iter().find_map(|name| find(name));

        let missing: Vec<&str> = [
            (DATE_COLUMN, date.is_none()),
            (DESCRIPTION_COLUMN, description.is_none()),
            (AMOUNT_COLUMN, amount.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::ParseError(anyhow::anyhow!(
                "CSV is missing required columns: {}",
                missing.join(", ")
            )));
        }

        Ok(ColumnIndex {
            date: date.unwrap_or_default(),
            description: description.unwrap_or_default(),
            amount: amount.unwrap_or_default(),
            reference,
        })
    }

    fn parse_record(&self, record: &StringRecord) -> Option<ParsedRow> {
        let transaction_date = parse_date(record.get(self.columns.date)?)?;
        let amount = parse_amount(record.get(self.columns.amount)?)?;

        let description = record.get(self.columns.description)?.trim();
        if description.is_empty() {
            return None;
        }

        let reference_number = self
            .columns
            .reference
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        Some(ParsedRow {
            transaction_date,
            description: description.to_string(),
            amount,
            reference_number,
        })
    }
}

impl Iterator for CsvTransactionReader {
    type Item = ParsedRow;

    fn next(&mut self) -> Option<ParsedRow> {
        loop {
            let record = match self.records.next()? {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed CSV record");
                    continue;
                }
            };
            if let Some(row) = self.parse_record(&record) {
                return Some(row);
            }
        }
    }
}

/// Accept ISO-8601 (`YYYY-MM-DD`, optionally with a trailing time
/// component) and US `M/D/YYYY`.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

/// Strip `$`, thousands separators and whitespace; reject non-positive
/// or unparsable values; round half-away-from-zero to 2 decimals.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let amount = Decimal::from_str(&cleaned).ok()?;
    if amount <= Decimal::ZERO {
        return None;
    }

    let mut amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    amount.rescale(2);
    Some(amount)
}
