//! CSV export
//!
//! Each export appends a block to the target file: a timestamp row, a header
//! row, then one row per measurement in ledger order.

use chrono::Local;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::Measurement;

/// Default export file name
pub const DEFAULT_EXPORT_FILE: &str = "balance_data.csv";

/// Column headings of an export block
pub const HEADER: [&str; 5] = ["Sample Name", "Weight", "Units", "Device", "Comments"];

/// Errors writing an export
#[derive(Error, Debug)]
pub enum ExportError {
    /// The ledger is empty
    #[error("No data to export")]
    NoData,

    /// Opening or writing the file failed
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The CSV writer failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Canonical textual weight: three decimal places
pub fn format_weight(weight: f64) -> String {
    format!("{:.3}", weight)
}

/// Append a timestamped block of `rows` to the CSV file at `path`
pub fn append_csv<P: AsRef<Path>>(path: P, rows: &[Measurement]) -> Result<usize, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::NoData);
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);

    let exported = Local::now().format("%Y-%m-%d %H:%M:%S");
    writer.write_record([format!("Exported: {}", exported)])?;
    writer.write_record(HEADER)?;

    for row in rows {
        writer.write_record([
            row.sample_name.as_str(),
            format_weight(row.weight).as_str(),
            row.unit.symbol(),
            row.device_label.as_str(),
            row.comment.as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(rows.len())
}
