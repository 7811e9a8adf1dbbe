//! Result persistence: one CSV row per product per run.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::info;

use crate::aggregate::AggregationResult;
use crate::error::PersistenceError;

/// Written at the start of a new file so spreadsheet tools detect UTF-8.
const UTF8_BOM: &str = "\u{feff}";

const MISSING: &str = "NA";

/// One product's outcome for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub date: NaiveDate,
    pub product: String,
    pub result: Option<AggregationResult>,
}

impl OutputRow {
    pub fn median(&self) -> Option<i64> {
        self.result.and_then(|r| r.median)
    }
}

/// Receives the finished batch.
pub trait ResultSink: Send + Sync {
    fn write_rows(&self, rows: &[OutputRow]) -> Result<(), PersistenceError>;
}

/// Appends rows to a CSV file, writing the header when the file is new.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
    extended: bool,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, extended: bool) -> Self {
        Self {
            path: path.into(),
            extended,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["Date", "Product", "PriceJPY"];
        if self.extended {
            header.extend(["Min", "Max", "Count"]);
        }
        header.into_iter().map(String::from).collect()
    }

    fn record(&self, row: &OutputRow) -> Vec<String> {
        let opt = |v: Option<i64>| v.map_or_else(|| MISSING.to_string(), |v| v.to_string());
        let mut record = vec![
            row.date.format("%Y-%m-%d").to_string(),
            row.product.clone(),
            opt(row.median()),
        ];
        if self.extended {
            let result = row.result.unwrap_or_default();
            record.push(opt(result.min));
            record.push(opt(result.max));
            record.push(result.count.to_string());
        }
        record
    }
}

impl ResultSink for CsvSink {
    fn write_rows(&self, rows: &[OutputRow]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let is_new = !self.path.exists();
        let append = || -> io::Result<()> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut w = io::BufWriter::new(file);
            if is_new {
                w.write_all(UTF8_BOM.as_bytes())?;
                write_row(&mut w, &self.header())?;
            }
            for row in rows {
                write_row(&mut w, &self.record(row))?;
            }
            w.flush()
        };
        append().map_err(|e| PersistenceError::io(&self.path, e))?;

        info!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

/// Keeps rows in memory instead of writing a file.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<OutputRow>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<OutputRow> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultSink for MemorySink {
    fn write_rows(&self, rows: &[OutputRow]) -> Result<(), PersistenceError> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(rows);
        Ok(())
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row with CRLF line ending.
fn write_row<W: Write>(w: &mut W, fields: &[String]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(field) {
            write!(w, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            w.write_all(field.as_bytes())?;
        }
    }
    w.write_all(b"\r\n")
}
