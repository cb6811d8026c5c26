//! Snapshot and comparison export.
//!
//! JSON carries the full structure. CSV flattens transactions into rows
//! under a fixed header. PDF is a recognized format that cannot be rendered
//! yet and fails with [`SnapshotError::UnsupportedFormat`].

pub mod csv;
pub mod json;

use crate::compare::ComparisonResult;
use crate::error::{Result, SnapshotError};
use crate::types::Snapshot;
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Export format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(SnapshotError::validation(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

/// Something that can be exported.
#[derive(Clone, Copy, Debug)]
pub enum Exportable<'a> {
    Snapshot(&'a Snapshot),
    Comparison(&'a ComparisonResult),
}

impl Exportable<'_> {
    fn name(&self) -> &str {
        match self {
            Exportable::Snapshot(snapshot) => &snapshot.name,
            Exportable::Comparison(comparison) => &comparison.snapshot_name,
        }
    }
}

/// A rendered export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Render `item` in `format`; `date` goes into the filename.
pub fn render(item: Exportable<'_>, format: ExportFormat, date: NaiveDate) -> Result<Export> {
    let bytes = match (format, item) {
        (ExportFormat::Json, Exportable::Snapshot(snapshot)) => json::render(snapshot)?,
        (ExportFormat::Json, Exportable::Comparison(comparison)) => json::render(comparison)?,
        (ExportFormat::Csv, Exportable::Snapshot(snapshot)) => {
            csv::render_transactions(&snapshot.captured_transactions).into_bytes()
        }
        (ExportFormat::Csv, Exportable::Comparison(comparison)) => {
            csv::render_comparison(comparison).into_bytes()
        }
        (ExportFormat::Pdf, _) => {
            return Err(SnapshotError::UnsupportedFormat(format.to_string()));
        }
    };

    let filename = filename(item.name(), format, date);
    debug!(%filename, bytes = bytes.len(), "export rendered");

    Ok(Export {
        filename,
        content_type: format.content_type(),
        bytes,
    })
}

/// `snapshot-<slug>-<YYYY-MM-DD>.<ext>`, or `snapshot-export.<ext>` when the
/// name has nothing to slug.
pub fn filename(name: &str, format: ExportFormat, date: NaiveDate) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        format!("snapshot-export.{}", format.extension())
    } else {
        format!(
            "snapshot-{}-{}.{}",
            slug,
            date.format("%Y-%m-%d"),
            format.extension()
        )
    }
}

/// Lowercase alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
