// Change-event export (CSV / JSON)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use pcwatch_engine::{ChangeEvent, ChangeType, CitySubtype, SourceType};

use crate::error::SourceError;
use crate::rows::io_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format: {other} (expected csv or json)")),
        }
    }
}

/// `postal_code_changes_<source>.<ext>`
pub fn default_file_name(source: SourceType, format: ExportFormat) -> String {
    format!("postal_code_changes_{source}.{}", format.extension())
}

/// One flat output row. Locations render as `lat,lon`.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    postal_code: &'a str,
    change_type: ChangeType,
    source_type: SourceType,
    snapshot_before: NaiveDate,
    snapshot_after: NaiveDate,
    old_value: Option<String>,
    new_value: Option<String>,
    province_abbr: Option<&'a str>,
    fsa: &'a str,
    city_change_subtype: Option<CitySubtype>,
    city_change_rule: Option<&'a str>,
}

impl<'a> From<&'a ChangeEvent> for ExportRow<'a> {
    fn from(e: &'a ChangeEvent) -> Self {
        Self {
            postal_code: &e.postal_code,
            change_type: e.change_type,
            source_type: e.source,
            snapshot_before: e.before,
            snapshot_after: e.after,
            old_value: e.old_value.as_ref().map(|v| v.to_string()),
            new_value: e.new_value.as_ref().map(|v| v.to_string()),
            province_abbr: e.province.as_deref(),
            fsa: &e.fsa,
            city_change_subtype: e.classification.as_ref().map(|c| c.subtype),
            city_change_rule: e.classification.as_ref().map(|c| c.rule.as_str()),
        }
    }
}

/// Export order: after date, change type name, postal code.
fn export_order(events: &[ChangeEvent]) -> Vec<&ChangeEvent> {
    let mut ordered: Vec<&ChangeEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        (a.after, a.change_type.as_str(), &a.postal_code)
            .cmp(&(b.after, b.change_type.as_str(), &b.postal_code))
    });
    ordered
}

/// Write `events` to `writer`; returns the number of rows written.
pub fn write_changes<W: Write>(
    events: &[ChangeEvent],
    format: ExportFormat,
    writer: W,
) -> Result<usize, SourceError> {
    let rows: Vec<ExportRow> = export_order(events).into_iter().map(ExportRow::from).collect();
    match format {
        ExportFormat::Csv => {
            let mut out = csv::Writer::from_writer(writer);
            for row in &rows {
                out.serialize(row)?;
            }
            out.flush().map_err(|e| SourceError::Csv(e.to_string()))?;
        }
        ExportFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, &rows)?;
            writeln!(writer).map_err(|e| SourceError::Json(e.to_string()))?;
        }
    }
    Ok(rows.len())
}

pub fn export_changes(
    events: &[ChangeEvent],
    format: ExportFormat,
    path: &Path,
) -> Result<usize, SourceError> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let n = write_changes(events, format, BufWriter::new(file))?;
    log::info!("exported {n} changes to {}", path.display());
    Ok(n)
}
