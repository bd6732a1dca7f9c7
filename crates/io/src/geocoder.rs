// Geocoder.ca postal-code CSV (UTF-8, header row, column names vary)

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::nar::glob_files;
use crate::rows::{
    csv_builder, find_column, read_file_as_utf8, require_column, ColumnMap, CsvRows, TextRows,
};

/// Lowercase with spaces removed, so "Postal Code" and "postalcode" match.
fn header_key(s: &str) -> String {
    s.trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace(' ', "")
}

/// The file itself, or the last `*.csv` (by name) in a directory.
pub fn find_file(path: &Path) -> Result<PathBuf, SourceError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let base = glob::Pattern::escape(&path.to_string_lossy());
    let mut files = glob_files(&format!("{base}/*.csv"))?;
    files.sort();
    files.pop().ok_or_else(|| SourceError::NoInputFiles(path.to_path_buf()))
}

pub fn open(path: &Path) -> Result<TextRows, SourceError> {
    let content = read_file_as_utf8(path)?;
    let mut reader = csv_builder(b',', true).from_reader(Cursor::new(content.into_bytes()));
    let headers = reader.headers()?.clone();

    let columns = ColumnMap {
        postal_code: require_column(
            path,
            &headers,
            &["postcode", "postalcode", "postal_code"],
            header_key,
        )?,
        latitude: Some(require_column(path, &headers, &["latitude"], header_key)?),
        longitude: Some(require_column(path, &headers, &["longitude"], header_key)?),
        city: find_column(&headers, &["city"], header_key),
        province: find_column(&headers, &["province"], header_key)
            .into_iter()
            .collect(),
        csd: None,
    };
    Ok(CsvRows::new(reader, columns))
}
