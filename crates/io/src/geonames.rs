// GeoNames CA_full postal codes: tab-delimited, no header

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::rows::{csv_builder, read_file_as_utf8, ColumnMap, CsvRows, TextRows};

// country, postal code, place, admin1 name, admin1 code, ..., latitude, longitude, accuracy
const POSTAL_CODE: usize = 1;
const PLACE_NAME: usize = 2;
const ADMIN_CODE1: usize = 4;
const LATITUDE: usize = 9;
const LONGITUDE: usize = 10;

const FILE_NAMES: [&str; 3] = ["CA_full.txt", "CA_full.csv", "CA.txt"];

/// The file itself, or the first known GeoNames file name inside a directory.
pub fn find_file(path: &Path) -> Result<PathBuf, SourceError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    FILE_NAMES
        .iter()
        .map(|name| path.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| SourceError::NoInputFiles(path.to_path_buf()))
}

pub fn open(path: &Path) -> Result<TextRows, SourceError> {
    let content = read_file_as_utf8(path)?;
    let reader = csv_builder(b'\t', false)
        .quoting(false)
        .from_reader(Cursor::new(content.into_bytes()));

    let columns = ColumnMap {
        postal_code: POSTAL_CODE,
        province: vec![ADMIN_CODE1],
        city: Some(PLACE_NAME),
        csd: None,
        latitude: Some(LATITUDE),
        longitude: Some(LONGITUDE),
    };
    Ok(CsvRows::new(reader, columns))
}
