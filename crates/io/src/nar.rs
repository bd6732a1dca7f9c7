// National Address Register extracts: one address CSV per province

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::rows::{
    csv_builder, find_column, io_error, require_column, ColumnMap, CsvRows, Latin1Reader, StreamRows,
};

const POSTAL_CODE: &str = "MAIL_POSTAL_CODE";
const PROV_CODE: &str = "PROV_CODE";
const PROV_ABVN: &str = "MAIL_PROV_ABVN";
const MUNICIPALITY: &str = "MAIL_MUN_NAME";
const CSD_NAME: &str = "CSD_ENG_NAME";

fn header_key(s: &str) -> String {
    s.trim().trim_start_matches('\u{feff}').to_ascii_uppercase()
}

/// Address CSVs under an extracted NAR directory, sorted by path.
///
/// Looks in `Addresses/` first; otherwise any `*ddress*.csv` anywhere below `dir`.
pub fn find_address_files(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());

    let mut files = glob_files(&format!("{base}/Addresses/*.csv"))?;
    if files.is_empty() {
        files = glob_files(&format!("{base}/**/*ddress*.csv"))?;
    }
    if files.is_empty() {
        return Err(SourceError::NoInputFiles(dir.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

pub(crate) fn glob_files(pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let paths = glob::glob(pattern).map_err(|e| SourceError::Io {
        path: PathBuf::from(pattern),
        message: e.to_string(),
    })?;
    Ok(paths.filter_map(Result::ok).filter(|p| p.is_file()).collect())
}

/// Open one address CSV as a lazy row stream (Windows-1252 decoded).
pub fn open(path: &Path) -> Result<StreamRows, SourceError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut reader = csv_builder(b',', true).from_reader(Latin1Reader::new(file));
    let headers = reader.headers()?.clone();

    let postal_code = require_column(path, &headers, &[POSTAL_CODE], header_key)?;
    let province: Vec<usize> = [PROV_CODE, PROV_ABVN]
        .iter()
        .filter_map(|name| find_column(&headers, &[*name], header_key))
        .collect();
    if province.is_empty() {
        log::warn!("{}: no province column, falling back to postal-code letter", path.display());
    }

    let columns = ColumnMap {
        postal_code,
        province,
        city: find_column(&headers, &[MUNICIPALITY], header_key),
        csd: find_column(&headers, &[CSD_NAME], header_key),
        latitude: None,
        longitude: None,
    };
    Ok(CsvRows::new(reader, columns))
}
