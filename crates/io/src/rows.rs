// Lazy CSV → RawAddressRow iteration shared by the source readers

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use pcwatch_engine::RawAddressRow;

use crate::error::SourceError;

const RAW_CHUNK: usize = 64 * 1024;

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, SourceError> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

pub(crate) fn io_error(path: &Path, e: io::Error) -> SourceError {
    SourceError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Streaming Windows-1252 decode
// ---------------------------------------------------------------------------

/// `Read` adapter that transcodes a Windows-1252 byte stream to UTF-8 as it
/// is read, so large register extracts never sit in memory whole.
pub struct Latin1Reader<R> {
    inner: R,
    decoder: encoding_rs::Decoder,
    raw: Vec<u8>,
    raw_pos: usize,
    raw_len: usize,
    out: Vec<u8>,
    out_pos: usize,
    out_len: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> Latin1Reader<R> {
    pub fn new(inner: R) -> Self {
        let decoder = encoding_rs::WINDOWS_1252.new_decoder_without_bom_handling();
        let out_cap = decoder
            .max_utf8_buffer_length(RAW_CHUNK)
            .unwrap_or(RAW_CHUNK * 3 + 16);
        Self {
            inner,
            decoder,
            raw: vec![0; RAW_CHUNK],
            raw_pos: 0,
            raw_len: 0,
            out: vec![0; out_cap],
            out_pos: 0,
            out_len: 0,
            eof: false,
            finished: false,
        }
    }
}

impl<R: Read> Read for Latin1Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.out_len {
                let n = buf.len().min(self.out_len - self.out_pos);
                buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            if self.raw_pos == self.raw_len && !self.eof {
                self.raw_len = self.inner.read(&mut self.raw)?;
                self.raw_pos = 0;
                self.eof = self.raw_len == 0;
            }

            let (_, read, written, _) = self.decoder.decode_to_utf8(
                &self.raw[self.raw_pos..self.raw_len],
                &mut self.out,
                self.eof,
            );
            self.raw_pos += read;
            self.out_pos = 0;
            self.out_len = written;
            if self.eof && self.raw_pos == self.raw_len && written == 0 {
                self.finished = true;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Where each field lives in a record. Missing optional columns yield `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub postal_code: usize,
    /// Tried in order; the first non-empty value wins.
    pub province: Vec<usize>,
    pub city: Option<usize>,
    pub csd: Option<usize>,
    pub latitude: Option<usize>,
    pub longitude: Option<usize>,
}

impl ColumnMap {
    fn row(&self, record: &csv::StringRecord) -> RawAddressRow {
        let text = |i: Option<usize>| {
            i.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |i: Option<usize>| text(i).and_then(|s| s.parse::<f64>().ok());

        RawAddressRow {
            postal_code: record.get(self.postal_code).unwrap_or("").to_string(),
            province: self.province.iter().find_map(|&i| text(Some(i))),
            city_name: text(self.city),
            csd_code: text(self.csd),
            latitude: number(self.latitude),
            longitude: number(self.longitude),
        }
    }
}

/// Locate the first header matching any of `names` after `normalize`.
pub(crate) fn find_column(
    headers: &csv::StringRecord,
    names: &[&str],
    normalize: fn(&str) -> String,
) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| normalize(h) == normalize(n)))
}

pub(crate) fn require_column(
    path: &Path,
    headers: &csv::StringRecord,
    names: &[&str],
    normalize: fn(&str) -> String,
) -> Result<usize, SourceError> {
    find_column(headers, names, normalize).ok_or_else(|| SourceError::MissingColumn {
        path: path.to_path_buf(),
        column: names.join("|"),
    })
}

// ---------------------------------------------------------------------------
// Row iterator
// ---------------------------------------------------------------------------

/// Iterator over one file's rows. Unreadable records are skipped and counted.
pub struct CsvRows<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    columns: ColumnMap,
    skipped: u64,
}

impl<R: Read> CsvRows<R> {
    pub(crate) fn new(reader: csv::Reader<R>, columns: ColumnMap) -> Self {
        Self {
            records: reader.into_records(),
            columns,
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = RawAddressRow;

    fn next(&mut self) -> Option<RawAddressRow> {
        loop {
            match self.records.next()? {
                Ok(record) => return Some(self.columns.row(&record)),
                Err(e) => {
                    self.skipped += 1;
                    log::debug!("skipping unreadable record: {e}");
                }
            }
        }
    }
}

pub type StreamRows = CsvRows<Latin1Reader<File>>;
pub type TextRows = CsvRows<Cursor<Vec<u8>>>;

pub(crate) fn csv_builder(delimiter: u8, has_headers: bool) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_stream_decodes_accents() {
        let bytes: &[u8] = b"Montr\xe9al,L\xe9vis\n";
        let mut out = String::new();
        Latin1Reader::new(bytes).read_to_string(&mut out).unwrap();
        assert_eq!(out, "Montréal,Lévis\n");
    }

    #[test]
    fn latin1_stream_handles_small_reads() {
        let input: Vec<u8> = std::iter::repeat(b"Qu\xe9bec;".as_slice())
            .take(20_000)
            .flatten()
            .copied()
            .collect();
        let mut reader = Latin1Reader::new(input.as_slice());
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Québec;").count(), 20_000);
    }

    #[test]
    fn bad_records_are_counted_not_fatal() {
        let data: &[u8] = b"pc,city\nM5V1J2,Toronto\nK1A0B1,Ott\xffawa\nH2X1Y4,Montreal\n";
        let reader = csv_builder(b',', true).from_reader(Cursor::new(data.to_vec()));
        let columns = ColumnMap {
            postal_code: 0,
            city: Some(1),
            ..Default::default()
        };
        let mut rows = CsvRows::new(reader, columns);
        let got: Vec<_> = rows.by_ref().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].city_name.as_deref(), Some("Montreal"));
        assert_eq!(rows.skipped(), 1);
    }

    #[test]
    fn column_map_trims_and_parses() {
        let record = csv::StringRecord::from(vec!["m5v 1j2", " ", "35", "Toronto ", "43.6", "bad"]);
        let columns = ColumnMap {
            postal_code: 0,
            province: vec![1, 2],
            city: Some(3),
            csd: None,
            latitude: Some(4),
            longitude: Some(5),
        };
        let row = columns.row(&record);
        assert_eq!(row.postal_code, "m5v 1j2");
        assert_eq!(row.province.as_deref(), Some("35"));
        assert_eq!(row.city_name.as_deref(), Some("Toronto"));
        assert_eq!(row.latitude, Some(43.6));
        assert_eq!(row.longitude, None);
    }
}
