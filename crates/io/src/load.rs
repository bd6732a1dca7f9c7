// Source extract → reduced snapshot

use std::io::Read;
use std::path::{Path, PathBuf};

use pcwatch_engine::{Accumulator, LookupTables, ProvinceResolver, Reduction, SnapshotKey, SourceType};
use rayon::prelude::*;

use crate::error::SourceError;
use crate::rows::CsvRows;
use crate::{geocoder, geonames, nar};

/// A reduced snapshot plus what was read to build it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReduction {
    pub reduction: Reduction,
    pub files: Vec<PathBuf>,
    pub skipped_records: u64,
}

/// Input files for one source under `path` (a directory, or a file for the
/// single-file sources).
pub fn input_files(source: SourceType, path: &Path) -> Result<Vec<PathBuf>, SourceError> {
    match source {
        SourceType::Nar => nar::find_address_files(path),
        SourceType::Geocoder => Ok(vec![geocoder::find_file(path)?]),
        SourceType::Geonames => Ok(vec![geonames::find_file(path)?]),
        SourceType::Merged => Err(SourceError::Unsupported(
            "merged snapshots are built, not read".into(),
        )),
    }
}

/// Read and reduce one configured snapshot.
pub fn reduce_source(
    key: SnapshotKey,
    path: &Path,
    tables: &LookupTables,
) -> Result<SourceReduction, SourceError> {
    let files = input_files(key.source, path)?;
    match key.source {
        SourceType::Nar => reduce_files(key, files, tables, nar::open),
        SourceType::Geocoder => reduce_files(key, files, tables, geocoder::open),
        SourceType::Geonames => reduce_files(key, files, tables, geonames::open),
        SourceType::Merged => Err(SourceError::Unsupported(format!("cannot read {key}"))),
    }
}

/// Reduce every file as its own shard, in parallel. File `i` orders before
/// file `i + 1` for tie-breaking, so `files` must already be sorted.
pub fn reduce_files<R, F>(
    key: SnapshotKey,
    files: Vec<PathBuf>,
    tables: &LookupTables,
    open: F,
) -> Result<SourceReduction, SourceError>
where
    R: Read,
    F: Fn(&Path) -> Result<CsvRows<R>, SourceError> + Sync,
{
    let resolver = ProvinceResolver::new(&tables.provinces);

    let (accumulator, skipped_records) = files
        .par_iter()
        .enumerate()
        .map(|(i, path)| -> Result<(Accumulator, u64), SourceError> {
            let mut rows = open(path)?;
            let acc = Accumulator::from_rows(i as u32, rows.by_ref(), &resolver);
            log::debug!(
                "{}: {} postal codes, {} unreadable records",
                path.display(),
                acc.len(),
                rows.skipped()
            );
            Ok((acc, rows.skipped()))
        })
        .try_reduce(
            || (Accumulator::new(), 0),
            |(a, skipped_a), (b, skipped_b)| Ok((a.merge(b), skipped_a + skipped_b)),
        )?;

    if skipped_records > 0 {
        log::warn!("{key}: skipped {skipped_records} unreadable records");
    }

    Ok(SourceReduction {
        reduction: accumulator.finish(key),
        files,
        skipped_records,
    })
}
