//! `pcwatch-engine`: postal-code snapshot reduction, diff, and merge.
//!
//! Pure engine crate: receives raw rows or finished snapshots, returns
//! snapshots, change events, and summaries. No file or database I/O.

pub mod classify;
pub mod diff;
pub mod error;
pub mod geo;
pub mod merge;
pub mod model;
pub mod order;
pub mod province;
pub mod reduce;
pub mod summary;
pub mod tables;

pub use classify::CityChangeClassifier;
pub use diff::{DiffReport, Differ, DEFAULT_SHIFT_THRESHOLD_KM};
pub use error::EngineError;
pub use merge::{merge, MergedSnapshot};
pub use model::{
    CanonicalPostalCodeRecord, ChangeEvent, ChangeType, ChangeValue, CityChangeClassification,
    CitySubtype, GeoPoint, RawAddressRow, Snapshot, SnapshotKey, SourceType,
};
pub use order::SnapshotOrder;
pub use province::ProvinceResolver;
pub use reduce::{
    normalize_postal_code, reduce, reduce_sharded, Accumulator, ReduceStats, Reduction, RowOrdinal,
};
pub use summary::{build_summary, SummaryRow};
pub use tables::LookupTables;
