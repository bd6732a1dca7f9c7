// File I/O operations

pub mod error;
pub mod export;
pub mod geocoder;
pub mod geonames;
pub mod load;
pub mod nar;
pub mod rows;
pub mod store;

pub use error::SourceError;
pub use export::{default_file_name, export_changes, write_changes, ExportFormat};
pub use load::{input_files, reduce_files, reduce_source, SourceReduction};
pub use rows::{read_file_as_utf8, CsvRows, Latin1Reader};
pub use store::{SourceMeta, Store};
