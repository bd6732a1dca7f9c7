// Configuration loading

pub mod error;
pub mod tracker;

pub use error::ConfigError;
pub use tracker::{SnapshotEntry, TrackerConfig, CONFIG_FILE_NAME};
