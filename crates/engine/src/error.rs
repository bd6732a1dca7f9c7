use std::fmt;

use crate::model::{SnapshotKey, SourceType};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// TOML parse / deserialization error in a lookup-table file.
    TablesParse(String),
    /// Lookup tables parsed but are inconsistent (bad code, duplicate letter, ...).
    TablesValidation(String),
    /// `after` does not directly follow `before` in the configured order.
    SnapshotOrder { before: SnapshotKey, after: SnapshotKey, reason: String },
    /// A snapshot was diffed against itself.
    SelfDiff(SnapshotKey),
    /// The two snapshots belong to different source lineages.
    LineageMismatch { before: SourceType, after: SourceType },
    /// One side of a diff holds no records.
    EmptySnapshot(SnapshotKey),
    /// Merge inputs do not share the requested reference date.
    MergeDateMismatch { expected: chrono::NaiveDate, found: SnapshotKey },
    /// Merge received two snapshots from one source, or a merged snapshot as input.
    MergeSourceConflict(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TablesParse(msg) => write!(f, "lookup tables parse error: {msg}"),
            Self::TablesValidation(msg) => write!(f, "lookup tables validation error: {msg}"),
            Self::SnapshotOrder { before, after, reason } => {
                write!(f, "snapshots {before} and {after} are not adjacent: {reason}")
            }
            Self::SelfDiff(key) => write!(f, "snapshot {key} cannot be diffed against itself"),
            Self::LineageMismatch { before, after } => {
                write!(f, "cannot diff across source lineages ({before} vs {after})")
            }
            Self::EmptySnapshot(key) => write!(f, "snapshot {key} has no records"),
            Self::MergeDateMismatch { expected, found } => {
                write!(f, "merge for {expected} received snapshot {found}")
            }
            Self::MergeSourceConflict(msg) => write!(f, "merge source conflict: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
