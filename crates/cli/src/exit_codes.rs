//! CLI Exit Code Registry
//!
//! Single source of truth for `pcwatch` exit codes. Scripts and cron jobs
//! that drive the tracker rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain   | Description                               |
//! |---------|----------|-------------------------------------------|
//! | 0       | Universal| Success                                   |
//! | 1       | Universal| General error (unspecified)               |
//! | 2       | Universal| CLI usage error (bad args)                |
//! | 3-9     | config   | Configuration and rules tables            |
//! | 10-19   | source   | Reading raw extracts                      |
//! | 20-29   | store    | SQLite store                              |
//! | 30-39   | diff     | Snapshot ordering and lineage checks      |
//! | 40-49   | merge    | Multi-source merge                        |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in the matching `*_exit_code` function

use pcwatch_config::ConfigError;
use pcwatch_engine::EngineError;
use pcwatch_io::SourceError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unknown source or period.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (3-9)
// =============================================================================

/// Config or rules file missing or unreadable.
pub const EXIT_CONFIG_READ: u8 = 3;

/// Config or rules file is not valid TOML for its schema.
pub const EXIT_CONFIG_PARSE: u8 = 4;

/// Config parsed but is inconsistent (duplicate snapshots, bad threshold).
pub const EXIT_CONFIG_INVALID: u8 = 5;

// =============================================================================
// Source (10-19)
// =============================================================================

/// No input files found for a configured snapshot.
pub const EXIT_SOURCE_MISSING: u8 = 10;

/// Input file lacks a required column.
pub const EXIT_SOURCE_COLUMN: u8 = 11;

/// Input file could not be read.
pub const EXIT_SOURCE_READ: u8 = 12;

// =============================================================================
// Store (20-29)
// =============================================================================

/// SQLite error, or a stored value that does not parse.
pub const EXIT_STORE: u8 = 20;

/// Export output could not be written.
pub const EXIT_EXPORT: u8 = 21;

// =============================================================================
// Diff (30-39)
// =============================================================================

/// Pair is not adjacent in the configured order, or is a self-diff.
pub const EXIT_DIFF_ORDER: u8 = 30;

/// Pair spans two lineages.
pub const EXIT_DIFF_LINEAGE: u8 = 31;

/// One side of the pair has no records.
pub const EXIT_DIFF_EMPTY: u8 = 32;

// =============================================================================
// Merge (40-49)
// =============================================================================

/// Inputs disagree on the reference date.
pub const EXIT_MERGE_DATE: u8 = 40;

/// Duplicate or already-merged input.
pub const EXIT_MERGE_CONFLICT: u8 = 41;

// =============================================================================
// Error mapping
// =============================================================================

pub fn engine_exit_code(err: &EngineError) -> u8 {
    match err {
        EngineError::TablesParse(_) => EXIT_CONFIG_PARSE,
        EngineError::TablesValidation(_) => EXIT_CONFIG_INVALID,
        EngineError::SnapshotOrder { .. } | EngineError::SelfDiff(_) => EXIT_DIFF_ORDER,
        EngineError::LineageMismatch { .. } => EXIT_DIFF_LINEAGE,
        EngineError::EmptySnapshot(_) => EXIT_DIFF_EMPTY,
        EngineError::MergeDateMismatch { .. } => EXIT_MERGE_DATE,
        EngineError::MergeSourceConflict(_) => EXIT_MERGE_CONFLICT,
    }
}

pub fn source_exit_code(err: &SourceError) -> u8 {
    match err {
        SourceError::NoInputFiles(_) => EXIT_SOURCE_MISSING,
        SourceError::MissingColumn { .. } => EXIT_SOURCE_COLUMN,
        SourceError::Io { .. } | SourceError::Csv(_) => EXIT_SOURCE_READ,
        SourceError::Json(_) => EXIT_EXPORT,
        SourceError::Store(_) => EXIT_STORE,
        SourceError::Unsupported(_) => EXIT_USAGE,
    }
}

pub fn config_exit_code(err: &ConfigError) -> u8 {
    match err {
        ConfigError::Read { .. } => EXIT_CONFIG_READ,
        ConfigError::Parse { .. } => EXIT_CONFIG_PARSE,
        ConfigError::Validation(_) => EXIT_CONFIG_INVALID,
    }
}
