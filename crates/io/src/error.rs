use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum SourceError {
    /// File could not be opened or read.
    Io { path: PathBuf, message: String },
    /// CSV header or writer failure (individual bad records are skipped, not errors).
    Csv(String),
    /// A required column is absent from a file header.
    MissingColumn { path: PathBuf, column: String },
    /// Directory contained no recognizable input files.
    NoInputFiles(PathBuf),
    /// JSON export failure.
    Json(String),
    /// SQLite failure or unreadable stored value.
    Store(String),
    /// Source type has no raw extract to read (e.g. `merged`).
    Unsupported(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "{}: {message}", path.display()),
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::MissingColumn { path, column } => {
                write!(f, "{}: missing column '{column}'", path.display())
            }
            Self::NoInputFiles(dir) => write!(f, "no input files found under {}", dir.display()),
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<rusqlite::Error> for SourceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<csv::Error> for SourceError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
