// Tracker configuration
// Loaded from ./pcwatch.toml, or ~/.config/pcwatch/pcwatch.toml

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pcwatch_engine::{LookupTables, SnapshotKey, SnapshotOrder, SourceType, DEFAULT_SHIFT_THRESHOLD_KM};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "pcwatch.toml";
const DEFAULT_DATABASE: &str = "pcwatch.db";

/// One configured input snapshot. Entry order per source is the snapshot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub source: SourceType,
    /// Label used on the command line (e.g. "2024-06").
    pub period: String,
    pub reference_date: NaiveDate,
    /// Extract directory or file, relative to `data_dir` unless absolute.
    pub path: PathBuf,
}

impl SnapshotEntry {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.source, self.reference_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub data_dir: PathBuf,
    /// SQLite file; defaults to `<data_dir>/pcwatch.db`.
    pub database: Option<PathBuf>,
    /// Rules table (TOML). Built-in tables are used when unset.
    pub rules: Option<PathBuf>,
    pub shift_threshold_km: f64,
    /// Rayon pool size; 0 lets rayon decide.
    pub workers: usize,
    /// Merged-lineage order. Defaults to catalog dates in first-seen order.
    pub merge_order: Option<Vec<NaiveDate>>,
    pub snapshots: Vec<SnapshotEntry>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database: None,
            rules: None,
            shift_threshold_km: DEFAULT_SHIFT_THRESHOLD_KM,
            workers: 0,
            merge_order: None,
            snapshots: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl TrackerConfig {
    /// `./pcwatch.toml` if present, otherwise the per-user config file.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pcwatch")
            .join(CONFIG_FILE_NAME)
    }

    /// Load from `path`, or from `default_path()` when `None`.
    ///
    /// An explicit path must exist. A missing default file yields the
    /// built-in defaults. Relative paths inside the file resolve against the
    /// file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path.is_some();
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if !explicit && !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse { path: path.clone(), message },
            other => other,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.with_base_dir(base))
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = toml::from_str(input).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE_NAME),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.shift_threshold_km.is_finite() || self.shift_threshold_km < 0.0 {
            return Err(ConfigError::Validation(format!(
                "shift_threshold_km must be a non-negative number, got {}",
                self.shift_threshold_km
            )));
        }

        let mut keys = BTreeSet::new();
        let mut periods = BTreeSet::new();
        for entry in &self.snapshots {
            if entry.source == SourceType::Merged {
                return Err(ConfigError::Validation(format!(
                    "snapshot '{}': merged snapshots are built by `merge`, not configured",
                    entry.period
                )));
            }
            if entry.period.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{}: snapshot period must not be empty",
                    entry.key()
                )));
            }
            if !keys.insert(entry.key()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate snapshot {}",
                    entry.key()
                )));
            }
            if !periods.insert((entry.source, entry.period.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "duplicate period '{}' for {}",
                    entry.period, entry.source
                )));
            }
        }

        if let Some(order) = &self.merge_order {
            let mut seen = BTreeSet::new();
            for date in order {
                if !seen.insert(date) {
                    return Err(ConfigError::Validation(format!(
                        "merge_order lists {date} more than once"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Resolve relative `data_dir`, `database`, and `rules` against `base`.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| if p.is_relative() { base.join(p) } else { p.to_path_buf() };
        self.data_dir = resolve(self.data_dir.as_path());
        self.database = self.database.as_deref().map(resolve);
        self.rules = self.rules.as_deref().map(resolve);
        self
    }

    // -----------------------------------------------------------------------
    // Derived views
    // -----------------------------------------------------------------------

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_DATABASE))
    }

    pub fn entry_path(&self, entry: &SnapshotEntry) -> PathBuf {
        self.data_dir.join(&entry.path)
    }

    /// Catalog entries matching the optional source and period filters.
    pub fn entries<'a>(
        &'a self,
        source: Option<SourceType>,
        period: Option<&'a str>,
    ) -> impl Iterator<Item = &'a SnapshotEntry> + 'a {
        self.snapshots.iter().filter(move |e| {
            source.map_or(true, |s| e.source == s) && period.map_or(true, |p| e.period == p)
        })
    }

    /// Dates the merged lineage visits, in order.
    pub fn merge_dates(&self) -> Vec<NaiveDate> {
        if let Some(order) = &self.merge_order {
            return order.clone();
        }
        let mut seen = BTreeSet::new();
        self.snapshots
            .iter()
            .map(|e| e.reference_date)
            .filter(|d| seen.insert(*d))
            .collect()
    }

    /// Configured order for every lineage, including `merged`.
    pub fn snapshot_order(&self) -> SnapshotOrder {
        let mut order = SnapshotOrder::from_keys(self.snapshots.iter().map(SnapshotEntry::key));
        for date in self.merge_dates() {
            order.push(SnapshotKey::new(SourceType::Merged, date));
        }
        order
    }

    /// Rules file if configured, otherwise built-in defaults.
    pub fn lookup_tables(&self) -> Result<LookupTables, ConfigError> {
        let Some(path) = &self.rules else {
            return Ok(LookupTables::default());
        };
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        LookupTables::from_toml(&text).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_dir = "extracts"
shift_threshold_km = 2.5
workers = 4

[[snapshots]]
source = "nar"
period = "2022"
reference_date = "2022-01-01"
path = "nar/2022"

[[snapshots]]
source = "geocoder"
period = "2024-02"
reference_date = "2024-02-01"
path = "geocoder/zipcodeset.csv"

[[snapshots]]
source = "nar"
period = "2024-06"
reference_date = "2024-06-01"
path = "nar/2024-06"
"#;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn parses_sample() {
        let config = TrackerConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.shift_threshold_km, 2.5);
        assert_eq!(config.workers, 4);
        assert_eq!(config.snapshots.len(), 3);
        assert_eq!(config.database_path(), PathBuf::from("extracts/pcwatch.db"));
        assert_eq!(
            config.entry_path(&config.snapshots[0]),
            PathBuf::from("extracts/nar/2022")
        );
        let nar: Vec<_> = config.entries(Some(SourceType::Nar), None).map(|e| e.period.as_str()).collect();
        assert_eq!(nar, vec!["2022", "2024-06"]);
        assert_eq!(config.entries(None, Some("2024-02")).count(), 1);
    }

    #[test]
    fn defaults_for_empty_file() {
        let config = TrackerConfig::from_toml("").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert!(config.snapshot_order().is_empty());
    }

    #[test]
    fn order_includes_merged_lineage() {
        let config = TrackerConfig::from_toml(SAMPLE).unwrap();
        let order = config.snapshot_order();
        assert_eq!(
            order.pairs(SourceType::Nar),
            vec![(
                SnapshotKey::new(SourceType::Nar, date(2022, 1)),
                SnapshotKey::new(SourceType::Nar, date(2024, 6))
            )]
        );
        assert_eq!(config.merge_dates(), vec![date(2022, 1), date(2024, 2), date(2024, 6)]);
        assert_eq!(order.keys(SourceType::Merged).len(), 3);
    }

    #[test]
    fn explicit_merge_order() {
        let text = format!("merge_order = [\"2024-06-01\", \"2022-01-01\"]\n{SAMPLE}");
        let config = TrackerConfig::from_toml(&text).unwrap();
        let merged = config.snapshot_order().keys(SourceType::Merged);
        assert_eq!(merged[0].reference_date, date(2024, 6));
        assert_eq!(merged[1].reference_date, date(2022, 1));
    }

    #[test]
    fn rejects_duplicates_and_merged_inputs() {
        let dup_key = format!(
            "{SAMPLE}\n[[snapshots]]\nsource = \"nar\"\nperiod = \"again\"\nreference_date = \"2022-01-01\"\npath = \"x\"\n"
        );
        assert!(matches!(TrackerConfig::from_toml(&dup_key), Err(ConfigError::Validation(_))));

        let dup_period = format!(
            "{SAMPLE}\n[[snapshots]]\nsource = \"nar\"\nperiod = \"2022\"\nreference_date = \"2023-01-01\"\npath = \"x\"\n"
        );
        assert!(matches!(TrackerConfig::from_toml(&dup_period), Err(ConfigError::Validation(_))));

        let merged = "[[snapshots]]\nsource = \"merged\"\nperiod = \"m\"\nreference_date = \"2023-01-01\"\npath = \"x\"\n";
        assert!(matches!(TrackerConfig::from_toml(merged), Err(ConfigError::Validation(_))));

        let unknown = "[[snapshots]]\nsource = \"canada_post\"\nperiod = \"p\"\nreference_date = \"2023-01-01\"\npath = \"x\"\n";
        assert!(matches!(TrackerConfig::from_toml(unknown), Err(ConfigError::Parse { .. })));

        assert!(matches!(
            TrackerConfig::from_toml("shift_threshold_km = -1.0"),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, format!("rules = \"rules.toml\"\n{SAMPLE}")).unwrap();
        fs::write(
            dir.path().join("rules.toml"),
            "[[renames]]\nold = \"Frobisher Bay\"\nnew = \"Iqaluit\"\n",
        )
        .unwrap();

        let config = TrackerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, dir.path().join("extracts"));
        assert_eq!(config.rules, Some(dir.path().join("rules.toml")));

        let tables = config.lookup_tables().unwrap();
        assert_eq!(tables.renames.len(), 1);
        assert!(!tables.abbreviations.is_empty());
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(TrackerConfig::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }
}
