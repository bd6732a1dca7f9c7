// Command orchestration over the config, rules tables, and store

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

use pcwatch_config::TrackerConfig;
use pcwatch_engine::{
    build_summary, merge, ChangeEvent, DiffReport, Differ, LookupTables, Snapshot, SnapshotKey,
    SourceType,
};
use pcwatch_io::{
    default_file_name, export_changes, reduce_source, write_changes, ExportFormat, SourceMeta, Store,
};

use crate::report;
use crate::CliError;

pub struct Tracker {
    config: TrackerConfig,
    tables: LookupTables,
    store: Store,
}

impl Tracker {
    pub fn open(config: TrackerConfig) -> Result<Self, CliError> {
        let tables = config.lookup_tables().map_err(CliError::config)?;
        let store = Store::open(&config.database_path()).map_err(CliError::source)?;
        Ok(Self { config, tables, store })
    }

    fn differ(&self) -> Differ {
        Differ::new(&self.config.snapshot_order(), &self.tables)
            .with_shift_threshold_km(self.config.shift_threshold_km)
    }

    fn load(&self, key: &SnapshotKey) -> Result<Option<Snapshot>, CliError> {
        self.store.load_snapshot(key).map_err(CliError::source)
    }

    // ------------------------------------------------------------------------
    // process
    // ------------------------------------------------------------------------

    pub fn process(
        &mut self,
        source: Option<SourceType>,
        period: Option<&str>,
        force: bool,
    ) -> Result<(), CliError> {
        if source == Some(SourceType::Merged) {
            return Err(CliError::args("merged snapshots are built by `pcwatch merge`"));
        }
        let entries: Vec<_> = self.config.entries(source, period).cloned().collect();
        if entries.is_empty() {
            return Err(CliError::args("no configured snapshot matches the filters")
                .with_hint("list snapshots under [[snapshots]] in pcwatch.toml"));
        }

        for entry in entries {
            let key = entry.key();
            if !force && self.store.is_processed(&key).map_err(CliError::source)? {
                println!("{} {}: already processed (use --force to redo)", key.source, entry.period);
                continue;
            }

            let path = self.config.entry_path(&entry);
            let out = reduce_source(key, &path, &self.tables).map_err(CliError::source)?;
            let meta = SourceMeta {
                period: entry.period.clone(),
                file_path: path.display().to_string(),
                stats: out.reduction.stats,
                skipped_records: out.skipped_records,
            };
            self.store
                .save_snapshot(&out.reduction.snapshot, &meta)
                .map_err(CliError::source)?;
            println!("{}", report::process_line(&entry.period, &out));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // diff
    // ------------------------------------------------------------------------

    pub fn diff(&mut self, source: Option<SourceType>) -> Result<(), CliError> {
        let lineages = match source {
            Some(s) => vec![s],
            None => SourceType::INPUTS.to_vec(),
        };
        for lineage in lineages {
            let reports = self.diff_lineage(lineage)?;
            for r in &reports {
                println!("{}", report::diff_line(r));
            }
        }
        let n = self.rebuild_summary()?;
        println!("summary: {n} postal codes");
        Ok(())
    }

    /// Diff every configured pair of `source` and replace its stored changes.
    fn diff_lineage(&mut self, source: SourceType) -> Result<Vec<DiffReport>, CliError> {
        let order = self.config.snapshot_order();
        let mut snapshots = Vec::new();
        for key in order.keys(source) {
            match self.load(&key)? {
                Some(s) => snapshots.push(s),
                None => log::warn!("{key}: not in the store"),
            }
        }

        let refs: Vec<&Snapshot> = snapshots.iter().collect();
        let reports = self
            .differ()
            .diff_series(source, &refs)
            .map_err(CliError::engine)?;

        let events: Vec<ChangeEvent> = reports.iter().flat_map(|r| r.events.iter().cloned()).collect();
        self.store
            .replace_changes(source, &events)
            .map_err(CliError::source)?;
        Ok(reports)
    }

    // ------------------------------------------------------------------------
    // merge
    // ------------------------------------------------------------------------

    pub fn merge(&mut self) -> Result<(), CliError> {
        for date in self.config.merge_dates() {
            let mut inputs = Vec::new();
            for source in SourceType::INPUTS {
                if let Some(s) = self.load(&SnapshotKey::new(source, date))? {
                    inputs.push(s);
                }
            }
            if inputs.is_empty() {
                log::warn!("{date}: no stored source snapshots, skipping");
                continue;
            }

            let refs: Vec<&Snapshot> = inputs.iter().collect();
            let merged = merge(date, &refs).map_err(CliError::engine)?;
            self.store.save_merged(&merged).map_err(CliError::source)?;
            println!("{}", report::merge_line(&merged, &refs));
        }

        for r in &self.diff_lineage(SourceType::Merged)? {
            println!("{}", report::diff_line(r));
        }
        let n = self.rebuild_summary()?;
        println!("summary: {n} postal codes");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // summary
    // ------------------------------------------------------------------------

    /// Uses the merged lineage when one is stored, otherwise every lineage.
    pub fn rebuild_summary(&mut self) -> Result<usize, CliError> {
        let mut keys = self.store.snapshot_keys(None).map_err(CliError::source)?;
        let has_merged = keys.iter().any(|k| k.source == SourceType::Merged);
        if has_merged {
            keys.retain(|k| k.source == SourceType::Merged);
        }

        let mut snapshots = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(s) = self.load(key)? {
                snapshots.push(s);
            }
        }
        let events = self
            .store
            .load_changes(has_merged.then_some(SourceType::Merged))
            .map_err(CliError::source)?;
        let contributors = if has_merged {
            self.store.load_contributors().map_err(CliError::source)?
        } else {
            BTreeMap::new()
        };

        let refs: Vec<&Snapshot> = snapshots.iter().collect();
        let rows = build_summary(&refs, &events, &contributors);
        self.store.replace_summary(&rows).map_err(CliError::source)?;
        Ok(rows.len())
    }

    // ------------------------------------------------------------------------
    // stats / export
    // ------------------------------------------------------------------------

    pub fn stats(&self, source: Option<SourceType>) -> Result<(), CliError> {
        let sources = match source {
            Some(s) => vec![s],
            None => vec![
                SourceType::Nar,
                SourceType::Geocoder,
                SourceType::Geonames,
                SourceType::Merged,
            ],
        };
        let stdout = io::stdout();
        let mut out = stdout.lock();
        report::write_stats(&mut out, &self.store, &sources)
    }

    pub fn export(
        &self,
        source: SourceType,
        format: ExportFormat,
        output: Option<PathBuf>,
    ) -> Result<(), CliError> {
        let events = self
            .store
            .load_changes(Some(source))
            .map_err(CliError::source)?;
        if events.is_empty() {
            println!("No changes to export.");
            return Ok(());
        }

        match output {
            Some(path) if path.as_os_str() == "-" => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                write_changes(&events, format, &mut handle).map_err(CliError::source)?;
                handle.flush().map_err(|e| CliError::general(e.to_string()))?;
            }
            output => {
                let path = output.unwrap_or_else(|| PathBuf::from(default_file_name(source, format)));
                let n = export_changes(&events, format, &path).map_err(CliError::source)?;
                println!("Exported {n} changes to {}", path.display());
            }
        }
        Ok(())
    }
}
