// SQLite persistence for snapshots, change events, and the summary table

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use pcwatch_engine::{
    CanonicalPostalCodeRecord, ChangeEvent, ChangeType, ChangeValue, CityChangeClassification,
    CitySubtype, GeoPoint, MergedSnapshot, ReduceStats, Snapshot, SnapshotKey, SourceType,
    SummaryRow,
};

use crate::error::SourceError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS data_sources (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_type     TEXT NOT NULL,
    reference_date  TEXT NOT NULL,
    period          TEXT,
    file_path       TEXT,
    processed_at    TEXT,
    row_count       INTEGER,
    unique_pc_count INTEGER,
    rejected_count  INTEGER,
    skipped_count   INTEGER,
    UNIQUE(source_type, reference_date)
);

CREATE TABLE IF NOT EXISTS postal_code_snapshots (
    postal_code     TEXT NOT NULL,
    snapshot_date   TEXT NOT NULL,
    source_type     TEXT NOT NULL,
    province_abbr   TEXT,
    city_name       TEXT,
    latitude        REAL,
    longitude       REAL,
    csd_code        TEXT,
    address_count   INTEGER,
    fsa             TEXT GENERATED ALWAYS AS (SUBSTR(postal_code, 1, 3)) STORED,
    is_rural        INTEGER GENERATED ALWAYS AS (
        CASE WHEN SUBSTR(postal_code, 2, 1) = '0' THEN 1 ELSE 0 END
    ) STORED,
    PRIMARY KEY (postal_code, snapshot_date, source_type)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_fsa ON postal_code_snapshots(fsa);
CREATE INDEX IF NOT EXISTS idx_snapshots_date ON postal_code_snapshots(snapshot_date);

CREATE TABLE IF NOT EXISTS merged_sources (
    postal_code     TEXT NOT NULL,
    snapshot_date   TEXT NOT NULL,
    sources         TEXT NOT NULL,   -- comma-separated source types
    PRIMARY KEY (postal_code, snapshot_date)
);

CREATE TABLE IF NOT EXISTS postal_code_changes (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    postal_code         TEXT NOT NULL,
    change_type         TEXT NOT NULL,
    source_type         TEXT NOT NULL,
    snapshot_before     TEXT NOT NULL,
    snapshot_after      TEXT NOT NULL,
    old_value           TEXT,
    new_value           TEXT,
    province_abbr       TEXT,
    fsa                 TEXT,
    city_change_subtype TEXT,
    city_change_rule    TEXT
);

CREATE INDEX IF NOT EXISTS idx_changes_type ON postal_code_changes(change_type);
CREATE INDEX IF NOT EXISTS idx_changes_source ON postal_code_changes(source_type);

CREATE TABLE IF NOT EXISTS postal_code_summary (
    postal_code     TEXT PRIMARY KEY,
    first_seen      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    is_active       INTEGER,
    province_abbr   TEXT,
    city_name       TEXT,
    latitude        REAL,
    longitude       REAL,
    fsa             TEXT,
    is_rural        INTEGER,
    total_changes   INTEGER DEFAULT 0,
    sources         TEXT
);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Provenance recorded alongside a stored snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMeta {
    pub period: String,
    pub file_path: String,
    pub stats: ReduceStats,
    pub skipped_records: u64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| crate::rows::io_error(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SourceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SourceError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn is_processed(&self, key: &SnapshotKey) -> Result<bool, SourceError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM data_sources
                 WHERE source_type = ?1 AND reference_date = ?2 AND processed_at IS NOT NULL",
                params![key.source.as_str(), format_date(key.reference_date)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Replace the stored rows for `snapshot.key()` and mark it processed.
    pub fn save_snapshot(&mut self, snapshot: &Snapshot, meta: &SourceMeta) -> Result<(), SourceError> {
        let tx = self.conn.transaction()?;
        write_snapshot(&tx, snapshot)?;
        mark_processed(&tx, snapshot.key(), meta)?;
        tx.commit()?;
        log::info!("{}: stored {} postal codes", snapshot.key(), snapshot.len());
        Ok(())
    }

    /// Store a merged snapshot and the sources behind each of its codes.
    pub fn save_merged(&mut self, merged: &MergedSnapshot) -> Result<(), SourceError> {
        let snapshot = merged.snapshot();
        let date = format_date(snapshot.reference_date());
        let tx = self.conn.transaction()?;
        write_snapshot(&tx, snapshot)?;
        tx.execute("DELETE FROM merged_sources WHERE snapshot_date = ?1", params![date])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO merged_sources (postal_code, snapshot_date, sources) VALUES (?1, ?2, ?3)",
            )?;
            for (postal_code, sources) in merged.all_contributors() {
                stmt.execute(params![postal_code, date, join_sources(sources)])?;
            }
        }
        let meta = SourceMeta {
            period: date.clone(),
            stats: ReduceStats {
                unique_postal_codes: snapshot.len() as u64,
                ..ReduceStats::default()
            },
            ..SourceMeta::default()
        };
        mark_processed(&tx, snapshot.key(), &meta)?;
        tx.commit()?;
        log::info!("{}: stored {} merged postal codes", snapshot.key(), snapshot.len());
        Ok(())
    }

    /// `None` only for snapshots never processed.
    pub fn load_snapshot(&self, key: &SnapshotKey) -> Result<Option<Snapshot>, SourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT postal_code, province_abbr, city_name, latitude, longitude, csd_code, address_count
             FROM postal_code_snapshots
             WHERE source_type = ?1 AND snapshot_date = ?2",
        )?;
        let rows = stmt.query_map(
            params![key.source.as_str(), format_date(key.reference_date)],
            |row| {
                let count: i64 = row.get(6)?;
                Ok(CanonicalPostalCodeRecord {
                    postal_code: row.get(0)?,
                    province: row.get(1)?,
                    city_name: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                    csd_code: row.get(5)?,
                    address_count: count.max(0) as u64,
                })
            },
        )?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        // A processed snapshot whose rows were all rejected is still a snapshot
        if records.is_empty() && !self.is_processed(key)? {
            return Ok(None);
        }
        Ok(Some(Snapshot::new(*key, records)))
    }

    /// Keys with stored rows, by source then date.
    pub fn snapshot_keys(&self, source: Option<SourceType>) -> Result<Vec<SnapshotKey>, SourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT source_type, snapshot_date FROM postal_code_snapshots
             ORDER BY source_type, snapshot_date",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut keys = Vec::new();
        for row in rows {
            let (source_text, date_text) = row?;
            let key = SnapshotKey::new(parse_source(&source_text)?, parse_date(&date_text)?);
            if source.map_or(true, |s| s == key.source) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Union of merged contributors per postal code, across every merged date.
    pub fn load_contributors(&self) -> Result<BTreeMap<String, BTreeSet<SourceType>>, SourceError> {
        let mut stmt = self.conn.prepare("SELECT postal_code, sources FROM merged_sources")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out: BTreeMap<String, BTreeSet<SourceType>> = BTreeMap::new();
        for row in rows {
            let (postal_code, sources) = row?;
            let entry = out.entry(postal_code).or_default();
            for s in sources.split(',').filter(|s| !s.is_empty()) {
                entry.insert(parse_source(s)?);
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Changes
    // -----------------------------------------------------------------------

    /// Replace every stored change of one lineage with `events`.
    pub fn replace_changes(&mut self, source: SourceType, events: &[ChangeEvent]) -> Result<(), SourceError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM postal_code_changes WHERE source_type = ?1",
            params![source.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO postal_code_changes
                    (postal_code, change_type, source_type, snapshot_before, snapshot_after,
                     old_value, new_value, province_abbr, fsa, city_change_subtype, city_change_rule)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.postal_code,
                    event.change_type.as_str(),
                    event.source.as_str(),
                    format_date(event.before),
                    format_date(event.after),
                    event.old_value.as_ref().map(value_text),
                    event.new_value.as_ref().map(value_text),
                    event.province,
                    event.fsa,
                    event.classification.as_ref().map(|c| c.subtype.as_str()),
                    event.classification.as_ref().map(|c| c.rule.as_str()),
                ])?;
            }
        }
        tx.commit()?;
        log::info!("{source}: stored {} change events", events.len());
        Ok(())
    }

    /// Stored events in insertion order, optionally for one lineage.
    pub fn load_changes(&self, source: Option<SourceType>) -> Result<Vec<ChangeEvent>, SourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT postal_code, change_type, source_type, snapshot_before, snapshot_after,
                    old_value, new_value, province_abbr, fsa, city_change_subtype, city_change_rule
             FROM postal_code_changes
             WHERE ?1 IS NULL OR source_type = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![source.map(|s| s.as_str())], |row| {
            Ok(StoredChange {
                postal_code: row.get(0)?,
                change_type: row.get(1)?,
                source: row.get(2)?,
                before: row.get(3)?,
                after: row.get(4)?,
                old_value: row.get(5)?,
                new_value: row.get(6)?,
                province: row.get(7)?,
                fsa: row.get(8)?,
                subtype: row.get(9)?,
                rule: row.get(10)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    pub fn replace_summary(&mut self, rows: &[SummaryRow]) -> Result<(), SourceError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM postal_code_summary", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO postal_code_summary
                    (postal_code, first_seen, last_seen, is_active, province_abbr, city_name,
                     latitude, longitude, fsa, is_rural, total_changes, sources)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.postal_code,
                    format_date(row.first_seen),
                    format_date(row.last_seen),
                    row.is_active as i32,
                    row.province,
                    row.city_name,
                    row.latitude,
                    row.longitude,
                    row.fsa,
                    row.is_rural as i32,
                    row.total_changes as i64,
                    join_sources(&row.sources),
                ])?;
            }
        }
        tx.commit()?;
        log::info!("summary: {} postal codes", rows.len());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// Stored postal codes per snapshot date for one source.
    pub fn snapshot_counts(&self, source: SourceType) -> Result<Vec<(NaiveDate, u64)>, SourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_date, COUNT(*) FROM postal_code_snapshots
             WHERE source_type = ?1 GROUP BY snapshot_date ORDER BY snapshot_date",
        )?;
        let rows = stmt.query_map(params![source.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (date, n) = row?;
            out.push((parse_date(&date)?, n as u64));
        }
        Ok(out)
    }

    /// Distinct postal codes across every snapshot of one source.
    pub fn distinct_codes(&self, source: SourceType) -> Result<u64, SourceError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT postal_code) FROM postal_code_snapshots WHERE source_type = ?1",
            params![source.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn change_counts(&self, source: SourceType) -> Result<BTreeMap<ChangeType, u64>, SourceError> {
        let mut stmt = self.conn.prepare(
            "SELECT change_type, COUNT(*) FROM postal_code_changes
             WHERE source_type = ?1 GROUP BY change_type",
        )?;
        let rows = stmt.query_map(params![source.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (change_type, n) = row?;
            out.insert(parse_field::<ChangeType>(&change_type)?, n as u64);
        }
        Ok(out)
    }

    /// (total, active) rows in the summary table.
    pub fn summary_counts(&self) -> Result<(u64, u64), SourceError> {
        let (total, active): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(is_active) FROM postal_code_summary",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, active.unwrap_or(0) as u64))
    }
}

fn write_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<(), SourceError> {
    let key = snapshot.key();
    let date = format_date(key.reference_date);
    conn.execute(
        "DELETE FROM postal_code_snapshots WHERE source_type = ?1 AND snapshot_date = ?2",
        params![key.source.as_str(), date],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO postal_code_snapshots
            (postal_code, snapshot_date, source_type, province_abbr, city_name,
             latitude, longitude, csd_code, address_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for r in snapshot.records() {
        stmt.execute(params![
            r.postal_code,
            date,
            key.source.as_str(),
            r.province,
            r.city_name,
            r.latitude,
            r.longitude,
            r.csd_code,
            r.address_count as i64,
        ])?;
    }
    Ok(())
}

fn mark_processed(conn: &Connection, key: SnapshotKey, meta: &SourceMeta) -> Result<(), SourceError> {
    conn.execute(
        "INSERT INTO data_sources
            (source_type, reference_date, period, file_path, processed_at,
             row_count, unique_pc_count, rejected_count, skipped_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(source_type, reference_date) DO UPDATE SET
            period = excluded.period,
            file_path = excluded.file_path,
            processed_at = excluded.processed_at,
            row_count = excluded.row_count,
            unique_pc_count = excluded.unique_pc_count,
            rejected_count = excluded.rejected_count,
            skipped_count = excluded.skipped_count",
        params![
            key.source.as_str(),
            format_date(key.reference_date),
            meta.period,
            meta.file_path,
            Utc::now().to_rfc3339(),
            meta.stats.rows_read as i64,
            meta.stats.unique_postal_codes as i64,
            meta.stats.rows_rejected as i64,
            meta.skipped_records as i64,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Value encoding
// ---------------------------------------------------------------------------

struct StoredChange {
    postal_code: String,
    change_type: String,
    source: String,
    before: String,
    after: String,
    old_value: Option<String>,
    new_value: Option<String>,
    province: Option<String>,
    fsa: Option<String>,
    subtype: Option<String>,
    rule: Option<String>,
}

impl StoredChange {
    fn into_event(self) -> Result<ChangeEvent, SourceError> {
        let change_type = parse_field::<ChangeType>(&self.change_type)?;
        let value = |text: Option<String>| -> Result<Option<ChangeValue>, SourceError> {
            match text {
                None => Ok(None),
                Some(t) if change_type == ChangeType::LocationShifted => parse_point(&t).map(Some),
                Some(t) => Ok(Some(ChangeValue::Text(t))),
            }
        };
        let classification = match (self.subtype, self.rule) {
            (Some(subtype), rule) => Some(CityChangeClassification {
                subtype: parse_field::<CitySubtype>(&subtype)?,
                rule: rule.unwrap_or_default(),
            }),
            (None, _) => None,
        };
        let fsa = self
            .fsa
            .unwrap_or_else(|| self.postal_code.get(..3).unwrap_or("").to_string());
        Ok(ChangeEvent {
            change_type,
            source: parse_source(&self.source)?,
            before: parse_date(&self.before)?,
            after: parse_date(&self.after)?,
            old_value: value(self.old_value)?,
            new_value: value(self.new_value)?,
            province: self.province,
            fsa,
            classification,
            postal_code: self.postal_code,
        })
    }
}

/// Locations are stored as `lat,lon`; everything else as its text.
fn value_text(value: &ChangeValue) -> String {
    match value {
        ChangeValue::Text(t) => t.clone(),
        ChangeValue::Location(p) => format!("{},{}", p.latitude, p.longitude),
    }
}

fn parse_point(text: &str) -> Result<ChangeValue, SourceError> {
    let bad = || SourceError::Store(format!("invalid stored location '{text}'"));
    let (lat, lon) = text.split_once(',').ok_or_else(bad)?;
    Ok(ChangeValue::Location(GeoPoint {
        latitude: lat.trim().parse().map_err(|_| bad())?,
        longitude: lon.trim().parse().map_err(|_| bad())?,
    }))
}

fn join_sources(sources: &BTreeSet<SourceType>) -> String {
    sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(text: &str) -> Result<NaiveDate, SourceError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| SourceError::Store(format!("invalid stored date '{text}': {e}")))
}

fn parse_source(text: &str) -> Result<SourceType, SourceError> {
    parse_field(text)
}

fn parse_field<T>(text: &str) -> Result<T, SourceError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e| SourceError::Store(format!("invalid stored value '{text}': {e}")))
}
