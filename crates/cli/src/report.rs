// Human-readable command output

use std::io::Write;

use pcwatch_config::TrackerConfig;
use pcwatch_engine::{CityChangeClassifier, DiffReport, MergedSnapshot, Snapshot, SourceType};
use pcwatch_io::{SourceReduction, Store};

use crate::CliError;

pub fn process_line(period: &str, out: &SourceReduction) -> String {
    let stats = &out.reduction.stats;
    format!(
        "{} {period}: {} postal codes from {} rows in {} file(s) ({} rejected, {} unreadable, {} without province)",
        out.reduction.snapshot.source(),
        stats.unique_postal_codes,
        stats.rows_read,
        out.files.len(),
        stats.rows_rejected,
        out.skipped_records,
        stats.unresolved_province,
    )
}

/// `nar 2023-01-01 → 2024-01-01: 4 events (added 1, removed 1, city_changed 2 [accent_normalization 1, substantive 1])`
pub fn diff_line(report: &DiffReport) -> String {
    let counts: Vec<String> = report
        .counts
        .iter()
        .map(|(t, n)| format!("{t} {n}"))
        .collect();
    let mut line = format!(
        "{} {} → {}: {} events",
        report.before.source,
        report.before.reference_date,
        report.after.reference_date,
        report.events.len()
    );
    if !counts.is_empty() {
        line.push_str(&format!(" ({})", counts.join(", ")));
    }
    if !report.city_subtypes.is_empty() {
        let subtypes: Vec<String> = report
            .city_subtypes
            .iter()
            .map(|(s, n)| format!("{s} {n}"))
            .collect();
        line.push_str(&format!(" [{}]", subtypes.join(", ")));
    }
    line
}

pub fn merge_line(merged: &MergedSnapshot, inputs: &[&Snapshot]) -> String {
    let sources: Vec<&str> = inputs.iter().map(|s| s.source().as_str()).collect();
    format!(
        "merged {}: {} postal codes from {}",
        merged.snapshot().reference_date(),
        merged.snapshot().len(),
        sources.join("+")
    )
}

fn io_err(e: std::io::Error) -> CliError {
    CliError::general(e.to_string())
}

pub fn write_stats<W: Write>(out: &mut W, store: &Store, sources: &[SourceType]) -> Result<(), CliError> {
    for &source in sources {
        let snapshots = store.snapshot_counts(source).map_err(CliError::source)?;
        if snapshots.is_empty() {
            continue;
        }
        let codes = store.distinct_codes(source).map_err(CliError::source)?;

        writeln!(out, "\n=== {} ===", source.as_str().to_uppercase()).map_err(io_err)?;
        writeln!(out, "  Snapshots: {}", snapshots.len()).map_err(io_err)?;
        writeln!(out, "  Unique postal codes (across all snapshots): {codes}").map_err(io_err)?;
        for (date, n) in &snapshots {
            writeln!(out, "    {date}: {n} postal codes").map_err(io_err)?;
        }

        let changes = store.change_counts(source).map_err(CliError::source)?;
        if !changes.is_empty() {
            writeln!(out, "  Changes:").map_err(io_err)?;
            let mut by_count: Vec<_> = changes.into_iter().collect();
            by_count.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for (change_type, n) in by_count {
                writeln!(out, "    {change_type}: {n}").map_err(io_err)?;
            }
        }
    }

    let (total, active) = store.summary_counts().map_err(CliError::source)?;
    if total > 0 {
        writeln!(out, "\n=== SUMMARY ===").map_err(io_err)?;
        writeln!(out, "  Total unique postal codes: {total}").map_err(io_err)?;
        writeln!(out, "  Currently active: {active}").map_err(io_err)?;
    }
    Ok(())
}

// ============================================================================
// classify / validate
// ============================================================================

pub fn cmd_classify(config: &TrackerConfig, old: &str, new: &str) -> Result<(), CliError> {
    let tables = config.lookup_tables().map_err(CliError::config)?;
    let c = CityChangeClassifier::new(&tables).classify(old, new);
    println!("{} ({})", c.subtype, c.rule);
    Ok(())
}

pub fn cmd_validate(config: &TrackerConfig) -> Result<(), CliError> {
    let tables = config.lookup_tables().map_err(CliError::config)?;

    let mut missing = 0;
    for entry in &config.snapshots {
        let path = config.entry_path(entry);
        if !path.exists() {
            missing += 1;
            log::warn!("{} {}: {} does not exist", entry.source, entry.period, path.display());
        }
    }

    let order = config.snapshot_order();
    for source in order.sources() {
        println!("{source}: {} snapshots", order.keys(source).len());
    }
    println!(
        "rules: {} ({} boundary, {} renames, {} abbreviations)",
        config
            .rules
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string()),
        tables.boundary.len(),
        tables.renames.len(),
        tables.abbreviations.len(),
    );
    println!("database: {}", config.database_path().display());
    if missing > 0 {
        println!("config OK ({missing} snapshot path(s) not found yet)");
    } else {
        println!("config OK");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pcwatch_engine::{ChangeEvent, ChangeType, SnapshotKey};

    fn key(y: i32) -> SnapshotKey {
        SnapshotKey::new(SourceType::Nar, NaiveDate::from_ymd_opt(y, 1, 1).unwrap())
    }

    fn event(pc: &str, change_type: ChangeType) -> ChangeEvent {
        ChangeEvent {
            postal_code: pc.into(),
            change_type,
            source: SourceType::Nar,
            before: key(2023).reference_date,
            after: key(2024).reference_date,
            old_value: None,
            new_value: None,
            province: None,
            fsa: pc[..3].into(),
            classification: None,
        }
    }

    #[test]
    fn diff_line_lists_counts() {
        let report = DiffReport::new(
            key(2023),
            key(2024),
            vec![event("G0N3M0", ChangeType::Removed), event("G3N1A1", ChangeType::Added)],
        );
        assert_eq!(
            diff_line(&report),
            "nar 2023-01-01 → 2024-01-01: 2 events (added 1, removed 1)"
        );
    }

    #[test]
    fn empty_diff_line() {
        let report = DiffReport::new(key(2023), key(2024), Vec::new());
        assert_eq!(diff_line(&report), "nar 2023-01-01 → 2024-01-01: 0 events");
    }

    #[test]
    fn stats_on_empty_store_print_nothing() {
        let store = Store::open_in_memory().unwrap();
        let mut out = Vec::new();
        write_stats(&mut out, &store, &SourceType::INPUTS).unwrap();
        assert!(out.is_empty());
    }
}
