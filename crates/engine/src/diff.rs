//! Snapshot differ: two adjacent snapshots of one lineage → typed change events.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::classify::CityChangeClassifier;
use crate::error::EngineError;
use crate::geo::haversine_km;
use crate::model::{
    CanonicalPostalCodeRecord, ChangeEvent, ChangeType, ChangeValue, CitySubtype, Snapshot,
    SnapshotKey, SourceType,
};
use crate::order::SnapshotOrder;
use crate::tables::LookupTables;

pub const DEFAULT_SHIFT_THRESHOLD_KM: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Differ {
    order: SnapshotOrder,
    classifier: CityChangeClassifier,
    shift_threshold_km: f64,
}

impl Differ {
    pub fn new(order: &SnapshotOrder, tables: &LookupTables) -> Self {
        Self {
            order: order.clone(),
            classifier: CityChangeClassifier::new(tables),
            shift_threshold_km: DEFAULT_SHIFT_THRESHOLD_KM,
        }
    }

    /// Shifts strictly greater than `km` are reported.
    pub fn with_shift_threshold_km(mut self, km: f64) -> Self {
        self.shift_threshold_km = km;
        self
    }

    pub fn shift_threshold_km(&self) -> f64 {
        self.shift_threshold_km
    }

    pub fn classifier(&self) -> &CityChangeClassifier {
        &self.classifier
    }

    fn check_pair(&self, before: &Snapshot, after: &Snapshot) -> Result<(), EngineError> {
        let (b, a) = (before.key(), after.key());
        if b == a {
            return Err(EngineError::SelfDiff(b));
        }
        if b.source != a.source {
            return Err(EngineError::LineageMismatch {
                before: b.source,
                after: a.source,
            });
        }
        if !self.order.is_adjacent(&b, &a) {
            let reason = match (self.order.position(&b), self.order.position(&a)) {
                (None, _) => format!("{b} is not in the configured order"),
                (_, None) => format!("{a} is not in the configured order"),
                (Some(pb), Some(pa)) => format!("positions {pb} and {pa}"),
            };
            return Err(EngineError::SnapshotOrder { before: b, after: a, reason });
        }
        if before.is_empty() {
            return Err(EngineError::EmptySnapshot(b));
        }
        if after.is_empty() {
            return Err(EngineError::EmptySnapshot(a));
        }
        Ok(())
    }

    /// Compare two adjacent snapshots. Events come out in postal-code order;
    /// for one code the order is city, CSD, location.
    pub fn diff(&self, before: &Snapshot, after: &Snapshot) -> Result<Vec<ChangeEvent>, EngineError> {
        self.check_pair(before, after)?;

        let pair = PairContext {
            source: before.source(),
            before: before.key(),
            after: after.key(),
        };
        let old = before.records();
        let new = after.records();
        let mut events = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < old.len() || j < new.len() {
            let ord = match (old.get(i), new.get(j)) {
                (Some(o), Some(n)) => o.postal_code.cmp(&n.postal_code),
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };
            match ord {
                Ordering::Less => {
                    events.push(pair.existence(&old[i], ChangeType::Removed));
                    i += 1;
                }
                Ordering::Greater => {
                    events.push(pair.existence(&new[j], ChangeType::Added));
                    j += 1;
                }
                Ordering::Equal => {
                    self.compare_attributes(&pair, &old[i], &new[j], &mut events);
                    i += 1;
                    j += 1;
                }
            }
        }

        Ok(events)
    }

    fn compare_attributes(
        &self,
        pair: &PairContext,
        old: &CanonicalPostalCodeRecord,
        new: &CanonicalPostalCodeRecord,
        events: &mut Vec<ChangeEvent>,
    ) {
        let old_city = old.city_name.as_deref().map(normalize_city);
        let new_city = new.city_name.as_deref().map(normalize_city);
        if old_city != new_city {
            let mut event = pair.event(
                new,
                ChangeType::CityChanged,
                old.city_name.clone().map(ChangeValue::Text),
                new.city_name.clone().map(ChangeValue::Text),
            );
            event.classification = Some(
                self.classifier
                    .classify_optional(old.city_name.as_deref(), new.city_name.as_deref()),
            );
            events.push(event);
        }

        if old.csd_code != new.csd_code {
            events.push(pair.event(
                new,
                ChangeType::CsdChanged,
                old.csd_code.clone().map(ChangeValue::Text),
                new.csd_code.clone().map(ChangeValue::Text),
            ));
        }

        if let (Some(a), Some(b)) = (old.location(), new.location()) {
            if haversine_km(a, b) > self.shift_threshold_km {
                events.push(pair.event(
                    new,
                    ChangeType::LocationShifted,
                    Some(ChangeValue::Location(a)),
                    Some(ChangeValue::Location(b)),
                ));
            }
        }
    }

    /// Diff every consecutive configured pair of one lineage. Pairs whose
    /// snapshots are not in `snapshots` are skipped with a warning.
    pub fn diff_series(
        &self,
        source: SourceType,
        snapshots: &[&Snapshot],
    ) -> Result<Vec<DiffReport>, EngineError> {
        let by_key: BTreeMap<SnapshotKey, &Snapshot> =
            snapshots.iter().map(|s| (s.key(), *s)).collect();

        let mut reports = Vec::new();
        for (b, a) in self.order.pairs(source) {
            let (Some(before), Some(after)) = (by_key.get(&b), by_key.get(&a)) else {
                log::warn!("skipping {b} → {a}: snapshot not available");
                continue;
            };
            let events = self.diff(before, after)?;
            let report = DiffReport::new(b, a, events);
            log::info!("{b} → {a}: {} events", report.events.len());
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Case-insensitive, whitespace-collapsed comparison key.
fn normalize_city(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct PairContext {
    source: SourceType,
    before: SnapshotKey,
    after: SnapshotKey,
}

impl PairContext {
    fn event(
        &self,
        record: &CanonicalPostalCodeRecord,
        change_type: ChangeType,
        old_value: Option<ChangeValue>,
        new_value: Option<ChangeValue>,
    ) -> ChangeEvent {
        ChangeEvent {
            postal_code: record.postal_code.clone(),
            change_type,
            source: self.source,
            before: self.before.reference_date,
            after: self.after.reference_date,
            old_value,
            new_value,
            province: record.province.clone(),
            fsa: record.fsa().to_string(),
            classification: None,
        }
    }

    fn existence(&self, record: &CanonicalPostalCodeRecord, change_type: ChangeType) -> ChangeEvent {
        self.event(record, change_type, None, None)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Events for one snapshot pair plus per-type and per-subtype counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub before: SnapshotKey,
    pub after: SnapshotKey,
    pub events: Vec<ChangeEvent>,
    pub counts: BTreeMap<ChangeType, u64>,
    pub city_subtypes: BTreeMap<CitySubtype, u64>,
}

impl DiffReport {
    pub fn new(before: SnapshotKey, after: SnapshotKey, events: Vec<ChangeEvent>) -> Self {
        let mut counts = BTreeMap::new();
        let mut city_subtypes = BTreeMap::new();
        for event in &events {
            *counts.entry(event.change_type).or_insert(0) += 1;
            if let Some(c) = &event.classification {
                *city_subtypes.entry(c.subtype).or_insert(0) += 1;
            }
        }
        Self {
            before,
            after,
            events,
            counts,
            city_subtypes,
        }
    }

    pub fn count(&self, change_type: ChangeType) -> u64 {
        self.counts.get(&change_type).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
