use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{SnapshotKey, SourceType};

/// Externally configured snapshot sequence, one list per source lineage.
///
/// Order is whatever the caller pushed; reference dates are never sorted or
/// inferred here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOrder {
    lineages: BTreeMap<SourceType, Vec<NaiveDate>>,
}

impl SnapshotOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from keys in configured order. A repeated key keeps its first position.
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = SnapshotKey>,
    {
        let mut order = Self::new();
        for key in keys {
            order.push(key);
        }
        order
    }

    /// Append `key` to its lineage. Returns false if it was already listed.
    pub fn push(&mut self, key: SnapshotKey) -> bool {
        let dates = self.lineages.entry(key.source).or_default();
        if dates.contains(&key.reference_date) {
            return false;
        }
        dates.push(key.reference_date);
        true
    }

    pub fn position(&self, key: &SnapshotKey) -> Option<usize> {
        self.lineages
            .get(&key.source)?
            .iter()
            .position(|d| *d == key.reference_date)
    }

    /// True when `after` is the entry directly following `before` in the same lineage.
    pub fn is_adjacent(&self, before: &SnapshotKey, after: &SnapshotKey) -> bool {
        if before.source != after.source {
            return false;
        }
        match (self.position(before), self.position(after)) {
            (Some(b), Some(a)) => a == b + 1,
            _ => false,
        }
    }

    pub fn keys(&self, source: SourceType) -> Vec<SnapshotKey> {
        self.lineages
            .get(&source)
            .map(|dates| dates.iter().map(|d| SnapshotKey::new(source, *d)).collect())
            .unwrap_or_default()
    }

    /// Consecutive (before, after) pairs of one lineage.
    pub fn pairs(&self, source: SourceType) -> Vec<(SnapshotKey, SnapshotKey)> {
        let keys = self.keys(source);
        keys.windows(2).map(|w| (w[0], w[1])).collect()
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceType> + '_ {
        self.lineages.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.values().all(Vec::is_empty)
    }
}
