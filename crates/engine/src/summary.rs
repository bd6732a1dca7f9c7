use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{CanonicalPostalCodeRecord, ChangeEvent, Snapshot, SourceType};

/// Lifetime view of one postal code across every supplied snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub postal_code: String,
    pub fsa: String,
    pub province: Option<String>,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub is_active: bool,
    pub is_rural: bool,
    pub total_changes: u64,
    pub sources: BTreeSet<SourceType>,
}

/// Among snapshots sharing a date, the merged view wins, then nar.
fn source_rank(source: SourceType) -> u8 {
    match source {
        SourceType::Merged => 3,
        SourceType::Nar => 2,
        SourceType::Geocoder => 1,
        SourceType::Geonames => 0,
    }
}

struct Seen<'a> {
    first: NaiveDate,
    last: NaiveDate,
    latest: &'a CanonicalPostalCodeRecord,
    sources: BTreeSet<SourceType>,
}

/// Build one row per postal code found in `snapshots`, sorted by postal code.
///
/// `contributors` (from merges) replaces the per-code source set when it
/// has an entry for the code.
pub fn build_summary(
    snapshots: &[&Snapshot],
    events: &[ChangeEvent],
    contributors: &BTreeMap<String, BTreeSet<SourceType>>,
) -> Vec<SummaryRow> {
    let mut ordered: Vec<&Snapshot> = snapshots.to_vec();
    ordered.sort_by_key(|s| (s.reference_date(), source_rank(s.source())));

    let Some(newest) = ordered.last().map(|s| s.reference_date()) else {
        return Vec::new();
    };

    let mut seen: BTreeMap<&str, Seen> = BTreeMap::new();
    for snapshot in &ordered {
        let date = snapshot.reference_date();
        for record in snapshot.records() {
            let entry = seen.entry(record.postal_code.as_str()).or_insert_with(|| Seen {
                first: date,
                last: date,
                latest: record,
                sources: BTreeSet::new(),
            });
            entry.last = date;
            entry.latest = record;
            if snapshot.source() != SourceType::Merged {
                entry.sources.insert(snapshot.source());
            }
        }
    }

    let mut changes: HashMap<&str, u64> = HashMap::new();
    for event in events {
        *changes.entry(event.postal_code.as_str()).or_insert(0) += 1;
    }

    seen.into_iter()
        .map(|(postal_code, s)| {
            let record = s.latest;
            SummaryRow {
                postal_code: postal_code.to_string(),
                fsa: record.fsa().to_string(),
                province: record.province.clone(),
                city_name: record.city_name.clone(),
                latitude: record.latitude,
                longitude: record.longitude,
                first_seen: s.first,
                last_seen: s.last,
                is_active: s.last == newest,
                is_rural: postal_code.as_bytes().get(1) == Some(&b'0'),
                total_changes: changes.get(postal_code).copied().unwrap_or(0),
                sources: contributors.get(postal_code).cloned().unwrap_or(s.sources),
            }
        })
        .collect()
}
