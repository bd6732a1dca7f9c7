//! Multi-source merge for one reference date.
//!
//! Field priority is fixed:
//! - location: geocoder, then geonames, then nar
//! - city, province: nar, then geocoder, then geonames
//! - CSD, address count: nar when it contributes the code, otherwise the
//!   first contributing source in geocoder, geonames order
//!
//! A code seen by one source only is carried through with that source's values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::EngineError;
use crate::model::{CanonicalPostalCodeRecord, GeoPoint, Snapshot, SnapshotKey, SourceType};

const LOCATION_PRIORITY: [SourceType; 3] =
    [SourceType::Geocoder, SourceType::Geonames, SourceType::Nar];
const ATTRIBUTE_PRIORITY: [SourceType; 3] =
    [SourceType::Nar, SourceType::Geocoder, SourceType::Geonames];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedSnapshot {
    snapshot: Snapshot,
    contributors: BTreeMap<String, BTreeSet<SourceType>>,
}

impl MergedSnapshot {
    /// The merged records as a `merged`-lineage snapshot, ready for the differ.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    pub fn contributors(&self, postal_code: &str) -> Option<&BTreeSet<SourceType>> {
        self.contributors.get(postal_code)
    }

    pub fn all_contributors(&self) -> &BTreeMap<String, BTreeSet<SourceType>> {
        &self.contributors
    }
}

/// Per-code view: one slot per input source, in `ATTRIBUTE_PRIORITY` order.
type Contributions<'a> = BTreeMap<SourceType, &'a CanonicalPostalCodeRecord>;

pub fn merge(date: NaiveDate, inputs: &[&Snapshot]) -> Result<MergedSnapshot, EngineError> {
    let mut seen = BTreeSet::new();
    for snapshot in inputs {
        let key = snapshot.key();
        if key.source == SourceType::Merged {
            return Err(EngineError::MergeSourceConflict(format!(
                "{key} is already a merged snapshot"
            )));
        }
        if key.reference_date != date {
            return Err(EngineError::MergeDateMismatch { expected: date, found: key });
        }
        if !seen.insert(key.source) {
            return Err(EngineError::MergeSourceConflict(format!(
                "more than one {} snapshot for {date}",
                key.source
            )));
        }
    }

    let mut by_code: BTreeMap<&str, Contributions> = BTreeMap::new();
    for snapshot in inputs {
        for record in snapshot.records() {
            by_code
                .entry(record.postal_code.as_str())
                .or_default()
                .insert(snapshot.source(), record);
        }
    }

    let mut records = Vec::with_capacity(by_code.len());
    let mut contributors = BTreeMap::new();
    for (postal_code, sources) in &by_code {
        records.push(merge_record(postal_code, sources));
        contributors.insert(postal_code.to_string(), sources.keys().copied().collect());
    }

    let key = SnapshotKey::new(SourceType::Merged, date);
    log::info!(
        "{key}: merged {} postal codes from {} sources",
        records.len(),
        inputs.len()
    );

    Ok(MergedSnapshot {
        snapshot: Snapshot::new(key, records),
        contributors,
    })
}

fn merge_record(postal_code: &str, sources: &Contributions) -> CanonicalPostalCodeRecord {
    let by_location: Vec<_> = LOCATION_PRIORITY
        .iter()
        .filter_map(|s| sources.get(s).copied())
        .collect();
    let by_attribute: Vec<_> = ATTRIBUTE_PRIORITY
        .iter()
        .filter_map(|s| sources.get(s).copied())
        .collect();

    let location: Option<GeoPoint> = by_location.iter().find_map(|r| r.location());
    let city_name = by_attribute.iter().find_map(|r| r.city_name.clone());
    let province = by_attribute.iter().find_map(|r| r.province.clone());
    // Nar leads ATTRIBUTE_PRIORITY, so this is nar whenever nar has the code
    let primary = by_attribute.first();

    CanonicalPostalCodeRecord {
        postal_code: postal_code.to_string(),
        province,
        city_name,
        latitude: location.map(|p| p.latitude),
        longitude: location.map(|p| p.longitude),
        csd_code: primary.and_then(|r| r.csd_code.clone()),
        address_count: primary.map(|r| r.address_count).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn blank(pc: &str) -> CanonicalPostalCodeRecord {
        CanonicalPostalCodeRecord {
            postal_code: pc.into(),
            province: None,
            city_name: None,
            latitude: None,
            longitude: None,
            csd_code: None,
            address_count: 1,
        }
    }

    fn snap(source: SourceType, records: Vec<CanonicalPostalCodeRecord>) -> Snapshot {
        Snapshot::new(SnapshotKey::new(source, date()), records)
    }

    #[test]
    fn nar_attributes_geocoder_location() {
        let mut nar = blank("M5V1J2");
        nar.csd_code = Some("3520005".into());
        nar.address_count = 42;
        nar.city_name = Some("Toronto".into());
        let mut geo = blank("M5V1J2");
        geo.latitude = Some(43.6426);
        geo.longitude = Some(-79.3871);
        geo.city_name = Some("TORONTO".into());

        let a = snap(SourceType::Nar, vec![nar]);
        let b = snap(SourceType::Geocoder, vec![geo]);
        let merged = merge(date(), &[&a, &b]).unwrap();
        let rec = merged.snapshot().get("M5V1J2").unwrap();
        assert_eq!(rec.latitude, Some(43.6426));
        assert_eq!(rec.longitude, Some(-79.3871));
        assert_eq!(rec.csd_code.as_deref(), Some("3520005"));
        assert_eq!(rec.address_count, 42);
        assert_eq!(rec.city_name.as_deref(), Some("Toronto"));
        assert_eq!(
            merged.contributors("M5V1J2").unwrap().iter().copied().collect::<Vec<_>>(),
            vec![SourceType::Nar, SourceType::Geocoder]
        );
    }

    #[test]
    fn city_falls_back_when_nar_lacks_it() {
        let nar = blank("A1C5M2");
        let mut names = blank("A1C5M2");
        names.city_name = Some("St. John's".into());
        names.province = Some("NL".into());
        let a = snap(SourceType::Nar, vec![nar]);
        let b = snap(SourceType::Geonames, vec![names]);
        let merged = merge(date(), &[&b, &a]).unwrap();
        let rec = merged.snapshot().get("A1C5M2").unwrap();
        assert_eq!(rec.city_name.as_deref(), Some("St. John's"));
        assert_eq!(rec.province.as_deref(), Some("NL"));
        assert_eq!(rec.csd_code, None);
    }

    #[test]
    fn geonames_location_used_when_geocoder_has_none() {
        let geo = blank("E1C4M3");
        let mut names = blank("E1C4M3");
        names.latitude = Some(46.09);
        names.longitude = Some(-64.78);
        let merged = merge(
            date(),
            &[&snap(SourceType::Geocoder, vec![geo]), &snap(SourceType::Geonames, vec![names])],
        )
        .unwrap();
        assert_eq!(merged.snapshot().get("E1C4M3").unwrap().latitude, Some(46.09));
    }

    #[test]
    fn single_source_round_trip() {
        let mut r = blank("V6B1A1");
        r.city_name = Some("Vancouver".into());
        r.province = Some("BC".into());
        r.latitude = Some(49.28);
        r.longitude = Some(-123.11);
        r.address_count = 7;
        let only = snap(SourceType::Geocoder, vec![r, blank("V5K0A1")]);
        let merged = merge(date(), &[&only]).unwrap();
        assert_eq!(merged.snapshot().records(), only.records());
        assert_eq!(merged.snapshot().source(), SourceType::Merged);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut a = blank("M5V1J2");
        a.city_name = Some("Toronto".into());
        let mut b = blank("M5V1J2");
        b.city_name = Some("York".into());
        let nar = snap(SourceType::Nar, vec![a]);
        let geo = snap(SourceType::Geocoder, vec![b, blank("K1A0B1")]);
        assert_eq!(merge(date(), &[&nar, &geo]), merge(date(), &[&geo, &nar]));
    }

    #[test]
    fn rejects_bad_inputs() {
        let nar = snap(SourceType::Nar, vec![blank("M5V1J2")]);
        let other = Snapshot::new(
            SnapshotKey::new(SourceType::Nar, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
            vec![],
        );
        assert!(matches!(
            merge(date(), &[&other]),
            Err(EngineError::MergeDateMismatch { .. })
        ));
        assert!(matches!(
            merge(date(), &[&nar, &nar]),
            Err(EngineError::MergeSourceConflict(_))
        ));
        let merged = snap(SourceType::Merged, vec![]);
        assert!(matches!(
            merge(date(), &[&merged]),
            Err(EngineError::MergeSourceConflict(_))
        ));
    }
}
