use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use pcwatch_engine::*;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn rules() -> LookupTables {
    let text = std::fs::read_to_string(fixtures_dir().join("rules.toml")).unwrap();
    LookupTables::from_toml(&text).unwrap()
}

fn date(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn record(pc: &str, city: &str) -> CanonicalPostalCodeRecord {
    CanonicalPostalCodeRecord {
        postal_code: pc.into(),
        province: Some("QC".into()),
        city_name: Some(city.into()),
        latitude: None,
        longitude: None,
        csd_code: None,
        address_count: 1,
    }
}

fn raw(pc: &str, prov: &str, city: &str) -> RawAddressRow {
    RawAddressRow {
        postal_code: pc.into(),
        province: Some(prov.into()),
        city_name: Some(city.into()),
        ..Default::default()
    }
}

// -------------------------------------------------------------------------
// Reduction
// -------------------------------------------------------------------------

#[test]
fn scenario_case_variants_collapse() {
    let rows = vec![
        raw("M5V1J2", "35", "Toronto"),
        raw("M5V1J2", "35", "Toronto"),
        raw("m5v 1j2", "35", "toronto"),
    ];
    let out = reduce(SnapshotKey::new(SourceType::Nar, date(2024, 6)), rows, &rules());

    assert_eq!(out.snapshot.len(), 1);
    let rec = &out.snapshot.records()[0];
    assert_eq!(rec.postal_code, "M5V1J2");
    assert_eq!(rec.address_count, 3);
    assert_eq!(rec.city_name.as_deref(), Some("Toronto"));
    assert_eq!(rec.province.as_deref(), Some("ON"));
}

// -------------------------------------------------------------------------
// Diff
// -------------------------------------------------------------------------

#[test]
fn scenario_rural_code_split_into_urban_codes() {
    let before_key = SnapshotKey::new(SourceType::Nar, date(2022, 1));
    let after_key = SnapshotKey::new(SourceType::Nar, date(2023, 1));

    let before = Snapshot::new(before_key, vec![record("G0N3M0", "Saint-Joseph-de-Beauce")]);
    let mut new_codes = Vec::new();
    for d in 1..=9 {
        for l in ['A', 'M', 'Z'] {
            new_codes.push(format!("G3N{d}{l}{d}"));
        }
    }
    let after = Snapshot::new(
        after_key,
        new_codes.iter().map(|pc| record(pc, "Saint-Joseph-de-Beauce")).collect(),
    );

    let order = SnapshotOrder::from_keys([before_key, after_key]);
    let events = Differ::new(&order, &rules()).diff(&before, &after).unwrap();

    let removed: Vec<_> = events
        .iter()
        .filter(|e| e.change_type == ChangeType::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].postal_code, "G0N3M0");

    let added: BTreeSet<_> = events
        .iter()
        .filter(|e| e.change_type == ChangeType::Added)
        .map(|e| e.postal_code.clone())
        .collect();
    assert_eq!(added, new_codes.into_iter().collect());
    assert_eq!(events.len(), 1 + added.len());
    assert!(!events
        .iter()
        .any(|e| e.postal_code == "G0N3M0" && e.change_type == ChangeType::CityChanged));
}

#[test]
fn scenario_location_shift_threshold() {
    let k1 = SnapshotKey::new(SourceType::Geocoder, date(2023, 1));
    let k2 = SnapshotKey::new(SourceType::Geocoder, date(2024, 1));
    let at = |pc: &str, lat: f64, lon: f64| {
        let mut r = record(pc, "Toronto");
        r.latitude = Some(lat);
        r.longitude = Some(lon);
        r
    };

    let before = Snapshot::new(
        k1,
        vec![at("M5H2N2", 43.6532, -79.3832), at("M5V1J2", 43.6426, -79.3871)],
    );
    let after = Snapshot::new(
        k2,
        // ~5.9 km north-west, and ~0.3 km east
        vec![at("M5H2N2", 43.7001, -79.4163), at("M5V1J2", 43.6426, -79.3834)],
    );

    let order = SnapshotOrder::from_keys([k1, k2]);
    let events = Differ::new(&order, &rules()).diff(&before, &after).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].postal_code, "M5H2N2");
    assert_eq!(events[0].change_type, ChangeType::LocationShifted);
    assert_eq!(
        events[0].old_value,
        Some(ChangeValue::Location(GeoPoint { latitude: 43.6532, longitude: -79.3832 }))
    );
}

// -------------------------------------------------------------------------
// Classification
// -------------------------------------------------------------------------

#[test]
fn scenario_classifier_examples() {
    let classifier = CityChangeClassifier::new(&rules());
    let cases = [
        ("Montreal", "Montréal", CitySubtype::AccentNormalization),
        ("St. John's", "St John's", CitySubtype::Punctuation),
        ("Ste-Foy", "Ste Foy", CitySubtype::Spacing),
        ("St-Lazare", "Saint-Lazare", CitySubtype::Abbreviation),
        ("Hull", "Gatineau", CitySubtype::Boundary),
        ("Toronto", "Etobicoke", CitySubtype::Boundary),
        ("Frobisher Bay", "Iqaluit", CitySubtype::Rename),
        ("QuÃ©bec", "Québec", CitySubtype::Encoding),
        ("Laval", "Longueuil", CitySubtype::Substantive),
    ];
    for (old, new, expected) in cases {
        assert_eq!(classifier.classify(old, new).subtype, expected, "{old} → {new}");
    }
}

#[test]
fn city_change_events_carry_classification() {
    let k1 = SnapshotKey::new(SourceType::Nar, date(2001, 1));
    let k2 = SnapshotKey::new(SourceType::Nar, date(2003, 1));
    let before = Snapshot::new(k1, vec![record("J8X1A1", "Hull"), record("J8Y2B2", "Hull")]);
    let after = Snapshot::new(k2, vec![record("J8X1A1", "Gatineau"), record("J8Y2B2", "HULL")]);
    let order = SnapshotOrder::from_keys([k1, k2]);
    let report = Differ::new(&order, &rules())
        .diff_series(SourceType::Nar, &[&before, &after])
        .unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(report[0].count(ChangeType::CityChanged), 1);
    let event = &report[0].events[0];
    let classification = event.classification.as_ref().unwrap();
    assert_eq!(classification.subtype, CitySubtype::Boundary);
    assert_eq!(classification.rule, "boundary_table");
}

// -------------------------------------------------------------------------
// Merge
// -------------------------------------------------------------------------

#[test]
fn scenario_register_plus_geocoder_merge() {
    let d = date(2024, 1);
    let mut a = record("H2X1Y4", "Montréal");
    a.csd_code = Some("2466023".into());
    a.address_count = 118;
    let mut b = record("H2X1Y4", "Montreal");
    b.latitude = Some(45.5111);
    b.longitude = Some(-73.5664);
    b.address_count = 1;

    let nar = Snapshot::new(SnapshotKey::new(SourceType::Nar, d), vec![a]);
    let geo = Snapshot::new(SnapshotKey::new(SourceType::Geocoder, d), vec![b]);
    let merged = merge(d, &[&nar, &geo]).unwrap();

    let rec = merged.snapshot().get("H2X1Y4").unwrap();
    assert_eq!(rec.latitude, Some(45.5111));
    assert_eq!(rec.longitude, Some(-73.5664));
    assert_eq!(rec.csd_code.as_deref(), Some("2466023"));
    assert_eq!(rec.address_count, 118);
    assert_eq!(rec.city_name.as_deref(), Some("Montréal"));
    assert_eq!(
        merged.contributors("H2X1Y4"),
        Some(&BTreeSet::from([SourceType::Nar, SourceType::Geocoder]))
    );
}

#[test]
fn merged_series_feeds_differ() {
    let (d1, d2) = (date(2023, 1), date(2024, 1));
    let nar1 = Snapshot::new(SnapshotKey::new(SourceType::Nar, d1), vec![record("H2X1Y4", "Montreal")]);
    let nar2 = Snapshot::new(SnapshotKey::new(SourceType::Nar, d2), vec![record("H2X1Y4", "Montréal")]);
    let geo2 = Snapshot::new(SnapshotKey::new(SourceType::Geocoder, d2), vec![record("K1A0B1", "Ottawa")]);

    let m1 = merge(d1, &[&nar1]).unwrap();
    let m2 = merge(d2, &[&nar2, &geo2]).unwrap();
    let order = SnapshotOrder::from_keys([m1.snapshot().key(), m2.snapshot().key()]);
    let events = Differ::new(&order, &rules())
        .diff(m1.snapshot(), m2.snapshot())
        .unwrap();

    let types: Vec<_> = events.iter().map(|e| (e.postal_code.as_str(), e.change_type)).collect();
    assert_eq!(
        types,
        vec![("H2X1Y4", ChangeType::CityChanged), ("K1A0B1", ChangeType::Added)]
    );
    assert!(events.iter().all(|e| e.source == SourceType::Merged));

    let mut contributors = m1.all_contributors().clone();
    contributors.extend(m2.all_contributors().clone());
    let summary = build_summary(&[m1.snapshot(), m2.snapshot()], &events, &contributors);
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].total_changes, 1);
    assert_eq!(summary[1].sources, BTreeSet::from([SourceType::Geocoder]));
}
