//! Snapshot reduction: raw address rows → one canonical record per postal code.
//!
//! Work is split into shards. Each shard folds its rows into an
//! [`Accumulator`]; accumulators combine with [`Accumulator::merge`], which is
//! associative and commutative, so shards may be processed in parallel and
//! combined in any completion order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::Serialize;

use crate::model::{CanonicalPostalCodeRecord, RawAddressRow, Snapshot, SnapshotKey};
use crate::province::ProvinceResolver;
use crate::tables::LookupTables;

/// Fixed-point scale for coordinate sums (1e-7 degree ≈ 1 cm).
const COORD_SCALE: f64 = 1e7;

// ---------------------------------------------------------------------------
// Postal code cleaning
// ---------------------------------------------------------------------------

/// Strip whitespace and uppercase; `None` unless exactly 6 ASCII alphanumerics remain.
pub fn normalize_postal_code(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if cleaned.len() == 6 && cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(cleaned)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Accumulator pieces
// ---------------------------------------------------------------------------

/// Deterministic position of a row across all shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowOrdinal {
    pub shard: u32,
    pub row: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tally {
    count: u64,
    first_seen: RowOrdinal,
}

/// Frequency table with first-seen tie-break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Votes {
    tallies: BTreeMap<String, Tally>,
}

impl Votes {
    fn cast(&mut self, value: &str, at: RowOrdinal) {
        if let Some(tally) = self.tallies.get_mut(value) {
            tally.count += 1;
            tally.first_seen = tally.first_seen.min(at);
        } else {
            self.tallies.insert(value.to_string(), Tally { count: 1, first_seen: at });
        }
    }

    fn merge(&mut self, other: Votes) {
        for (value, theirs) in other.tallies {
            self.tallies
                .entry(value)
                .and_modify(|ours| {
                    ours.count += theirs.count;
                    ours.first_seen = ours.first_seen.min(theirs.first_seen);
                })
                .or_insert(theirs);
        }
    }

    /// Most frequent value; equal counts go to the earliest-seen value.
    fn winner(&self) -> Option<&str> {
        self.tallies
            .iter()
            .max_by_key(|(_, t)| (t.count, Reverse(t.first_seen)))
            .map(|(value, _)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CentroidSum {
    lat: i128,
    lon: i128,
    points: u64,
}

impl CentroidSum {
    fn add(&mut self, latitude: f64, longitude: f64) {
        self.lat += (latitude * COORD_SCALE).round() as i128;
        self.lon += (longitude * COORD_SCALE).round() as i128;
        self.points += 1;
    }

    fn merge(&mut self, other: CentroidSum) {
        self.lat += other.lat;
        self.lon += other.lon;
        self.points += other.points;
    }

    fn mean(&self) -> Option<(f64, f64)> {
        if self.points == 0 {
            return None;
        }
        let n = self.points as f64;
        Some((
            self.lat as f64 / n / COORD_SCALE,
            self.lon as f64 / n / COORD_SCALE,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PostalCodeState {
    rows: u64,
    cities: Votes,
    csds: Votes,
    provinces: Votes,
    centroid: CentroidSum,
}

impl PostalCodeState {
    fn merge(&mut self, other: PostalCodeState) {
        self.rows += other.rows;
        self.cities.merge(other.cities);
        self.csds.merge(other.csds);
        self.provinces.merge(other.provinces);
        self.centroid.merge(other.centroid);
    }
}

fn usable_point(latitude: Option<f64>, longitude: Option<f64>) -> Option<(f64, f64)> {
    match (latitude, longitude) {
        (Some(lat), Some(lon))
            if lat.is_finite()
                && lon.is_finite()
                && (-90.0..=90.0).contains(&lat)
                && (-180.0..=180.0).contains(&lon) =>
        {
            Some((lat, lon))
        }
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReduceStats {
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub unique_postal_codes: u64,
    pub unresolved_province: u64,
}

/// Partial reduction state for any subset of a snapshot's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    codes: HashMap<String, PostalCodeState>,
    rows_read: u64,
    rows_rejected: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one shard's rows; row `i` gets ordinal `(shard, i)`.
    pub fn from_rows<I>(shard: u32, rows: I, resolver: &ProvinceResolver) -> Self
    where
        I: IntoIterator<Item = RawAddressRow>,
    {
        let mut acc = Self::new();
        for (i, row) in rows.into_iter().enumerate() {
            acc.ingest(&row, RowOrdinal { shard, row: i as u64 }, resolver);
        }
        acc
    }

    pub fn ingest(&mut self, row: &RawAddressRow, at: RowOrdinal, resolver: &ProvinceResolver) {
        self.rows_read += 1;

        let Some(postal_code) = normalize_postal_code(&row.postal_code) else {
            self.rows_rejected += 1;
            log::trace!("rejected postal code {:?}", row.postal_code);
            return;
        };

        let province = resolver.resolve(row.province.as_deref(), &postal_code);
        let state = self.codes.entry(postal_code).or_default();
        state.rows += 1;

        if let Some(abbr) = province {
            state.provinces.cast(abbr, at);
        }
        if let Some(city) = non_empty(row.city_name.as_deref()) {
            state.cities.cast(city, at);
        }
        if let Some(csd) = non_empty(row.csd_code.as_deref()) {
            state.csds.cast(csd, at);
        }
        if let Some((lat, lon)) = usable_point(row.latitude, row.longitude) {
            state.centroid.add(lat, lon);
        }
    }

    /// Combine two partial states. Associative and commutative.
    pub fn merge(mut self, other: Accumulator) -> Accumulator {
        if other.codes.len() > self.codes.len() {
            return other.merge(self);
        }
        self.rows_read += other.rows_read;
        self.rows_rejected += other.rows_rejected;
        for (postal_code, theirs) in other.codes {
            match self.codes.get_mut(&postal_code) {
                Some(ours) => ours.merge(theirs),
                None => {
                    self.codes.insert(postal_code, theirs);
                }
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Emit the canonical snapshot.
    pub fn finish(self, key: SnapshotKey) -> Reduction {
        let mut stats = ReduceStats {
            rows_read: self.rows_read,
            rows_rejected: self.rows_rejected,
            unique_postal_codes: self.codes.len() as u64,
            unresolved_province: 0,
        };

        let mut records = Vec::with_capacity(self.codes.len());
        for (postal_code, state) in self.codes {
            let province = state.provinces.winner().map(str::to_string);
            if province.is_none() {
                stats.unresolved_province += 1;
            }
            let (latitude, longitude) = match state.centroid.mean() {
                Some((lat, lon)) => (Some(lat), Some(lon)),
                None => (None, None),
            };
            records.push(CanonicalPostalCodeRecord {
                postal_code,
                province,
                city_name: state.cities.winner().map(str::to_string),
                latitude,
                longitude,
                csd_code: state.csds.winner().map(str::to_string),
                address_count: state.rows,
            });
        }

        log::info!(
            "{key}: {} rows → {} postal codes ({} rejected, {} unresolved province)",
            stats.rows_read,
            stats.unique_postal_codes,
            stats.rows_rejected,
            stats.unresolved_province,
        );

        Reduction {
            snapshot: Snapshot::new(key, records),
            stats,
        }
    }
}

/// A finished snapshot plus reduction counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub snapshot: Snapshot,
    pub stats: ReduceStats,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Single-pass reduction.
pub fn reduce<I>(key: SnapshotKey, rows: I, tables: &LookupTables) -> Reduction
where
    I: IntoIterator<Item = RawAddressRow>,
{
    let resolver = ProvinceResolver::new(&tables.provinces);
    Accumulator::from_rows(0, rows, &resolver).finish(key)
}

/// Parallel reduction over independent shards. Shard `i` orders before shard `i + 1`
/// for tie-breaking, regardless of which worker finishes first.
pub fn reduce_sharded<S>(key: SnapshotKey, shards: Vec<S>, tables: &LookupTables) -> Reduction
where
    S: IntoIterator<Item = RawAddressRow> + Send,
{
    let resolver = ProvinceResolver::new(&tables.provinces);
    shards
        .into_par_iter()
        .enumerate()
        .map(|(i, shard)| Accumulator::from_rows(i as u32, shard, &resolver))
        .reduce(Accumulator::new, Accumulator::merge)
        .finish(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceType;
    use chrono::NaiveDate;

    fn key() -> SnapshotKey {
        SnapshotKey::new(SourceType::Nar, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn row(pc: &str, prov: &str, city: &str) -> RawAddressRow {
        RawAddressRow {
            postal_code: pc.into(),
            province: Some(prov.into()),
            city_name: Some(city.into()),
            ..Default::default()
        }
    }

    fn located(pc: &str, lat: f64, lon: f64) -> RawAddressRow {
        RawAddressRow {
            postal_code: pc.into(),
            latitude: Some(lat),
            longitude: Some(lon),
            ..Default::default()
        }
    }

    #[test]
    fn normalize_cleans_and_validates() {
        assert_eq!(normalize_postal_code("m5v 1j2").as_deref(), Some("M5V1J2"));
        assert_eq!(normalize_postal_code(" K1A\t0B1 ").as_deref(), Some("K1A0B1"));
        assert_eq!(normalize_postal_code("M5V1J"), None);
        assert_eq!(normalize_postal_code("M5V1J23"), None);
        assert_eq!(normalize_postal_code("M5V-J2"), None);
        assert_eq!(normalize_postal_code(""), None);
    }

    #[test]
    fn collapses_case_variants_with_majority_city() {
        let rows = vec![
            row("M5V1J2", "35", "Toronto"),
            row("M5V1J2", "35", "Toronto"),
            row("m5v 1j2", "35", "toronto"),
        ];
        let out = reduce(key(), rows, &LookupTables::default());
        assert_eq!(out.snapshot.len(), 1);
        let rec = &out.snapshot.records()[0];
        assert_eq!(rec.postal_code, "M5V1J2");
        assert_eq!(rec.address_count, 3);
        assert_eq!(rec.city_name.as_deref(), Some("Toronto"));
        assert_eq!(rec.province.as_deref(), Some("ON"));
    }

    #[test]
    fn tie_goes_to_first_seen() {
        let rows = vec![
            row("H2X1Y4", "24", "Montréal"),
            row("H2X1Y4", "24", "Montreal"),
            row("H2X1Y4", "24", "Montreal"),
            row("H2X1Y4", "24", "Montréal"),
        ];
        let out = reduce(key(), rows, &LookupTables::default());
        assert_eq!(out.snapshot.records()[0].city_name.as_deref(), Some("Montréal"));
    }

    #[test]
    fn invalid_rows_rejected_not_fatal() {
        let rows = vec![
            row("M5V1J2", "35", "Toronto"),
            row("BAD", "35", "Toronto"),
            row("", "35", "Toronto"),
        ];
        let out = reduce(key(), rows, &LookupTables::default());
        assert_eq!(out.stats.rows_read, 3);
        assert_eq!(out.stats.rows_rejected, 2);
        assert_eq!(out.stats.unique_postal_codes, 1);
    }

    #[test]
    fn centroid_is_mean_of_points() {
        let rows = vec![
            located("M5V1J2", 43.0, -79.0),
            located("M5V1J2", 44.0, -80.0),
            // Missing lon → no point
            RawAddressRow {
                postal_code: "M5V1J2".into(),
                latitude: Some(50.0),
                ..Default::default()
            },
        ];
        let out = reduce(key(), rows, &LookupTables::default());
        let rec = &out.snapshot.records()[0];
        assert!((rec.latitude.unwrap() - 43.5).abs() < 1e-9);
        assert!((rec.longitude.unwrap() + 79.5).abs() < 1e-9);
        assert_eq!(rec.address_count, 3);
    }

    #[test]
    fn no_coordinates_stay_null() {
        let out = reduce(key(), vec![row("M5V1J2", "35", "Toronto")], &LookupTables::default());
        let rec = &out.snapshot.records()[0];
        assert_eq!(rec.latitude, None);
        assert_eq!(rec.longitude, None);
    }

    #[test]
    fn unresolved_province_counted() {
        let rows = vec![row("Z1Z1Z1", "", "Nowhere"), row("X9Z9Z9", "", "Tundra")];
        let out = reduce(key(), rows, &LookupTables::default());
        assert_eq!(out.stats.unresolved_province, 2);
        assert!(out.snapshot.records().iter().all(|r| r.province.is_none()));
    }

    #[test]
    fn empty_city_and_csd_cast_no_vote() {
        let mut a = row("M5V1J2", "35", "  ");
        a.csd_code = Some("".into());
        let mut b = row("M5V1J2", "35", "Toronto");
        b.csd_code = Some("3520005".into());
        let out = reduce(key(), vec![a, b], &LookupTables::default());
        let rec = &out.snapshot.records()[0];
        assert_eq!(rec.city_name.as_deref(), Some("Toronto"));
        assert_eq!(rec.csd_code.as_deref(), Some("3520005"));
    }

    #[test]
    fn merge_order_independent() {
        let resolver = ProvinceResolver::new(&LookupTables::default().provinces);
        let a = Accumulator::from_rows(
            0,
            vec![row("M5V1J2", "35", "Toronto"), located("M5V1J2", 43.6, -79.4)],
            &resolver,
        );
        let b = Accumulator::from_rows(
            1,
            vec![row("M5V1J2", "35", "North York"), row("K1A0B1", "35", "Ottawa")],
            &resolver,
        );
        let c = Accumulator::from_rows(2, vec![row("K1A0B1", "35", "Ottawa")], &resolver);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = c.merge(b.merge(a));
        assert_eq!(left, right);
        assert_eq!(left.finish(key()), right.finish(key()));
    }

    #[test]
    fn sharded_matches_single_pass() {
        let rows: Vec<RawAddressRow> = vec![
            row("M5V1J2", "35", "Toronto"),
            row("M5V1J2", "35", "York"),
            row("M5V1J2", "35", "York"),
            row("M5V1J2", "35", "Toronto"),
            row("G0N3M0", "24", "Saint-Joseph"),
            located("G0N3M0", 46.3, -70.8),
        ];
        let tables = LookupTables::default();
        let single = reduce(key(), rows.clone(), &tables);
        let shards = vec![rows[..1].to_vec(), rows[1..3].to_vec(), rows[3..].to_vec()];
        let sharded = reduce_sharded(key(), shards, &tables);
        assert_eq!(single, sharded);
        assert_eq!(
            sharded.snapshot.get("M5V1J2").unwrap().city_name.as_deref(),
            Some("Toronto")
        );
    }
}
