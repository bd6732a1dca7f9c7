use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Where a snapshot came from. `Nar` is the authoritative address register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Nar,
    Geocoder,
    Geonames,
    Merged,
}

impl SourceType {
    /// Input sources in the order they are listed for reporting.
    pub const INPUTS: [SourceType; 3] = [Self::Nar, Self::Geocoder, Self::Geonames];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nar => "nar",
            Self::Geocoder => "geocoder",
            Self::Geonames => "geonames",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nar" => Ok(Self::Nar),
            "geocoder" => Ok(Self::Geocoder),
            "geonames" => Ok(Self::Geonames),
            "merged" => Ok(Self::Merged),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// (source type, reference date): identifies one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub source: SourceType,
    pub reference_date: NaiveDate,
}

impl SnapshotKey {
    pub fn new(source: SourceType, reference_date: NaiveDate) -> Self {
        Self { source, reference_date }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.reference_date)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One row from a source extract, before any cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAddressRow {
    pub postal_code: String,
    pub province: Option<String>,
    pub city_name: Option<String>,
    pub csd_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// ---------------------------------------------------------------------------
// Canonical records + snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// One unique postal code within one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPostalCodeRecord {
    pub postal_code: String,
    pub province: Option<String>,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub csd_code: Option<String>,
    pub address_count: u64,
}

impl CanonicalPostalCodeRecord {
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        }
    }

    pub fn fsa(&self) -> &str {
        self.postal_code.get(..3).unwrap_or(&self.postal_code)
    }
}

/// Immutable, postal-code-ordered record set for one (source, reference date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    key: SnapshotKey,
    records: Vec<CanonicalPostalCodeRecord>,
}

impl Snapshot {
    /// Build a snapshot, sorting by postal code. A repeated postal code keeps
    /// its first occurrence.
    pub fn new(key: SnapshotKey, mut records: Vec<CanonicalPostalCodeRecord>) -> Self {
        records.sort_by(|a, b| a.postal_code.cmp(&b.postal_code));
        records.dedup_by(|later, earlier| later.postal_code == earlier.postal_code);
        Self { key, records }
    }

    pub fn key(&self) -> SnapshotKey {
        self.key
    }

    pub fn source(&self) -> SourceType {
        self.key.source
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.key.reference_date
    }

    pub fn records(&self) -> &[CanonicalPostalCodeRecord] {
        &self.records
    }

    pub fn get(&self, postal_code: &str) -> Option<&CanonicalPostalCodeRecord> {
        self.records
            .binary_search_by(|r| r.postal_code.as_str().cmp(postal_code))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    CityChanged,
    CsdChanged,
    LocationShifted,
}

impl ChangeType {
    pub const ALL: [ChangeType; 5] = [
        Self::Added,
        Self::Removed,
        Self::CityChanged,
        Self::CsdChanged,
        Self::LocationShifted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::CityChanged => "city_changed",
            Self::CsdChanged => "csd_changed",
            Self::LocationShifted => "location_shifted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown change type: {s}"))
    }
}

/// Old/new payload of a change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeValue {
    Text(String),
    Location(GeoPoint),
}

impl fmt::Display for ChangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Location(p) => write!(f, "{p}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitySubtype {
    Encoding,
    AccentNormalization,
    Punctuation,
    Spacing,
    Abbreviation,
    Boundary,
    Rename,
    Substantive,
}

impl CitySubtype {
    /// Evaluation order of the classifier.
    pub const PRIORITY: [CitySubtype; 8] = [
        Self::Encoding,
        Self::AccentNormalization,
        Self::Punctuation,
        Self::Spacing,
        Self::Abbreviation,
        Self::Boundary,
        Self::Rename,
        Self::Substantive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encoding => "encoding",
            Self::AccentNormalization => "accent_normalization",
            Self::Punctuation => "punctuation",
            Self::Spacing => "spacing",
            Self::Abbreviation => "abbreviation",
            Self::Boundary => "boundary",
            Self::Rename => "rename",
            Self::Substantive => "substantive",
        }
    }
}

impl fmt::Display for CitySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitySubtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown city change subtype: {s}"))
    }
}

/// Why a city name changed, and which check decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityChangeClassification {
    pub subtype: CitySubtype,
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub postal_code: String,
    pub change_type: ChangeType,
    pub source: SourceType,
    pub before: NaiveDate,
    pub after: NaiveDate,
    pub old_value: Option<ChangeValue>,
    pub new_value: Option<ChangeValue>,
    pub province: Option<String>,
    pub fsa: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub classification: Option<CityChangeClassification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pc: &str) -> CanonicalPostalCodeRecord {
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

    fn key() -> SnapshotKey {
        SnapshotKey::new(SourceType::Nar, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
    }

    #[test]
    fn snapshot_sorts_and_keeps_first_duplicate() {
        let mut dup = record("K1A0B1");
        dup.address_count = 9;
        let snap = Snapshot::new(key(), vec![record("M5V1J2"), record("K1A0B1"), dup]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records()[0].postal_code, "K1A0B1");
        assert_eq!(snap.get("K1A0B1").unwrap().address_count, 1);
        assert!(snap.get("H0H0H0").is_none());
    }

    #[test]
    fn source_type_parse_roundtrip() {
        for s in ["nar", "geocoder", "geonames", "merged"] {
            assert_eq!(s.parse::<SourceType>().unwrap().as_str(), s);
        }
        assert!("canada_post".parse::<SourceType>().is_err());
    }

    #[test]
    fn key_display() {
        assert_eq!(key().to_string(), "nar@2023-01-01");
    }

    #[test]
    fn location_value_display() {
        let v = ChangeValue::Location(GeoPoint { latitude: 43.6532, longitude: -79.3832 });
        assert_eq!(v.to_string(), "43.653200,-79.383200");
    }
}
