//! Lookup tables as data: province codes, FSA letters, abbreviation patterns,
//! mojibake markers, and the boundary/rename rule tables.
//!
//! Built-in defaults come from `Default`. A TOML rules file may replace any
//! section; omitted sections keep their defaults.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupTables {
    pub provinces: ProvinceTables,
    pub abbreviations: Vec<AbbreviationRule>,
    pub boundary: Vec<BoundaryRule>,
    pub renames: Vec<RenameRule>,
    pub mojibake_markers: Vec<String>,
}

impl Default for LookupTables {
    fn default() -> Self {
        Self {
            provinces: ProvinceTables::default(),
            abbreviations: default_abbreviations(),
            boundary: Vec::new(),
            renames: Vec::new(),
            mojibake_markers: default_mojibake_markers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Provinces
// ---------------------------------------------------------------------------

/// An FSA letter that spans several provinces. Codes whose FSA is listed
/// resolve to `province`; unlisted FSAs under `letter` stay unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsaSplit {
    pub letter: String,
    pub province: String,
    pub fsas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvinceTables {
    /// StatCan numeric province code → abbreviation.
    pub numeric_codes: BTreeMap<String, String>,
    /// Canonical 2-letter abbreviations.
    pub abbreviations: BTreeSet<String>,
    /// Postal-code first letter → abbreviation (unambiguous letters only).
    pub first_letter: BTreeMap<String, String>,
    pub fsa_splits: Vec<FsaSplit>,
}

impl Default for ProvinceTables {
    fn default() -> Self {
        let numeric_codes = [
            ("10", "NL"),
            ("11", "PE"),
            ("12", "NS"),
            ("13", "NB"),
            ("24", "QC"),
            ("35", "ON"),
            ("46", "MB"),
            ("47", "SK"),
            ("48", "AB"),
            ("59", "BC"),
            ("60", "YT"),
            ("61", "NT"),
            ("62", "NU"),
        ];
        let first_letter = [
            ("A", "NL"),
            ("B", "NS"),
            ("C", "PE"),
            ("E", "NB"),
            ("G", "QC"),
            ("H", "QC"),
            ("J", "QC"),
            ("K", "ON"),
            ("L", "ON"),
            ("M", "ON"),
            ("N", "ON"),
            ("P", "ON"),
            ("R", "MB"),
            ("S", "SK"),
            ("T", "AB"),
            ("V", "BC"),
            ("Y", "YT"),
        ];

        Self {
            numeric_codes: numeric_codes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            abbreviations: numeric_codes.iter().map(|(_, v)| v.to_string()).collect(),
            first_letter: first_letter
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fsa_splits: vec![
                FsaSplit {
                    letter: "X".into(),
                    province: "NU".into(),
                    fsas: vec!["X0A".into(), "X0B".into(), "X0C".into()],
                },
                FsaSplit {
                    letter: "X".into(),
                    province: "NT".into(),
                    fsas: vec!["X0E".into(), "X0G".into(), "X1A".into()],
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// City-change rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbbreviationRule {
    pub short: String,
    pub long: String,
}

/// Two municipalities known to have traded territory or amalgamated.
/// Matches in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRule {
    pub cities: [String; 2],
    #[serde(default)]
    pub note: String,
}

/// An official rename, old → new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    pub old: String,
    pub new: String,
    #[serde(default)]
    pub note: String,
}

fn default_abbreviations() -> Vec<AbbreviationRule> {
    [
        ("St", "Saint"),
        ("Ste", "Sainte"),
        ("Mt", "Mount"),
        ("Ft", "Fort"),
        ("Pte", "Pointe"),
        ("Lk", "Lake"),
    ]
    .iter()
    .map(|(s, l)| AbbreviationRule {
        short: s.to_string(),
        long: l.to_string(),
    })
    .collect()
}

/// UTF-8 accented letters read back as Latin-1, plus the replacement char.
fn default_mojibake_markers() -> Vec<String> {
    [
        "Ã©", "Ã¨", "Ãª", "Ã«", "Ã\u{a0}", "Ã¢", "Ã®", "Ã¯", "Ã´", "Ã¶", "Ã»", "Ã¹", "Ã¼",
        "Ã§", "Ã‰", "Ãˆ", "Ã€", "Ã‡", "\u{fffd}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl LookupTables {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let tables: LookupTables =
            toml::from_str(input).map_err(|e| EngineError::TablesParse(e.to_string()))?;
        tables.validate()?;
        Ok(tables)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let p = &self.provinces;
        let known = |abbr: &str| p.abbreviations.contains(abbr);

        for abbr in &p.abbreviations {
            if abbr.len() != 2 || !abbr.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(EngineError::TablesValidation(format!(
                    "province abbreviation '{abbr}' must be two uppercase letters"
                )));
            }
        }

        for (code, abbr) in &p.numeric_codes {
            if !code.chars().all(|c| c.is_ascii_digit()) {
                return Err(EngineError::TablesValidation(format!(
                    "numeric province code '{code}' is not numeric"
                )));
            }
            if !known(abbr) {
                return Err(EngineError::TablesValidation(format!(
                    "numeric code '{code}' maps to unknown province '{abbr}'"
                )));
            }
        }

        for (letter, abbr) in &p.first_letter {
            if letter.len() != 1 || !letter.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(EngineError::TablesValidation(format!(
                    "FSA letter '{letter}' must be a single uppercase letter"
                )));
            }
            if !known(abbr) {
                return Err(EngineError::TablesValidation(format!(
                    "FSA letter '{letter}' maps to unknown province '{abbr}'"
                )));
            }
        }

        let mut seen_fsas = BTreeSet::new();
        for split in &p.fsa_splits {
            if p.first_letter.contains_key(&split.letter) {
                return Err(EngineError::TablesValidation(format!(
                    "letter '{}' is both unambiguous and split",
                    split.letter
                )));
            }
            if !known(&split.province) {
                return Err(EngineError::TablesValidation(format!(
                    "FSA split for '{}' names unknown province '{}'",
                    split.letter, split.province
                )));
            }
            for fsa in &split.fsas {
                if fsa.len() != 3 || !fsa.starts_with(split.letter.as_str()) {
                    return Err(EngineError::TablesValidation(format!(
                        "FSA '{fsa}' does not belong to letter '{}'",
                        split.letter
                    )));
                }
                if !seen_fsas.insert(fsa.clone()) {
                    return Err(EngineError::TablesValidation(format!(
                        "FSA '{fsa}' listed under more than one province"
                    )));
                }
            }
        }

        for rule in &self.abbreviations {
            if rule.short.trim().is_empty() || rule.long.trim().is_empty() {
                return Err(EngineError::TablesValidation(
                    "abbreviation patterns need both short and long forms".into(),
                ));
            }
        }

        for rule in &self.boundary {
            if rule.cities[0] == rule.cities[1] {
                return Err(EngineError::TablesValidation(format!(
                    "boundary rule pairs '{}' with itself",
                    rule.cities[0]
                )));
            }
        }

        if self.mojibake_markers.iter().any(|m| m.is_empty()) {
            return Err(EngineError::TablesValidation(
                "mojibake markers must not be empty".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
