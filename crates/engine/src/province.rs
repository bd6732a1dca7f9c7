use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::tables::ProvinceTables;

/// Maps raw province indicators to canonical 2-letter codes.
///
/// Resolution order, first match wins:
/// 1. known StatCan numeric code
/// 2. already-valid abbreviation (case-insensitive)
/// 3. postal-code first letter
/// 4. split letters (X): the FSA must appear in one of the split lists
///
/// Anything else is unresolved (`None`), never guessed.
#[derive(Debug, Clone)]
pub struct ProvinceResolver {
    numeric_codes: BTreeMap<String, String>,
    abbreviations: BTreeSet<String>,
    first_letter: BTreeMap<String, String>,
    split_letters: BTreeSet<String>,
    split_fsas: HashMap<String, String>,
}

impl ProvinceResolver {
    pub fn new(tables: &ProvinceTables) -> Self {
        let mut split_letters = BTreeSet::new();
        let mut split_fsas = HashMap::new();
        for split in &tables.fsa_splits {
            split_letters.insert(split.letter.clone());
            for fsa in &split.fsas {
                split_fsas.insert(fsa.clone(), split.province.clone());
            }
        }

        Self {
            numeric_codes: tables.numeric_codes.clone(),
            abbreviations: tables.abbreviations.clone(),
            first_letter: tables.first_letter.clone(),
            split_letters,
            split_fsas,
        }
    }

    pub fn resolve(&self, raw: Option<&str>, postal_code: &str) -> Option<&str> {
        let raw = raw.map(str::trim).unwrap_or("");

        if !raw.is_empty() {
            if raw.chars().all(|c| c.is_ascii_digit()) {
                if let Some(abbr) = self.numeric_codes.get(raw) {
                    return Some(abbr.as_str());
                }
            } else if raw.len() == 2 {
                let upper = raw.to_ascii_uppercase();
                if let Some(abbr) = self.abbreviations.get(upper.as_str()) {
                    return Some(abbr.as_str());
                }
            }
        }

        self.resolve_from_postal_code(postal_code)
    }

    fn resolve_from_postal_code(&self, postal_code: &str) -> Option<&str> {
        let fsa: String = postal_code
            .chars()
            .take(3)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let letter = fsa.get(..1)?;

        if let Some(abbr) = self.first_letter.get(letter) {
            return Some(abbr.as_str());
        }

        if self.split_letters.contains(letter) {
            return self.split_fsas.get(&fsa).map(String::as_str);
        }

        None
    }
}
