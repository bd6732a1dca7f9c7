//! City-change classification.
//!
//! Rules run in a fixed order and the first hit wins. Every rule looks at the
//! two raw strings on its own; none depends on another rule's normalization.

use std::collections::HashSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::{CityChangeClassification, CitySubtype};
use crate::tables::LookupTables;

/// Letters that show up when UTF-8 accented text is decoded as Latin-1.
const MOJIBAKE_LEADS: &str = "ãÃâÂêÊîÎôÔûÛëËïÏüÜçÇ";

#[derive(Debug, Clone)]
pub struct CityChangeClassifier {
    markers: Vec<String>,
    abbreviations: Vec<(String, String)>,
    boundary: HashSet<(String, String)>,
    renames: HashSet<(String, String)>,
}

impl CityChangeClassifier {
    pub fn new(tables: &LookupTables) -> Self {
        let mut boundary = HashSet::new();
        for rule in &tables.boundary {
            let [a, b] = &rule.cities;
            boundary.insert((a.clone(), b.clone()));
            boundary.insert((b.clone(), a.clone()));
        }

        Self {
            markers: tables.mojibake_markers.clone(),
            abbreviations: tables
                .abbreviations
                .iter()
                .map(|r| (r.short.to_lowercase(), r.long.to_lowercase()))
                .collect(),
            boundary,
            renames: tables
                .renames
                .iter()
                .map(|r| (r.old.clone(), r.new.clone()))
                .collect(),
        }
    }

    /// Classify a city pair where either side may be missing.
    pub fn classify_optional(&self, old: Option<&str>, new: Option<&str>) -> CityChangeClassification {
        self.classify(old.unwrap_or(""), new.unwrap_or(""))
    }

    pub fn classify(&self, old: &str, new: &str) -> CityChangeClassification {
        let old = old.trim();
        let new = new.trim();

        if old.is_empty() || new.is_empty() {
            return verdict(CitySubtype::Substantive, "missing_value");
        }

        if let Some(rule) = self.mojibake(old).or_else(|| self.mojibake(new)) {
            return verdict(CitySubtype::Encoding, &rule);
        }

        if old.to_lowercase() != new.to_lowercase() && strip_diacritics(old) == strip_diacritics(new) {
            return verdict(CitySubtype::AccentNormalization, "diacritics");
        }

        if differs_by_token_period(old, new) {
            return verdict(CitySubtype::Punctuation, "trailing_period");
        }

        if normalize_separators(old) == normalize_separators(new) {
            return verdict(CitySubtype::Spacing, "separators");
        }

        if let Some((short, long)) = self.abbreviation(old, new) {
            return verdict(CitySubtype::Abbreviation, &format!("abbreviation:{short}={long}"));
        }

        if self.boundary.contains(&(old.to_string(), new.to_string())) {
            return verdict(CitySubtype::Boundary, "boundary_table");
        }

        if self.renames.contains(&(old.to_string(), new.to_string())) {
            return verdict(CitySubtype::Rename, "rename_table");
        }

        verdict(CitySubtype::Substantive, "default")
    }

    fn mojibake(&self, text: &str) -> Option<String> {
        if let Some(marker) = self.markers.iter().find(|m| text.contains(m.as_str())) {
            return Some(format!("mojibake:{}", marker.escape_debug()));
        }

        if text.chars().any(|c| ('\u{80}'..='\u{9f}').contains(&c)) {
            return Some("mojibake:c1_control".into());
        }

        // Lead letter wedged between a lowercase and an uppercase letter (MontrãAl).
        // A lead at the start of a word is not flagged here, so "ÎLE-BIZARD" stays
        // clean and "Ã‰cole" is caught only through the marker list.
        let chars: Vec<char> = text.chars().collect();
        for w in chars.windows(3) {
            if w[0].is_lowercase() && MOJIBAKE_LEADS.contains(w[1]) && w[2].is_uppercase() {
                return Some("mojibake:mid_word".into());
            }
        }

        None
    }

    fn abbreviation(&self, old: &str, new: &str) -> Option<(&str, &str)> {
        let (old_lead, old_rest) = split_leading_token(old);
        let (new_lead, new_rest) = split_leading_token(new);
        if normalize_separators(old_rest) != normalize_separators(new_rest) {
            return None;
        }

        self.abbreviations
            .iter()
            .find(|(short, long)| {
                (old_lead == *short && new_lead == *long) || (old_lead == *long && new_lead == *short)
            })
            .map(|(short, long)| (short.as_str(), long.as_str()))
    }
}

fn verdict(subtype: CitySubtype, rule: &str) -> CityChangeClassification {
    CityChangeClassification {
        subtype,
        rule: rule.to_string(),
    }
}

/// Lowercase with combining marks removed; nothing else touched.
fn strip_diacritics(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Lowercase, hyphens as spaces, whitespace runs collapsed.
fn normalize_separators(s: &str) -> String {
    s.to_lowercase()
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the longer string is the shorter one plus a single period that
/// ends a token ("St. John's" / "St John's", "Ste." / "Ste").
fn differs_by_token_period(a: &str, b: &str) -> bool {
    let (long, short) = if a.len() > b.len() { (a, b) } else { (b, a) };
    if long.len() != short.len() + 1 {
        return false;
    }

    long.char_indices().any(|(i, c)| {
        if c != '.' {
            return false;
        }
        let rest = &long[i + 1..];
        let ends_token = rest.chars().next().map_or(true, |n| n.is_whitespace() || n == '-');
        ends_token && short.starts_with(&long[..i]) && short.ends_with(rest)
    })
}

/// Leading token (lowercased, trailing period dropped) and the remainder.
fn split_leading_token(s: &str) -> (String, &str) {
    let end = s
        .find(|c: char| c.is_whitespace() || c == '-')
        .unwrap_or(s.len());
    let lead = s[..end].trim_end_matches('.').to_lowercase();
    (lead, &s[end..])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{BoundaryRule, RenameRule};

    fn classifier() -> CityChangeClassifier {
        let mut tables = LookupTables::default();
        tables.boundary.push(BoundaryRule {
            cities: ["Gatineau".into(), "Chelsea".into()],
            note: String::new(),
        });
        tables.renames.push(RenameRule {
            old: "Berlin".into(),
            new: "Kitchener".into(),
            note: String::new(),
        });
        tables.renames.push(RenameRule {
            old: "Sainte-Foy".into(),
            new: "Québec".into(),
            note: String::new(),
        });
        CityChangeClassifier::new(&tables)
    }

    fn subtype(old: &str, new: &str) -> CitySubtype {
        classifier().classify(old, new).subtype
    }

    #[test]
    fn accent_normalization() {
        assert_eq!(subtype("Montreal", "Montréal"), CitySubtype::AccentNormalization);
        assert_eq!(subtype("LÉVIS", "Levis"), CitySubtype::AccentNormalization);
    }

    #[test]
    fn case_only_change_is_not_accent() {
        let c = classifier().classify("TORONTO", "Toronto");
        assert_eq!(c.subtype, CitySubtype::Spacing);
        assert_eq!(c.rule, "separators");
    }

    #[test]
    fn punctuation_token_period() {
        assert_eq!(subtype("St. John's", "St John's"), CitySubtype::Punctuation);
        assert_eq!(subtype("Mount Pearl", "Mount Pearl."), CitySubtype::Punctuation);
        // Two periods removed is not a single-period change
        assert_ne!(subtype("St. Ste. Marie", "St Ste Marie"), CitySubtype::Punctuation);
        // Period inside a token does not count
        assert_ne!(subtype("A.bc", "Abc"), CitySubtype::Punctuation);
    }

    #[test]
    fn spacing_hyphen_vs_space() {
        assert_eq!(subtype("Ste-Foy", "Ste Foy"), CitySubtype::Spacing);
        assert_eq!(subtype("Notre-Dame-du-Lac", "Notre Dame  du Lac"), CitySubtype::Spacing);
    }

    #[test]
    fn abbreviation_whole_token() {
        let c = classifier().classify("St-Jerome", "Saint-Jerome");
        assert_eq!(c.subtype, CitySubtype::Abbreviation);
        assert_eq!(c.rule, "abbreviation:st=saint");
        assert_eq!(subtype("Sainte Agathe", "Ste. Agathe"), CitySubtype::Abbreviation);
        assert_eq!(subtype("Mt Albert", "Mount Albert"), CitySubtype::Abbreviation);
        // "Stoney" is not the token "St"
        assert_eq!(subtype("Stoney Creek", "Saintoney Creek"), CitySubtype::Substantive);
    }

    #[test]
    fn encoding_markers() {
        let c = classifier().classify("MontrÃ©al", "Montréal");
        assert_eq!(c.subtype, CitySubtype::Encoding);
        assert!(c.rule.starts_with("mojibake:"));
        assert_eq!(subtype("Qu\u{fffd}bec", "Québec"), CitySubtype::Encoding);
        assert_eq!(subtype("L\u{0089}vis", "Lévis"), CitySubtype::Encoding);
        assert_eq!(subtype("MontrãAl", "Montréal"), CitySubtype::Encoding);
        assert_eq!(subtype("Ã‰cole", "École"), CitySubtype::Encoding);
        // A legit capital Î at word start is not mojibake
        assert_eq!(subtype("ÎLE-BIZARD", "L'ÎLE-BIZARD"), CitySubtype::Substantive);
    }

    #[test]
    fn table_rules() {
        assert_eq!(subtype("Gatineau", "Chelsea"), CitySubtype::Boundary);
        assert_eq!(subtype("Chelsea", "Gatineau"), CitySubtype::Boundary);
        assert_eq!(subtype("Berlin", "Kitchener"), CitySubtype::Rename);
        // Renames are directed
        assert_eq!(subtype("Kitchener", "Berlin"), CitySubtype::Substantive);
    }

    #[test]
    fn cheap_checks_outrank_tables() {
        // An accent-only difference listed as a rename still reports the accent rule
        let mut tables = LookupTables::default();
        tables.renames.push(RenameRule {
            old: "Montreal".into(),
            new: "Montréal".into(),
            note: String::new(),
        });
        let c = CityChangeClassifier::new(&tables).classify("Montreal", "Montréal");
        assert_eq!(c.subtype, CitySubtype::AccentNormalization);
    }

    #[test]
    fn substantive_default_and_missing() {
        assert_eq!(subtype("Toronto", "Mississauga"), CitySubtype::Substantive);
        let c = classifier().classify_optional(None, Some("Toronto"));
        assert_eq!(c.subtype, CitySubtype::Substantive);
        assert_eq!(c.rule, "missing_value");
    }
}
