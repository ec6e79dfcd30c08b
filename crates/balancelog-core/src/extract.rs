//! Reading extraction
//!
//! Balance output is loosely formatted: stability flags, padding, headers and
//! status words are mixed in with the number. Extraction is best effort and
//! anything that does not look like a reading is skipped without complaint.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Weight unit reported by the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Grams
    #[serde(rename = "g")]
    Grams,
    /// Kilograms
    #[serde(rename = "kg")]
    Kilograms,
    /// No unit in the line
    #[serde(rename = "?")]
    Unknown,
}

impl Unit {
    /// Short symbol as printed by the balance
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Grams => "g",
            Unit::Kilograms => "kg",
            Unit::Unknown => "?",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.symbol())
    }
}

/// A value and unit pulled out of one protocol line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Signed weight value
    pub weight: f64,
    /// Unit the value is in
    pub unit: Unit,
}

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[+-]?[0-9]+\.[0-9]+").expect("decimal pattern is valid"))
}

/// Keep only digits, sign, decimal point and the unit letters g/k
fn sanitize(line: &str) -> String {
    line.chars()
        .filter(|c| {
            c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'g' | 'G' | 'k' | 'K')
        })
        .collect()
}

fn detect_unit(sanitized: &str) -> Unit {
    let lower = sanitized.to_ascii_lowercase();
    if lower.contains("kg") {
        Unit::Kilograms
    } else if lower.contains('g') {
        Unit::Grams
    } else {
        Unit::Unknown
    }
}

/// Extract a reading from a trimmed line, or `None` if it carries none
pub fn extract(line: &str) -> Option<Reading> {
    let sanitized = sanitize(line);
    if sanitized.is_empty() {
        return None;
    }

    let matched = decimal_pattern().find(&sanitized)?;
    let weight = matched.as_str().parse::<f64>().ok()?;

    Some(Reading {
        weight,
        unit: detect_unit(&sanitized),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(line: &str) -> (f64, Unit) {
        let r = extract(line).unwrap_or_else(|| panic!("no reading in {:?}", line));
        (r.weight, r.unit)
    }

    #[test]
    fn test_grams_with_stability_flag() {
        assert_eq!(reading("+012.345 g ST"), (12.345, Unit::Grams));
    }

    #[test]
    fn test_kilograms() {
        assert_eq!(reading("-1.200kg"), (-1.2, Unit::Kilograms));
    }

    #[test]
    fn test_status_word_is_no_reading() {
        assert_eq!(extract("ERROR"), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn test_unit_without_decimal_is_no_reading() {
        assert_eq!(extract("g"), None);
        assert_eq!(extract("kg 12"), None);
        assert_eq!(extract("Tare 100 g"), None);
    }

    #[test]
    fn test_noise_around_number() {
        assert_eq!(reading("S S     5.000 g"), (5.0, Unit::Grams));
        assert_eq!(reading("N     +   0.250 G"), (0.25, Unit::Grams));
        assert_eq!(reading("W: 3.10"), (3.1, Unit::Unknown));
    }

    #[test]
    fn test_first_decimal_wins() {
        assert_eq!(reading("1.5 g 2.5 g"), (1.5, Unit::Grams));
    }

    #[test]
    fn test_letters_dropped_before_matching() {
        // Letters between sign and digits are stripped, so the sign still binds
        assert_eq!(reading("- x 4.20 g"), (-4.2, Unit::Grams));
    }

    #[test]
    fn test_extraction_is_pure() {
        let lines = ["+012.345 g ST", "-1.200kg", "ERROR", "ST,GS,+0000.512 g"];
        for line in lines {
            assert_eq!(extract(line), extract(line));
        }
    }
}
