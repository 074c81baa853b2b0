//! School term and academic year types.
//!
//! The school year has exactly three terms. Academic years are labelled
//! `"2025-2026"` style; the second year must be the first plus one, which
//! keeps lexicographic ordering of the stored labels consistent with
//! chronological ordering.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// One of the three school terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum Term {
    One,
    Two,
    Three,
}

impl Term {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Parse lenient user-supplied forms: "2", "Term 2", "term2", "T2".
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let digits = normalized
            .strip_prefix("term")
            .or_else(|| normalized.strip_prefix('t'))
            .unwrap_or(&normalized)
            .trim();
        digits.parse::<i16>().ok().and_then(Self::from_i16)
    }
}

impl TryFrom<i16> for Term {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::from_i16(value).ok_or_else(|| format!("term must be 1, 2 or 3, got {}", value))
    }
}

impl From<Term> for i16 {
    fn from(term: Term) -> i16 {
        term.as_i16()
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Term {}", self.as_i16())
    }
}

/// Academic year, stored as a `"YYYY-YYYY"` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear {
    start_year: i32,
}

impl AcademicYear {
    pub fn from_start_year(start_year: i32) -> Self {
        Self { start_year }
    }

    /// Parse a `"2025-2026"` label. The second year must be the first + 1.
    pub fn parse(label: &str) -> Option<Self> {
        let (first, second) = label.trim().split_once('-')?;
        let start: i32 = first.parse().ok()?;
        let end: i32 = second.parse().ok()?;
        if first.len() != 4 || second.len() != 4 || end != start + 1 {
            return None;
        }
        Some(Self { start_year: start })
    }

    pub fn start_year(self) -> i32 {
        self.start_year
    }

    pub fn label(self) -> String {
        format!("{}-{}", self.start_year, self.start_year + 1)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
            .ok_or_else(|| format!("academic year must look like \"2025-2026\", got \"{}\"", value))
    }
}

impl From<AcademicYear> for String {
    fn from(year: AcademicYear) -> String {
        year.label()
    }
}

impl std::fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Chronological position of a ledger record: academic year first, then term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    pub year: AcademicYear,
    pub term: Term,
}

impl BillingPeriod {
    pub fn new(year: AcademicYear, term: Term) -> Self {
        Self { year, term }
    }

    /// Build from the raw column values of a ledger record.
    pub fn from_columns(academic_year: &str, term: i16) -> Option<Self> {
        Some(Self {
            year: AcademicYear::parse(academic_year)?,
            term: Term::from_i16(term)?,
        })
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.term, self.year)
    }
}

/// Calendar fallback used when a deposit names no term and the student has
/// no ledger records to resolve against: Jan-Apr is Term 1, May-Aug Term 2,
/// Sep-Dec Term 3, in the academic year starting that calendar year.
pub fn period_for_date(date: NaiveDate) -> BillingPeriod {
    let term = match date.month() {
        1..=4 => Term::One,
        5..=8 => Term::Two,
        _ => Term::Three,
    };
    BillingPeriod::new(AcademicYear::from_start_year(date.year()), term)
}
