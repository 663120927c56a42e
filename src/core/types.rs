// shared ids, levels and additive count vectors
use std::fmt;
use std::iter::Sum;
use std::ops::AddAssign;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Administrative unit number (BFS number for municipalities, districts and cantons).
pub type EntityId = u32;

/// Ballot / proposal identifier.
pub type EventId = u32;

/// All dates on the wire are `YYYYMMDD`.
pub const DATE_FORMAT: &str = "%Y%m%d";

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    Municipality,
    District,
    Canton,
}

impl GeoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::Municipality => "municipality",
            GeoLevel::District => "district",
            GeoLevel::Canton => "canton",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent placement of a municipality. Either part may be unknown in older rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminUnit {
    pub canton: Option<String>,
    pub district: Option<String>,
}

impl AdminUnit {
    pub fn new(canton: Option<String>, district: Option<String>) -> Self {
        Self { canton, district }
    }

    /// Reassignment only counts when both sides are known and differ.
    pub fn differs_from(&self, other: &AdminUnit) -> bool {
        fn known_and_different(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a != b)
        }
        known_and_different(&self.canton, &other.canton)
            || known_and_different(&self.district, &other.district)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountField {
    Yes,
    No,
    Valid,
    Cast,
    Eligible,
}

impl CountField {
    pub const ALL: [CountField; 5] = [
        CountField::Yes,
        CountField::No,
        CountField::Valid,
        CountField::Cast,
        CountField::Eligible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CountField::Yes => "yes",
            CountField::No => "no",
            CountField::Valid => "valid",
            CountField::Cast => "cast",
            CountField::Eligible => "eligible",
        }
    }
}

impl fmt::Display for CountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The additive fields of one measurement. Percentages are never stored here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub yes: u64,
    pub no: u64,
    pub valid: u64,
    pub cast: u64,
    pub eligible: u64,
}

impl Counts {
    pub fn new(yes: u64, no: u64, valid: u64, cast: u64, eligible: u64) -> Self {
        Self { yes, no, valid, cast, eligible }
    }

    pub fn get(&self, field: CountField) -> u64 {
        match field {
            CountField::Yes => self.yes,
            CountField::No => self.no,
            CountField::Valid => self.valid,
            CountField::Cast => self.cast,
            CountField::Eligible => self.eligible,
        }
    }

    /// yes / valid, in percent
    pub fn yes_share(&self) -> Option<f64> {
        percentage(self.yes, self.valid)
    }

    /// cast / eligible, in percent
    pub fn turnout(&self) -> Option<f64> {
        percentage(self.cast, self.eligible)
    }
}

impl AddAssign<&Counts> for Counts {
    fn add_assign(&mut self, rhs: &Counts) {
        self.yes += rhs.yes;
        self.no += rhs.no;
        self.valid += rhs.valid;
        self.cast += rhs.cast;
        self.eligible += rhs.eligible;
    }
}

impl<'a> Sum<&'a Counts> for Counts {
    fn sum<I: Iterator<Item = &'a Counts>>(iter: I) -> Self {
        let mut total = Counts::default();
        for c in iter {
            total += c;
        }
        total
    }
}

/// `100 * numerator / denominator` rounded to two decimals; `None` on a zero denominator.
pub fn percentage(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    let pct = 100.0 * numerator as f64 / denominator as f64;
    Some((pct * 100.0).round() / 100.0)
}
