// change ledger: parse raw mutation rows and classify them
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::types::{AdminUnit, EntityId, format_date, parse_date};

/// A cell as it comes out of a flattened source table: the same column may hold
/// numbers in one row and text in the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Int(i64),
    Text(String),
}

impl RawField {
    pub fn as_text(&self) -> String {
        match self {
            RawField::Int(n) => n.to_string(),
            RawField::Text(s) => s.trim().to_string(),
        }
    }

    fn as_id(&self) -> Option<EntityId> {
        match self {
            RawField::Int(n) => EntityId::try_from(*n).ok(),
            RawField::Text(s) => s.trim().parse::<EntityId>().ok(),
        }
    }

    fn as_date(&self) -> Option<NaiveDate> {
        parse_date(&self.as_text())
    }
}

impl From<&str> for RawField {
    fn from(s: &str) -> Self {
        RawField::Text(s.to_string())
    }
}

impl From<i64> for RawField {
    fn from(n: i64) -> Self {
        RawField::Int(n)
    }
}

/// One row of the mutation table before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMutation {
    #[serde(default)]
    pub mutation_number: Option<RawField>,
    #[serde(default)]
    pub old_canton: Option<RawField>,
    #[serde(default)]
    pub old_district: Option<RawField>,
    pub old_id: RawField,
    pub old_name: String,
    #[serde(default)]
    pub new_canton: Option<RawField>,
    #[serde(default)]
    pub new_district: Option<RawField>,
    pub new_id: RawField,
    pub new_name: String,
    pub mutation_date: RawField,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum LedgerIssue {
    #[error("mutation row {row}: malformed {field} {value:?}, record skipped")]
    MalformedMutationRecord {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// Category of a record, first match wins in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Merger,
    Split,
    Rename,
    Reassignment,
    Unchanged,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Merger => "merger",
            MutationKind::Split => "split",
            MutationKind::Rename => "rename",
            MutationKind::Reassignment => "reassignment",
            MutationKind::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation_number: Option<String>,
    pub old_id: EntityId,
    pub old_name: String,
    pub old_admin_unit: AdminUnit,
    pub new_id: EntityId,
    pub new_name: String,
    pub new_admin_unit: AdminUnit,
    pub mutation_date: NaiveDate,
    pub is_merger: bool,
    pub is_split: bool,
    pub is_rename: bool,
    pub is_reassignment: bool,
}

impl MutationRecord {
    /// Unclassified record; flags are filled in by [`classify`].
    pub fn new(
        old_id: EntityId,
        old_name: impl Into<String>,
        new_id: EntityId,
        new_name: impl Into<String>,
        mutation_date: NaiveDate,
    ) -> Self {
        Self {
            mutation_number: None,
            old_id,
            old_name: old_name.into(),
            old_admin_unit: AdminUnit::default(),
            new_id,
            new_name: new_name.into(),
            new_admin_unit: AdminUnit::default(),
            mutation_date,
            is_merger: false,
            is_split: false,
            is_rename: false,
            is_reassignment: false,
        }
    }

    pub fn with_admin_units(mut self, old: AdminUnit, new: AdminUnit) -> Self {
        self.old_admin_unit = old;
        self.new_admin_unit = new;
        self
    }

    /// Only id changes create edges in the mutation graph.
    pub fn is_structural(&self) -> bool {
        self.old_id != self.new_id
    }

    pub fn category(&self) -> MutationKind {
        if self.is_merger {
            MutationKind::Merger
        } else if self.is_split {
            MutationKind::Split
        } else if self.is_rename {
            MutationKind::Rename
        } else if self.is_reassignment {
            MutationKind::Reassignment
        } else {
            MutationKind::Unchanged
        }
    }
}

fn optional_text(field: &Option<RawField>) -> Option<String> {
    field
        .as_ref()
        .map(RawField::as_text)
        .filter(|s| !s.is_empty())
}

/// Validate one raw row. Ids and the date must parse; nothing is defaulted.
pub fn parse_mutation(row: usize, raw: &RawMutation) -> Result<MutationRecord, LedgerIssue> {
    let malformed = |field: &'static str, value: &RawField| LedgerIssue::MalformedMutationRecord {
        row,
        field,
        value: value.as_text(),
    };

    let old_id = raw.old_id.as_id().ok_or_else(|| malformed("old_id", &raw.old_id))?;
    let new_id = raw.new_id.as_id().ok_or_else(|| malformed("new_id", &raw.new_id))?;
    let mutation_date = raw
        .mutation_date
        .as_date()
        .ok_or_else(|| malformed("mutation_date", &raw.mutation_date))?;

    let old_unit = AdminUnit::new(optional_text(&raw.old_canton), optional_text(&raw.old_district));
    let new_unit = AdminUnit::new(optional_text(&raw.new_canton), optional_text(&raw.new_district));

    let mut record = MutationRecord::new(
        old_id,
        raw.old_name.trim(),
        new_id,
        raw.new_name.trim(),
        mutation_date,
    )
    .with_admin_units(old_unit, new_unit);
    record.mutation_number = optional_text(&raw.mutation_number);
    Ok(record)
}

/// Recompute every flag from the whole set of records.
///
/// - merger        : >= 2 records share the `new_id`
/// - split         : >= 2 records share the `old_id`
/// - rename        : id unchanged, name changed
/// - reassignment  : canton or district changed
///
/// Pure: the input is untouched, a flagged copy is returned in the same order.
pub fn classify(records: &[MutationRecord]) -> Vec<MutationRecord> {
    let mut by_new: HashMap<EntityId, usize> = HashMap::new();
    let mut by_old: HashMap<EntityId, usize> = HashMap::new();
    for r in records {
        *by_new.entry(r.new_id).or_default() += 1;
        *by_old.entry(r.old_id).or_default() += 1;
    }

    records
        .iter()
        .map(|r| {
            let mut out = r.clone();
            out.is_merger = by_new.get(&r.new_id).copied().unwrap_or(0) >= 2;
            out.is_split = by_old.get(&r.old_id).copied().unwrap_or(0) >= 2;
            out.is_rename = r.old_id == r.new_id && r.old_name != r.new_name;
            out.is_reassignment = r.old_admin_unit.differs_from(&r.new_admin_unit);
            out
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub structural: usize,
    pub mergers: usize,
    pub splits: usize,
    pub renames: usize,
    pub reassignments: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

/// Ordered, classified store of administrative mutations.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    records: Vec<MutationRecord>,
    issues: Vec<LedgerIssue>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<MutationRecord>) -> Self {
        let mut ledger = Self::new();
        ledger.records = records;
        ledger.reclassify();
        ledger
    }

    pub fn from_raw(rows: &[RawMutation]) -> Self {
        let mut ledger = Self::new();
        ledger.ingest(rows);
        ledger
    }

    /// Append raw rows. Malformed rows are reported and dropped, the rest are
    /// merged in and the whole ledger is reclassified (flags depend on all rows).
    pub fn ingest(&mut self, rows: &[RawMutation]) {
        let offset = self.records.len() + self.issues.len();
        for (i, raw) in rows.iter().enumerate() {
            match parse_mutation(offset + i, raw) {
                Ok(record) => self.records.push(record),
                Err(issue) => {
                    warn!("{}", issue);
                    self.issues.push(issue);
                }
            }
        }
        self.reclassify();

        let s = self.summary();
        info!(
            total = s.total,
            mergers = s.mergers,
            splits = s.splits,
            renames = s.renames,
            reassignments = s.reassignments,
            skipped = self.issues.len(),
            "change ledger classified"
        );
        if let (Some(first), Some(last)) = (s.earliest, s.latest) {
            debug!("mutations span {} .. {}", format_date(first), format_date(last));
        }
    }

    fn reclassify(&mut self) {
        //stable sort keeps source order within one date
        self.records.sort_by_key(|r| r.mutation_date);
        self.records = classify(&self.records);
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    pub fn issues(&self) -> &[LedgerIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record in which `id` appears on either side, in date order.
    pub fn timeline(&self, id: EntityId) -> impl Iterator<Item = &MutationRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| r.old_id == id || r.new_id == id)
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut s = LedgerSummary {
            total: self.records.len(),
            ..LedgerSummary::default()
        };
        for r in &self.records {
            s.structural += usize::from(r.is_structural());
            s.mergers += usize::from(r.is_merger);
            s.splits += usize::from(r.is_split);
            s.renames += usize::from(r.is_rename);
            s.reassignments += usize::from(r.is_reassignment);
        }
        s.earliest = self.records.first().map(|r| r.mutation_date);
        s.latest = self.records.last().map(|r| r.mutation_date);
        s
    }
}
