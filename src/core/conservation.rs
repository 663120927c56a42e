// conservation: aggregated totals must equal the originals they replace
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::core::aggregate::AggregatedMeasurement;
use crate::core::measurement::{MeasurementRecord, MeasurementSet};
use crate::core::types::{CountField, Counts, EntityId, EventId, GeoLevel};

/// Event-level total that changed through aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("event {event_id}: {field} original {original} != aggregated {aggregated} (delta {delta})")]
pub struct ConservationMismatch {
    pub event_id: EventId,
    pub field: CountField,
    pub original: u64,
    pub aggregated: u64,
    pub delta: i64,
}

/// A single aggregated row that does not add up on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum GroupViolation {
    #[error("event {event_id}, analysis {analysis_id}: {field} is {aggregated}, sources sum to {expected}")]
    SourceSum {
        event_id: EventId,
        analysis_id: EntityId,
        field: CountField,
        expected: u64,
        aggregated: u64,
    },

    #[error("event {event_id}: original {original_id} counted under {analysis_ids:?}")]
    DoubleCounted {
        event_id: EventId,
        original_id: EntityId,
        analysis_ids: Vec<EntityId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCheck {
    pub event_id: EventId,
    pub verdict: Verdict,
    pub original: Counts,
    pub aggregated: Counts,
    pub mismatches: Vec<ConservationMismatch>,
    pub group_violations: Vec<GroupViolation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConservationReport {
    pub checks: BTreeMap<EventId, EventCheck>,
}

impl ConservationReport {
    pub fn is_degraded(&self) -> bool {
        self.checks.values().any(|c| c.verdict == Verdict::Degraded)
    }

    pub fn is_publishable(&self, event_id: EventId) -> bool {
        self.checks
            .get(&event_id)
            .is_some_and(|c| c.verdict == Verdict::Verified)
    }

    pub fn publishable_events(&self) -> BTreeSet<EventId> {
        self.checks
            .values()
            .filter(|c| c.verdict == Verdict::Verified)
            .map(|c| c.event_id)
            .collect()
    }

    pub fn withheld_events(&self) -> BTreeSet<EventId> {
        self.checks
            .values()
            .filter(|c| c.verdict == Verdict::Degraded)
            .map(|c| c.event_id)
            .collect()
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ConservationMismatch> + '_ {
        self.checks.values().flat_map(|c| c.mismatches.iter())
    }
}

/// Second, independent pass over the same snapshot the aggregation used.
///
/// It never looks at the identity map: the original side is recomputed from
/// the raw municipality records, the aggregated side from the output rows.
pub struct ConservationValidator;

impl ConservationValidator {
    pub fn validate(
        measurements: &MeasurementSet,
        aggregates: &[AggregatedMeasurement],
    ) -> ConservationReport {
        let originals = measurements.by_event(GeoLevel::Municipality);

        let mut aggregated: BTreeMap<EventId, Vec<&AggregatedMeasurement>> = BTreeMap::new();
        for row in aggregates {
            aggregated.entry(row.event_id).or_default().push(row);
        }

        let mut events: BTreeSet<EventId> = originals.keys().copied().collect();
        events.extend(aggregated.keys().copied());
        let events: Vec<EventId> = events.into_iter().collect();

        let checks: Vec<EventCheck> = events
            .par_iter()
            .map(|&event_id| {
                let records = originals.get(&event_id).map(Vec::as_slice).unwrap_or(&[]);
                let rows = aggregated.get(&event_id).map(Vec::as_slice).unwrap_or(&[]);
                Self::check_event(event_id, records, rows)
            })
            .collect();

        let report = ConservationReport {
            checks: checks.into_iter().map(|c| (c.event_id, c)).collect(),
        };

        for m in report.mismatches() {
            error!("{}", m);
        }
        for c in report.checks.values() {
            for v in &c.group_violations {
                error!("{}", v);
            }
        }
        info!(
            events = report.checks.len(),
            withheld = report.withheld_events().len(),
            "conservation checked"
        );
        report
    }

    /// Compare one event field by field, then check each row against its sources.
    pub fn check_event(
        event_id: EventId,
        records: &[&MeasurementRecord],
        rows: &[&AggregatedMeasurement],
    ) -> EventCheck {
        let original: Counts = records.iter().map(|r| &r.counts).sum();
        let aggregated: Counts = rows.iter().map(|r| &r.counts).sum();

        let mismatches: Vec<ConservationMismatch> = CountField::ALL
            .iter()
            .filter(|&&f| original.get(f) != aggregated.get(f))
            .map(|&f| ConservationMismatch {
                event_id,
                field: f,
                original: original.get(f),
                aggregated: aggregated.get(f),
                delta: aggregated.get(f) as i64 - original.get(f) as i64,
            })
            .collect();

        let group_violations = Self::check_groups(event_id, records, rows);

        let verdict = if mismatches.is_empty() && group_violations.is_empty() {
            Verdict::Verified
        } else {
            Verdict::Degraded
        };

        EventCheck {
            event_id,
            verdict,
            original,
            aggregated,
            mismatches,
            group_violations,
        }
    }

    fn check_groups(
        event_id: EventId,
        records: &[&MeasurementRecord],
        rows: &[&AggregatedMeasurement],
    ) -> Vec<GroupViolation> {
        let by_entity: HashMap<EntityId, &Counts> =
            records.iter().map(|r| (r.entity_id, &r.counts)).collect();

        let mut violations = Vec::new();
        let mut owners: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();

        for row in rows {
            let expected: Counts = row
                .source_ids
                .iter()
                .filter_map(|id| by_entity.get(id).copied())
                .sum();
            for f in CountField::ALL {
                if expected.get(f) != row.counts.get(f) {
                    violations.push(GroupViolation::SourceSum {
                        event_id,
                        analysis_id: row.analysis_id,
                        field: f,
                        expected: expected.get(f),
                        aggregated: row.counts.get(f),
                    });
                }
            }
            for &id in &row.source_ids {
                owners.entry(id).or_default().push(row.analysis_id);
            }
        }

        for (original_id, analysis_ids) in owners {
            if analysis_ids.len() > 1 {
                violations.push(GroupViolation::DoubleCounted {
                    event_id,
                    original_id,
                    analysis_ids,
                });
            }
        }
        violations
    }
}
