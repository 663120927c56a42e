// aggregation: fold municipality records onto their analysis identity
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AggregationConfig;
use crate::core::mapping::IdentityMap;
use crate::core::measurement::{MeasurementRecord, MeasurementSet};
use crate::core::types::{Counts, EntityId, EventId, GeoLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMeasurement {
    pub event_id: EventId,
    pub analysis_id: EntityId,
    pub analysis_name: String,
    #[serde(flatten)]
    pub counts: Counts,
    /// yes / valid, recomputed from the sums
    pub yes_pct: Option<f64>,
    /// cast / eligible, recomputed from the sums
    pub turnout_pct: Option<f64>,
    pub source_count: usize,
    pub source_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// resolution hit the step bound
    Halted,
    /// no mapping row (ambiguous successors)
    Unresolved,
}

/// A record left out of the aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub event_id: EventId,
    pub entity_id: EntityId,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOutput {
    /// ordered by event date, event id, analysis id
    pub rows: Vec<AggregatedMeasurement>,
    pub exclusions: Vec<Exclusion>,
}

impl AggregationOutput {
    pub fn get(&self, event_id: EventId, analysis_id: EntityId) -> Option<&AggregatedMeasurement> {
        self.rows
            .iter()
            .find(|r| r.event_id == event_id && r.analysis_id == analysis_id)
    }
}

#[derive(Default)]
struct Group {
    counts: Counts,
    sources: BTreeSet<EntityId>,
    //(depth, original id, name): the least-travelled source names the group
    label: Option<(u32, EntityId, String)>,
}

pub struct AggregationEngine<'a> {
    map: &'a IdentityMap,
    config: AggregationConfig,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(map: &'a IdentityMap, config: AggregationConfig) -> Self {
        Self { map, config }
    }

    /// Aggregate every event. Events are independent and run in parallel;
    /// only municipality-level records take part.
    pub fn aggregate(&self, measurements: &MeasurementSet) -> AggregationOutput {
        let buckets = measurements.by_event(GeoLevel::Municipality);
        let order: Vec<EventId> = measurements
            .events()
            .iter()
            .map(|e| e.id)
            .filter(|id| buckets.contains_key(id))
            .collect();

        let per_event: Vec<(Vec<AggregatedMeasurement>, Vec<Exclusion>)> = order
            .par_iter()
            .map(|id| self.aggregate_event(*id, &buckets[id]))
            .collect();

        let mut out = AggregationOutput::default();
        for (rows, exclusions) in per_event {
            out.rows.extend(rows);
            out.exclusions.extend(exclusions);
        }

        if !out.exclusions.is_empty() {
            warn!(
                excluded = out.exclusions.len(),
                "records left out of aggregation"
            );
        }
        info!(
            events = order.len(),
            rows = out.rows.len(),
            "aggregation complete"
        );
        out
    }

    /// Sum one event's records per analysis id.
    ///
    /// Ratios come from the summed numerator and denominator, never from the
    /// sources' own percentages. An id mapped but absent from this event just
    /// contributes nothing.
    pub fn aggregate_event(
        &self,
        event_id: EventId,
        records: &[&MeasurementRecord],
    ) -> (Vec<AggregatedMeasurement>, Vec<Exclusion>) {
        let policy = self.config.halted_policy;
        let mut groups: BTreeMap<EntityId, Group> = BTreeMap::new();
        let mut exclusions = Vec::new();

        for r in records {
            let Some(target) = self.map.target_for(r.entity_id, policy) else {
                let reason = if self.map.contains(r.entity_id) {
                    ExclusionReason::Halted
                } else {
                    ExclusionReason::Unresolved
                };
                exclusions.push(Exclusion {
                    event_id,
                    entity_id: r.entity_id,
                    reason,
                });
                continue;
            };

            let group = groups.entry(target).or_default();
            group.counts += &r.counts;
            group.sources.insert(r.entity_id);

            let label = match self.map.get(r.entity_id) {
                Some(m) if m.analysis_id == target => {
                    (m.lineage_depth, m.original_id, m.analysis_name.clone())
                }
                Some(m) => (0, m.original_id, m.original_name.clone()),
                None => (0, r.entity_id, r.entity_name.clone()),
            };
            if group.label.as_ref().is_none_or(|current| label < *current) {
                group.label = Some(label);
            }
        }

        let rows = groups
            .into_iter()
            .map(|(analysis_id, g)| {
                let source_ids: Vec<EntityId> = g.sources.into_iter().collect();
                AggregatedMeasurement {
                    event_id,
                    analysis_id,
                    analysis_name: g.label.map(|(_, _, name)| name).unwrap_or_default(),
                    counts: g.counts,
                    yes_pct: g.counts.yes_share(),
                    turnout_pct: g.counts.turnout(),
                    source_count: source_ids.len(),
                    source_ids,
                }
            })
            .collect();

        (rows, exclusions)
    }
}
