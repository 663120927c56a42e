// read-only data quality summary over the identity map
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::mapping::IdentityMap;
use crate::core::state::ResolutionState;
use crate::core::types::{EntityId, EventId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub id: EntityId,
    pub name: String,
}

/// One analysis identity and everything folded into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Absorption {
    pub analysis_id: EntityId,
    pub analysis_name: String,
    pub source_count: usize,
    pub sources: Vec<SourceRef>,
    pub first_appearance: NaiveDate,
    pub max_depth: u32,
    /// distinct events at least one source took part in
    pub event_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub original_count: usize,
    pub analysis_count: usize,
    /// analysis identities with more than one source
    pub absorbing_count: usize,
    pub max_absorption: usize,
    pub depth_histogram: BTreeMap<u32, usize>,
    pub state_counts: BTreeMap<ResolutionState, usize>,
    pub halted: Vec<EntityId>,
    pub unresolved: Vec<EntityId>,
    pub top_absorbers: Vec<Absorption>,
}

pub struct DataQualityReporter {
    top_n: usize,
}

impl DataQualityReporter {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Summarize a map. Pure: reads its inputs, returns a fresh report.
    ///
    /// `participation` holds the events each original id has a municipality
    /// record in; an absorption counts the union over its sources.
    pub fn report(
        &self,
        map: &IdentityMap,
        unresolved: &[EntityId],
        participation: &HashMap<EntityId, BTreeSet<EventId>>,
    ) -> QualityReport {
        let mut report = QualityReport {
            original_count: map.len() + unresolved.len(),
            unresolved: unresolved.to_vec(),
            halted: map.halted().map(|m| m.original_id).collect(),
            ..QualityReport::default()
        };

        for m in map.iter() {
            *report.state_counts.entry(m.state).or_default() += 1;
        }
        for m in map.trustworthy() {
            *report.depth_histogram.entry(m.lineage_depth).or_default() += 1;
        }

        let mut absorptions: Vec<Absorption> = map
            .by_analysis()
            .into_iter()
            .map(|(analysis_id, rows)| {
                let named = rows
                    .iter()
                    .min_by_key(|m| (m.lineage_depth, m.original_id))
                    .map(|m| m.analysis_name.clone())
                    .unwrap_or_default();
                Absorption {
                    analysis_id,
                    analysis_name: named,
                    source_count: rows.len(),
                    sources: rows
                        .iter()
                        .map(|m| SourceRef {
                            id: m.original_id,
                            name: m.original_name.clone(),
                        })
                        .collect(),
                    first_appearance: rows
                        .iter()
                        .map(|m| m.first_appearance)
                        .min()
                        .unwrap_or_default(),
                    max_depth: rows.iter().map(|m| m.lineage_depth).max().unwrap_or(0),
                    event_count: rows
                        .iter()
                        .filter_map(|m| participation.get(&m.original_id))
                        .flatten()
                        .collect::<BTreeSet<_>>()
                        .len(),
                }
            })
            .collect();

        report.analysis_count = absorptions.len();
        report.absorbing_count = absorptions.iter().filter(|a| a.source_count > 1).count();
        report.max_absorption = absorptions.iter().map(|a| a.source_count).max().unwrap_or(0);

        absorptions.retain(|a| a.source_count > 1);
        absorptions.sort_by(|a, b| {
            b.source_count
                .cmp(&a.source_count)
                .then(b.max_depth.cmp(&a.max_depth))
                .then(a.analysis_name.cmp(&b.analysis_name))
        });
        absorptions.truncate(self.top_n);
        report.top_absorbers = absorptions;

        report
    }
}
