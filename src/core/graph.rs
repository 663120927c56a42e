// mutation graph: one edge old_id -> new_id per structural mutation
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::classify::ChangeLedger;
use crate::core::types::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum GraphError {
    #[error("entity {id}: ambiguous successors {targets:?} on or after {since}, excluded")]
    AmbiguousSuccessor {
        id: EntityId,
        since: NaiveDate,
        targets: Vec<EntityId>,
    },

    #[error("entity {0} does not appear in the measurement data")]
    UnknownEntity(EntityId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: EntityId,
    pub to: EntityId,
    pub to_name: String,
    pub date: NaiveDate,
}

/// Immutable forward graph plus the split-origin set, built once per ledger.
///
/// Nothing here is mutated after [`MutationGraph::build`], so one instance is
/// shared read-only by every resolver worker.
#[derive(Debug, Clone, Default)]
pub struct MutationGraph {
    out: HashMap<EntityId, Vec<Edge>>,
    split_origins: HashSet<EntityId>,
    conflicting: BTreeSet<EntityId>,
    //id -> (date, new name) of in-place renames, date order
    renames: HashMap<EntityId, Vec<(NaiveDate, String)>>,
}

impl MutationGraph {
    /// Steps:
    /// 1) take every structural record (old_id != new_id) as an edge
    /// 2) collapse duplicates (same target, same date)
    /// 3) mark true split origins: >= 2 distinct targets on one date
    /// 4) note ids whose targets diverge only across dates (resolved per seed)
    /// 5) keep in-place renames so terminals can carry their current name
    pub fn build(ledger: &ChangeLedger) -> Self {
        let mut out: HashMap<EntityId, Vec<Edge>> = HashMap::new();
        let mut renames: HashMap<EntityId, Vec<(NaiveDate, String)>> = HashMap::new();

        for r in ledger.records().iter().filter(|r| r.is_rename) {
            renames
                .entry(r.old_id)
                .or_default()
                .push((r.mutation_date, r.new_name.clone()));
        }

        for r in ledger.records().iter().filter(|r| r.is_structural()) {
            let edges = out.entry(r.old_id).or_default();
            let duplicate = edges
                .iter()
                .any(|e| e.to == r.new_id && e.date == r.mutation_date);
            if !duplicate {
                edges.push(Edge {
                    from: r.old_id,
                    to: r.new_id,
                    to_name: r.new_name.clone(),
                    date: r.mutation_date,
                });
            }
        }

        let mut split_origins = HashSet::new();
        let mut conflicting = BTreeSet::new();

        for (&id, edges) in out.iter_mut() {
            edges.sort_by(|a, b| a.date.cmp(&b.date).then(a.to.cmp(&b.to)));

            let mut per_date: HashMap<NaiveDate, usize> = HashMap::new();
            for e in edges.iter() {
                *per_date.entry(e.date).or_default() += 1;
            }

            if per_date.values().any(|&n| n >= 2) {
                split_origins.insert(id);
                continue;
            }

            let targets: HashSet<EntityId> = edges.iter().map(|e| e.to).collect();
            if targets.len() >= 2 {
                conflicting.insert(id);
            }
        }

        for id in &conflicting {
            warn!(
                entity = id,
                "outgoing mutations diverge across dates; seeds reaching this id may be ambiguous"
            );
        }

        let graph = Self {
            out,
            split_origins,
            conflicting,
            renames,
        };
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            split_origins = graph.split_origins.len(),
            "mutation graph built"
        );
        graph
    }

    pub fn outgoing(&self, id: EntityId) -> &[Edge] {
        self.out.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing edges dated on or after `since`, earliest first.
    pub fn successors_since(
        &self,
        id: EntityId,
        since: NaiveDate,
    ) -> impl Iterator<Item = &Edge> + '_ {
        self.outgoing(id).iter().filter(move |e| e.date >= since)
    }

    pub fn is_split_origin(&self, id: EntityId) -> bool {
        self.split_origins.contains(&id)
    }

    pub fn conflicting_origins(&self) -> &BTreeSet<EntityId> {
        &self.conflicting
    }

    /// Name given to `id` by its latest in-place rename dated on or after
    /// `since`, if any.
    pub fn latest_name(&self, id: EntityId, since: NaiveDate) -> Option<&str> {
        self.renames
            .get(&id)?
            .iter()
            .rev()
            .find(|(date, _)| *date >= since)
            .map(|(_, name)| name.as_str())
    }

    /// Number of ids with at least one outgoing edge.
    pub fn node_count(&self) -> usize {
        self.out.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out.values().map(Vec::len).sum()
    }
}
