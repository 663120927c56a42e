// lineage resolution: walk each seed forward through the mutation graph
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::graph::{Edge, GraphError, MutationGraph};
use crate::core::mapping::{IdentityMap, IdentityMapping};
use crate::core::measurement::Entity;
use crate::core::state::ResolutionState;
use crate::core::types::EntityId;

/// Hard cap on edges followed per seed.
pub const DEFAULT_MAX_STEPS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub max_steps: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ResolutionIssue {
    #[error("entity {id}: halted after {steps} steps at {stopped_at}, excluded pending review")]
    CycleOrDepthExceeded {
        id: EntityId,
        steps: u32,
        stopped_at: EntityId,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Full outcome for one seed, including the edges it followed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub original_id: EntityId,
    pub original_name: String,
    pub analysis_id: EntityId,
    pub analysis_name: String,
    pub first_appearance: NaiveDate,
    pub depth: u32,
    pub state: ResolutionState,
    pub path: Vec<Edge>,
}

impl Resolution {
    pub fn mapping(&self) -> IdentityMapping {
        IdentityMapping {
            original_id: self.original_id,
            original_name: self.original_name.clone(),
            analysis_id: self.analysis_id,
            analysis_name: self.analysis_name.clone(),
            first_appearance: self.first_appearance,
            lineage_depth: self.depth,
            state: self.state,
        }
    }
}

/// Result of resolving every seed of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub map: IdentityMap,
    pub issues: Vec<ResolutionIssue>,
    /// seeds with no mapping row at all (ambiguous successors)
    pub unresolved: Vec<EntityId>,
}

impl ResolutionOutcome {
    pub fn halted(&self) -> Vec<EntityId> {
        self.map.halted().map(|m| m.original_id).collect()
    }
}

pub struct LineageResolver<'g> {
    graph: &'g MutationGraph,
    config: ResolverConfig,
}

impl<'g> LineageResolver<'g> {
    pub fn new(graph: &'g MutationGraph, config: ResolverConfig) -> Self {
        Self { graph, config }
    }

    /// The single successor of `id` for a seed first seen on `since`.
    ///
    /// Edges dated before `since` are history the seed never lived through.
    /// Several distinct qualifying targets that are not a simultaneous split
    /// cannot be resolved deterministically and are an error.
    fn next_edge(&self, id: EntityId, since: NaiveDate) -> Result<Option<&'g Edge>, GraphError> {
        let graph: &'g MutationGraph = self.graph;
        let mut qualifying = graph.successors_since(id, since);
        let Some(first) = qualifying.next() else {
            return Ok(None);
        };

        let mut targets: Vec<EntityId> = vec![first.to];
        for e in qualifying {
            if !targets.contains(&e.to) {
                targets.push(e.to);
            }
        }

        if targets.len() > 1 {
            targets.sort_unstable();
            return Err(GraphError::AmbiguousSuccessor { id, since, targets });
        }
        Ok(Some(first))
    }

    /// Resolve one seed with a bounded iterative walk.
    ///
    /// Steps:
    /// 1) start at the seed, depth 0, state ACTIVE
    /// 2) a true split origin stops the walk (SPLIT_TERMINAL)
    /// 3) no qualifying outgoing edge stops the walk (NO_EDGE_TERMINAL)
    /// 4) otherwise follow the edge; at `max_steps` followed edges with one
    ///    more still pending, stop as HALTED instead
    ///
    /// Each pass either terminates or increments `depth`, so the loop runs at
    /// most `max_steps + 1` times whatever the shape of the graph.
    ///
    /// The terminal takes the name of its latest in-place rename dated on or
    /// after the day the walk reached it.
    pub fn resolve(&self, seed: &Entity) -> Result<Resolution, GraphError> {
        let mut current = seed.id;
        let mut name = seed.name.clone();
        let mut reached = seed.first_seen;
        let mut depth: u32 = 0;
        let mut path: Vec<Edge> = Vec::new();
        let mut state = ResolutionState::Active;

        while state == ResolutionState::Active {
            if self.graph.is_split_origin(current) {
                state = ResolutionState::SplitTerminal;
                continue;
            }

            match self.next_edge(current, seed.first_seen)? {
                None => state = ResolutionState::NoEdgeTerminal,
                Some(_) if depth >= self.config.max_steps => state = ResolutionState::Halted,
                Some(edge) => {
                    current = edge.to;
                    name = edge.to_name.clone();
                    reached = edge.date;
                    depth += 1;
                    path.push(edge.clone());
                }
            }
        }

        if let Some(renamed) = self.graph.latest_name(current, reached) {
            name = renamed.to_string();
        }

        debug!(
            seed = seed.id,
            analysis = current,
            depth,
            state = %state,
            "seed resolved"
        );

        Ok(Resolution {
            original_id: seed.id,
            original_name: seed.name.clone(),
            analysis_id: current,
            analysis_name: name,
            first_appearance: seed.first_seen,
            depth,
            state,
            path,
        })
    }

    /// Resolve every seed in parallel against the shared graph and fold the
    /// rows into one identity map. Faults are collected, never fatal.
    pub fn resolve_all(&self, seeds: &[Entity]) -> ResolutionOutcome {
        let results: Vec<(EntityId, Result<Resolution, GraphError>)> = seeds
            .par_iter()
            .map(|seed| (seed.id, self.resolve(seed)))
            .collect();

        let mut outcome = ResolutionOutcome::default();
        for (id, result) in results {
            match result {
                Ok(resolution) => {
                    if resolution.state.is_fault() {
                        let issue = ResolutionIssue::CycleOrDepthExceeded {
                            id,
                            steps: resolution.depth,
                            stopped_at: resolution.analysis_id,
                        };
                        warn!("{}", issue);
                        outcome.issues.push(issue);
                    }
                    //seeds are distinct ids, so an overwrite here is a caller bug
                    if let Err(e) = outcome.map.insert(resolution.mapping()) {
                        warn!("{}", e);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    outcome.unresolved.push(id);
                    outcome.issues.push(ResolutionIssue::Graph(e));
                }
            }
        }

        info!(
            seeds = seeds.len(),
            mapped = outcome.map.len(),
            halted = outcome.map.halted().count(),
            unresolved = outcome.unresolved.len(),
            "lineage resolved"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::{ChangeLedger, MutationRecord};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mk_mutation(old_id: u32, old_name: &str, new_id: u32, new_name: &str, when: NaiveDate) -> MutationRecord {
        MutationRecord::new(old_id, old_name, new_id, new_name, when)
    }

    fn mk_graph(records: Vec<MutationRecord>) -> MutationGraph {
        MutationGraph::build(&ChangeLedger::from_records(records))
    }

    fn mk_seed(id: u32, name: &str, first_seen: NaiveDate) -> Entity {
        Entity {
            id,
            name: name.to_string(),
            first_seen,
            last_seen: first_seen,
            event_count: 1,
        }
    }

    fn chain_graph() -> MutationGraph {
        mk_graph(vec![
            mk_mutation(1001, "OldTown", 2002, "NewTown", date(2010, 1, 1)),
            mk_mutation(2002, "NewTown", 3003, "Capital", date(2015, 1, 1)),
        ])
    }

    #[test]
    fn follows_merger_chain_to_its_end() {
        let g = chain_graph();
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(1001, "OldTown", date(2005, 6, 5))).unwrap();

        assert_eq!(res.analysis_id, 3003);
        assert_eq!(res.analysis_name, "Capital");
        assert_eq!(res.depth, 2);
        assert_eq!(res.state, ResolutionState::NoEdgeTerminal);
        assert_eq!(res.path.len(), 2);
        assert_eq!(res.path[0].to, 2002);
    }

    #[test]
    fn resolving_twice_is_identical() {
        let g = chain_graph();
        let r = LineageResolver::new(&g, ResolverConfig::default());
        let seed = mk_seed(1001, "OldTown", date(2005, 6, 5));

        let a = r.resolve(&seed).unwrap();
        let b = r.resolve(&seed).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn edges_before_first_appearance_are_ignored() {
        let g = chain_graph();
        let r = LineageResolver::new(&g, ResolverConfig::default());

        // first seen after the 2010 merger already happened: nothing to follow
        let res = r.resolve(&mk_seed(1001, "OldTown", date(2011, 1, 1))).unwrap();
        assert_eq!(res.analysis_id, 1001);
        assert_eq!(res.depth, 0);

        // the date filter stays anchored on the seed, not on the last hop
        let mid = r.resolve(&mk_seed(2002, "NewTown", date(2012, 1, 1))).unwrap();
        assert_eq!(mid.analysis_id, 3003);
        assert_eq!(mid.depth, 1);
    }

    #[test]
    fn mutation_on_first_appearance_day_is_followed() {
        let g = chain_graph();
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(2002, "NewTown", date(2015, 1, 1))).unwrap();
        assert_eq!(res.analysis_id, 3003);
    }

    #[test]
    fn true_split_origin_never_continues() {
        let d = date(2013, 1, 1);
        let g = mk_graph(vec![
            mk_mutation(3, "Whole", 30, "North", d),
            mk_mutation(3, "Whole", 31, "South", d),
            mk_mutation(30, "North", 300, "Greater North", date(2018, 1, 1)),
        ]);
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(3, "Whole", date(2000, 1, 1))).unwrap();

        assert_eq!(res.state, ResolutionState::SplitTerminal);
        assert_eq!(res.analysis_id, 3);
        assert_eq!(res.depth, 0);
        assert!(res.path.is_empty());

        // a successor of the split keeps merging normally
        let north = r.resolve(&mk_seed(30, "North", date(2014, 1, 1))).unwrap();
        assert_eq!(north.analysis_id, 300);
    }

    #[test]
    fn chain_stops_when_it_reaches_a_split_origin() {
        let g = mk_graph(vec![
            mk_mutation(1, "Tiny", 2, "Mid", date(2005, 1, 1)),
            mk_mutation(2, "Mid", 20, "Mid-East", date(2010, 1, 1)),
            mk_mutation(2, "Mid", 21, "Mid-West", date(2010, 1, 1)),
        ]);
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(1, "Tiny", date(2000, 1, 1))).unwrap();

        assert_eq!(res.analysis_id, 2);
        assert_eq!(res.depth, 1);
        assert_eq!(res.state, ResolutionState::SplitTerminal);
    }

    #[test]
    fn terminal_carries_its_current_name() {
        let g = mk_graph(vec![mk_mutation(371, "Biel (BE)", 371, "Biel/Bienne", date(2005, 1, 1))]);
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(371, "Biel (BE)", date(2000, 9, 24))).unwrap();
        assert_eq!(res.analysis_id, 371);
        assert_eq!(res.depth, 0);
        assert_eq!(res.original_name, "Biel (BE)");
        assert_eq!(res.analysis_name, "Biel/Bienne");

        // renamed before it was first seen: the observed name is already current
        let late = r.resolve(&mk_seed(371, "Biel/Bienne", date(2012, 3, 11))).unwrap();
        assert_eq!(late.analysis_name, "Biel/Bienne");
    }

    #[test]
    fn rename_after_merger_reaches_merged_identity() {
        let g = mk_graph(vec![
            mk_mutation(1001, "OldTown", 2002, "NewTown", date(2010, 1, 1)),
            mk_mutation(2002, "NewTown", 2002, "New Town", date(2013, 1, 1)),
        ]);
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let res = r.resolve(&mk_seed(1001, "OldTown", date(2005, 6, 5))).unwrap();

        assert_eq!(res.analysis_id, 2002);
        assert_eq!(res.analysis_name, "New Town");
    }

    #[test]
    fn cycle_halts_within_bound() {
        let d = date(2010, 1, 1);
        let g = mk_graph(vec![
            mk_mutation(1, "A", 2, "B", d),
            mk_mutation(2, "B", 1, "A", d),
        ]);
        let config = ResolverConfig { max_steps: 10 };
        let r = LineageResolver::new(&g, config);

        let res = r.resolve(&mk_seed(1, "A", date(2000, 1, 1))).unwrap();

        assert_eq!(res.state, ResolutionState::Halted);
        assert_eq!(res.depth, config.max_steps);
        assert!(res.path.len() as u32 <= config.max_steps + 1);
    }

    #[test]
    fn long_chain_reports_depth_fault_instead_of_truncating() {
        let d = date(2010, 1, 1);
        let records = (0..5).map(|i| mk_mutation(i, "x", i + 1, "y", d)).collect();
        let g = mk_graph(records);

        let tight = LineageResolver::new(&g, ResolverConfig { max_steps: 3 });
        let res = tight.resolve(&mk_seed(0, "x", date(2000, 1, 1))).unwrap();
        assert_eq!(res.state, ResolutionState::Halted);
        assert_eq!(res.depth, 3);

        // exactly enough room is not a fault
        let exact = LineageResolver::new(&g, ResolverConfig { max_steps: 5 });
        let res = exact.resolve(&mk_seed(0, "x", date(2000, 1, 1))).unwrap();
        assert_eq!(res.state, ResolutionState::NoEdgeTerminal);
        assert_eq!(res.analysis_id, 5);
    }

    #[test]
    fn diverging_sequential_edges_are_ambiguous_only_when_both_qualify() {
        let g = mk_graph(vec![
            mk_mutation(4, "D", 40, "D1", date(2000, 1, 1)),
            mk_mutation(4, "D", 41, "D2", date(2008, 1, 1)),
        ]);
        let r = LineageResolver::new(&g, ResolverConfig::default());

        let err = r.resolve(&mk_seed(4, "D", date(1995, 1, 1))).unwrap_err();
        match err {
            GraphError::AmbiguousSuccessor { id, targets, .. } => {
                assert_eq!(id, 4);
                assert_eq!(targets, vec![40, 41]);
            }
            other => panic!("unexpected error: {}", other),
        }

        // only the later edge is in range: single valued again
        let res = r.resolve(&mk_seed(4, "D", date(2005, 1, 1))).unwrap();
        assert_eq!(res.analysis_id, 41);
    }

    #[test]
    fn resolve_all_collects_faults_without_aborting() {
        let d = date(2010, 1, 1);
        let g = mk_graph(vec![
            mk_mutation(1001, "OldTown", 2002, "NewTown", d),
            mk_mutation(7, "Loop", 8, "Pool", d),
            mk_mutation(8, "Pool", 7, "Loop", d),
            mk_mutation(4, "D", 40, "D1", date(2000, 1, 1)),
            mk_mutation(4, "D", 41, "D2", date(2008, 1, 1)),
        ]);
        let r = LineageResolver::new(&g, ResolverConfig::default());
        let early = date(1990, 1, 1);
        let seeds = vec![
            mk_seed(1001, "OldTown", early),
            mk_seed(2002, "NewTown", date(2011, 1, 1)),
            mk_seed(7, "Loop", early),
            mk_seed(4, "D", early),
        ];

        let outcome = r.resolve_all(&seeds);

        assert_eq!(outcome.map.len(), 3);
        assert_eq!(outcome.unresolved, vec![4]);
        assert_eq!(outcome.halted(), vec![7]);
        assert_eq!(outcome.issues.len(), 2);
        assert!(outcome.issues.iter().any(|i| matches!(
            i,
            ResolutionIssue::CycleOrDepthExceeded { id: 7, .. }
        )));
        assert_eq!(outcome.map.get(1001).unwrap().analysis_id, 2002);
        assert_eq!(outcome.map.get(2002).unwrap().analysis_id, 2002);
    }
}
