// identity map: original id -> analysis id
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HaltedPolicy;
use crate::core::state::ResolutionState;
use crate::core::types::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub original_id: EntityId,
    pub original_name: String,
    pub analysis_id: EntityId,
    pub analysis_name: String,
    pub first_appearance: NaiveDate,
    pub lineage_depth: u32,
    pub state: ResolutionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("original {original_id} already maps to {existing}, refusing {requested}")]
    AlreadyMapped {
        original_id: EntityId,
        existing: EntityId,
        requested: EntityId,
    },
}

/// Derived table `{original_id -> analysis_id}`.
///
/// 1. each original id maps to at most one analysis id (no silent overwrite)
/// 2. many originals may share one analysis id (that is a merger)
/// 3. re-inserting an identical target is a no-op
///
/// Rows that halted are kept for review but never handed out by
/// [`IdentityMap::target_for`] unless the policy says so.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    rows: BTreeMap<EntityId, IdentityMapping>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mapping: IdentityMapping) -> Result<(), MappingError> {
        match self.rows.get(&mapping.original_id) {
            None => {
                self.rows.insert(mapping.original_id, mapping);
                Ok(())
            }
            Some(old) if old.analysis_id == mapping.analysis_id => Ok(()),
            Some(old) => Err(MappingError::AlreadyMapped {
                original_id: mapping.original_id,
                existing: old.analysis_id,
                requested: mapping.analysis_id,
            }),
        }
    }

    pub fn get(&self, original_id: EntityId) -> Option<&IdentityMapping> {
        self.rows.get(&original_id)
    }

    /// The analysis id a record of `original_id` should be aggregated under,
    /// or `None` when it must be excluded.
    pub fn target_for(&self, original_id: EntityId, policy: HaltedPolicy) -> Option<EntityId> {
        let row = self.rows.get(&original_id)?;
        if row.state.is_trustworthy() {
            return Some(row.analysis_id);
        }
        match policy {
            HaltedPolicy::Exclude => None,
            HaltedPolicy::KeepOriginal => Some(row.original_id),
        }
    }

    pub fn contains(&self, original_id: EntityId) -> bool {
        self.rows.contains_key(&original_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows ordered by original id.
    pub fn iter(&self) -> impl Iterator<Item = &IdentityMapping> + '_ {
        self.rows.values()
    }

    pub fn trustworthy(&self) -> impl Iterator<Item = &IdentityMapping> + '_ {
        self.rows.values().filter(|m| m.state.is_trustworthy())
    }

    pub fn halted(&self) -> impl Iterator<Item = &IdentityMapping> + '_ {
        self.rows.values().filter(|m| m.state.is_fault())
    }

    /// Trustworthy rows grouped under their analysis id.
    pub fn by_analysis(&self) -> BTreeMap<EntityId, Vec<&IdentityMapping>> {
        let mut groups: BTreeMap<EntityId, Vec<&IdentityMapping>> = BTreeMap::new();
        for m in self.trustworthy() {
            groups.entry(m.analysis_id).or_default().push(m);
        }
        groups
    }

    pub fn sources_of(&self, analysis_id: EntityId) -> Vec<EntityId> {
        self.trustworthy()
            .filter(|m| m.analysis_id == analysis_id)
            .map(|m| m.original_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_mapping(original: u32, analysis: u32, depth: u32, state: ResolutionState) -> IdentityMapping {
        IdentityMapping {
            original_id: original,
            original_name: format!("orig{original}"),
            analysis_id: analysis,
            analysis_name: format!("ana{analysis}"),
            first_appearance: NaiveDate::from_ymd_opt(2005, 6, 5).unwrap(),
            lineage_depth: depth,
            state,
        }
    }

    #[test]
    fn insert_is_idempotent_and_rejects_overwrite() {
        let mut map = IdentityMap::new();

        map.insert(mk_mapping(1, 10, 1, ResolutionState::NoEdgeTerminal)).unwrap();
        map.insert(mk_mapping(1, 10, 1, ResolutionState::NoEdgeTerminal)).unwrap();
        assert_eq!(map.len(), 1);

        let err = map
            .insert(mk_mapping(1, 11, 1, ResolutionState::NoEdgeTerminal))
            .unwrap_err();
        match err {
            MappingError::AlreadyMapped {
                original_id,
                existing,
                requested,
            } => {
                assert_eq!(original_id, 1);
                assert_eq!(existing, 10);
                assert_eq!(requested, 11);
            }
        }
        assert_eq!(map.get(1).unwrap().analysis_id, 10);
    }

    #[test]
    fn halted_rows_follow_policy() {
        let mut map = IdentityMap::new();
        map.insert(mk_mapping(1, 10, 1, ResolutionState::NoEdgeTerminal)).unwrap();
        map.insert(mk_mapping(2, 20, 10, ResolutionState::Halted)).unwrap();

        assert_eq!(map.target_for(1, HaltedPolicy::Exclude), Some(10));
        assert_eq!(map.target_for(2, HaltedPolicy::Exclude), None);
        assert_eq!(map.target_for(2, HaltedPolicy::KeepOriginal), Some(2));
        assert_eq!(map.target_for(3, HaltedPolicy::KeepOriginal), None);
        assert_eq!(map.halted().count(), 1);
    }

    #[test]
    fn by_analysis_groups_trustworthy_rows() {
        let mut map = IdentityMap::new();
        map.insert(mk_mapping(1, 10, 1, ResolutionState::NoEdgeTerminal)).unwrap();
        map.insert(mk_mapping(2, 10, 1, ResolutionState::NoEdgeTerminal)).unwrap();
        map.insert(mk_mapping(10, 10, 0, ResolutionState::NoEdgeTerminal)).unwrap();
        map.insert(mk_mapping(3, 3, 0, ResolutionState::SplitTerminal)).unwrap();
        map.insert(mk_mapping(4, 10, 10, ResolutionState::Halted)).unwrap();

        let groups = map.by_analysis();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&10].len(), 3);
        assert_eq!(map.sources_of(10), vec![1, 2, 10]);
        assert_eq!(map.sources_of(3), vec![3]);
    }
}
