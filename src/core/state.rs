// resolution state machine for a single seed entity
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one seed while the resolver walks the mutation graph.
///
/// `Active` is the only non-terminal state. A seed leaves it exactly once:
/// - `SplitTerminal`  : the current id diverged into several ids on one date
/// - `NoEdgeTerminal` : no qualifying outgoing mutation exists
/// - `Halted`         : the step bound was reached (cycle or runaway chain)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Active,
    SplitTerminal,
    NoEdgeTerminal,
    Halted,
}

impl ResolutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolutionState::Active)
    }

    /// Only cleanly terminated seeds may feed published aggregates.
    pub fn is_trustworthy(&self) -> bool {
        matches!(
            self,
            ResolutionState::SplitTerminal | ResolutionState::NoEdgeTerminal
        )
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, ResolutionState::Halted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Active => "ACTIVE",
            ResolutionState::SplitTerminal => "SPLIT_TERMINAL",
            ResolutionState::NoEdgeTerminal => "NO_EDGE_TERMINAL",
            ResolutionState::Halted => "HALTED",
        }
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_clean_terminals_are_trustworthy() {
        assert!(!ResolutionState::Active.is_terminal());
        assert!(ResolutionState::SplitTerminal.is_trustworthy());
        assert!(ResolutionState::NoEdgeTerminal.is_trustworthy());
        assert!(ResolutionState::Halted.is_terminal());
        assert!(!ResolutionState::Halted.is_trustworthy());
        assert!(ResolutionState::Halted.is_fault());
    }
}
