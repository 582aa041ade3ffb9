//! Flow Trees
//!
//! A flow describes which steps of one plan phase run, and in what order.
//!
//! # Example YAML Format
//!
//! ```yaml
//! concurrence:
//!   - sequence:
//!       - atom: 1
//!       - atom: 2
//!   - sequence:
//!       - atom: 3
//!       - atom: 4
//! ```
//!
//! Read it through `serde_yaml::with::singleton_map_recursive`; the plain
//! `serde_yaml` enum encoding uses `!atom 1` style tags instead. JSON uses
//! the same one-key maps without any adapter.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::plan::StepId;

/// Immutable, recursively composed description of step ordering.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// A single step reference
    Atom(StepId),
    /// Children run one after another, in declared order
    Sequence(Vec<Flow>),
    /// Children may run in any order, independently of each other
    Concurrence(Vec<Flow>),
}

impl Flow {
    /// An empty sequence, used for phases with nothing to do.
    pub fn empty() -> Self {
        Flow::Sequence(Vec::new())
    }

    /// Returns all step ids in declaration order.
    pub fn step_ids(&self) -> Vec<StepId> {
        let mut ids = Vec::new();
        self.collect_step_ids(&mut ids);
        ids
    }

    fn collect_step_ids(&self, ids: &mut Vec<StepId>) {
        match self {
            Flow::Atom(id) => ids.push(*id),
            Flow::Sequence(children) | Flow::Concurrence(children) => {
                for child in children {
                    child.collect_step_ids(ids);
                }
            }
        }
    }

    /// Number of atoms in the tree.
    pub fn size(&self) -> usize {
        match self {
            Flow::Atom(_) => 1,
            Flow::Sequence(children) | Flow::Concurrence(children) => {
                children.iter().map(Flow::size).sum()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the first step id referenced more than once, if any.
    pub fn find_duplicate(&self) -> Option<StepId> {
        let mut seen = HashSet::new();
        self.step_ids().into_iter().find(|id| !seen.insert(*id))
    }
}

impl Default for Flow {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_branches() -> Flow {
        Flow::Concurrence(vec![
            Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2), Flow::Atom(3)]),
            Flow::Sequence(vec![Flow::Atom(4), Flow::Atom(5), Flow::Atom(6)]),
        ])
    }

    #[test]
    fn test_step_ids_in_declaration_order() {
        assert_eq!(two_branches().step_ids(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(two_branches().size(), 6);
    }

    #[test]
    fn test_empty_flow() {
        assert!(Flow::empty().is_empty());
        assert!(Flow::Concurrence(vec![Flow::empty()]).is_empty());
        assert!(!Flow::Atom(1).is_empty());
    }

    #[test]
    fn test_find_duplicate() {
        assert_eq!(two_branches().find_duplicate(), None);
        let flow = Flow::Sequence(vec![Flow::Atom(1), Flow::Concurrence(vec![Flow::Atom(1)])]);
        assert_eq!(flow.find_duplicate(), Some(1));
    }

    #[test]
    fn test_yaml_format() {
        let yaml = "concurrence:\n  - sequence:\n      - atom: 1\n      - atom: 2\n  - atom: 3\n";
        let deserializer = serde_yaml::Deserializer::from_str(yaml);
        let flow: Flow = serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap();
        assert_eq!(
            flow,
            Flow::Concurrence(vec![
                Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2)]),
                Flow::Atom(3),
            ])
        );
    }

    #[test]
    fn test_json_format() {
        let flow = Flow::Sequence(vec![Flow::Atom(1), Flow::Concurrence(vec![Flow::Atom(2)])]);
        let json = serde_json::to_string(&flow).unwrap();
        assert_eq!(json, r#"{"sequence":[{"atom":1},{"concurrence":[{"atom":2}]}]}"#);
        assert_eq!(serde_json::from_str::<Flow>(&json).unwrap(), flow);
    }
}
