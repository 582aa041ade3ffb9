//! Cursor Trees
//!
//! Mutable traversal state mirroring a [`Flow`] for one plan phase. Nodes
//! live in an arena indexed by position, with explicit parent links, so a
//! finished step can be walked up to its ancestors without back-pointers.
//!
//! Cursor trees are never persisted. On resume they are rebuilt from the
//! flow, and steps that already resolved are seeded as finished while the
//! tree is started.

use std::collections::HashMap;

use log::warn;

use super::model::Flow;
use crate::plan::StepId;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CursorKind {
    Atom(StepId),
    Sequence,
    Concurrence,
}

#[derive(Debug)]
struct Cursor {
    kind: CursorKind,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Index of the sequence child currently in progress
    position: usize,
    finished_children: usize,
    /// Set on atoms once they were offered for execution
    started: bool,
    failed: bool,
    done: bool,
}

impl Cursor {
    fn new(kind: CursorKind, parent: Option<usize>) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            position: 0,
            finished_children: 0,
            started: false,
            failed: false,
            done: false,
        }
    }
}

/// Arena of cursors built from a flow tree. Node `0` is the root.
#[derive(Debug)]
pub struct CursorTree {
    nodes: Vec<Cursor>,
    atoms: HashMap<StepId, usize>,
}

impl CursorTree {
    pub fn build(flow: &Flow) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            atoms: HashMap::new(),
        };
        tree.push(flow, None);
        tree
    }

    fn push(&mut self, flow: &Flow, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let (kind, children) = match flow {
            Flow::Atom(id) => {
                self.atoms.insert(*id, index);
                (CursorKind::Atom(*id), &[][..])
            }
            Flow::Sequence(children) => (CursorKind::Sequence, children.as_slice()),
            Flow::Concurrence(children) => (CursorKind::Concurrence, children.as_slice()),
        };
        self.nodes.push(Cursor::new(kind, parent));

        for child in children {
            let child_index = self.push(child, Some(index));
            self.nodes[index].children.push(child_index);
        }
        index
    }

    /// Returns the steps eligible to run before anything has finished.
    ///
    /// `resolved` reports steps that already finished successfully in an
    /// earlier session; they are treated as done and never offered.
    pub fn start(&mut self, resolved: &dyn Fn(StepId) -> bool) -> Vec<StepId> {
        let mut eligible = Vec::new();
        self.start_node(0, resolved, &mut eligible);
        eligible
    }

    fn start_node(&mut self, index: usize, resolved: &dyn Fn(StepId) -> bool, out: &mut Vec<StepId>) {
        match self.nodes[index].kind {
            CursorKind::Atom(id) => {
                if resolved(id) {
                    self.nodes[index].done = true;
                } else {
                    self.nodes[index].started = true;
                    out.push(id);
                }
            }
            CursorKind::Sequence => self.advance_sequence(index, resolved, out),
            CursorKind::Concurrence => {
                let children = self.nodes[index].children.clone();
                for child in children {
                    self.start_node(child, resolved, out);
                    if self.nodes[child].done {
                        self.record_concurrent_child(index, child);
                    }
                }
                if self.nodes[index].finished_children == self.nodes[index].children.len() {
                    self.nodes[index].done = true;
                }
            }
        }
    }

    /// Starts sequence children from the current position until one of them
    /// is still in progress, one failed, or the sequence is exhausted.
    fn advance_sequence(&mut self, index: usize, resolved: &dyn Fn(StepId) -> bool, out: &mut Vec<StepId>) {
        while let Some(&child) = self.nodes[index].children.get(self.nodes[index].position) {
            self.start_node(child, resolved, out);
            if !self.nodes[child].done {
                return;
            }
            if self.nodes[child].failed {
                self.nodes[index].failed = true;
                self.nodes[index].done = true;
                return;
            }
            self.nodes[index].position += 1;
        }
        self.nodes[index].done = true;
    }

    fn record_concurrent_child(&mut self, index: usize, child: usize) {
        let failed = self.nodes[child].failed;
        let node = &mut self.nodes[index];
        node.finished_children += 1;
        node.failed |= failed;
    }

    /// Marks `step_id` finished and returns the steps it unblocked.
    pub fn what_is_next(
        &mut self,
        step_id: StepId,
        success: bool,
        resolved: &dyn Fn(StepId) -> bool,
    ) -> Vec<StepId> {
        let Some(&index) = self.atoms.get(&step_id) else {
            warn!("Step {} is not part of this flow", step_id);
            return Vec::new();
        };
        if !self.nodes[index].started || self.nodes[index].done {
            warn!("Step {} is not in progress in this flow", step_id);
            return Vec::new();
        }

        self.nodes[index].done = true;
        self.nodes[index].failed = !success;

        let mut eligible = Vec::new();
        let mut child = index;
        while let Some(parent) = self.nodes[child].parent {
            match self.nodes[parent].kind {
                CursorKind::Sequence => {
                    if self.nodes[child].failed {
                        self.nodes[parent].failed = true;
                        self.nodes[parent].done = true;
                    } else {
                        self.nodes[parent].position += 1;
                        self.advance_sequence(parent, resolved, &mut eligible);
                    }
                }
                CursorKind::Concurrence => {
                    self.record_concurrent_child(parent, child);
                    if self.nodes[parent].finished_children == self.nodes[parent].children.len() {
                        self.nodes[parent].done = true;
                    }
                }
                CursorKind::Atom(_) => unreachable!("atoms have no children"),
            }

            if !self.nodes[parent].done {
                break;
            }
            child = parent;
        }
        eligible
    }

    /// True once the root cursor finished.
    pub fn is_done(&self) -> bool {
        self.nodes[0].done
    }

    /// True if any finished branch failed.
    pub fn is_failed(&self) -> bool {
        self.nodes.iter().any(|node| node.done && node.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing_resolved(_: StepId) -> bool {
        false
    }

    fn sorted(mut ids: Vec<StepId>) -> Vec<StepId> {
        ids.sort();
        ids
    }

    fn two_branches() -> Flow {
        Flow::Concurrence(vec![
            Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2), Flow::Atom(3)]),
            Flow::Sequence(vec![Flow::Atom(4), Flow::Atom(5), Flow::Atom(6)]),
        ])
    }

    #[test]
    fn test_start_offers_first_step_of_each_branch() {
        let mut tree = CursorTree::build(&two_branches());
        assert_eq!(sorted(tree.start(&nothing_resolved)), vec![1, 4]);
        assert!(!tree.is_done());
    }

    #[test]
    fn test_success_advances_only_its_branch() {
        let mut tree = CursorTree::build(&two_branches());
        tree.start(&nothing_resolved);

        assert_eq!(tree.what_is_next(1, true, &nothing_resolved), vec![2]);
        assert_eq!(tree.what_is_next(2, true, &nothing_resolved), vec![3]);
        assert!(tree.what_is_next(3, true, &nothing_resolved).is_empty());
        assert!(!tree.is_done());

        assert_eq!(tree.what_is_next(4, true, &nothing_resolved), vec![5]);
        assert_eq!(tree.what_is_next(5, true, &nothing_resolved), vec![6]);
        assert!(tree.what_is_next(6, true, &nothing_resolved).is_empty());
        assert!(tree.is_done());
        assert!(!tree.is_failed());
    }

    #[test]
    fn test_failure_cascades_within_sequence_only() {
        let mut tree = CursorTree::build(&two_branches());
        tree.start(&nothing_resolved);

        assert!(tree.what_is_next(1, false, &nothing_resolved).is_empty());
        assert!(!tree.is_done());

        assert_eq!(tree.what_is_next(4, true, &nothing_resolved), vec![5]);
        assert_eq!(tree.what_is_next(5, true, &nothing_resolved), vec![6]);
        assert!(tree.what_is_next(6, true, &nothing_resolved).is_empty());
        assert!(tree.is_done());
        assert!(tree.is_failed());
    }

    #[test]
    fn test_failed_branch_never_offers_later_siblings() {
        let mut tree = CursorTree::build(&two_branches());
        tree.start(&nothing_resolved);
        tree.what_is_next(1, false, &nothing_resolved);

        // Steps 2 and 3 are never reachable, even as unknown completions.
        assert!(tree.what_is_next(2, true, &nothing_resolved).is_empty());
        assert!(tree.what_is_next(4, false, &nothing_resolved).is_empty());
        assert!(tree.is_done());
    }

    #[test]
    fn test_failure_inside_concurrence_stops_enclosing_sequence() {
        let flow = Flow::Sequence(vec![
            Flow::Concurrence(vec![Flow::Atom(1), Flow::Atom(2)]),
            Flow::Atom(3),
        ]);
        let mut tree = CursorTree::build(&flow);
        assert_eq!(sorted(tree.start(&nothing_resolved)), vec![1, 2]);

        assert!(tree.what_is_next(1, false, &nothing_resolved).is_empty());
        assert!(!tree.is_done());
        assert!(tree.what_is_next(2, true, &nothing_resolved).is_empty());
        assert!(tree.is_done());
    }

    #[test]
    fn test_concurrence_join_releases_next_sequence_child() {
        let flow = Flow::Sequence(vec![
            Flow::Concurrence(vec![Flow::Atom(1), Flow::Atom(2)]),
            Flow::Atom(3),
        ]);
        let mut tree = CursorTree::build(&flow);
        tree.start(&nothing_resolved);

        assert!(tree.what_is_next(2, true, &nothing_resolved).is_empty());
        assert_eq!(tree.what_is_next(1, true, &nothing_resolved), vec![3]);
        assert!(tree.what_is_next(3, true, &nothing_resolved).is_empty());
        assert!(tree.is_done());
    }

    #[test]
    fn test_resolved_steps_are_seeded_as_finished() {
        let mut tree = CursorTree::build(&two_branches());
        let resolved = |id: StepId| matches!(id, 1 | 2 | 4);

        assert_eq!(sorted(tree.start(&resolved)), vec![3, 5]);
        assert!(tree.what_is_next(3, true, &resolved).is_empty());
        assert_eq!(tree.what_is_next(5, true, &resolved), vec![6]);
    }

    #[test]
    fn test_resolved_steps_skipped_while_advancing() {
        let flow = Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2), Flow::Atom(3)]);
        let mut tree = CursorTree::build(&flow);
        let resolved = |id: StepId| id == 2;

        assert_eq!(tree.start(&resolved), vec![1]);
        assert_eq!(tree.what_is_next(1, true, &resolved), vec![3]);
    }

    #[test]
    fn test_fully_resolved_tree_is_done_at_start() {
        let mut tree = CursorTree::build(&two_branches());
        assert!(tree.start(&|_| true).is_empty());
        assert!(tree.is_done());
    }

    #[test]
    fn test_empty_flow_is_done_at_start() {
        let mut tree = CursorTree::build(&Flow::empty());
        assert!(tree.start(&nothing_resolved).is_empty());
        assert!(tree.is_done());

        let mut tree = CursorTree::build(&Flow::Concurrence(Vec::new()));
        tree.start(&nothing_resolved);
        assert!(tree.is_done());
    }

    #[test]
    fn test_single_atom_root() {
        let mut tree = CursorTree::build(&Flow::Atom(9));
        assert_eq!(tree.start(&nothing_resolved), vec![9]);
        assert!(tree.what_is_next(9, true, &nothing_resolved).is_empty());
        assert!(tree.is_done());
    }

    #[test]
    fn test_unknown_step_is_ignored() {
        let mut tree = CursorTree::build(&two_branches());
        tree.start(&nothing_resolved);
        assert!(tree.what_is_next(42, true, &nothing_resolved).is_empty());
        assert!(!tree.is_done());
    }
}
