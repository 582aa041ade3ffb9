//! Flow Manager
//!
//! Tracks the progress of one plan phase through its flow tree and decides
//! which steps become eligible as others finish.

use log::debug;

use super::cursor::CursorTree;
use super::model::Flow;
use crate::plan::{ExecutionPlan, Phase, StepId};

/// Drives a [`CursorTree`] for one plan and one phase.
///
/// All operations are synchronous and plan-local; the pool coordinator is
/// the only caller and serializes access.
#[derive(Debug)]
pub struct FlowManager {
    execution_plan_id: String,
    phase: Phase,
    cursors: CursorTree,
}

impl FlowManager {
    /// Builds a fresh cursor tree mirroring `flow`.
    pub fn new(plan: &ExecutionPlan, phase: Phase, flow: &Flow) -> Self {
        Self {
            execution_plan_id: plan.id.clone(),
            phase,
            cursors: CursorTree::build(flow),
        }
    }

    /// Builds a manager over the plan's own flow for `phase`.
    pub fn for_phase(plan: &ExecutionPlan, phase: Phase) -> Self {
        Self::new(plan, phase, plan.flow(phase))
    }

    pub fn execution_plan_id(&self) -> &str {
        &self.execution_plan_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the steps that can run immediately.
    ///
    /// Steps the plan already resolved (success, warning or skipped) count
    /// as finished, so a resumed plan only re-offers what is left.
    pub fn start(&mut self, plan: &ExecutionPlan) -> Vec<StepId> {
        let steps = self.cursors.start(&|id| plan.is_step_resolved(id));
        debug!(
            "Plan '{}' {:?} phase starts with steps {:?}",
            self.execution_plan_id, self.phase, steps
        );
        steps
    }

    /// Records that `step_id` finished and returns the steps it unblocked.
    pub fn what_is_next(&mut self, plan: &ExecutionPlan, step_id: StepId, succeeded: bool) -> Vec<StepId> {
        let steps = self
            .cursors
            .what_is_next(step_id, succeeded, &|id| plan.is_step_resolved(id));
        debug!(
            "Plan '{}': step {} finished (success: {}), next: {:?}",
            self.execution_plan_id, step_id, succeeded, steps
        );
        steps
    }

    pub fn is_done(&self) -> bool {
        self.cursors.is_done()
    }

    /// True if some branch stopped on a failed step.
    pub fn is_failed(&self) -> bool {
        self.cursors.is_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepState;
    use crate::testing::two_branch_plan;

    fn sorted(mut ids: Vec<StepId>) -> Vec<StepId> {
        ids.sort();
        ids
    }

    #[test]
    fn test_returns_next_steps_after_required_steps_finished() {
        let plan = two_branch_plan("plan");
        let mut manager = FlowManager::for_phase(&plan, Phase::Run);

        assert_eq!(sorted(manager.start(&plan)), vec![1, 4]);
        assert_eq!(manager.what_is_next(&plan, 1, true), vec![2]);
        assert_eq!(manager.what_is_next(&plan, 2, true), vec![3]);
        assert!(manager.what_is_next(&plan, 3, true).is_empty());
        assert_eq!(manager.what_is_next(&plan, 4, true), vec![5]);
        assert_eq!(manager.what_is_next(&plan, 5, true), vec![6]);
        assert!(manager.what_is_next(&plan, 6, true).is_empty());
        assert!(manager.is_done());
    }

    #[test]
    fn test_no_next_steps_when_requirement_failed() {
        let plan = two_branch_plan("plan");
        let mut manager = FlowManager::for_phase(&plan, Phase::Run);

        assert_eq!(sorted(manager.start(&plan)), vec![1, 4]);
        assert!(manager.what_is_next(&plan, 1, false).is_empty());
        assert!(!manager.is_done());
        assert!(manager.what_is_next(&plan, 4, false).is_empty());
        assert!(manager.is_done());
        assert!(manager.is_failed());
    }

    #[test]
    fn test_resume_offers_only_unresolved_steps() {
        let mut plan = two_branch_plan("plan");
        for id in [1, 2, 3, 4] {
            plan.step_mut(id).unwrap().state = StepState::Success;
        }
        plan.step_mut(5).unwrap().state = StepState::Error;

        let mut manager = FlowManager::for_phase(&plan, Phase::Run);
        assert_eq!(manager.start(&plan), vec![5]);
        assert_eq!(manager.what_is_next(&plan, 5, true), vec![6]);
    }

    #[test]
    fn test_skipped_steps_do_not_block() {
        let mut plan = two_branch_plan("plan");
        plan.step_mut(1).unwrap().state = StepState::Skipped;

        let mut manager = FlowManager::for_phase(&plan, Phase::Run);
        assert_eq!(sorted(manager.start(&plan)), vec![2, 4]);
    }

    #[test]
    fn test_empty_finalize_flow_is_done() {
        let plan = two_branch_plan("plan");
        let mut manager = FlowManager::for_phase(&plan, Phase::Finalize);
        assert!(manager.start(&plan).is_empty());
        assert!(manager.is_done());
        assert_eq!(manager.phase(), Phase::Finalize);
        assert_eq!(manager.execution_plan_id(), "plan");
    }
}
