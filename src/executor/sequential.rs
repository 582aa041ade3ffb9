//! Finalize Phase
//!
//! Runs a plan's finalize flow as one job: every finalize step in flow
//! order on the same worker, stopping at the first failure.

use std::fmt;

use log::{debug, warn};

use super::work::{lock_plan, SharedPlan};
use super::worker::{execute_step, StepCall, WorkerContext};
use crate::error::Result;
use crate::plan::{Phase, StepState};

/// Drives the finalize flow of one plan.
pub struct SequentialManager {
    plan: SharedPlan,
    execution_plan_id: String,
}

impl SequentialManager {
    pub fn new(plan: SharedPlan, execution_plan_id: impl Into<String>) -> Self {
        Self {
            plan,
            execution_plan_id: execution_plan_id.into(),
        }
    }

    pub fn execution_plan_id(&self) -> &str {
        &self.execution_plan_id
    }

    /// Calls `finalize` on each finalize step not already resolved.
    ///
    /// A failing step is recorded on the plan and ends the phase; only
    /// persistence failures are returned as errors.
    pub(crate) fn finalize(&self, context: &WorkerContext) -> Result<()> {
        let step_ids = lock_plan(&self.plan).flow(Phase::Finalize).step_ids();
        for step_id in step_ids {
            if lock_plan(&self.plan).is_step_resolved(step_id) {
                debug!(
                    "Finalize step {} of plan '{}' already done",
                    step_id, self.execution_plan_id
                );
                continue;
            }

            execute_step(context, &self.plan, step_id, StepCall::Finalize)?;

            let state = lock_plan(&self.plan).step(step_id).map(|step| step.state);
            if state == Some(StepState::Error) {
                warn!(
                    "Finalize of plan '{}' stopped at step {}",
                    self.execution_plan_id, step_id
                );
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SequentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialManager")
            .field("execution_plan_id", &self.execution_plan_id)
            .finish()
    }
}
