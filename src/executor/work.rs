//! Work Items
//!
//! The units a worker executes, and the handle suspended actions use to
//! request more work for themselves.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::job_storage::Job;
use super::pool::PoolMessage;
use super::sequential::SequentialManager;
use crate::error::{Error, Result};
use crate::plan::{ExecutionPlan, StepId};

/// A plan shared between the pool and whichever worker holds its job.
pub type SharedPlan = Arc<Mutex<ExecutionPlan>>;

/// Locks a shared plan, recovering the data if a holder panicked.
pub(crate) fn lock_plan(plan: &SharedPlan) -> MutexGuard<'_, ExecutionPlan> {
    plan.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A job for one worker.
#[derive(Debug)]
pub enum Work {
    /// Run a step of the run flow
    Step {
        plan: SharedPlan,
        execution_plan_id: String,
        step_id: StepId,
    },
    /// Deliver a progress notification to a suspended step
    ProgressUpdate {
        plan: SharedPlan,
        execution_plan_id: String,
        step_id: StepId,
        done: f64,
        args: Value,
    },
    /// Run a plan's whole finalize flow on one worker
    Finalize(SequentialManager),
}

impl Work {
    pub fn step(plan: SharedPlan, execution_plan_id: impl Into<String>, step_id: StepId) -> Self {
        Work::Step {
            plan,
            execution_plan_id: execution_plan_id.into(),
            step_id,
        }
    }

    /// The step this job targets, if it targets a single step.
    pub fn step_id(&self) -> Option<StepId> {
        match self {
            Work::Step { step_id, .. } | Work::ProgressUpdate { step_id, .. } => Some(*step_id),
            Work::Finalize(_) => None,
        }
    }
}

impl Job for Work {
    fn execution_plan_id(&self) -> &str {
        match self {
            Work::Step { execution_plan_id, .. } | Work::ProgressUpdate { execution_plan_id, .. } => {
                execution_plan_id
            }
            Work::Finalize(manager) => manager.execution_plan_id(),
        }
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Step { execution_plan_id, step_id, .. } => {
                write!(f, "step {} of plan '{}'", step_id, execution_plan_id)
            }
            Work::ProgressUpdate {
                execution_plan_id,
                step_id,
                done,
                ..
            } => write!(
                f,
                "progress update ({:.0}%) for step {} of plan '{}'",
                done * 100.0,
                step_id,
                execution_plan_id
            ),
            Work::Finalize(manager) => write!(f, "finalize of plan '{}'", manager.execution_plan_id()),
        }
    }
}

/// Lets a suspended action wake its step up later, from any thread.
#[derive(Debug, Clone)]
pub struct SuspendedAction {
    execution_plan_id: String,
    step_id: StepId,
    pool: Sender<PoolMessage>,
}

impl SuspendedAction {
    pub(crate) fn new(execution_plan_id: impl Into<String>, step_id: StepId, pool: Sender<PoolMessage>) -> Self {
        Self {
            execution_plan_id: execution_plan_id.into(),
            step_id,
            pool,
        }
    }

    pub fn execution_plan_id(&self) -> &str {
        &self.execution_plan_id
    }

    pub fn step_id(&self) -> StepId {
        self.step_id
    }

    /// Schedules a progress update for the step; `done` is in `[0, 1]`.
    pub fn update_progress(&self, done: f64, args: Value) -> Result<()> {
        if !done.is_finite() {
            return Err(Error::InvalidProgress(done));
        }
        self.pool
            .send(PoolMessage::ProgressUpdate {
                execution_plan_id: self.execution_plan_id.clone(),
                step_id: self.step_id,
                done,
                args,
            })
            .map_err(|_| Error::ExecutorGone)
    }
}
