//! Worker Threads
//!
//! A worker owns one thread and one inbox. It executes a single job at a
//! time, records the outcome on the shared plan and persists it, then
//! reports back to the pool. Action panics are caught and turned into step
//! errors so a misbehaving action never takes a worker down.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, warn};
use serde_json::Value;

use super::pool::PoolMessage;
use super::work::{lock_plan, SharedPlan, SuspendedAction, Work};
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::plan::{ActionContext, ActionError, ActionRegistry, Outcome, StepId, StepState};

/// Index of a worker in the pool.
pub type WorkerId = usize;

/// Shared by every worker of one executor.
pub(crate) struct WorkerContext {
    pub persistence: Arc<dyn Persistence>,
    pub actions: ActionRegistry,
    pub pool: Sender<PoolMessage>,
}

pub(crate) enum WorkerMessage {
    Work(Work),
    Terminate,
}

/// Which action entry point a step execution calls.
pub(crate) enum StepCall<'a> {
    Run,
    ProgressUpdate { done: f64, args: &'a Value },
    Finalize,
}

impl StepCall<'_> {
    fn operation(&self) -> &'static str {
        match self {
            StepCall::Run => "run",
            StepCall::ProgressUpdate { .. } => "update progress of",
            StepCall::Finalize => "finalize",
        }
    }
}

/// Handle to a running worker thread.
pub(crate) struct Worker {
    id: WorkerId,
    inbox: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(id: WorkerId, context: Arc<WorkerContext>) -> Result<Self> {
        let (inbox, messages) = channel();
        let handle = thread::Builder::new()
            .name(format!("flowrunner-worker-{}", id))
            .spawn(move || run_worker(id, messages, context))
            .map_err(Error::Spawn)?;
        Ok(Self {
            id,
            inbox,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hands a job to the worker, giving it back if the thread is gone.
    pub fn send(&self, work: Work) -> std::result::Result<(), Work> {
        match self.inbox.send(WorkerMessage::Work(work)) {
            Ok(()) => Ok(()),
            Err(SendError(WorkerMessage::Work(work))) => Err(work),
            Err(SendError(WorkerMessage::Terminate)) => Ok(()),
        }
    }

    /// Asks the thread to exit and waits for it.
    pub fn stop(&mut self) {
        let _ = self.inbox.send(WorkerMessage::Terminate);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Worker {} thread panicked", self.id);
            }
        }
    }
}

fn run_worker(id: WorkerId, messages: Receiver<WorkerMessage>, context: Arc<WorkerContext>) {
    debug!("Worker {} started", id);
    while let Ok(message) = messages.recv() {
        let work = match message {
            WorkerMessage::Work(work) => work,
            WorkerMessage::Terminate => break,
        };

        debug!("Worker {} executing {}", id, work);
        let result = panic::catch_unwind(AssertUnwindSafe(|| process(&context, &work)))
            .unwrap_or_else(|payload| {
                error!("Worker {} crashed on {}: {}", id, work, panic_message(&*payload));
                Err(Error::WorkerCrashed(work.to_string()))
            });

        if let Err(e) = context.pool.send(PoolMessage::WorkerDone {
            worker: id,
            work,
            result,
        }) {
            error!("Worker {} failed to report completion: {}", id, e);
            break;
        }
    }
    debug!("Worker {} stopped", id);
}

fn process(context: &WorkerContext, work: &Work) -> Result<()> {
    match work {
        Work::Step { plan, step_id, .. } => execute_step(context, plan, *step_id, StepCall::Run),
        Work::ProgressUpdate {
            plan,
            step_id,
            done,
            args,
            ..
        } => execute_step(context, plan, *step_id, StepCall::ProgressUpdate { done: *done, args }),
        Work::Finalize(manager) => manager.finalize(context),
    }
}

/// Executes one entry point of a step's action and records the outcome.
///
/// The step is persisted as running before the action is called and again
/// once the outcome is applied. If either save fails the in-memory step is
/// restored to its last durably saved state and the error is returned.
pub(crate) fn execute_step(
    context: &WorkerContext,
    plan: &SharedPlan,
    step_id: StepId,
    call: StepCall<'_>,
) -> Result<()> {
    let (execution_plan_id, action_name, input) = {
        let mut plan = lock_plan(plan);
        let plan_id = plan.id.clone();
        let step = plan.step_mut(step_id).ok_or_else(|| Error::StepNotFound {
            plan: plan_id.clone(),
            step: step_id,
        })?;

        if matches!(call, StepCall::ProgressUpdate { .. }) && step.state != StepState::Suspended {
            return Err(Error::InvalidStepState {
                plan: plan_id,
                step: step_id,
                state: step.state,
                operation: call.operation(),
            });
        }

        let saved = step.clone();
        step.mark_running(Utc::now());
        if let Err(e) = context.persistence.save_step(step) {
            *step = saved;
            return Err(e.into());
        }
        (plan_id, step.action.clone(), step.input.clone())
    };

    let started = Instant::now();
    let outcome = match context.actions.get(&action_name) {
        Some(action) => {
            let ctx = ActionContext::attached(
                execution_plan_id.clone(),
                step_id,
                input,
                SuspendedAction::new(execution_plan_id.clone(), step_id, context.pool.clone()),
            );
            panic::catch_unwind(AssertUnwindSafe(|| match &call {
                StepCall::Run => action.run(&ctx),
                StepCall::ProgressUpdate { done, args } => action.progress_update(&ctx, *done, args),
                StepCall::Finalize => action.finalize(&ctx).map(|()| Outcome::Success(Value::Null)),
            }))
            .unwrap_or_else(|payload| {
                Err(ActionError::new(format!("action panicked: {}", panic_message(&*payload))))
            })
        }
        None => Err(ActionError::new(format!("unknown action '{}'", action_name))),
    };
    let spent = started.elapsed();

    let mut plan = lock_plan(plan);
    let step = plan.step_mut(step_id).ok_or_else(|| Error::StepNotFound {
        plan: execution_plan_id.clone(),
        step: step_id,
    })?;
    let saved = step.clone();
    let now = Utc::now();

    match outcome {
        Ok(Outcome::Success(output)) => {
            debug!("Step {} of plan '{}' succeeded", step_id, execution_plan_id);
            step.mark_finished(StepState::Success, output, None, spent, now);
        }
        Ok(Outcome::Warning { output, message }) => {
            warn!("Step {} of plan '{}' finished with warning: {}", step_id, execution_plan_id, message);
            step.mark_finished(StepState::Warning, output, Some(message), spent, now);
        }
        Ok(Outcome::Suspended { done }) => {
            debug!(
                "Step {} of plan '{}' suspended at {:.0}%",
                step_id,
                execution_plan_id,
                done * 100.0
            );
            step.mark_suspended(done, spent);
        }
        Err(e) => {
            warn!(
                "Step {} of plan '{}' failed to {}: {}",
                step_id,
                execution_plan_id,
                call.operation(),
                e
            );
            step.mark_finished(StepState::Error, Value::Null, Some(e.message), spent, now);
        }
    }

    if let Err(e) = context.persistence.save_step(step) {
        *step = saved;
        return Err(e.into());
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
