//! Worker Pool
//!
//! A single coordinator thread owns all scheduling state: the queue of
//! pending jobs, the idle workers, the flow manager of every executing plan
//! and the set of plans with a job in flight. Everything else talks to it
//! through [`PoolMessage`]s, so none of that state needs locking.
//!
//! At most one job per plan is in flight at any time. Concurrent flow
//! branches of one plan are interleaved, never run in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;

use super::job_storage::{Job, JobStorage};
use super::round_robin::RoundRobin;
use super::sequential::SequentialManager;
use super::work::{lock_plan, SharedPlan, Work};
use super::worker::{Worker, WorkerContext, WorkerId};
use crate::error::{Error, PersistenceError, Result};
use crate::flow::FlowManager;
use crate::persistence::Persistence;
use crate::plan::{ActionRegistry, ExecutionPlan, Phase, StepId, StepState};

/// Final result delivered to whoever waits on a plan.
pub type PlanOutcome = Result<ExecutionPlan>;

/// Requests handled by the coordinator thread.
#[derive(Debug)]
pub(crate) enum PoolMessage {
    Execute {
        execution_plan_id: String,
        reply: Sender<Result<Receiver<PlanOutcome>>>,
    },
    ProgressUpdate {
        execution_plan_id: String,
        step_id: StepId,
        done: f64,
        args: Value,
    },
    Skip {
        execution_plan_id: String,
        step_id: StepId,
        reply: Sender<Result<Vec<StepId>>>,
    },
    WorkerDone {
        worker: WorkerId,
        work: Work,
        result: Result<()>,
    },
    Terminate {
        reply: Sender<()>,
    },
}

/// Scheduling state of one executing plan.
struct PlanExecution {
    plan: SharedPlan,
    run: FlowManager,
    phase: Phase,
    waiter: Sender<PlanOutcome>,
    failure: Option<PersistenceError>,
}

pub(crate) struct Pool {
    workers: Vec<Worker>,
    idle: RoundRobin<WorkerId>,
    jobs: JobStorage<Work>,
    busy: HashSet<String>,
    plans: HashMap<String, PlanExecution>,
    persistence: Arc<dyn Persistence>,
    terminating: Vec<Sender<()>>,
    stopped: bool,
}

impl Pool {
    /// Starts `size` workers and the coordinator thread.
    pub fn spawn(
        size: usize,
        persistence: Arc<dyn Persistence>,
        actions: ActionRegistry,
    ) -> Result<(Sender<PoolMessage>, JoinHandle<()>)> {
        let (sender, messages) = channel();
        let context = Arc::new(WorkerContext {
            persistence: Arc::clone(&persistence),
            actions,
            pool: sender.clone(),
        });

        let mut workers = Vec::with_capacity(size);
        let mut idle = RoundRobin::new();
        for id in 0..size {
            match Worker::spawn(id, Arc::clone(&context)) {
                Ok(worker) => {
                    idle.add(worker.id());
                    workers.push(worker);
                }
                Err(e) => {
                    workers.iter_mut().for_each(Worker::stop);
                    return Err(e);
                }
            }
        }

        let mut pool = Pool {
            workers,
            idle,
            jobs: JobStorage::new(),
            busy: HashSet::new(),
            plans: HashMap::new(),
            persistence,
            terminating: Vec::new(),
            stopped: false,
        };
        let handle = thread::Builder::new()
            .name("flowrunner-pool".to_string())
            .spawn(move || pool.run(messages))
            .map_err(Error::Spawn)?;

        info!("Executor started with {} workers", size);
        Ok((sender, handle))
    }

    fn run(&mut self, messages: Receiver<PoolMessage>) {
        while let Ok(message) = messages.recv() {
            self.handle(message);
            self.dispatch();
            self.try_terminate();
            if self.stopped {
                break;
            }
        }
        debug!("Pool coordinator stopped");
    }

    fn handle(&mut self, message: PoolMessage) {
        match message {
            PoolMessage::Execute {
                execution_plan_id,
                reply,
            } => {
                let result = self.start_execution(&execution_plan_id);
                if reply.send(result).is_err() {
                    warn!("Caller of execute('{}') went away", execution_plan_id);
                }
            }
            PoolMessage::ProgressUpdate {
                execution_plan_id,
                step_id,
                done,
                args,
            } => match self.plans.get(&execution_plan_id) {
                Some(execution) => self.jobs.add(Work::ProgressUpdate {
                    plan: Arc::clone(&execution.plan),
                    execution_plan_id,
                    step_id,
                    done,
                    args,
                }),
                None => warn!(
                    "Ignoring progress update for step {} of plan '{}': plan is not executing",
                    step_id, execution_plan_id
                ),
            },
            PoolMessage::Skip {
                execution_plan_id,
                step_id,
                reply,
            } => {
                let result = self.skip(&execution_plan_id, step_id);
                if reply.send(result).is_err() {
                    warn!("Caller of skip('{}', {}) went away", execution_plan_id, step_id);
                }
            }
            PoolMessage::WorkerDone { worker, work, result } => self.on_worker_done(worker, work, result),
            PoolMessage::Terminate { reply } => {
                if self.terminating.is_empty() {
                    info!(
                        "Terminating executor ({} plans executing, {} jobs queued)",
                        self.plans.len(),
                        self.jobs.len()
                    );
                }
                self.terminating.push(reply);
            }
        }
    }

    /// Loads a plan and queues its first steps.
    ///
    /// Any error leaves the persisted plan untouched.
    fn start_execution(&mut self, execution_plan_id: &str) -> Result<Receiver<PlanOutcome>> {
        if !self.terminating.is_empty() {
            return Err(Error::Terminating);
        }
        if self.plans.contains_key(execution_plan_id) {
            return Err(Error::AlreadyRunning(execution_plan_id.to_string()));
        }

        let mut plan = self.persistence.load_execution_plan(execution_plan_id)?;
        plan.prepare_execution(Utc::now())?;
        plan.refresh_progress();
        self.persistence.save_execution_plan(&plan)?;

        let mut run = FlowManager::for_phase(&plan, Phase::Run);
        let first_steps = run.start(&plan);
        info!(
            "Executing plan '{}' ({} steps, starting with {:?})",
            execution_plan_id,
            plan.steps.len(),
            first_steps
        );

        let shared = Arc::new(Mutex::new(plan));
        for step_id in first_steps {
            self.jobs.add(Work::step(Arc::clone(&shared), execution_plan_id, step_id));
        }

        let (waiter, outcome) = channel();
        self.plans.insert(
            execution_plan_id.to_string(),
            PlanExecution {
                plan: shared,
                run,
                phase: Phase::Run,
                waiter,
                failure: None,
            },
        );
        self.advance(execution_plan_id);
        Ok(outcome)
    }

    /// Skips a step of a plan that is not executing and persists the result.
    fn skip(&mut self, execution_plan_id: &str, step_id: StepId) -> Result<Vec<StepId>> {
        if self.plans.contains_key(execution_plan_id) {
            return Err(Error::AlreadyRunning(execution_plan_id.to_string()));
        }
        let mut plan = self.persistence.load_execution_plan(execution_plan_id)?;
        let skipped = plan.skip(step_id)?;
        plan.refresh_progress();
        self.persistence.save_execution_plan(&plan)?;
        Ok(skipped)
    }

    /// Hands queued jobs to idle workers, one in-flight job per plan.
    fn dispatch(&mut self) {
        while let Some(worker_id) = self.idle.next() {
            let busy = &self.busy;
            let Some(work) = self.jobs.pop_where(|plan_id| !busy.contains(plan_id)) else {
                break;
            };
            self.idle.delete(&worker_id);

            let plan_id = work.execution_plan_id().to_string();
            debug!("Dispatching {} to worker {}", work, worker_id);
            match self.workers[worker_id].send(work) {
                Ok(()) => {
                    self.busy.insert(plan_id);
                }
                Err(work) => {
                    // The worker stays out of the idle rotation for good.
                    error!("Worker {} is gone, requeueing {}", worker_id, work);
                    self.jobs.requeue(work);
                }
            }
        }
    }

    fn on_worker_done(&mut self, worker: WorkerId, work: Work, result: Result<()>) {
        let plan_id = work.execution_plan_id().to_string();
        self.busy.remove(&plan_id);
        self.idle.add(worker);

        match work {
            Work::Step { step_id, .. } | Work::ProgressUpdate { step_id, .. } => {
                self.on_step_done(&plan_id, step_id, result);
                self.advance(&plan_id);
            }
            Work::Finalize(_) => {
                if let Err(e) = result {
                    self.record_failure(&plan_id, e);
                }
                self.finish_plan(&plan_id);
            }
        }
    }

    /// Feeds a step's outcome to the plan's flow manager.
    fn on_step_done(&mut self, plan_id: &str, step_id: StepId, result: Result<()>) {
        let Some(execution) = self.plans.get_mut(plan_id) else {
            warn!("Step {} finished for unknown plan '{}'", step_id, plan_id);
            return;
        };
        let mut plan = lock_plan(&execution.plan);

        let succeeded = match result {
            Ok(()) => match plan.step(step_id).map(|step| step.state) {
                Some(state) if state.is_finished() => Some(state.is_resolved()),
                _ => None,
            },
            Err(Error::InvalidStepState { state, .. }) => {
                debug!(
                    "Ignored progress update for step {} of plan '{}' in state {}",
                    step_id, plan_id, state
                );
                None
            }
            Err(Error::Persistence(e)) => {
                error!(
                    "Persisting step {} of plan '{}' failed: {}",
                    step_id, plan_id, e
                );
                execution.failure.get_or_insert(e);
                Some(false)
            }
            Err(e) => {
                error!("Step {} of plan '{}' crashed: {}", step_id, plan_id, e);
                if let Some(step) = plan.step_mut(step_id) {
                    if !step.state.is_finished() {
                        step.mark_finished(
                            StepState::Error,
                            Value::Null,
                            Some(e.to_string()),
                            Default::default(),
                            Utc::now(),
                        );
                        if let Err(e) = self.persistence.save_step(step) {
                            error!("Persisting step {} of plan '{}' failed: {}", step_id, plan_id, e);
                            execution.failure.get_or_insert(e);
                        }
                    }
                }
                Some(false)
            }
        };

        if let Some(succeeded) = succeeded {
            for next in execution.run.what_is_next(&plan, step_id, succeeded) {
                self.jobs
                    .add(Work::step(Arc::clone(&execution.plan), plan_id, next));
            }
        }

        plan.refresh_progress();
        if let Err(e) = self.persistence.save_execution_plan(&plan) {
            error!("Persisting plan '{}' failed: {}", plan_id, e);
            execution.failure.get_or_insert(e);
        }
    }

    /// Moves a plan whose run flow is exhausted on to finalize or to its end.
    fn advance(&mut self, plan_id: &str) {
        let Some(execution) = self.plans.get_mut(plan_id) else {
            return;
        };
        if execution.phase != Phase::Run
            || !execution.run.is_done()
            || self.busy.contains(plan_id)
            || self.jobs.queued_for(plan_id) > 0
        {
            return;
        }

        let unresolved = execution.failure.is_some()
            || execution.run.is_failed()
            || lock_plan(&execution.plan).has_unresolved_run_steps();
        if unresolved {
            info!("Plan '{}' has unresolved steps, skipping finalize", plan_id);
            self.finish_plan(plan_id);
            return;
        }

        execution.phase = Phase::Finalize;
        self.jobs.add(Work::Finalize(SequentialManager::new(
            Arc::clone(&execution.plan),
            plan_id,
        )));
    }

    fn record_failure(&mut self, plan_id: &str, error: Error) {
        error!("Finalize of plan '{}' failed: {}", plan_id, error);
        if let (Some(execution), Error::Persistence(e)) = (self.plans.get_mut(plan_id), error) {
            execution.failure.get_or_insert(e);
        }
    }

    /// Ends the plan's execution session and wakes its waiter.
    fn finish_plan(&mut self, plan_id: &str) {
        let Some(execution) = self.plans.remove(plan_id) else {
            return;
        };
        let snapshot = {
            let mut plan = lock_plan(&execution.plan);
            plan.finish(Utc::now());
            plan.clone()
        };

        let saved = self.persistence.save_execution_plan(&snapshot);
        let outcome = match (execution.failure, saved) {
            (Some(e), _) | (None, Err(e)) => Err(Error::Persistence(e)),
            (None, Ok(())) => Ok(snapshot),
        };
        if execution.waiter.send(outcome).is_err() {
            debug!("Nobody is waiting for plan '{}'", plan_id);
        }
    }

    /// Completes a pending termination once all in-flight work has drained.
    ///
    /// Plans still executing at that point only wait on suspended steps;
    /// they are paused so a later execution can resume them.
    fn try_terminate(&mut self) {
        if self.terminating.is_empty() || !self.busy.is_empty() || !self.jobs.is_empty() {
            return;
        }

        let stranded: Vec<String> = self.plans.keys().cloned().collect();
        for plan_id in stranded {
            warn!("Pausing plan '{}' with suspended steps", plan_id);
            self.finish_plan(&plan_id);
        }

        for worker in &mut self.workers {
            worker.stop();
        }
        for reply in self.terminating.drain(..) {
            let _ = reply.send(());
        }
        self.stopped = true;
        info!("Executor terminated");
    }
}
