//! Parallel Executor
//!
//! Runs execution plans on a fixed pool of worker threads.
//!
//! - [`round_robin`]: Fair rotation of handles
//! - [`job_storage`]: Per-plan FIFO queues visited round-robin
//! - [`work`]: Job variants and the [`SuspendedAction`] wake-up handle
//! - [`worker`]: Sequential worker actors
//! - [`sequential`]: Finalize phase, one plan at a time on one worker
//! - [`pool`]: Coordinator matching idle workers to pending jobs
//!
//! The [`Executor`] façade is the entry point. Plans are read from and
//! written back to a [`Persistence`] backend, so the executor can resume
//! any plan the backend knows about.

pub mod job_storage;
pub mod pool;
pub mod round_robin;
pub mod sequential;
pub mod work;
pub mod worker;

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info};
use serde_json::Value;

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::plan::{ActionRegistry, ExecutionPlan, StepId};

use pool::PoolMessage;

pub use job_storage::{Job, JobStorage};
pub use pool::PlanOutcome;
pub use round_robin::RoundRobin;
pub use sequential::SequentialManager;
pub use work::{SharedPlan, SuspendedAction, Work};

/// Executes plans stored in a persistence backend.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flowrunner::{ActionRegistry, Executor, ExecutorConfig, InMemoryPersistence, Persistence};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(InMemoryPersistence::new());
///     let plan = flowrunner::load_plan("deploy.yaml")?;
///     store.save_execution_plan(&plan)?;
///
///     let executor = Executor::new(
///         ExecutorConfig::default().with_pool_size(4),
///         store,
///         ActionRegistry::with_builtins(),
///     )?;
///     let finished = executor.execute(&plan.id)?.wait()?;
///     println!("{} finished: {}", finished.id, finished.result);
///
///     executor.terminate().wait();
///     Ok(())
/// }
/// ```
pub struct Executor {
    pool: Sender<PoolMessage>,
    persistence: Arc<dyn Persistence>,
    pool_size: usize,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Starts the worker pool.
    pub fn new(config: ExecutorConfig, persistence: Arc<dyn Persistence>, actions: ActionRegistry) -> Result<Self> {
        let pool_size = config.pool_size.max(1);
        let (pool, coordinator) = pool::Pool::spawn(pool_size, Arc::clone(&persistence), actions)?;
        Ok(Self {
            pool,
            persistence,
            pool_size,
            coordinator: Mutex::new(Some(coordinator)),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Starts or resumes the plan stored under `execution_plan_id`.
    ///
    /// Fails without dispatching anything if the plan is already running
    /// or stopped, if its flows are invalid, or if the executor is
    /// terminating.
    pub fn execute(&self, execution_plan_id: &str) -> Result<ExecutionHandle> {
        let (reply, response) = channel();
        self.pool
            .send(PoolMessage::Execute {
                execution_plan_id: execution_plan_id.to_string(),
                reply,
            })
            .map_err(|_| Error::ExecutorGone)?;
        let outcome = response.recv().map_err(|_| Error::ExecutorGone)??;
        Ok(ExecutionHandle {
            execution_plan_id: execution_plan_id.to_string(),
            outcome,
        })
    }

    /// Delivers a progress notification to a suspended step.
    pub fn progress_update(&self, execution_plan_id: &str, step_id: StepId, done: f64, args: Value) -> Result<()> {
        SuspendedAction::new(execution_plan_id, step_id, self.pool.clone()).update_progress(done, args)
    }

    /// Skips a step of a plan that is not running, with its dependents.
    ///
    /// Handled by the coordinator, so it cannot interleave with the start
    /// of an execution of the same plan.
    pub fn skip(&self, execution_plan_id: &str, step_id: StepId) -> Result<Vec<StepId>> {
        let (reply, response) = channel();
        self.pool
            .send(PoolMessage::Skip {
                execution_plan_id: execution_plan_id.to_string(),
                step_id,
                reply,
            })
            .map_err(|_| Error::ExecutorGone)?;
        response.recv().map_err(|_| Error::ExecutorGone)?
    }

    /// Current weighted progress of a plan, in `[0, 1]`.
    pub fn progress(&self, execution_plan_id: &str) -> Result<f64> {
        Ok(self.load(execution_plan_id)?.compute_progress())
    }

    /// Loads the last saved state of a plan.
    pub fn load(&self, execution_plan_id: &str) -> Result<ExecutionPlan> {
        Ok(self.persistence.load_execution_plan(execution_plan_id)?)
    }

    /// Begins a cooperative shutdown.
    ///
    /// New executions are refused; work of plans already executing drains.
    pub fn terminate(&self) -> TerminationHandle {
        let (reply, done) = channel();
        if self.pool.send(PoolMessage::Terminate { reply }).is_err() {
            info!("Executor already terminated");
        }
        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        TerminationHandle { done, coordinator }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let coordinator = self
            .coordinator
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if coordinator.is_some() {
            self.terminate().wait();
        }
    }
}

/// Waits for one plan's execution session to end.
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_plan_id: String,
    outcome: Receiver<PlanOutcome>,
}

impl ExecutionHandle {
    pub fn execution_plan_id(&self) -> &str {
        &self.execution_plan_id
    }

    /// Blocks until the plan is stopped or paused and returns its final state.
    pub fn wait(self) -> Result<ExecutionPlan> {
        self.outcome.recv().map_err(|_| Error::ExecutorGone)?
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<ExecutionPlan>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::ExecutorGone)),
        }
    }
}

/// Waits for a termination to complete.
#[derive(Debug)]
pub struct TerminationHandle {
    done: Receiver<()>,
    coordinator: Option<JoinHandle<()>>,
}

impl TerminationHandle {
    /// Blocks until in-flight work has drained and every worker stopped.
    pub fn wait(self) {
        // A closed channel means the pool is already gone.
        let _ = self.done.recv();
        if let Some(coordinator) = self.coordinator {
            if coordinator.join().is_err() {
                error!("Executor coordinator thread panicked");
            }
        }
    }
}
