//! FlowRunner - Parallel Workflow Orchestration Engine
//!
//! Executes plans made of steps arranged in sequence and concurrence flows
//! on a fixed pool of worker threads. A plan whose step fails is paused
//! rather than aborted: fix the input or skip the step, execute again, and
//! only the unfinished work runs.
//!
//! # Architecture
//!
//! - [`flow`]: Flow trees and the traversal that decides which steps run next
//! - [`plan`]: Execution plans, steps, their state machines and actions
//! - [`executor`]: Worker pool, fair job storage and the [`Executor`] façade
//! - [`persistence`]: Storage backends for plans and steps
//! - [`actions`]: Built-in `shell`, `sleep` and `noop` actions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowrunner::{load_plan, ActionRegistry, Executor, ExecutorConfig, FilePersistence, Persistence};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a plan from YAML and store it
//!     let plan = load_plan("deploy.yaml")?;
//!     let store = Arc::new(FilePersistence::new(".flowrunner")?);
//!     store.save_execution_plan(&plan)?;
//!
//!     // Execute it on four workers
//!     let executor = Executor::new(
//!         ExecutorConfig::default().with_pool_size(4),
//!         store,
//!         ActionRegistry::with_builtins(),
//!     )?;
//!     let finished = executor.execute(&plan.id)?.wait()?;
//!     println!("{}: {}", finished.state, finished.result);
//!
//!     executor.terminate().wait();
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod executor;
pub mod flow;
pub mod persistence;
pub mod plan;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::ExecutorConfig;
pub use error::{Error, PersistenceError, Result};
pub use executor::{ExecutionHandle, Executor, SuspendedAction, TerminationHandle};
pub use flow::{Flow, FlowManager};
pub use persistence::{FilePersistence, InMemoryPersistence, Persistence};
pub use plan::{
    load_plan, parse_plan, Action, ActionContext, ActionError, ActionRegistry, ExecutionPlan, Outcome, Phase,
    PlanResult, PlanState, Step, StepId, StepState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
