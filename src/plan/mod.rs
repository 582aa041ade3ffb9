//! Execution Plan Module
//!
//! Data the executor reads and mutates while it runs work.
//!
//! # Structure
//!
//! - [`step`]: Steps and their lifecycle states
//! - [`execution_plan`]: Plans, plan states and results, progress and skip
//! - [`action`]: The action trait steps delegate to, and its registry
//! - [`parser`]: YAML plan definitions

pub mod action;
pub mod execution_plan;
pub mod parser;
pub mod step;

pub use action::{Action, ActionContext, ActionError, ActionRegistry, Outcome};
pub use execution_plan::{ExecutionPlan, PlanResult, PlanState};
pub use parser::{load_plan, parse_plan};
pub use step::{Phase, Step, StepId, StepState};
