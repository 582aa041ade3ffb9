//! Actions
//!
//! The executor decides when a step runs; an [`Action`] decides what it does.
//! Actions are looked up by name in an [`ActionRegistry`] so plans stay
//! serializable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::step::StepId;
use crate::executor::SuspendedAction;

/// Failure reported by an action; recorded on the step as its error.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result of running or waking an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Finished; the value becomes the step output
    Success(Value),
    /// Finished with a non-fatal problem worth reporting
    Warning { output: Value, message: String },
    /// Waiting on an external event; frees the worker
    Suspended { done: f64 },
}

/// Everything an action sees while it executes.
#[derive(Clone)]
pub struct ActionContext {
    pub execution_plan_id: String,
    pub step_id: StepId,
    pub input: Value,
    suspended: Option<SuspendedAction>,
}

impl ActionContext {
    /// Creates a context without a way back into an executor.
    pub fn detached(execution_plan_id: impl Into<String>, step_id: StepId, input: Value) -> Self {
        Self {
            execution_plan_id: execution_plan_id.into(),
            step_id,
            input,
            suspended: None,
        }
    }

    pub(crate) fn attached(
        execution_plan_id: impl Into<String>,
        step_id: StepId,
        input: Value,
        suspended: SuspendedAction,
    ) -> Self {
        Self {
            suspended: Some(suspended),
            ..Self::detached(execution_plan_id, step_id, input)
        }
    }

    /// Handle for delivering progress updates after returning
    /// [`Outcome::Suspended`]. `None` outside an executor.
    pub fn suspended(&self) -> Option<SuspendedAction> {
        self.suspended.clone()
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("execution_plan_id", &self.execution_plan_id)
            .field("step_id", &self.step_id)
            .field("input", &self.input)
            .finish()
    }
}

/// Domain logic behind a step.
pub trait Action: Send + Sync {
    /// Runs the step during the run phase.
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError>;

    /// Handles a progress update delivered to a suspended step.
    ///
    /// By default the step completes once `done` reaches 1.0 and stays
    /// suspended otherwise.
    fn progress_update(&self, _ctx: &ActionContext, done: f64, _args: &Value) -> Result<Outcome, ActionError> {
        if done >= 1.0 {
            Ok(Outcome::Success(Value::Null))
        } else {
            Ok(Outcome::Suspended { done })
        }
    }

    /// Runs the step during the finalize phase.
    fn finalize(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Name-to-action lookup shared by all workers.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in `shell`, `sleep` and `noop` actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::actions::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, action: impl Action + 'static) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
