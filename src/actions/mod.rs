//! Built-in Actions
//!
//! Actions available to plans loaded from YAML:
//!
//! - `shell`: runs a bash command ([`ShellAction`])
//! - `sleep`: waits `input.millis` milliseconds, then echoes its input
//! - `noop`: succeeds immediately, echoing its input

pub mod shell;

use std::thread;
use std::time::Duration;

use crate::plan::{Action, ActionContext, ActionError, ActionRegistry, Outcome};

pub use shell::ShellAction;

/// Registers every built-in action under its plan-facing name.
pub fn register_builtins(registry: &mut ActionRegistry) {
    registry
        .register("shell", ShellAction)
        .register("sleep", SleepAction)
        .register("noop", NoopAction);
}

/// Blocks its worker for `input.millis` milliseconds.
pub struct SleepAction;

impl Action for SleepAction {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let millis = ctx.input["millis"]
            .as_u64()
            .ok_or("sleep action requires a non-negative 'millis' integer")?;
        thread::sleep(Duration::from_millis(millis));
        Ok(Outcome::Success(ctx.input.clone()))
    }
}

pub struct NoopAction;

impl Action for NoopAction {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        Ok(Outcome::Success(ctx.input.clone()))
    }
}
