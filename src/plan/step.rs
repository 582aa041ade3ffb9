//! Execution Plan Steps
//!
//! A step is one unit of work inside a plan: an action name, its input,
//! and the lifecycle state the executor drives it through.
//!
//! ```text
//! pending ──> running ──> success | warning | error
//!                │  ^
//!                v  │
//!             suspended
//! pending | error ──> skipped   (explicit user request)
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a step, unique within its execution plan.
pub type StepId = usize;

/// Lifecycle state of a step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Success,
    Warning,
    Error,
    Skipped,
    Suspended,
}

impl StepState {
    /// True for states the flow traversal treats as finished successfully.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Success | Self::Warning | Self::Skipped)
    }

    /// True once the step has reached an outcome, good or bad.
    pub fn is_finished(self) -> bool {
        self.is_resolved() || self == Self::Error
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// Which phase of a plan a step belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Run,
    Finalize,
}

fn default_weight() -> f64 {
    1.0
}

/// A single step of an execution plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    pub id: StepId,

    pub execution_plan_id: String,

    #[serde(default)]
    pub phase: Phase,

    /// Name of the action, resolved through the executor's registry
    pub action: String,

    #[serde(default)]
    pub input: Value,

    /// Output produced by the action; stays null for skipped steps
    #[serde(default)]
    pub output: Value,

    /// Steps whose output this step consumes
    #[serde(default)]
    pub requires: Vec<StepId>,

    #[serde(default)]
    pub state: StepState,

    /// Failure or warning message from the last execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fraction of the action done, reported while running or suspended
    #[serde(default)]
    pub progress_done: f64,

    #[serde(default = "default_weight")]
    pub progress_weight: f64,

    /// Time spent inside the action itself
    #[serde(default)]
    pub execution_time: Duration,

    /// Wall-clock time from first start to end
    #[serde(default)]
    pub real_time: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Creates a pending run-phase step.
    pub fn new(
        execution_plan_id: impl Into<String>,
        id: StepId,
        action: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id,
            execution_plan_id: execution_plan_id.into(),
            phase: Phase::Run,
            action: action.into(),
            input,
            output: Value::Null,
            requires: Vec::new(),
            state: StepState::Pending,
            error: None,
            progress_done: 0.0,
            progress_weight: 1.0,
            execution_time: Duration::ZERO,
            real_time: Duration::ZERO,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.progress_weight = weight;
        self
    }

    pub fn requiring(mut self, step_id: StepId) -> Self {
        self.requires.push(step_id);
        self
    }

    /// Moves the step into `running`, stamping the first start time.
    ///
    /// A retried error step starts over at zero progress.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        if self.state == StepState::Error {
            self.progress_done = 0.0;
        }
        self.state = StepState::Running;
        self.error = None;
        self.ended_at = None;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Parks the step until an external event delivers a progress update.
    ///
    /// A `done` value that is not a number counts as no progress.
    pub fn mark_suspended(&mut self, done: f64, spent: Duration) {
        self.state = StepState::Suspended;
        self.progress_done = fraction(done);
        self.execution_time += spent;
    }

    /// Records the final outcome of an execution.
    pub fn mark_finished(
        &mut self,
        state: StepState,
        output: Value,
        message: Option<String>,
        spent: Duration,
        now: DateTime<Utc>,
    ) {
        self.state = state;
        self.output = output;
        self.error = message;
        self.progress_done = 1.0;
        self.execution_time += spent;
        self.ended_at = Some(now);
        if let Some(started) = self.started_at {
            self.real_time = (now - started).to_std().unwrap_or(spent);
        }
    }

    /// Marks the step skipped; its output is never computed.
    pub fn mark_skipped(&mut self) {
        self.state = StepState::Skipped;
        self.output = Value::Null;
        self.error = None;
    }

    /// Completed fraction used for plan progress.
    pub fn done_fraction(&self) -> f64 {
        match self.state {
            StepState::Pending => 0.0,
            StepState::Running | StepState::Suspended => fraction(self.progress_done),
            StepState::Success | StepState::Warning | StepState::Error | StepState::Skipped => 1.0,
        }
    }

    /// Weight used for plan progress; unusable weights count as zero.
    pub fn effective_weight(&self) -> f64 {
        if self.progress_weight.is_finite() && self.progress_weight > 0.0 {
            self.progress_weight
        } else {
            0.0
        }
    }
}

fn fraction(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
