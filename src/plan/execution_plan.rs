//! Execution Plans
//!
//! An execution plan owns its steps plus the run and finalize flows that
//! order them. The executor drives the plan through its lifecycle:
//!
//! ```text
//! planned ──> running ──> stopped
//!               │  ^
//!               v  │
//!              paused
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::{Phase, Step, StepId, StepState};
use crate::error::{Error, Result};
use crate::flow::Flow;

/// Lifecycle state of an execution plan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    #[default]
    Planned,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planned => "planned",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Overall outcome of an execution plan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanResult {
    #[default]
    Pending,
    Success,
    Warning,
    Error,
}

impl fmt::Display for PlanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One execution of a run flow and a finalize flow over concrete steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub id: String,

    #[serde(default)]
    pub state: PlanState,

    #[serde(default)]
    pub result: PlanResult,

    /// Steps keyed by id, in creation order
    pub steps: BTreeMap<StepId, Step>,

    #[serde(default)]
    pub run_flow: Flow,

    #[serde(default)]
    pub finalize_flow: Flow,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Sum of the steps' execution times
    #[serde(default)]
    pub execution_time: Duration,

    #[serde(default)]
    pub real_time: Duration,

    /// Weighted progress cached at the last save
    #[serde(default)]
    pub progress: f64,
}

impl ExecutionPlan {
    /// Creates an empty plan in the `planned` state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: PlanState::Planned,
            result: PlanResult::Pending,
            steps: BTreeMap::new(),
            run_flow: Flow::empty(),
            finalize_flow: Flow::empty(),
            started_at: None,
            ended_at: None,
            execution_time: Duration::ZERO,
            real_time: Duration::ZERO,
            progress: 0.0,
        }
    }

    /// Adds a run-phase step with the next free id.
    pub fn add_step(&mut self, action: impl Into<String>, input: Value) -> StepId {
        let id = self.next_step_id();
        self.steps.insert(id, Step::new(self.id.clone(), id, action, input));
        id
    }

    /// Adds a finalize-phase step with the next free id.
    pub fn add_finalize_step(&mut self, action: impl Into<String>, input: Value) -> StepId {
        let id = self.next_step_id();
        let step = Step::new(self.id.clone(), id, action, input).with_phase(Phase::Finalize);
        self.steps.insert(id, step);
        id
    }

    /// Inserts a fully built step, rejecting duplicate ids.
    pub fn insert_step(&mut self, mut step: Step) -> Result<StepId> {
        if self.steps.contains_key(&step.id) {
            return Err(Error::InvalidFlow(format!(
                "step {} defined twice in plan '{}'",
                step.id, self.id
            )));
        }
        step.execution_plan_id = self.id.clone();
        let id = step.id;
        self.steps.insert(id, step);
        Ok(id)
    }

    fn next_step_id(&self) -> StepId {
        self.steps.keys().next_back().map_or(1, |last| last + 1)
    }

    pub fn with_run_flow(mut self, flow: Flow) -> Self {
        self.run_flow = flow;
        self
    }

    pub fn with_finalize_flow(mut self, flow: Flow) -> Self {
        self.finalize_flow = flow;
        self
    }

    pub fn flow(&self, phase: Phase) -> &Flow {
        match phase {
            Phase::Run => &self.run_flow,
            Phase::Finalize => &self.finalize_flow,
        }
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.get_mut(&id)
    }

    /// Looks up a step, reporting a missing one as a request error.
    pub fn require_step(&self, id: StepId) -> Result<&Step> {
        self.steps.get(&id).ok_or_else(|| Error::StepNotFound {
            plan: self.id.clone(),
            step: id,
        })
    }

    pub fn is_step_resolved(&self, id: StepId) -> bool {
        self.step(id).is_some_and(|step| step.state.is_resolved())
    }

    /// Checks that both flows reference each step of their phase at most once.
    pub fn validate(&self) -> Result<()> {
        for phase in [Phase::Run, Phase::Finalize] {
            let flow = self.flow(phase);
            if let Some(duplicate) = flow.find_duplicate() {
                return Err(Error::InvalidFlow(format!(
                    "step {} appears more than once in the {:?} flow of plan '{}'",
                    duplicate, phase, self.id
                )));
            }
            for id in flow.step_ids() {
                let step = self.require_step(id)?;
                if step.phase != phase {
                    return Err(Error::InvalidFlow(format!(
                        "step {} is a {:?} step but appears in the {:?} flow",
                        id, step.phase, phase
                    )));
                }
            }
        }
        Ok(())
    }

    /// Moves the plan into `running`, refusing plans that cannot execute.
    ///
    /// Nothing is mutated when an error is returned.
    pub fn prepare_execution(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            PlanState::Running => return Err(Error::AlreadyRunning(self.id.clone())),
            PlanState::Stopped => return Err(Error::AlreadyStopped(self.id.clone())),
            PlanState::Planned | PlanState::Paused => {}
        }
        self.validate()?;

        info!("Execution plan '{}': {} -> running", self.id, self.state);
        self.state = PlanState::Running;
        self.result = PlanResult::Pending;
        self.ended_at = None;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        Ok(())
    }

    /// Marks `step_id` skipped, along with every pending or failed step
    /// that consumes its output, directly or transitively.
    ///
    /// Returns the ids of all skipped steps.
    pub fn skip(&mut self, step_id: StepId) -> Result<Vec<StepId>> {
        if self.state == PlanState::Running {
            return Err(Error::AlreadyRunning(self.id.clone()));
        }
        let step = self.require_step(step_id)?;
        if !matches!(step.state, StepState::Pending | StepState::Error) {
            return Err(Error::InvalidStepState {
                plan: self.id.clone(),
                step: step_id,
                state: step.state,
                operation: "skip",
            });
        }

        let mut skipped: HashSet<StepId> = HashSet::from([step_id]);
        loop {
            let dependents: Vec<StepId> = self
                .steps
                .values()
                .filter(|s| !skipped.contains(&s.id))
                .filter(|s| matches!(s.state, StepState::Pending | StepState::Error))
                .filter(|s| s.requires.iter().any(|r| skipped.contains(r)))
                .map(|s| s.id)
                .collect();
            if dependents.is_empty() {
                break;
            }
            skipped.extend(dependents);
        }

        let mut ids: Vec<StepId> = skipped.into_iter().collect();
        ids.sort_unstable();
        for id in &ids {
            if let Some(step) = self.steps.get_mut(id) {
                step.mark_skipped();
            }
        }
        info!("Execution plan '{}': skipped steps {:?}", self.id, ids);
        Ok(ids)
    }

    /// Steps referenced by either flow, run phase first.
    fn flow_steps(&self) -> Vec<&Step> {
        self.run_flow
            .step_ids()
            .into_iter()
            .chain(self.finalize_flow.step_ids())
            .filter_map(|id| self.steps.get(&id))
            .collect()
    }

    /// True if some run-phase step failed or was never reached.
    pub fn has_unresolved_run_steps(&self) -> bool {
        self.run_flow
            .step_ids()
            .into_iter()
            .any(|id| !self.is_step_resolved(id))
    }

    /// Derives the plan result from its steps.
    pub fn compute_result(&self) -> PlanResult {
        let mut result = PlanResult::Success;
        for step in self.flow_steps() {
            match step.state {
                StepState::Success | StepState::Skipped => {}
                StepState::Warning => result = PlanResult::Warning,
                StepState::Error
                | StepState::Pending
                | StepState::Running
                | StepState::Suspended => return PlanResult::Error,
            }
        }
        result
    }

    /// Weighted fraction of work done across both flows, in `[0, 1]`.
    pub fn compute_progress(&self) -> f64 {
        let (done, total) = self.flow_steps().into_iter().fold((0.0, 0.0), |(done, total), step| {
            let weight = step.effective_weight();
            (done + step.done_fraction() * weight, total + weight)
        });
        if total <= 0.0 {
            return if self.state == PlanState::Stopped { 1.0 } else { 0.0 };
        }
        let progress = done / total;
        if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Recomputes the cached progress value.
    pub fn refresh_progress(&mut self) -> f64 {
        self.progress = self.compute_progress();
        self.progress
    }

    /// Ends the current execution session.
    ///
    /// Plans whose result is an error are paused so they can be resumed;
    /// everything else stops.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.result = self.compute_result();
        let next = match self.result {
            PlanResult::Error | PlanResult::Pending => PlanState::Paused,
            PlanResult::Success | PlanResult::Warning => PlanState::Stopped,
        };
        info!(
            "Execution plan '{}': {} -> {} (result: {})",
            self.id, self.state, next, self.result
        );
        self.state = next;
        self.ended_at = Some(now);
        self.execution_time = self.steps.values().map(|s| s.execution_time).sum();
        if let Some(started) = self.started_at {
            self.real_time = (now - started).to_std().unwrap_or_default();
        }
        self.refresh_progress();
    }
}
