//! Test Fixtures
//!
//! Plans, actions and persistence backends shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::error::PersistenceError;
use crate::flow::Flow;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::plan::{Action, ActionContext, ActionError, ActionRegistry, ExecutionPlan, Outcome, Step};

/// Plan with steps 1 to 6 run as `Concurrence[Sequence[1, 2, 3], Sequence[4, 5, 6]]`.
pub fn two_branch_plan(id: &str) -> ExecutionPlan {
    let mut plan = ExecutionPlan::new(id);
    for n in 1..=6 {
        plan.add_step("echo", json!({ "n": n }));
    }
    plan.with_run_flow(Flow::Concurrence(vec![
        Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2), Flow::Atom(3)]),
        Flow::Sequence(vec![Flow::Atom(4), Flow::Atom(5), Flow::Atom(6)]),
    ]))
}

/// Registry with every test action.
///
/// - `echo`: succeeds with its input
/// - `fail`: fails with `input.message`
/// - `fail_unless`: fails unless `input.ok` is true
/// - `warn`: warns with `input.message`
/// - `panic`: panics
/// - `wait`: suspends at 0% until progress updates finish it
/// - `record` / `hold`: log into a [`Recorder`]
pub fn test_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register("echo", Echo)
        .register("fail", Fail)
        .register("fail_unless", FailUnless)
        .register("warn", Warn)
        .register("panic", Panic)
        .register("wait", Wait)
        .register("record", Record)
        .register("hold", Hold);
    registry
}

struct Echo;

impl Action for Echo {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        Ok(Outcome::Success(ctx.input.clone()))
    }
}

struct Fail;

impl Action for Fail {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        Err(message(ctx).into())
    }

    fn finalize(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        Err(message(ctx).into())
    }
}

struct FailUnless;

impl Action for FailUnless {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        if ctx.input["ok"].as_bool() == Some(true) {
            Ok(Outcome::Success(Value::Null))
        } else {
            Err("input not ok".into())
        }
    }
}

struct Warn;

impl Action for Warn {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        Ok(Outcome::Warning {
            output: ctx.input.clone(),
            message: message(ctx),
        })
    }
}

struct Panic;

impl Action for Panic {
    fn run(&self, _ctx: &ActionContext) -> Result<Outcome, ActionError> {
        panic!("action blew up");
    }
}

struct Wait;

impl Action for Wait {
    fn run(&self, _ctx: &ActionContext) -> Result<Outcome, ActionError> {
        Ok(Outcome::Suspended { done: 0.0 })
    }
}

fn message(ctx: &ActionContext) -> String {
    ctx.input["message"].as_str().unwrap_or("failed").to_string()
}

#[derive(Default)]
struct Recording {
    ran: Vec<String>,
    finalized: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

static RECORDINGS: Lazy<Mutex<HashMap<u64, Recording>>> = Lazy::new(Default::default);
static NEXT_RECORDER: AtomicU64 = AtomicU64::new(1);

fn with_recording<T>(id: u64, f: impl FnOnce(&mut Recording) -> T) -> T {
    let mut recordings = RECORDINGS.lock().unwrap_or_else(|e| e.into_inner());
    f(recordings.entry(id).or_default())
}

/// Observes what `record` and `hold` steps did, isolated per test.
pub struct Recorder {
    id: u64,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            id: NEXT_RECORDER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Step input that makes a `record` or `hold` step log `label` here.
    pub fn input(&self, label: &str) -> Value {
        json!({ "recorder": self.id, "label": label })
    }

    /// Labels of steps run, in completion order.
    pub fn ran(&self) -> Vec<String> {
        with_recording(self.id, |r| r.ran.clone())
    }

    /// Labels of steps finalized, in order.
    pub fn finalized(&self) -> Vec<String> {
        with_recording(self.id, |r| r.finalized.clone())
    }

    /// Highest number of `hold` steps observed running at once.
    pub fn max_in_flight(&self) -> usize {
        with_recording(self.id, |r| r.max_in_flight)
    }
}

fn recorder_of(ctx: &ActionContext) -> (u64, String) {
    (
        ctx.input["recorder"].as_u64().unwrap_or_default(),
        ctx.input["label"].as_str().unwrap_or_default().to_string(),
    )
}

struct Record;

impl Action for Record {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let (id, label) = recorder_of(ctx);
        with_recording(id, |r| r.ran.push(label));
        Ok(Outcome::Success(ctx.input.clone()))
    }

    fn finalize(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let (id, label) = recorder_of(ctx);
        with_recording(id, |r| r.finalized.push(label));
        Ok(())
    }
}

/// Holds its worker for a while so overlapping executions are observable.
struct Hold;

impl Action for Hold {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let (id, label) = recorder_of(ctx);
        with_recording(id, |r| {
            r.in_flight += 1;
            r.max_in_flight = r.max_in_flight.max(r.in_flight);
        });
        thread::sleep(Duration::from_millis(100));
        with_recording(id, |r| {
            r.in_flight -= 1;
            r.ran.push(label);
        });
        Ok(Outcome::Success(Value::Null))
    }
}

/// In-memory persistence whose step saves can be made to fail.
#[derive(Default)]
pub struct FlakyPersistence {
    inner: InMemoryPersistence,
    /// Step saves still allowed to succeed; `None` means unlimited
    step_saves_left: Mutex<Option<usize>>,
}

impl FlakyPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_step_saves(&self, fail: bool) {
        *self.step_saves_left.lock().unwrap() = if fail { Some(0) } else { None };
    }

    /// Lets `count` more step saves succeed, then fails the rest.
    pub fn fail_step_saves_after(&self, count: usize) {
        *self.step_saves_left.lock().unwrap() = Some(count);
    }
}

impl Persistence for FlakyPersistence {
    fn load_execution_plan(&self, id: &str) -> Result<ExecutionPlan, PersistenceError> {
        self.inner.load_execution_plan(id)
    }

    fn save_execution_plan(&self, plan: &ExecutionPlan) -> Result<(), PersistenceError> {
        self.inner.save_execution_plan(plan)
    }

    fn save_step(&self, step: &Step) -> Result<(), PersistenceError> {
        {
            let mut left = self.step_saves_left.lock().unwrap();
            match left.as_mut() {
                Some(0) => return Err(PersistenceError::Backend("disk unavailable".to_string())),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.save_step(step)
    }
}
