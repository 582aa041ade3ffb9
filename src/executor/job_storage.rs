//! Job Storage
//!
//! Pending work for many plans: FIFO within a plan, round-robin across
//! plans. A plan is in the rotation exactly when its queue is non-empty.

use std::collections::{HashMap, VecDeque};

use super::round_robin::RoundRobin;

/// Anything that can be queued per execution plan.
pub trait Job {
    fn execution_plan_id(&self) -> &str;
}

/// Multi-plan work queue.
#[derive(Debug)]
pub struct JobStorage<J> {
    jobs: HashMap<String, VecDeque<J>>,
    plans: RoundRobin<String>,
}

impl<J: Job> JobStorage<J> {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            plans: RoundRobin::new(),
        }
    }

    /// Appends `job` to its plan's queue, registering the plan if needed.
    pub fn add(&mut self, job: J) {
        let plan_id = job.execution_plan_id().to_string();
        let queue = self.jobs.entry(plan_id.clone()).or_default();
        if queue.is_empty() {
            self.plans.add(plan_id);
        }
        queue.push_back(job);
    }

    /// Puts a job that could not be handed out back at the head of its
    /// plan's queue.
    pub fn requeue(&mut self, job: J) {
        let plan_id = job.execution_plan_id().to_string();
        let queue = self.jobs.entry(plan_id.clone()).or_default();
        if queue.is_empty() {
            self.plans.add(plan_id);
        }
        queue.push_front(job);
    }

    /// Pops the oldest job of the next plan in the rotation.
    pub fn pop(&mut self) -> Option<J> {
        self.pop_where(|_| true)
    }

    /// Like [`pop`](Self::pop), but only from plans accepted by `eligible`.
    ///
    /// Every registered plan is considered at most once, in rotation order.
    pub fn pop_where(&mut self, eligible: impl Fn(&str) -> bool) -> Option<J> {
        for _ in 0..self.plans.len() {
            let plan_id = self.plans.next()?;
            if !eligible(&plan_id) {
                continue;
            }
            let queue = self.jobs.get_mut(&plan_id)?;
            let job = queue.pop_front();
            if queue.is_empty() {
                self.jobs.remove(&plan_id);
                self.plans.delete(&plan_id);
            }
            return job;
        }
        None
    }

    /// Number of queued jobs for one plan.
    pub fn queued_for(&self, plan_id: &str) -> usize {
        self.jobs.get(plan_id).map_or(0, VecDeque::len)
    }

    /// Total number of queued jobs.
    pub fn len(&self) -> usize {
        self.jobs.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl<J: Job> Default for JobStorage<J> {
    fn default() -> Self {
        Self::new()
    }
}
