//! Persistence Module
//!
//! The executor saves plans and steps at every boundary (before a step
//! runs, after it finishes, on each plan state transition) through the
//! [`Persistence`] trait. How state is stored is up to the backend.
//!
//! - [`InMemoryPersistence`]: Process-local storage, useful for tests
//! - [`FilePersistence`]: One JSON file per plan in a state directory

pub mod file;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PersistenceError;
use crate::plan::{ExecutionPlan, Step};

pub use file::{FilePersistence, DEFAULT_STATE_DIR};

/// Durable storage for execution plans and their steps.
pub trait Persistence: Send + Sync {
    fn load_execution_plan(&self, id: &str) -> Result<ExecutionPlan, PersistenceError>;

    fn save_execution_plan(&self, plan: &ExecutionPlan) -> Result<(), PersistenceError>;

    /// Saves one step of an already stored plan.
    fn save_step(&self, step: &Step) -> Result<(), PersistenceError>;
}

/// Keeps plans in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    plans: Mutex<HashMap<String, ExecutionPlan>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn plans(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ExecutionPlan>>, PersistenceError> {
        self.plans
            .lock()
            .map_err(|_| PersistenceError::Backend("in-memory store poisoned".to_string()))
    }
}

impl Persistence for InMemoryPersistence {
    fn load_execution_plan(&self, id: &str) -> Result<ExecutionPlan, PersistenceError> {
        self.plans()?
            .get(id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))
    }

    fn save_execution_plan(&self, plan: &ExecutionPlan) -> Result<(), PersistenceError> {
        self.plans()?.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    fn save_step(&self, step: &Step) -> Result<(), PersistenceError> {
        let mut plans = self.plans()?;
        let plan = plans
            .get_mut(&step.execution_plan_id)
            .ok_or_else(|| PersistenceError::NotFound(step.execution_plan_id.clone()))?;
        plan.steps.insert(step.id, step.clone());
        Ok(())
    }
}
