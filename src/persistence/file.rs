//! File-Backed Persistence
//!
//! Stores each execution plan as pretty-printed JSON at
//! `{state_dir}/{plan_id}.json`, enabling resume after the process exits.
//! Files are written to a temporary sibling first and renamed into place.
//!
//! Plan ids are percent-encoded in file names, so distinct ids never share
//! a state file.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, info};

use super::Persistence;
use crate::error::PersistenceError;
use crate::plan::{ExecutionPlan, Step};

/// Default directory for plan state files.
pub const DEFAULT_STATE_DIR: &str = ".flowrunner";

/// Encodes a plan id as a file name component.
///
/// ASCII letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`. Different ids always give different names.
pub(crate) fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{:02X}", byte);
        }
    }
    stem
}

/// Persistence backend writing one JSON document per plan.
#[derive(Debug)]
pub struct FilePersistence {
    state_dir: PathBuf,
    /// Serializes read-modify-write cycles of `save_step`
    write_lock: Mutex<()>,
}

impl FilePersistence {
    /// Creates the backend, creating `state_dir` if needed.
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        info!("Using state directory: {}", state_dir.display());
        Ok(Self {
            state_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the state file path for a plan id.
    pub fn plan_path(&self, id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", file_stem(id)))
    }

    fn read(&self, id: &str) -> Result<ExecutionPlan, PersistenceError> {
        let path = self.plan_path(id);
        if !path.exists() {
            return Err(PersistenceError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, plan: &ExecutionPlan) -> Result<(), PersistenceError> {
        let path = self.plan_path(&plan.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(plan)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!("Saved plan '{}' to {}", plan.id, path.display());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, PersistenceError> {
        self.write_lock
            .lock()
            .map_err(|_| PersistenceError::Backend("state directory lock poisoned".to_string()))
    }
}

impl Persistence for FilePersistence {
    fn load_execution_plan(&self, id: &str) -> Result<ExecutionPlan, PersistenceError> {
        let _guard = self.lock()?;
        self.read(id)
    }

    fn save_execution_plan(&self, plan: &ExecutionPlan) -> Result<(), PersistenceError> {
        let _guard = self.lock()?;
        self.write(plan)
    }

    fn save_step(&self, step: &Step) -> Result<(), PersistenceError> {
        let _guard = self.lock()?;
        let mut plan = self.read(&step.execution_plan_id)?;
        plan.steps.insert(step.id, step.clone());
        self.write(&plan)
    }
}
