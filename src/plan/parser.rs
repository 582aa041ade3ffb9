//! Plan Definition Parser
//!
//! Loads execution plans from YAML definitions. Flows may be omitted, in
//! which case each phase runs its steps as a sequence in id order.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: nightly-build
//! steps:
//!   - id: 1
//!     action: shell
//!     input: { command: "make build" }
//!     weight: 3
//!   - id: 2
//!     action: shell
//!     input: { command: "make test" }
//!     requires: [1]
//!   - id: 3
//!     action: noop
//!     phase: finalize
//! run_flow:
//!   sequence:
//!     - atom: 1
//!     - atom: 2
//! ```

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use super::execution_plan::ExecutionPlan;
use super::step::{Phase, Step, StepId};
use crate::error::{Error, Result};
use crate::flow::Flow;

fn default_weight() -> f64 {
    1.0
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct StepDefinition {
    id: StepId,
    action: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    phase: Phase,
    #[serde(default)]
    requires: Vec<StepId>,
    #[serde(default = "default_weight")]
    weight: f64,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PlanDefinition {
    id: String,
    #[serde(default)]
    steps: Vec<StepDefinition>,
    /// Flows are written as `sequence: [...]` maps rather than YAML tags
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    run_flow: Option<Flow>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    finalize_flow: Option<Flow>,
}

/// Loads and validates an execution plan from a YAML file.
pub fn load_plan(path: impl AsRef<Path>) -> Result<ExecutionPlan> {
    let path = path.as_ref();
    info!("Loading plan from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        Error::Parse(format!(
            "failed to read plan file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_plan(&yaml_content)
}

/// Parses and validates an execution plan from YAML text.
pub fn parse_plan(yaml_content: &str) -> Result<ExecutionPlan> {
    let definition: PlanDefinition = serde_yaml::from_str(yaml_content)
        .map_err(|e| Error::Parse(format!("{}. Check the file format.", e)))?;

    let mut plan = ExecutionPlan::new(definition.id);
    for def in definition.steps {
        if !def.weight.is_finite() || def.weight < 0.0 {
            return Err(Error::Parse(format!(
                "step {} has weight {}, expected a finite non-negative number",
                def.id, def.weight
            )));
        }
        let mut step = Step::new(plan.id.clone(), def.id, def.action, def.input)
            .with_phase(def.phase)
            .with_weight(def.weight);
        step.requires = def.requires;
        plan.insert_step(step)?;
    }

    for step in plan.steps.values() {
        if let Some(missing) = step.requires.iter().find(|id| !plan.steps.contains_key(id)) {
            return Err(Error::Parse(format!(
                "step {} requires unknown step {}",
                step.id, missing
            )));
        }
    }

    plan.run_flow = definition
        .run_flow
        .unwrap_or_else(|| sequence_of_phase(&plan, Phase::Run));
    plan.finalize_flow = definition
        .finalize_flow
        .unwrap_or_else(|| sequence_of_phase(&plan, Phase::Finalize));

    plan.validate()?;

    info!(
        "Parsed plan '{}': {} steps ({} run, {} finalize)",
        plan.id,
        plan.steps.len(),
        plan.run_flow.size(),
        plan.finalize_flow.size()
    );
    Ok(plan)
}

/// Default flow for a phase: its steps one after another, in id order.
fn sequence_of_phase(plan: &ExecutionPlan, phase: Phase) -> Flow {
    Flow::Sequence(
        plan.steps
            .values()
            .filter(|step| step.phase == phase)
            .map(|step| Flow::Atom(step.id))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLAN_YAML: &str = r#"
id: nightly
steps:
  - id: 1
    action: shell
    input: { command: "echo build" }
    weight: 3
  - id: 2
    action: noop
    requires: [1]
  - id: 3
    action: noop
  - id: 4
    action: noop
    phase: finalize
run_flow:
  sequence:
    - atom: 1
    - concurrence:
        - atom: 2
        - atom: 3
"#;

    #[test]
    fn test_parse_plan() {
        let plan = parse_plan(PLAN_YAML).unwrap();

        assert_eq!(plan.id, "nightly");
        assert_eq!(plan.state, PlanState::Planned);
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.step(1).unwrap().progress_weight, 3.0);
        assert_eq!(plan.step(1).unwrap().input["command"], "echo build");
        assert_eq!(plan.step(2).unwrap().requires, vec![1]);
        assert_eq!(plan.step(2).unwrap().execution_plan_id, "nightly");
        assert_eq!(plan.run_flow.step_ids(), vec![1, 2, 3]);
        assert_eq!(plan.finalize_flow, Flow::Sequence(vec![Flow::Atom(4)]));
    }

    #[test]
    fn test_default_flows_are_sequences() {
        let yaml = "id: p\nsteps:\n  - id: 2\n    action: noop\n  - id: 1\n    action: noop\n";
        let plan = parse_plan(yaml).unwrap();
        assert_eq!(plan.run_flow, Flow::Sequence(vec![Flow::Atom(1), Flow::Atom(2)]));
        assert!(plan.finalize_flow.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_requirement() {
        let yaml = "id: p\nsteps:\n  - id: 1\n    action: noop\n    requires: [5]\n";
        assert!(matches!(parse_plan(yaml), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_flow_with_wrong_phase() {
        let yaml = "id: p\nsteps:\n  - id: 1\n    action: noop\n    phase: finalize\nrun_flow:\n  atom: 1\n";
        assert!(matches!(parse_plan(yaml), Err(Error::InvalidFlow(_))));
    }

    #[test]
    fn test_parse_rejects_invalid_weights() {
        for weight in ["-1", ".nan", ".inf", "-.inf"] {
            let yaml = format!("id: p\nsteps:\n  - id: 1\n    action: noop\n    weight: {}\n", weight);
            assert!(matches!(parse_plan(&yaml), Err(Error::Parse(_))), "weight {}", weight);
        }
        let yaml = "id: p\nsteps:\n  - id: 1\n    action: noop\n    weight: 0\n";
        assert_eq!(parse_plan(yaml).unwrap().step(1).unwrap().progress_weight, 0.0);
    }

    #[test]
    fn test_parse_rejects_duplicate_step() {
        let yaml = "id: p\nsteps:\n  - id: 1\n    action: noop\n  - id: 1\n    action: noop\n";
        assert!(parse_plan(yaml).is_err());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(matches!(parse_plan("id: [unclosed"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_load_plan_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PLAN_YAML.as_bytes()).unwrap();

        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.id, "nightly");
    }

    #[test]
    fn test_load_plan_missing_file() {
        let result = load_plan("/nonexistent/plan.yaml");
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
