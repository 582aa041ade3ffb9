//! Shell Action
//!
//! Runs `input.command` through bash. The command is written to a
//! temporary script with `set -e`, so the first failing line fails the
//! step. Standard output becomes the step output.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error, warn};
use serde_json::json;

use crate::persistence::file::file_stem;
use crate::plan::{Action, ActionContext, ActionError, Outcome, StepId};

/// Runs a bash command.
///
/// Input:
/// - `command` (required): script body
/// - `working_dir` (optional): directory to run in
pub struct ShellAction;

impl Action for ShellAction {
    fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let command = ctx.input["command"]
            .as_str()
            .ok_or("shell action requires a 'command' string")?;
        let working_dir = ctx.input["working_dir"].as_str().map(PathBuf::from);

        let script_path = create_script(&ctx.execution_plan_id, ctx.step_id, command)
            .map_err(|e| ActionError::new(format!("failed to write script: {}", e)))?;
        let output = execute_with_bash(&script_path, ctx, working_dir.as_deref());

        if let Err(e) = fs::remove_file(&script_path) {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        let output = output.map_err(|e| ActionError::new(format!("failed to start bash: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if output.status.success() {
            if !stdout.trim().is_empty() {
                debug!("Step {} output:\n{}", ctx.step_id, stdout);
            }
            Ok(Outcome::Success(json!({ "stdout": stdout })))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "Step {} of plan '{}' exited with code {:?}",
                ctx.step_id,
                ctx.execution_plan_id,
                output.status.code()
            );
            if !stderr.trim().is_empty() {
                error!("stderr:\n{}", stderr);
            }
            Err(ActionError::new(match output.status.code() {
                Some(code) => format!("command exited with code {}: {}", code, stderr.trim()),
                None => "command terminated by signal".to_string(),
            }))
        }
    }
}

/// Distinguishes scripts written by the same process.
static SCRIPT_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Writes the command to a script unique to this plan, step and call.
fn create_script(plan_id: &str, step_id: StepId, command: &str) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("flowrunner_scripts");
    fs::create_dir_all(&script_dir)?;

    let script_path = script_dir.join(format!(
        "{}_{}_{}_{}.sh",
        file_stem(plan_id),
        step_id,
        std::process::id(),
        SCRIPT_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn execute_with_bash(script_path: &Path, ctx: &ActionContext, working_dir: Option<&Path>) -> std::io::Result<Output> {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path)
        .env("FLOWRUNNER_PLAN_ID", &ctx.execution_plan_id)
        .env("FLOWRUNNER_STEP_ID", ctx.step_id.to_string());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    cmd.output()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(input: serde_json::Value) -> Result<Outcome, ActionError> {
        ShellAction.run(&ActionContext::detached("shell-test", 1, input))
    }

    #[test]
    fn test_shell_captures_stdout() {
        let outcome = run(json!({"command": "echo hello"})).unwrap();
        assert_eq!(outcome, Outcome::Success(json!({"stdout": "hello\n"})));
    }

    #[test]
    fn test_shell_exposes_step_identity() {
        let outcome = run(json!({"command": "echo $FLOWRUNNER_PLAN_ID:$FLOWRUNNER_STEP_ID"})).unwrap();
        assert_eq!(outcome, Outcome::Success(json!({"stdout": "shell-test:1\n"})));
    }

    #[test]
    fn test_shell_stops_at_first_failing_line() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("reached");
        let command = format!("false\ntouch {}", marker.display());

        let err = run(json!({"command": command})).unwrap_err();
        assert!(err.message.contains("exited with code 1"));
        assert!(!marker.exists());
    }

    #[test]
    fn test_shell_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        run(json!({"command": "touch created.txt", "working_dir": dir.path()})).unwrap();
        assert!(dir.path().join("created.txt").exists());
    }

    #[test]
    fn test_shell_requires_command() {
        let err = run(json!({})).unwrap_err();
        assert_eq!(err.message, "shell action requires a 'command' string");
    }

    #[test]
    fn test_create_script_contents() {
        let path = create_script("plan/1", 7, "echo 'hello world'").unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("plan%2F1_7_"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("#!/bin/bash"));
        assert!(content.contains("set -e"));
        assert!(content.contains("echo 'hello world'"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_scripts_of_similar_plans_do_not_collide() {
        let slash = create_script("plan/1", 7, "echo slash").unwrap();
        let underscore = create_script("plan_1", 7, "echo underscore").unwrap();
        let again = create_script("plan/1", 7, "echo again").unwrap();
        assert_ne!(slash, underscore);
        assert_ne!(slash, again);

        assert!(fs::read_to_string(&slash).unwrap().contains("echo slash"));
        assert!(fs::read_to_string(&underscore).unwrap().contains("echo underscore"));
        for path in [slash, underscore, again] {
            fs::remove_file(path).unwrap();
        }
    }
}
