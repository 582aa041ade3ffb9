//! FlowRunner CLI Entry Point
//!
//! Loads a plan definition and executes it on a worker pool.
//!
//! # Usage
//!
//! ```bash
//! # Execute a plan
//! flowrunner deploy.yaml
//!
//! # Keep state on disk so a paused plan can be resumed
//! flowrunner deploy.yaml --state-dir .flowrunner
//!
//! # Resume it, skipping a step that cannot succeed
//! flowrunner deploy.yaml --state-dir .flowrunner --resume --skip 3
//!
//! # Set the number of workers
//! flowrunner deploy.yaml --workers 8
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use flowrunner::persistence::DEFAULT_STATE_DIR;
use flowrunner::{
    load_plan, ActionRegistry, ExecutionPlan, Executor, ExecutorConfig, FilePersistence, InMemoryPersistence,
    Persistence, PlanState, StepId, StepState, APP_NAME, VERSION,
};

/// Command-line configuration parsed from arguments.
#[derive(Debug, PartialEq)]
struct Config {
    plan_path: Option<String>,
    workers: Option<usize>,
    state_dir: Option<PathBuf>,
    resume: bool,
    skip: Vec<StepId>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plan_path: None,
            workers: None,
            state_dir: None,
            resume: false,
            skip: Vec::new(),
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Parallel Workflow Orchestration Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <PLAN_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PLAN_FILE>         Path to plan definition YAML file");
    println!();
    println!("Options:");
    println!("  --workers N         Number of worker threads (default: CPU count)");
    println!("  --state-dir DIR     Persist plan state in DIR (e.g. {})", DEFAULT_STATE_DIR);
    println!("  --resume            Resume the plan saved in the state directory");
    println!("  --skip STEP_ID      Skip a step before executing (repeatable)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner deploy.yaml");
    println!("  flowrunner deploy.yaml --state-dir .flowrunner --workers 8");
    println!("  flowrunner deploy.yaml --state-dir .flowrunner --resume --skip 3");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--resume" => {
                config.resume = true;
            }
            "--workers" => {
                i += 1;
                let value = args.get(i).ok_or("--workers requires a number argument")?;
                config.workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", value))?,
                );
            }
            "--state-dir" => {
                i += 1;
                let value = args.get(i).ok_or("--state-dir requires a path argument")?;
                config.state_dir = Some(PathBuf::from(value));
            }
            "--skip" => {
                i += 1;
                let value = args.get(i).ok_or("--skip requires a step id argument")?;
                config.skip.push(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid step id: {}", value))?,
                );
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.plan_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.plan_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.resume && config.state_dir.is_none() {
        return Err("--resume requires --state-dir".to_string());
    }
    if config.plan_path.is_none() {
        return Err("missing <PLAN_FILE>".to_string());
    }

    Ok(config)
}

/// Chooses where plan state lives for this run.
fn open_persistence(config: &Config) -> Result<Arc<dyn Persistence>, Box<dyn std::error::Error>> {
    match &config.state_dir {
        Some(dir) => Ok(Arc::new(FilePersistence::new(dir)?)),
        None => Ok(Arc::new(InMemoryPersistence::new())),
    }
}

fn colored_state(state: StepState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        StepState::Success => label.green(),
        StepState::Warning => label.yellow(),
        StepState::Error => label.red().bold(),
        StepState::Skipped => label.dimmed(),
        StepState::Running | StepState::Suspended => label.cyan(),
        StepState::Pending => label.normal(),
    }
}

/// Prints one line per step followed by the plan outcome.
fn print_summary(plan: &ExecutionPlan) {
    println!();
    println!("Plan '{}'", plan.id.bold());
    for step in plan.steps.values() {
        println!(
            "  {:>4}  {:<10} {:<12} {:>10.2?}",
            step.id,
            colored_state(step.state),
            step.action,
            step.execution_time
        );
        if let Some(message) = &step.error {
            println!("        {}", message.red());
        }
    }
    println!();

    let outcome = format!("{} (result: {})", plan.state, plan.result);
    let outcome = match plan.state {
        PlanState::Stopped => outcome.green().bold(),
        _ => outcome.yellow().bold(),
    };
    println!("Outcome:    {}", outcome);
    println!("Progress:   {:.0}%", plan.progress * 100.0);
    println!("Real time:  {:.2?}", plan.real_time);
    println!("Step time:  {:.2?}", plan.execution_time);
    if plan.state == PlanState::Paused {
        println!();
        println!("Fix the failing steps or skip them with --skip, then rerun with --resume.");
    }
}

/// Main application entry point.
///
/// Returns whether the plan stopped.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let plan_path = config.plan_path.clone().unwrap_or_default();
    info!("Loading plan: {}", plan_path);
    let plan = load_plan(&plan_path).map_err(|e| {
        error!("Failed to load plan: {}", e);
        format!("Could not load plan from '{}': {}", plan_path, e)
    })?;
    info!("Plan '{}' loaded: {} steps", plan.id, plan.steps.len());

    let persistence = open_persistence(&config)?;
    if config.resume {
        let saved = persistence.load_execution_plan(&plan.id)?;
        info!("Resuming plan '{}' ({}, {:.0}% done)", saved.id, saved.state, saved.progress * 100.0);
    } else {
        persistence.save_execution_plan(&plan)?;
    }

    let mut executor_config = ExecutorConfig::default();
    if let Some(workers) = config.workers {
        executor_config = executor_config.with_pool_size(workers);
    }
    let executor = Executor::new(executor_config, persistence, ActionRegistry::with_builtins())?;

    for step_id in &config.skip {
        match executor.skip(&plan.id, *step_id) {
            Ok(skipped) => info!("Skipped steps {:?}", skipped),
            Err(e) => warn!("Cannot skip step {}: {}", step_id, e),
        }
    }

    let result = executor.execute(&plan.id).and_then(|handle| handle.wait());
    executor.terminate().wait();
    let finished = result?;

    print_summary(&finished);
    Ok(finished.state == PlanState::Stopped)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
