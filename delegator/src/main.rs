//! LLM-routed delegation loop for data engineering requests.
//!
//! Reads `.delegator/config.toml` from the working directory, routes a
//! natural-language request to storage, transform and warehouse executors one
//! step at a time, and writes per-step run logs under `runs_dir`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use delegator::agents::InvalidDecisionError;
use delegator::agents::resolver::Resolver;
use delegator::agents::router::Router;
use delegator::core::budget::RunBudget;
use delegator::core::state::RunState;
use delegator::core::types::ExecutorResult;
use delegator::exit_codes;
use delegator::io::config::load_config;
use delegator::io::executor::CommandExecutors;
use delegator::io::init::{DelegatorPaths, InitOptions, init_delegator};
use delegator::io::model::CommandModel;
use delegator::io::run_log::{RunLog, StepMeta, StepRecord};
use delegator::logging;
use delegator::looping::{LoopOutcome, LoopStop, run_loop};
use delegator::start::start_run;
use delegator::step::StepOutcome;

#[derive(Parser)]
#[command(
    name = "delegator",
    version,
    about = "Route data engineering requests to executor agents, one step at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.delegator/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the config.
    Check,
    /// Run the delegation loop for a request until it completes or stops.
    Run {
        /// Natural-language request.
        #[arg(required_unless_present = "request_file", conflicts_with = "request_file")]
        request: Option<String>,
        /// Read the request from a file instead.
        #[arg(long)]
        request_file: Option<PathBuf>,
        /// Do not write run logs.
        #[arg(long)]
        no_log: bool,
    },
    /// Ask the router once for a fresh request and print its decision.
    Route {
        request: String,
    },
    /// Print a rendered prompt without calling the model.
    Render {
        #[arg(value_enum)]
        prompt: PromptKind,
        request: String,
        /// Failure message shown to the resolver.
        #[arg(long, default_value = "ERROR: executor reported a failure")]
        failure: String,
        /// Failed task shown to the resolver.
        #[arg(long, default_value = "")]
        action: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PromptKind {
    Router,
    Resolver,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            let code = if err.downcast_ref::<InvalidDecisionError>().is_some() {
                exit_codes::INVALID_DECISION
            } else {
                exit_codes::INVALID
            };
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve working directory")?;
    let paths = DelegatorPaths::new(root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Check => cmd_check(&paths),
        Command::Run {
            request,
            request_file,
            no_log,
        } => {
            let request = read_request(request, request_file.as_deref())?;
            cmd_run(&paths, &request, no_log)
        }
        Command::Route { request } => cmd_route(&paths, &request),
        Command::Render {
            prompt,
            request,
            failure,
            action,
        } => cmd_render(&paths, prompt, &request, &failure, &action),
    }
}

fn cmd_init(paths: &DelegatorPaths, force: bool) -> Result<i32> {
    init_delegator(&paths.root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(paths: &DelegatorPaths) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    Router::new(&cfg).render_prompt(&RunState::new("check", "check"))?;
    println!(
        "config ok: {} (max_steps={}, run_timeout_secs={}, first_failure={:?}, resolver_failure={:?})",
        paths.config_path.display(),
        cfg.max_steps,
        cfg.run_timeout_secs,
        cfg.first_failure,
        cfg.resolver_failure
    );
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &DelegatorPaths, request: &str, no_log: bool) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let runs_dir = paths.runs_dir(&cfg);
    let state = start_run(&runs_dir, request)?;
    let model = CommandModel::new(cfg.model.clone());
    let executors = CommandExecutors::from_config(&cfg)?;
    let log = (!no_log).then(|| RunLog::new(&runs_dir, &state.run_id));

    println!("run {}", state.run_id);
    let outcome = run_loop(&model, &executors, &cfg, state, |step, state| {
        println!("{}", step_line(step));
        if let Some(log) = &log {
            write_step_log(log, step, state)?;
        }
        Ok(())
    })?;

    if let Some(log) = &log {
        log.write_final(&outcome.state, &outcome)?;
    }
    println!("{}", outcome_line(&outcome));
    Ok(exit_code(&outcome.stop))
}

fn cmd_route(paths: &DelegatorPaths, request: &str) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let model = CommandModel::new(cfg.model.clone());
    let budget = RunBudget::new(1, cfg.model.timeout());
    let mut state = RunState::new("route", request.trim());

    let turn = Router::new(&cfg).route(&model, &mut state, &budget)?;
    let payload = json!({
        "decision": turn.decision,
        "target": turn.target,
        "task": state.next_action,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(exit_codes::OK)
}

fn cmd_render(
    paths: &DelegatorPaths,
    prompt: PromptKind,
    request: &str,
    failure: &str,
    action: &str,
) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let mut state = RunState::new("render", request.trim());
    let rendered = match prompt {
        PromptKind::Router => Router::new(&cfg).render_prompt(&state)?,
        PromptKind::Resolver => {
            state.next_action = action.to_string();
            state.record_failure(failure);
            let resolver = Resolver::new(&cfg);
            let similar = resolver.similar_outputs(&state);
            resolver.render_prompt(&state, &similar)?
        }
    };
    println!("{rendered}");
    Ok(exit_codes::OK)
}

fn read_request(request: Option<String>, request_file: Option<&Path>) -> Result<String> {
    match (request, request_file) {
        (Some(request), _) => Ok(request),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read request {}", path.display()))
        }
        (None, None) => Err(anyhow!("a request or --request-file is required")),
    }
}

fn write_step_log(log: &RunLog, step: &StepOutcome, state: &RunState) -> Result<()> {
    let meta = StepMeta {
        run_id: state.run_id.clone(),
        step: step.step,
        phase: step.phase,
        next_phase: step.next_phase,
        source: step.source,
        decision: step.decision.clone(),
        target: step.target,
        executor_result: step.executor_result.clone(),
        failed_after: state.failed,
        duration_ms: step.duration_ms,
    };
    log.write_step(&StepRecord {
        meta: &meta,
        prompt: step.prompt.as_deref(),
        response: step.response.as_deref(),
        executor_output: step.executor_result.as_ref().map(ExecutorResult::text),
    })?;
    Ok(())
}

fn step_line(step: &StepOutcome) -> String {
    let detail = match (&step.executor_result, &step.decision) {
        (Some(ExecutorResult::Success { output }), _) => format!("ok: {}", first_line(output)),
        (Some(ExecutorResult::Failure { message, .. }), _) => {
            format!("failed: {}", first_line(message))
        }
        (None, Some(decision)) => format!("{}: {}", decision.agent, first_line(&decision.action)),
        (None, None) => String::new(),
    };
    format!(
        "step {}: {} -> {}  {}",
        step.step, step.phase, step.next_phase, detail
    )
    .trim_end()
    .to_string()
}

fn outcome_line(outcome: &LoopOutcome) -> String {
    let steps = outcome.steps_executed;
    match &outcome.stop {
        LoopStop::Completed => format!("completed in {steps} steps"),
        LoopStop::Unresolvable => format!(
            "unresolvable after {steps} steps: {}",
            outcome.last_failure.as_deref().unwrap_or("no failure recorded")
        ),
        LoopStop::Exhausted { reason, .. } => format!("exhausted after {steps} steps: {reason}"),
        LoopStop::Invalid { source, reason, .. } => {
            format!("invalid {source} decision after {steps} steps: {reason}")
        }
    }
}

fn exit_code(stop: &LoopStop) -> i32 {
    match stop {
        LoopStop::Completed => exit_codes::OK,
        LoopStop::Unresolvable => exit_codes::UNRESOLVABLE,
        LoopStop::Exhausted { .. } => exit_codes::EXHAUSTED,
        LoopStop::Invalid { .. } => exit_codes::INVALID_DECISION,
    }
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or_default()
}
