//! `taskgraph` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a workflow definition file.
//! - `run`: dry-run a definition with scripted mock agents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agents::mock::MockAgent;
use agents::TaskAgent;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    validate_graph, AgentTable, ProcessMode, RunReport, Runner, ScriptedDecisionService,
    TaskRegistry, WorkflowDefinition,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "taskgraph",
    about = "Task-graph orchestration engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow definition with mock agents.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Override the definition's process mode.
        #[arg(long)]
        mode: Option<ProcessMode>,
        /// Override the workflow iteration budget.
        #[arg(long, env = "TASKGRAPH_MAX_ITER")]
        max_iter: Option<usize>,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run { path, mode, max_iter, json } => run(&path, mode, max_iter, json).await,
    }
}

fn load(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let mut definition = WorkflowDefinition::from_json(&content)
        .with_context(|| format!("cannot parse {}", path.display()))?;

    // Loop sources are relative to the definition file.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for task in &mut definition.tasks {
        if let Some(input) = task.input_file.as_mut() {
            if input.is_relative() {
                *input = base.join(&*input);
            }
        }
    }
    if definition.config.default_input_file.is_relative() {
        definition.config.default_input_file = base.join(&definition.config.default_input_file);
    }
    Ok(definition)
}

fn validate(path: &Path) -> Result<()> {
    let definition = load(path)?;
    let registry = definition.to_registry()?;

    match validate_graph(&registry) {
        Ok(report) => {
            println!(
                "✅ Workflow '{}' is valid. {} tasks, {} mode, starting at '{}'.",
                definition.name,
                registry.len(),
                definition.process,
                report.start_name
            );
            for dangling in &report.dangling {
                println!(
                    "⚠️  {} references unknown task '{}' via {}",
                    dangling.from, dangling.to, dangling.via
                );
            }
            for ignored in &report.ignored_start_markers {
                println!("⚠️  start marker on '{ignored}' is ignored");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(
    path: &Path,
    mode: Option<ProcessMode>,
    max_iter: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut definition = load(path)?;
    if let Some(max_iter) = max_iter {
        definition.config.max_iter = max_iter;
    }
    let mode = mode.unwrap_or(definition.process);

    let mut registry = definition.to_registry()?;
    if registry.is_empty() {
        bail!("workflow '{}' has no tasks", definition.name);
    }

    let agents: AgentTable = definition
        .agents
        .iter()
        .map(|spec| {
            let agent: Arc<dyn TaskAgent> =
                Arc::new(MockAgent::scripted(spec.name.clone(), definition.responses.clone()));
            (spec.name.clone(), agent)
        })
        .collect();
    let manager = ScriptedDecisionService::new(definition.manager_responses.clone());

    info!(workflow = %definition.name, id = %definition.id, %mode, "running workflow");
    let runner = Runner::new(definition.config.clone(), agents)
        .with_default_agent(Arc::new(MockAgent::scripted("default", definition.responses.clone())))
        .with_decision_service(Arc::new(manager));
    let report = runner.run(&mut registry, mode).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &registry);
    }
    Ok(())
}

fn print_report(report: &RunReport, registry: &TaskRegistry) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "Run {} ({} mode) finished in {} ms, {} tasks handed out.",
        report.run_id,
        report.mode,
        elapsed.num_milliseconds(),
        report.yielded.len()
    );

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in &report.yielded {
        if let Some(task) = registry.get(*id) {
            *counts.entry(task.name.as_str()).or_default() += 1;
        }
    }
    for task in registry.iter() {
        let raw = task.result.as_ref().map(|r| r.raw.as_str()).unwrap_or("-");
        println!(
            "  {:<24} {:<12} runs={:<3} {}",
            task.name,
            task.status.as_str(),
            counts.get(task.name.as_str()).copied().unwrap_or(0),
            raw.lines().next().unwrap_or("")
        );
    }

    if !report.failed.is_empty() {
        println!("❌ Failed tasks: {}", report.failed.join(", "));
    }
}
