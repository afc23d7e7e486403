//! Graph building and inspection, run before driving a workflow.
//!
//! Unlike a DAG scheduler, cycles are legal here: they are how loops and
//! retries work. What this module checks is that a graph has somewhere to
//! start and which names fail to resolve.

use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::models::TaskId;
use crate::registry::TaskRegistry;

/// Placeholder targets the loop expander writes into generated condition
/// tables. They never resolve to a task.
const PLACEHOLDER_TARGETS: [&str; 2] = ["next", "current"];

/// Header placed above injected upstream results.
pub const CONTEXT_HEADER: &str = "\nInput data from previous tasks:";

/// Derive every task's `previous_tasks` from the `next_tasks` of all others.
pub fn link_previous_tasks(registry: &mut TaskRegistry) {
    let edges: Vec<(String, String)> = registry
        .iter()
        .flat_map(|t| t.next_tasks.iter().map(move |next| (t.name.clone(), next.clone())))
        .collect();

    for (from, to) in edges {
        let Some(id) = registry.id_of(&to) else {
            continue;
        };
        if let Some(next) = registry.get_mut(id) {
            if !next.previous_tasks.contains(&from) {
                debug!("added {} as previous task for {}", from, to);
                next.previous_tasks.push(from);
            }
        }
    }
}

/// The first task marked `is_start`, else the first task declared.
pub fn find_start_task(registry: &TaskRegistry) -> Option<TaskId> {
    registry
        .iter()
        .find(|t| t.is_start)
        .or_else(|| registry.iter().next())
        .map(|t| t.id)
}

/// A name reference that resolves to no task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub from: String,
    pub to: String,
    /// Which field holds the reference: `next_tasks`, `condition` or `context`.
    pub via: &'static str,
}

/// Outcome of [`validate_graph`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphReport {
    pub start: TaskId,
    pub start_name: String,
    /// Unresolvable names. These are routine at run time (the navigator
    /// treats them as "no successor") but usually a typo in a definition.
    pub dangling: Vec<DanglingReference>,
    /// Tasks marked `is_start` after the first one; they are ignored.
    pub ignored_start_markers: Vec<String>,
}

/// Inspect a task graph before running it.
///
/// # Errors
/// [`EngineError::EmptyRegistry`] if there is no task to start from.
pub fn validate_graph(registry: &TaskRegistry) -> Result<GraphReport, EngineError> {
    let start = find_start_task(registry).ok_or(EngineError::EmptyRegistry)?;
    let start_name = registry
        .get(start)
        .map(|t| t.name.clone())
        .ok_or(EngineError::UnknownTask(start))?;

    let mut dangling = Vec::new();
    let mut report = |from: &str, to: &str, via: &'static str| {
        if registry.id_of(to).is_none() {
            dangling.push(DanglingReference {
                from: from.to_owned(),
                to: to.to_owned(),
                via,
            });
        }
    };

    for task in registry.iter() {
        for next in &task.next_tasks {
            report(&task.name, next, "next_tasks");
        }
        for (_, target) in task.condition.iter() {
            if target.is_exit() {
                continue;
            }
            if let Some(name) = target.target() {
                if !PLACEHOLDER_TARGETS.contains(&name) {
                    report(&task.name, name, "condition");
                }
            }
        }
        for ctx in &task.context {
            report(&task.name, ctx, "context");
        }
    }

    let ignored_start_markers = registry
        .iter()
        .filter(|t| t.is_start)
        .skip(1)
        .map(|t| t.name.clone())
        .collect();

    Ok(GraphReport {
        start,
        start_name,
        dangling,
        ignored_start_markers,
    })
}

/// Render the upstream results a task would receive: one `"<name>: <raw>"`
/// line per predecessor and per declared context task (excluding itself)
/// that has a result. `None` when there is nothing to inject.
///
/// Pure; the workflow driver appends the returned block to the task's
/// description on every visit.
pub fn upstream_context(registry: &TaskRegistry, id: TaskId) -> Option<String> {
    let task = registry.get(id)?;
    let mut block = String::new();

    for prev_name in &task.previous_tasks {
        if let Some(result) = registry.by_name(prev_name).and_then(|p| p.result.as_ref()) {
            block.push_str(&format!("\n{}: {}", prev_name, result.raw));
        }
    }

    for ctx_name in task.context.iter().filter(|n| **n != task.name) {
        if let Some(result) = registry.by_name(ctx_name).and_then(|c| c.result.as_ref()) {
            block.push_str(&format!("\n{}: {}", ctx_name, result.raw));
        }
    }

    if block.is_empty() {
        None
    } else {
        Some(format!("{CONTEXT_HEADER}{block}"))
    }
}
