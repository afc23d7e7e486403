//! Graph navigation: decide which task runs after the one that just ran.
//!
//! Resolution order:
//! 1. Decision and loop tasks with a result: match the result's decision
//!    label against the condition table. Loop tasks match on the last line
//!    of their result, the progress marker. An empty or `exit` target ends
//!    the run.
//! 2. The first entry of `next_tasks`.
//! 3. Fallback selection over the whole registry.

use tracing::{debug, info};

use crate::fallback::find_next_not_started;
use crate::models::{TaskId, TaskType};
use crate::registry::TaskRegistry;
use crate::run_context::RunContext;

/// What the navigator decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Run this task next; a condition branch chose it.
    Branch(TaskId),
    /// Run this task next; reached through `next_tasks` or fallback.
    Goto(TaskId),
    /// A condition branch asked to end the run.
    Exit,
    /// Nothing left to run.
    Finished,
}

impl Navigation {
    pub fn task(self) -> Option<TaskId> {
        match self {
            Navigation::Branch(id) | Navigation::Goto(id) => Some(id),
            Navigation::Exit | Navigation::Finished => None,
        }
    }
}

enum Directed {
    Branch(TaskId),
    Exit,
}

/// Follow the condition table of `task_id`, if its type and result allow.
fn follow_condition(registry: &TaskRegistry, task_id: TaskId) -> Option<Directed> {
    let task = registry.get(task_id)?;
    if !task.task_type.uses_conditions() {
        return None;
    }
    let result = task.result.as_ref()?;
    let label = if task.task_type == TaskType::Loop {
        result.progress_label()
    } else {
        result.decision_label()
    };
    let (matched, target) = task.condition.matching(&label)?;

    if target.is_exit() {
        info!(task = %task.name, condition = matched, "workflow exit condition met");
        return Some(Directed::Exit);
    }

    let name = target.target()?;
    match registry.id_of(name) {
        Some(next) => {
            debug!(task = %task.name, condition = matched, next = name, "condition branch taken");
            Some(Directed::Branch(next))
        }
        None => {
            debug!(
                task = %task.name,
                condition = matched,
                next = name,
                "condition target not found"
            );
            None
        }
    }
}

/// Resolve `next_tasks[0]` of `task_id` by name.
pub fn static_successor(registry: &TaskRegistry, task_id: TaskId) -> Option<TaskId> {
    registry
        .get(task_id)
        .and_then(|t| t.next_tasks.first())
        .and_then(|name| registry.id_of(name))
}

/// Decide what runs after `task_id`.
pub fn resolve_next(
    registry: &mut TaskRegistry,
    ctx: &mut RunContext,
    task_id: TaskId,
) -> Navigation {
    match follow_condition(registry, task_id) {
        Some(Directed::Exit) => return Navigation::Exit,
        Some(Directed::Branch(next)) => {
            if next == task_id {
                // Deliberate self-loop; the task must be eligible again right away.
                ctx.forget_visit(task_id);
            }
            return Navigation::Branch(next);
        }
        None => {}
    }

    if let Some(next) = static_successor(registry, task_id) {
        return Navigation::Goto(next);
    }

    match find_next_not_started(registry, ctx) {
        Some(next) => Navigation::Goto(next),
        None => Navigation::Finished,
    }
}
