//! Fallback selection: find any `not_started` task when graph navigation
//! comes up empty.
//!
//! The sweep ignores adjacency on purpose. After a dead end it may jump to an
//! unrelated task; the retry counters in [`RunContext`] bound how often any
//! single task can be picked this way.

use tracing::debug;

use crate::models::{TaskId, TaskStatus};
use crate::registry::TaskRegistry;
use crate::run_context::RunContext;

/// Pick the next `not_started` task within its retry budget.
///
/// Makes up to `retry_limit` sweeps in registry order. Each pick increments
/// the task's counter. A `not_started` task found with an exhausted counter
/// is marked `failed` as it is passed over. `None` ends the run.
pub fn find_next_not_started(registry: &mut TaskRegistry, ctx: &mut RunContext) -> Option<TaskId> {
    for attempt in 1..=ctx.retry_limit() {
        debug!("fallback attempt {}: looking for a 'not_started' task", attempt);

        let candidates: Vec<TaskId> = registry
            .iter()
            .filter(|t| t.status == TaskStatus::NotStarted)
            .map(|t| t.id)
            .collect();

        for id in candidates {
            if ctx.can_retry(id) {
                let count = ctx.record_retry(id);
                debug!(task_id = %id, retries = count, "fallback selected task");
                return Some(id);
            }
            if let Some(task) = registry.get_mut(id) {
                debug!("max retries reached for task {}, marking as failed", task.name);
                task.status = TaskStatus::Failed;
            }
        }

        debug!("fallback attempt {}: no eligible task", attempt);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;

    #[test]
    fn picks_first_not_started_in_registry_order() {
        let mut reg = TaskRegistry::from_tasks(vec![
            Task::new("done", "").with_status(TaskStatus::Completed),
            Task::new("busy", "").with_status(TaskStatus::InProgress),
            Task::new("todo", ""),
            Task::new("later", ""),
        ])
        .unwrap();
        let mut ctx = RunContext::default();

        assert_eq!(find_next_not_started(&mut reg, &mut ctx), reg.id_of("todo"));
        assert_eq!(ctx.retries(reg.id_of("todo").unwrap()), 1);
    }

    #[test]
    fn exhausted_task_is_marked_failed_and_skipped() {
        let mut reg = TaskRegistry::from_tasks(vec![Task::new("stuck", ""), Task::new("next", "")])
            .unwrap();
        let stuck = reg.id_of("stuck").unwrap();
        let mut ctx = RunContext::new(3);

        for _ in 0..3 {
            assert_eq!(find_next_not_started(&mut reg, &mut ctx), Some(stuck));
        }
        assert_eq!(reg.status(stuck), Some(TaskStatus::NotStarted));

        // Fourth encounter: lazily failed, the sweep moves on.
        assert_eq!(find_next_not_started(&mut reg, &mut ctx), reg.id_of("next"));
        assert_eq!(reg.status(stuck), Some(TaskStatus::Failed));
        assert_eq!(ctx.retries(stuck), 3);
    }

    #[test]
    fn nothing_eligible_returns_none() {
        let mut reg = TaskRegistry::from_tasks(vec![
            Task::new("a", "").with_status(TaskStatus::Completed),
            Task::new("b", "").with_status(TaskStatus::Failed),
        ])
        .unwrap();
        let mut ctx = RunContext::default();
        assert_eq!(find_next_not_started(&mut reg, &mut ctx), None);
    }

    #[test]
    fn never_selects_a_task_more_than_the_limit() {
        let mut reg = TaskRegistry::from_tasks(vec![Task::new("only", "")]).unwrap();
        let mut ctx = RunContext::new(2);

        let picks = (0..5)
            .filter_map(|_| find_next_not_started(&mut reg, &mut ctx))
            .count();
        assert_eq!(picks, 2);
        assert_eq!(reg.status(reg.id_of("only").unwrap()), Some(TaskStatus::Failed));
    }
}
