//! The task registry: tasks keyed by id, in insertion order, with a name
//! index for cross-reference resolution.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::EngineError;
use crate::models::{Task, TaskId, TaskStatus, TaskType};

/// Mapping from task id to task.
///
/// Ids are handed out monotonically, so iteration order is insertion order.
/// Names are indexed on insert and must not be changed afterwards.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    by_name: HashMap<String, TaskId>,
    next_id: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from tasks in declaration order.
    ///
    /// # Errors
    /// [`EngineError::DuplicateTaskName`] if two tasks share a name.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for task in tasks {
            registry.insert(task)?;
        }
        Ok(registry)
    }

    /// Assign the next id to `task` and store it.
    pub fn insert(&mut self, mut task: Task) -> Result<TaskId, EngineError> {
        if self.by_name.contains_key(&task.name) {
            return Err(EngineError::DuplicateTaskName(task.name));
        }
        self.next_id += 1;
        let id = TaskId(self.next_id);
        task.id = id;
        self.by_name.insert(task.name.clone(), id);
        self.tasks.insert(id, task);
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Resolve a task name to its id.
    pub fn id_of(&self, name: &str) -> Option<TaskId> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Task> {
        self.id_of(name).and_then(|id| self.tasks.get(&id))
    }

    /// Tasks in registry (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|t| t.status)
    }

    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) -> Result<(), EngineError> {
        let task = self.tasks.get_mut(&id).ok_or(EngineError::UnknownTask(id))?;
        task.status = status;
        Ok(())
    }

    /// Ids of the subtasks generated for the loop named `loop_name`.
    pub fn subtasks_of(&self, loop_name: &str) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.is_subtask_of(loop_name))
            .map(|t| t.id)
            .collect()
    }

    /// Whether `name` carries the `<loop>_` prefix of any loop task.
    pub fn is_loop_subtask(&self, name: &str) -> bool {
        self.tasks.values().any(|t| {
            t.task_type == TaskType::Loop
                && name
                    .strip_prefix(t.name.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
        })
    }

    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            total: self.tasks.len(),
            ..StatusSummary::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::NotStarted => summary.not_started += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
            match task.task_type {
                TaskType::Loop => summary.loops += 1,
                TaskType::Decision => summary.decisions += 1,
                TaskType::Regular => summary.regular += 1,
            }
        }
        summary
    }
}

/// Counts by status and type, logged once per workflow cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub loops: usize,
    pub decisions: usize,
    pub regular: usize,
}

impl StatusSummary {
    pub fn outstanding(&self) -> usize {
        self.total - self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_insertion_order() {
        let registry = TaskRegistry::from_tasks(vec![
            Task::new("c", ""),
            Task::new("a", ""),
            Task::new("b", ""),
        ])
        .expect("unique names");

        let names: Vec<&str> = registry.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(registry.id_of("a"), Some(TaskId(2)));
        assert_eq!(registry.get(TaskId(2)).map(|t| t.id), Some(TaskId(2)));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let result = TaskRegistry::from_tasks(vec![Task::new("a", ""), Task::new("a", "")]);
        assert!(matches!(
            result,
            Err(EngineError::DuplicateTaskName(name)) if name == "a"
        ));
    }

    #[test]
    fn loop_subtasks_are_found_by_prefix() {
        let registry = TaskRegistry::from_tasks(vec![
            Task::new("rows", "").with_type(TaskType::Loop),
            Task::new("rows_1", ""),
            Task::new("rows_2", ""),
            Task::new("rowsummary", ""),
            Task::new("other_1", ""),
        ])
        .unwrap();

        assert_eq!(registry.subtasks_of("rows").len(), 2);
        assert!(registry.is_loop_subtask("rows_2"));
        assert!(!registry.is_loop_subtask("rowsummary"));
        // "other" is not a loop task.
        assert!(!registry.is_loop_subtask("other_1"));
    }

    #[test]
    fn summary_counts_status_and_type() {
        let registry = TaskRegistry::from_tasks(vec![
            Task::new("a", "").with_status(TaskStatus::Completed),
            Task::new("b", "").with_type(TaskType::Decision),
            Task::new("c", "").with_type(TaskType::Loop).with_status(TaskStatus::Failed),
        ])
        .unwrap();

        let summary = registry.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.not_started, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outstanding(), 2);
        assert_eq!((summary.loops, summary.decisions, summary.regular), (1, 1, 1));
    }

    #[test]
    fn set_status_on_unknown_id_errors() {
        let mut registry = TaskRegistry::new();
        assert!(matches!(
            registry.set_status(TaskId(9), TaskStatus::Completed),
            Err(EngineError::UnknownTask(TaskId(9)))
        ));
    }
}
