//! Sequential-mode driver: every unfinished task once, in registry order.

use crate::models::{TaskId, TaskStatus};
use crate::registry::TaskRegistry;

/// Resumable registry-order traversal.
///
/// The order is captured on the first call; tasks added later are not
/// visited. Status is checked as each task is reached, so a task completed
/// by an earlier step is skipped.
#[derive(Debug, Default)]
pub struct SequentialDriver {
    order: Option<Vec<TaskId>>,
    cursor: usize,
}

impl SequentialDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, registry: &mut TaskRegistry) -> Option<TaskId> {
        let order = self.order.get_or_insert_with(|| registry.ids());
        while let Some(&id) = order.get(self.cursor) {
            self.cursor += 1;
            if registry
                .status(id)
                .is_some_and(|status| status != TaskStatus::Completed)
            {
                return Some(id);
            }
        }
        None
    }
}
