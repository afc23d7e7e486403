//! Per-run mutable state.
//!
//! Everything a driver remembers between cycles lives here rather than in
//! process-wide state, so independent runs never interfere.

use std::collections::{HashMap, HashSet};

use crate::config::DEFAULT_RETRY_LIMIT;
use crate::models::TaskId;

/// Position within an expanded loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopProgress {
    pub index: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    retry_limit: u32,
    retry_counters: HashMap<TaskId, u32>,
    loop_progress: HashMap<String, LoopProgress>,
    visited: HashSet<TaskId>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT)
    }
}

impl RunContext {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            retry_counters: HashMap::new(),
            loop_progress: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Times the fallback selector has picked `id`.
    pub fn retries(&self, id: TaskId) -> u32 {
        self.retry_counters.get(&id).copied().unwrap_or(0)
    }

    pub fn can_retry(&self, id: TaskId) -> bool {
        self.retries(id) < self.retry_limit
    }

    pub(crate) fn record_retry(&mut self, id: TaskId) -> u32 {
        let count = self.retry_counters.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    fn loop_key(loop_name: &str) -> String {
        format!("loop_{loop_name}")
    }

    /// Start tracking a freshly expanded loop of `count` subtasks.
    pub(crate) fn track_loop(&mut self, loop_name: &str, count: usize) {
        self.loop_progress.insert(
            Self::loop_key(loop_name),
            LoopProgress { index: 0, remaining: count },
        );
    }

    pub fn loop_progress(&self, loop_name: &str) -> Option<LoopProgress> {
        self.loop_progress.get(&Self::loop_key(loop_name)).copied()
    }

    /// Step an active loop forward; `None` when the loop is not tracked.
    pub(crate) fn advance_loop(&mut self, loop_name: &str) -> Option<LoopProgress> {
        let progress = self.loop_progress.get_mut(&Self::loop_key(loop_name))?;
        progress.index += 1;
        progress.remaining = progress.remaining.saturating_sub(1);
        Some(*progress)
    }

    pub fn visited(&self, id: TaskId) -> bool {
        self.visited.contains(&id)
    }

    pub(crate) fn mark_visited(&mut self, id: TaskId) {
        self.visited.insert(id);
    }

    pub(crate) fn forget_visit(&mut self, id: TaskId) {
        self.visited.remove(&id);
    }
}
