//! Workflow-mode driver: conditional traversal with branching and loops.
//!
//! `WorkflowDriver` is a resumable state machine. Each call to
//! [`WorkflowDriver::next`] runs the engine until it either needs a task
//! executed (returns its id) or the run is over (returns `None`). Between
//! calls the caller executes the task and records its status and result in
//! the registry; the driver picks up from there on the next call.
//!
//! One cycle:
//! 1. expand a loop task reached mid-run (first visit only);
//! 2. append upstream results to the task's description;
//! 3. loop tasks are settled in place, anything else is handed out;
//! 4. completed regular tasks are reset so cycles can revisit them;
//! 5. loop progress is stamped onto the loop task's result;
//! 6. the navigator picks the next task.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::config::ProcessConfig;
use crate::fallback::find_next_not_started;
use crate::graph::{find_start_task, link_previous_tasks, upstream_context};
use crate::loop_expander::{expand_loop, ExpansionStrategy};
use crate::models::{TaskId, TaskStatus, TaskType};
use crate::navigator::{resolve_next, static_successor, Navigation};
use crate::registry::TaskRegistry;
use crate::run_context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Graph not built yet.
    Init,
    /// About to visit a task.
    Visit(TaskId),
    /// Handed out; waiting for the caller to resume.
    Yielded(TaskId),
    Done,
}

/// Resumable workflow traversal over a [`TaskRegistry`].
pub struct WorkflowDriver {
    config: ProcessConfig,
    ctx: RunContext,
    phase: Phase,
    iteration: usize,
    start: Option<TaskId>,
    /// Loop tasks whose source was unreadable or empty.
    exhausted_sources: HashSet<TaskId>,
}

impl WorkflowDriver {
    pub fn new(config: ProcessConfig) -> Self {
        let ctx = RunContext::new(config.retry_limit);
        Self {
            config,
            ctx,
            phase: Phase::Init,
            iteration: 0,
            start: None,
            exhausted_sources: HashSet::new(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Cycles started so far.
    pub fn iterations(&self) -> usize {
        self.iteration
    }

    /// The task traversal started from, once initialized.
    pub fn start_task(&self) -> Option<TaskId> {
        self.start
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Resume the traversal. Returns the next task to execute, or `None`
    /// once the run has ended.
    pub fn next(&mut self, registry: &mut TaskRegistry) -> Option<TaskId> {
        loop {
            match self.phase {
                Phase::Init => {
                    self.phase = match self.initialize(registry) {
                        Some(id) => Phase::Visit(id),
                        None => Phase::Done,
                    };
                }
                Phase::Yielded(id) => {
                    self.phase = self.after_execution(registry, id);
                }
                Phase::Visit(id) => {
                    if let Some(yielded) = self.visit(registry, id) {
                        return Some(yielded);
                    }
                }
                Phase::Done => return None,
            }
        }
    }

    #[instrument(skip_all, fields(tasks = registry.len()))]
    fn initialize(&mut self, registry: &mut TaskRegistry) -> Option<TaskId> {
        debug!("building workflow relationships");
        link_previous_tasks(registry);

        let Some(mut start) = find_start_task(registry) else {
            info!("no tasks to run, ending workflow");
            return None;
        };

        let is_loop = registry
            .get(start)
            .is_some_and(|t| t.task_type == TaskType::Loop);
        if is_loop {
            self.default_input_file(registry, start);
            if let Some(first) = self.try_expand(registry, start, ExpansionStrategy::AuthorTime) {
                start = first;
            }
        }

        if let Some(task) = registry.get(start) {
            info!(start = %task.name, "workflow starting");
        }
        self.start = Some(start);
        Some(start)
    }

    /// One cycle up to the point where a task is handed out. Returns the id
    /// to yield, or `None` after moving `self.phase` on.
    fn visit(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Option<TaskId> {
        self.iteration += 1;
        if self.iteration > self.config.max_iter {
            info!("max iteration limit {} reached, ending workflow", self.config.max_iter);
            self.finish(registry);
            return None;
        }

        let summary = registry.summary();
        debug!(
            cycle = self.iteration,
            total = summary.total,
            outstanding = summary.outstanding(),
            not_started = summary.not_started,
            in_progress = summary.in_progress,
            completed = summary.completed,
            failed = summary.failed,
            "workflow cycle"
        );

        // Only the first cycle checks for an already-finished graph;
        // decision tasks are never reset, so later cycles must not.
        if self.iteration == 1 && summary.not_started + summary.in_progress == 0 {
            info!("no outstanding tasks, ending workflow");
            self.finish(registry);
            return None;
        }

        let Some(task) = registry.get(id) else {
            warn!(task_id = %id, "task vanished from registry, ending workflow");
            self.finish(registry);
            return None;
        };
        let is_loop = task.task_type == TaskType::Loop;
        debug!(
            task = %task.name,
            task_type = %task.task_type,
            status = %task.status,
            previous = ?task.previous_tasks,
            next = ?task.next_tasks,
            context = ?task.context,
            description_len = task.description.len(),
            "task execution details"
        );

        if is_loop && !task.subtasks_created && Some(id) != self.start
            && !self.exhausted_sources.contains(&id)
        {
            self.default_input_file(registry, id);
            self.try_expand(registry, id, ExpansionStrategy::Runtime);
        }

        if let Some(block) = upstream_context(registry, id) {
            if let Some(task) = registry.get_mut(id) {
                task.description.push_str(&block);
            }
        }

        if is_loop {
            self.phase = self.settle_loop(registry, id);
            return None;
        }

        debug!(task_id = %id, "handing out task for execution");
        self.phase = Phase::Yielded(id);
        Some(id)
    }

    /// Post-execution half of a cycle for a task that was handed out.
    fn after_execution(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Phase {
        self.ctx.mark_visited(id);
        self.reset_if_rerunnable(registry, id);
        self.navigate(registry, id)
    }

    /// Loop tasks are never handed out; they complete once every subtask has.
    fn settle_loop(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Phase {
        let Some((name, expanded, has_input)) = registry
            .get(id)
            .map(|t| (t.name.clone(), t.subtasks_created, t.input_file.is_some()))
        else {
            return self.finish(registry);
        };

        if expanded {
            let subtasks = registry.subtasks_of(&name);
            let completed = subtasks
                .iter()
                .filter(|st| registry.status(**st) == Some(TaskStatus::Completed))
                .count();
            debug!(
                loop_task = %name,
                total = subtasks.len(),
                completed,
                pending = subtasks.len() - completed,
                "subtask status check"
            );

            if !subtasks.is_empty() && completed == subtasks.len() {
                debug!("all {} subtasks completed for {}", subtasks.len(), name);
                self.mark(registry, id, TaskStatus::Completed);
                self.stamp_loop_progress(registry, id);
                return self.advance_from_loop(registry, id);
            }

            // Subtasks still running; carry on into them.
            self.stamp_loop_progress(registry, id);
            return self.navigate(registry, id);
        }

        let has_source = has_input && !self.exhausted_sources.contains(&id);
        if has_source && self.try_expand(registry, id, ExpansionStrategy::Runtime).is_some() {
            self.stamp_loop_progress(registry, id);
            return self.navigate(registry, id);
        }

        debug!("no input for loop task {}, marking as completed", name);
        self.mark(registry, id, TaskStatus::Completed);
        self.advance_from_loop(registry, id)
    }

    fn advance_from_loop(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Phase {
        let next = static_successor(registry, id)
            .or_else(|| find_next_not_started(registry, &mut self.ctx));
        match next {
            Some(next) => Phase::Visit(next),
            None => self.finish(registry),
        }
    }

    fn navigate(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Phase {
        match resolve_next(registry, &mut self.ctx, id) {
            Navigation::Branch(next) | Navigation::Goto(next) => Phase::Visit(next),
            Navigation::Exit | Navigation::Finished => self.finish(registry),
        }
    }

    /// Completed regular tasks go back to `not_started` so a cycle can run
    /// them again. Loop and decision tasks, and loop subtasks, keep their
    /// terminal state.
    fn reset_if_rerunnable(&self, registry: &mut TaskRegistry, id: TaskId) {
        let Some(task) = registry.get(id) else {
            return;
        };
        if task.status != TaskStatus::Completed {
            return;
        }
        if task.task_type != TaskType::Regular || registry.is_loop_subtask(&task.name) {
            debug!("skipping reset for loop/decision/subtask {}", task.name);
            return;
        }
        debug!("resetting task {} to 'not_started'", task.name);
        self.mark(registry, id, TaskStatus::NotStarted);
    }

    /// Append the loop's continuation marker to its result so the condition
    /// table can route on `more` / `done`.
    fn stamp_loop_progress(&mut self, registry: &mut TaskRegistry, id: TaskId) {
        let Some(name) = registry.get(id).map(|t| t.name.clone()) else {
            return;
        };
        let Some(progress) = self.ctx.advance_loop(&name) else {
            return;
        };
        if let Some(result) = registry.get_mut(id).and_then(|t| t.result.as_mut()) {
            let marker = if progress.remaining > 0 { "more" } else { "done" };
            result.raw.push('\n');
            result.raw.push_str(marker);
        }
    }

    fn default_input_file(&self, registry: &mut TaskRegistry, id: TaskId) {
        if let Some(task) = registry.get_mut(id) {
            if task.input_file.is_none() {
                task.input_file = Some(self.config.default_input_file.clone());
            }
        }
    }

    /// Expand a loop task, degrading to "no input" when its source cannot be
    /// used. Returns the first subtask created.
    fn try_expand(
        &mut self,
        registry: &mut TaskRegistry,
        id: TaskId,
        strategy: ExpansionStrategy,
    ) -> Option<TaskId> {
        match expand_loop(registry, &mut self.ctx, id, strategy) {
            Ok(created) if !created.is_empty() => created.first().copied(),
            Ok(_) => {
                warn!(task_id = %id, "loop source produced no rows");
                self.exhaust_source(registry, id);
                None
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "failed to read loop tasks");
                self.exhaust_source(registry, id);
                None
            }
        }
    }

    fn exhaust_source(&mut self, registry: &mut TaskRegistry, id: TaskId) {
        self.exhausted_sources.insert(id);
        if let Some(task) = registry.get_mut(id) {
            task.input_file = None;
        }
    }

    fn mark(&self, registry: &mut TaskRegistry, id: TaskId, status: TaskStatus) {
        if let Err(e) = registry.set_status(id, status) {
            warn!(error = %e, "cannot update task status");
        }
    }

    fn finish(&mut self, registry: &TaskRegistry) -> Phase {
        let summary = registry.summary();
        debug!(
            total = summary.total,
            completed = summary.completed,
            outstanding = summary.outstanding(),
            not_started = summary.not_started,
            in_progress = summary.in_progress,
            failed = summary.failed,
            loops = summary.loops,
            decisions = summary.decisions,
            regular = summary.regular,
            iterations = self.iteration,
            "final workflow summary"
        );
        info!("workflow execution completed");
        self.phase = Phase::Done;
        Phase::Done
    }
}
