//! Hierarchical-mode driver: a manager picks every task.
//!
//! The driver is split into [`HierarchicalDriver::step`], which reports what
//! it needs next, and [`HierarchicalDriver::apply_decision`], which feeds a
//! manager answer back in. [`HierarchicalDriver::next`] and
//! [`HierarchicalDriver::next_async`] wire the two together around a
//! blocking or an awaitable decision service.

use tracing::{error, info, instrument, warn};

use crate::config::ProcessConfig;
use crate::error::EngineError;
use crate::manager::{
    build_request, manager_task, parse_instructions, AsyncDecisionService, DecisionRequest,
    DecisionService,
};
use crate::models::{TaskId, TaskStatus};
use crate::registry::TaskRegistry;

/// What the driver needs from its caller.
#[derive(Debug, Clone)]
pub enum HierarchicalStep {
    /// Execute this task, then resume.
    Yield(TaskId),
    /// Ask the decision service, then call `apply_decision` with its answer.
    Decide(DecisionRequest),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    /// The manager task was handed out.
    ManagerYielded,
    Choose,
    /// A request went out; waiting for `apply_decision`.
    AwaitingDecision,
    /// Chosen by the manager, not handed out yet.
    Ready(TaskId),
    Yielded(TaskId),
    Done,
}

/// Resumable manager-driven traversal.
pub struct HierarchicalDriver {
    config: ProcessConfig,
    /// Agents a manager may reassign tasks to.
    roster: Vec<String>,
    phase: Phase,
    manager: Option<TaskId>,
    pending: Option<DecisionRequest>,
    completed: usize,
    total: usize,
}

impl HierarchicalDriver {
    pub fn new(config: ProcessConfig, roster: Vec<String>) -> Self {
        Self {
            config,
            roster,
            phase: Phase::Start,
            manager: None,
            pending: None,
            completed: 0,
            total: 0,
        }
    }

    /// Id of the synthetic manager task, once created.
    pub fn manager_task(&self) -> Option<TaskId> {
        self.manager
    }

    /// Tasks counted as completed so far, and the number needed.
    pub fn progress(&self) -> (usize, usize) {
        (self.completed, self.total)
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Resume with a blocking decision service.
    pub fn next(
        &mut self,
        registry: &mut TaskRegistry,
        service: &dyn DecisionService,
    ) -> Option<TaskId> {
        loop {
            match self.step(registry) {
                HierarchicalStep::Yield(id) => return Some(id),
                HierarchicalStep::Decide(request) => {
                    let answer = service.decide(&request);
                    self.apply_decision(registry, answer);
                }
                HierarchicalStep::Done => return None,
            }
        }
    }

    /// Resume with an awaitable decision service.
    pub async fn next_async(
        &mut self,
        registry: &mut TaskRegistry,
        service: &dyn AsyncDecisionService,
    ) -> Option<TaskId> {
        loop {
            match self.step(registry) {
                HierarchicalStep::Yield(id) => return Some(id),
                HierarchicalStep::Decide(request) => {
                    let answer = service.decide_async(&request).await;
                    self.apply_decision(registry, answer);
                }
                HierarchicalStep::Done => return None,
            }
        }
    }

    /// Advance until the driver needs something from the caller.
    pub fn step(&mut self, registry: &mut TaskRegistry) -> HierarchicalStep {
        loop {
            match self.phase {
                Phase::Start => match self.start(registry) {
                    Some(id) => {
                        self.phase = Phase::ManagerYielded;
                        return HierarchicalStep::Yield(id);
                    }
                    None => self.phase = Phase::Done,
                },
                Phase::ManagerYielded => self.phase = Phase::Choose,
                Phase::Choose => {
                    if self.completed >= self.total {
                        self.finish(registry);
                        continue;
                    }
                    let request = build_request(
                        registry,
                        self.manager,
                        self.config.manager_llm.clone(),
                        self.config.manager_temperature,
                    );
                    match request {
                        Ok(request) => {
                            info!("requesting manager instructions");
                            self.pending = Some(request.clone());
                            self.phase = Phase::AwaitingDecision;
                            return HierarchicalStep::Decide(request);
                        }
                        Err(e) => {
                            error!(error = %e, "cannot build manager request");
                            self.finish(registry);
                        }
                    }
                }
                // Resumed without an answer; ask again.
                Phase::AwaitingDecision => {
                    if let Some(request) = self.pending.clone() {
                        return HierarchicalStep::Decide(request);
                    }
                    self.phase = Phase::Choose;
                }
                Phase::Ready(id) => {
                    self.phase = Phase::Yielded(id);
                    return HierarchicalStep::Yield(id);
                }
                Phase::Yielded(id) => {
                    let status = registry.status(id);
                    info!(task_id = %id, status = ?status, "finished execution of task");
                    if status == Some(TaskStatus::Completed) {
                        self.count(id);
                    }
                    self.phase = Phase::Choose;
                }
                Phase::Done => return HierarchicalStep::Done,
            }
        }
    }

    /// Feed the decision service's answer (or failure) back in.
    pub fn apply_decision(
        &mut self,
        registry: &mut TaskRegistry,
        answer: Result<String, EngineError>,
    ) {
        if self.phase != Phase::AwaitingDecision {
            warn!("manager decision arrived while none was pending, ignoring");
            return;
        }
        self.pending = None;

        let instructions = match answer.and_then(|text| parse_instructions(&text)) {
            Ok(instructions) => instructions,
            Err(e) => {
                error!(error = %e, "manager parse error");
                self.finish(registry);
                return;
            }
        };
        info!(
            task_id = instructions.task_id,
            agent = %instructions.agent_name,
            action = %instructions.action,
            "manager instructions"
        );

        if instructions.is_stop() {
            info!("manager decided to stop task execution");
            self.finish(registry);
            return;
        }

        let id = instructions.task();
        if Some(id) == self.manager || !registry.contains(id) {
            error!("manager selected invalid task id {}", id);
            self.finish(registry);
            return;
        }

        if self.roster.iter().any(|a| *a == instructions.agent_name) {
            if let Some(task) = registry.get_mut(id) {
                let original = task.agent.replace(instructions.agent_name.clone());
                info!(
                    "changed agent for task {} from {} to {}",
                    id,
                    original.as_deref().unwrap_or("None"),
                    instructions.agent_name
                );
            }
        }

        if registry.status(id) == Some(TaskStatus::Completed) {
            self.count(id);
            self.phase = Phase::Choose;
        } else {
            info!(task_id = %id, "starting execution of task");
            self.phase = Phase::Ready(id);
        }
    }

    #[instrument(skip_all, fields(tasks = registry.len()))]
    fn start(&mut self, registry: &mut TaskRegistry) -> Option<TaskId> {
        let id = match registry.insert(manager_task(registry)) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "cannot create manager task");
                return None;
            }
        };
        self.manager = Some(id);
        self.total = registry.len().saturating_sub(1);
        info!("created manager task with id {}", id);
        info!("need to complete {} tasks (excluding manager task)", self.total);
        Some(id)
    }

    fn count(&mut self, id: TaskId) {
        self.completed += 1;
        info!("task {} completed, total completed: {}/{}", id, self.completed, self.total);
    }

    fn finish(&mut self, registry: &mut TaskRegistry) {
        if let Some(manager) = self.manager {
            if let Err(e) = registry.set_status(manager, TaskStatus::Completed) {
                warn!(error = %e, "cannot complete manager task");
            }
        }
        if self.completed >= self.total {
            info!("all tasks completed under manager supervision");
        }
        info!("hierarchical task execution finished");
        self.phase = Phase::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ScriptedDecisionService, MANAGER_AGENT_NAME, MANAGER_TASK_NAME};
    use crate::models::Task;

    fn registry() -> TaskRegistry {
        TaskRegistry::from_tasks(vec![
            Task::new("research", "").with_agent("researcher"),
            Task::new("write", ""),
        ])
        .unwrap()
    }

    fn instruction(id: u64, agent: &str, action: &str) -> String {
        format!(r#"{{"task_id": {id}, "agent_name": "{agent}", "action": "{action}"}}"#)
    }

    #[test]
    fn manager_task_is_yielded_first_and_completed_last() {
        let mut reg = registry();
        let mut driver = HierarchicalDriver::new(ProcessConfig::default(), vec![]);
        let service = ScriptedDecisionService::new([instruction(1, "x", "stop")]);

        let manager = driver.next(&mut reg, &service).unwrap();
        assert_eq!(reg.get(manager).unwrap().agent.as_deref(), Some(MANAGER_AGENT_NAME));
        assert_eq!(driver.progress(), (0, 2));

        assert_eq!(driver.next(&mut reg, &service), None);
        assert_eq!(reg.status(manager), Some(TaskStatus::Completed));
    }

    #[test]
    fn chosen_tasks_are_reassigned_and_counted() {
        let mut reg = registry();
        let write = reg.id_of("write").unwrap();
        let research = reg.id_of("research").unwrap();
        let service = ScriptedDecisionService::new([
            instruction(write.0, "writer", "execute"),
            instruction(research.0, "ghost", "execute"),
        ]);
        let mut driver = HierarchicalDriver::new(ProcessConfig::default(), vec!["writer".into()]);

        driver.next(&mut reg, &service);
        assert_eq!(driver.next(&mut reg, &service), Some(write));
        assert_eq!(reg.get(write).unwrap().agent.as_deref(), Some("writer"));
        reg.set_status(write, TaskStatus::Completed).unwrap();

        assert_eq!(driver.next(&mut reg, &service), Some(research));
        // Unknown agents leave the assignment alone.
        assert_eq!(reg.get(research).unwrap().agent.as_deref(), Some("researcher"));
        reg.set_status(research, TaskStatus::Completed).unwrap();

        assert_eq!(driver.next(&mut reg, &service), None);
        assert_eq!(driver.progress(), (2, 2));
    }

    #[test]
    fn invalid_ids_and_failures_halt_the_run() {
        let answers = [
            instruction(99, "x", "execute"),
            instruction(3, "x", "execute"),
            "garbage".to_owned(),
        ];
        for answer in answers {
            let mut reg = registry();
            let service = ScriptedDecisionService::new([answer]);
            let mut driver = HierarchicalDriver::new(ProcessConfig::default(), vec![]);
            driver.next(&mut reg, &service);
            assert_eq!(driver.next(&mut reg, &service), None);
            assert!(driver.is_done());
        }
    }

    #[test]
    fn user_task_named_like_the_manager_is_still_offered() {
        let mut reg =
            TaskRegistry::from_tasks(vec![Task::new(MANAGER_TASK_NAME, "user work")]).unwrap();
        let user = reg.id_of(MANAGER_TASK_NAME).unwrap();
        let mut driver = HierarchicalDriver::new(ProcessConfig::default(), vec![]);

        let manager = match driver.step(&mut reg) {
            HierarchicalStep::Yield(id) => id,
            other => panic!("expected the manager task, got {other:?}"),
        };
        assert_ne!(manager, user);
        assert_eq!(driver.progress(), (0, 1));

        let HierarchicalStep::Decide(request) = driver.step(&mut reg) else {
            panic!("expected a decision request");
        };
        let offered: Vec<u64> = request.tasks.iter().map(|t| t.task_id).collect();
        assert_eq!(offered, vec![user.0]);

        driver.apply_decision(&mut reg, Ok(instruction(user.0, "x", "execute")));
        assert!(matches!(driver.step(&mut reg), HierarchicalStep::Yield(id) if id == user));
    }

    #[test]
    fn step_reissues_an_unanswered_request() {
        let mut reg = registry();
        let mut driver = HierarchicalDriver::new(ProcessConfig::default(), vec![]);

        assert!(matches!(driver.step(&mut reg), HierarchicalStep::Yield(_)));
        assert!(matches!(driver.step(&mut reg), HierarchicalStep::Decide(_)));
        assert!(matches!(driver.step(&mut reg), HierarchicalStep::Decide(_)));

        driver.apply_decision(&mut reg, Err(EngineError::DecisionService("offline".into())));
        assert!(matches!(driver.step(&mut reg), HierarchicalStep::Done));
    }
}
