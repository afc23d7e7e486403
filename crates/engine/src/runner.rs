//! Runner: the caller side of the execution contract.
//!
//! A driver only decides which task runs next. `Runner` resumes it, performs
//! each yielded task with the task's agent, records the outcome on the
//! registry and resumes again until the driver is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use agents::{AgentError, TaskAgent, TaskInput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ProcessConfig;
use crate::error::EngineError;
use crate::graph::upstream_context;
use crate::manager::{AsyncDecisionService, DecisionRequest};
use crate::models::{TaskId, TaskStatus};
use crate::process::{Process, ProcessMode};
use crate::registry::{StatusSummary, TaskRegistry};

/// Maps agent names to implementations.
pub type AgentTable = HashMap<String, Arc<dyn TaskAgent>>;

/// What a finished run looked like.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: ProcessMode,
    /// Every id the driver handed out, in order.
    pub yielded: Vec<TaskId>,
    pub summary: StatusSummary,
    /// Names of tasks that ended the run `failed`.
    pub failed: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Stand-in for runs that were given no decision service.
struct NoDecisionService;

#[async_trait]
impl AsyncDecisionService for NoDecisionService {
    async fn decide_async(&self, _request: &DecisionRequest) -> Result<String, EngineError> {
        Err(EngineError::DecisionService("no decision service configured".to_owned()))
    }
}

pub struct Runner {
    process: Process,
    agents: AgentTable,
    default_agent: Option<Arc<dyn TaskAgent>>,
    decisions: Arc<dyn AsyncDecisionService>,
}

impl Runner {
    /// The agent roster offered to a hierarchical manager is the set of
    /// names in `agents`.
    pub fn new(config: ProcessConfig, agents: AgentTable) -> Self {
        let mut roster: Vec<String> = agents.keys().cloned().collect();
        roster.sort();
        Self {
            process: Process::new(config, roster),
            agents,
            default_agent: None,
            decisions: Arc::new(NoDecisionService),
        }
    }

    /// Agent used for tasks without an assignment, or whose agent is unknown.
    pub fn with_default_agent(mut self, agent: Arc<dyn TaskAgent>) -> Self {
        self.default_agent = Some(agent);
        self
    }

    pub fn with_decision_service(mut self, service: Arc<dyn AsyncDecisionService>) -> Self {
        self.decisions = service;
        self
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Drive `mode` over `registry` to the end.
    #[instrument(skip(self, registry), fields(tasks = registry.len()))]
    pub async fn run(&self, registry: &mut TaskRegistry, mode: ProcessMode) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, %mode, "run starting");

        let mut driver = self.process.driver(mode);
        let mut yielded = Vec::new();

        while let Some(id) = driver.next_async(registry, self.decisions.as_ref()).await {
            yielded.push(id);
            // The manager's work is the decision service itself.
            if driver.manager_task() == Some(id) {
                debug!("manager task acknowledged");
                continue;
            }
            self.execute(registry, id, mode).await;
        }

        let summary = registry.summary();
        let failed: Vec<String> = registry
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.name.clone())
            .collect();
        if !failed.is_empty() {
            warn!(?failed, "run finished with failed tasks");
        }
        info!(%run_id, yielded = yielded.len(), completed = summary.completed, "run finished");

        RunReport {
            run_id,
            mode,
            yielded,
            summary,
            failed,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn agent_for(&self, assigned: Option<&str>) -> Option<Arc<dyn TaskAgent>> {
        assigned
            .and_then(|name| self.agents.get(name))
            .or(self.default_agent.as_ref())
            .cloned()
    }

    /// Perform one yielded task and record the outcome.
    async fn execute(&self, registry: &mut TaskRegistry, id: TaskId, mode: ProcessMode) {
        let Some(task) = registry.get(id) else {
            warn!(task_id = %id, "driver yielded an unknown task");
            return;
        };

        let mut description = task.description.clone();
        // Workflow mode already folds upstream results into the description.
        if mode != ProcessMode::Workflow {
            if let Some(block) = upstream_context(registry, id) {
                description.push_str(&block);
            }
        }
        let input = TaskInput {
            task_id: id.0,
            name: task.name.clone(),
            description,
            expected_output: task.expected_output.clone(),
        };

        let Some(agent) = self.agent_for(task.agent.as_deref()) else {
            warn!(
                task = %input.name,
                agent = ?task.agent,
                "no agent available, leaving task not started"
            );
            set_status(registry, id, TaskStatus::NotStarted);
            return;
        };

        set_status(registry, id, TaskStatus::InProgress);
        debug!(task = %input.name, agent = agent.name(), "performing task");

        match agent.perform(input).await {
            Ok(output) => {
                if let Some(task) = registry.get_mut(id) {
                    task.result = Some(output.into());
                    task.status = TaskStatus::Completed;
                    info!("task '{}' completed", task.name);
                }
            }
            Err(AgentError::Retryable(msg)) => {
                warn!(task_id = %id, "retryable agent failure: {}", msg);
                set_status(registry, id, TaskStatus::NotStarted);
            }
            Err(AgentError::Fatal(msg)) => {
                error!(task_id = %id, "fatal agent failure: {}", msg);
                set_status(registry, id, TaskStatus::Failed);
            }
        }
    }
}

fn set_status(registry: &mut TaskRegistry, id: TaskId, status: TaskStatus) {
    if let Err(e) = registry.set_status(id, status) {
        warn!(error = %e, "cannot update task status");
    }
}
