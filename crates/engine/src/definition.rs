//! Workflow definition files.
//!
//! A definition is a JSON document bundling the tasks of a run with the
//! mode and configuration to run them under:
//!
//! ```json
//! {
//!   "name": "qa-review",
//!   "process": "workflow",
//!   "config": { "max_iter": 20 },
//!   "agents": [{ "name": "checker", "role": "Fact checker" }],
//!   "tasks": [
//!     { "name": "qa", "task_type": "loop", "input_file": "qa.csv",
//!       "agent": "checker", "next_tasks": ["summary"], "is_start": true },
//!     { "name": "summary", "context": ["qa"] }
//!   ]
//! }
//! ```
//!
//! `responses` and `manager_responses` script the mock agents and manager
//! used for dry runs.

use std::collections::HashMap;

use agents::AgentOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ProcessConfig;
use crate::error::EngineError;
use crate::models::Task;
use crate::process::ProcessMode;
use crate::registry::TaskRegistry;

/// An agent available to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub process: ProcessMode,
    #[serde(default)]
    pub config: ProcessConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    pub tasks: Vec<Task>,
    /// Scripted agent outputs by task name.
    #[serde(default)]
    pub responses: HashMap<String, Vec<AgentOutput>>,
    /// Scripted manager answers for hierarchical dry runs.
    #[serde(default)]
    pub manager_responses: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    /// Load the tasks into a fresh registry, in declaration order.
    ///
    /// # Errors
    /// [`EngineError::DuplicateTaskName`] if two tasks share a name.
    pub fn to_registry(&self) -> Result<TaskRegistry, EngineError> {
        TaskRegistry::from_tasks(self.tasks.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskStatus, TaskType};

    const QA_REVIEW: &str = r#"{
        "name": "qa-review",
        "process": "workflow",
        "config": { "max_iter": 20 },
        "agents": [{ "name": "checker", "role": "Fact checker" }],
        "tasks": [
            { "name": "review", "task_type": "decision",
              "condition": { "approve": ["publish"], "reject": "review", "abort": [] },
              "is_start": true },
            { "name": "publish", "task_type": "task", "status": "completed" }
        ],
        "responses": { "review": [{ "raw": "looks fine", "decision": "approve" }] }
    }"#;

    #[test]
    fn parses_a_full_definition() {
        let def = WorkflowDefinition::from_json(QA_REVIEW).expect("valid definition");
        assert_eq!(def.process, ProcessMode::Workflow);
        assert_eq!(def.config.max_iter, 20);
        assert_eq!(def.agent_names(), vec!["checker"]);
        assert_eq!(def.responses["review"][0].decision.as_deref(), Some("approve"));

        let reg = def.to_registry().unwrap();
        let review = reg.by_name("review").unwrap();
        assert_eq!(review.task_type, TaskType::Decision);
        let labels: Vec<&str> = review.condition.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["approve", "reject", "abort"]);
        assert!(review.condition.get("abort").unwrap().is_exit());
        assert_eq!(review.condition.get("reject").unwrap().target(), Some("review"));

        let publish = reg.by_name("publish").unwrap();
        assert_eq!(publish.task_type, TaskType::Regular);
        assert_eq!(publish.status, TaskStatus::Completed);
    }

    #[test]
    fn minimal_definition_uses_defaults() {
        let json = r#"{ "name": "x", "tasks": [{ "name": "a" }] }"#;
        let def = WorkflowDefinition::from_json(json).unwrap();
        assert_eq!(def.process, ProcessMode::Sequential);
        assert_eq!(def.config, ProcessConfig::default());
        assert!(def.manager_responses.is_empty());
    }

    #[test]
    fn duplicate_names_and_bad_json_are_rejected() {
        let dup = WorkflowDefinition::from_json(
            r#"{ "name": "x", "tasks": [{ "name": "a" }, { "name": "a" }] }"#,
        )
        .unwrap();
        assert!(matches!(dup.to_registry(), Err(EngineError::DuplicateTaskName(n)) if n == "a"));

        assert!(matches!(
            WorkflowDefinition::from_json("{ not json"),
            Err(EngineError::InvalidDefinition(_))
        ));
    }
}
