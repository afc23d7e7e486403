//! The `TaskAgent` trait, the contract every agent must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgentError;

/// Snapshot of a task handed to an agent.
///
/// Defined here (in the agents crate) so the engine can build it from its own
/// task type without the agents crate depending on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    /// Registry id of the task being performed.
    pub task_id: u64,
    pub name: String,
    /// Description including any upstream context the engine appended.
    pub description: String,
    pub expected_output: Option<String>,
}

/// What an agent produced for a task.
///
/// `raw` is always present. `decision` is the label decision and loop tasks
/// are routed on; when set it takes precedence over `raw`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Any additional structured payload the agent returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl AgentOutput {
    /// Plain text output.
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            decision: None,
            structured: None,
        }
    }

    /// Text output carrying an explicit decision label.
    pub fn with_decision(raw: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            decision: Some(decision.into()),
            structured: None,
        }
    }
}

/// The core agent trait.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Name the agent is registered under; tasks reference agents by name.
    fn name(&self) -> &str;

    /// Perform the task and return its output.
    async fn perform(&self, input: TaskInput) -> Result<AgentOutput, AgentError>;
}
