//! Manager coordination for hierarchical runs.
//!
//! The hierarchical driver never picks tasks itself. It renders the state of
//! the registry into a [`DecisionRequest`], hands that to a decision service
//! (usually an LLM behind some client), and parses the answer back into
//! [`ManagerInstructions`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{Task, TaskId};
use crate::registry::TaskRegistry;

pub const MANAGER_TASK_NAME: &str = "manager_task";
pub const MANAGER_AGENT_NAME: &str = "Manager";

const MANAGER_DESCRIPTION: &str = "Decide the order of tasks and which agent executes them";
const MANAGER_EXPECTED_OUTPUT: &str = "All tasks completed successfully";

const RESPONSE_INSTRUCTION: &str = r#"Provide a JSON with the structure:
{
   "task_id": <int>,
   "agent_name": "<string>",
   "action": "<execute or stop>"
}"#;

/// What the manager wants done next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerInstructions {
    pub task_id: u64,
    pub agent_name: String,
    pub action: String,
}

impl ManagerInstructions {
    pub fn is_stop(&self) -> bool {
        self.action.trim().eq_ignore_ascii_case("stop")
    }

    pub fn task(&self) -> TaskId {
        TaskId(self.task_id)
    }
}

/// One row of the status summary shown to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummaryEntry {
    pub task_id: u64,
    pub name: String,
    pub description: String,
    pub status: String,
    pub agent: String,
}

/// Everything a decision service needs to answer one round.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub model: Option<String>,
    pub temperature: f32,
    pub system_prompt: String,
    pub user_prompt: String,
    pub tasks: Vec<TaskSummaryEntry>,
}

/// The synthetic task the manager agent owns for the duration of a run.
///
/// Named [`MANAGER_TASK_NAME`], or `manager_task#<n>` when a user task
/// already holds that name.
pub fn manager_task(registry: &TaskRegistry) -> Task {
    let name = std::iter::once(MANAGER_TASK_NAME.to_owned())
        .chain((2..).map(|n| format!("{MANAGER_TASK_NAME}#{n}")))
        .find(|name| registry.id_of(name).is_none())
        .unwrap_or_else(|| MANAGER_TASK_NAME.to_owned());

    Task::new(name, MANAGER_DESCRIPTION)
        .with_expected_output(MANAGER_EXPECTED_OUTPUT)
        .with_agent(MANAGER_AGENT_NAME)
}

/// Status rows for every task except the manager's own.
pub fn summarize_tasks(registry: &TaskRegistry, manager: Option<TaskId>) -> Vec<TaskSummaryEntry> {
    registry
        .iter()
        .filter(|t| Some(t.id) != manager)
        .map(|t| TaskSummaryEntry {
            task_id: t.id.0,
            name: t.name.clone(),
            description: t.description.clone(),
            status: t.status.to_string(),
            agent: t.agent.clone().unwrap_or_else(|| "No agent".to_owned()),
        })
        .collect()
}

/// Build the request for the next manager round.
pub fn build_request(
    registry: &TaskRegistry,
    manager: Option<TaskId>,
    model: Option<String>,
    temperature: f32,
) -> Result<DecisionRequest, EngineError> {
    let tasks = summarize_tasks(registry, manager);
    let rendered = serde_json::to_string_pretty(&tasks)?;
    let own = manager
        .and_then(|id| registry.get(id))
        .map_or(MANAGER_TASK_NAME, |t| t.name.as_str());
    let user_prompt = format!(
        "Here is the current status of all tasks except yours ({own}):\n\
         {rendered}\n\n{RESPONSE_INSTRUCTION}\n"
    );

    Ok(DecisionRequest {
        model,
        temperature,
        system_prompt: MANAGER_DESCRIPTION.to_owned(),
        user_prompt,
        tasks,
    })
}

/// Parse a manager answer. Prose or code fences around the object are
/// ignored; the first JSON object in the text is used.
pub fn parse_instructions(response: &str) -> Result<ManagerInstructions, EngineError> {
    let start = response.find('{').ok_or_else(|| {
        EngineError::MalformedManagerResponse(format!("no JSON object in {response:?}"))
    })?;

    serde_json::Deserializer::from_str(&response[start..])
        .into_iter::<ManagerInstructions>()
        .next()
        .ok_or_else(|| EngineError::MalformedManagerResponse("empty response".to_owned()))?
        .map_err(|e| EngineError::MalformedManagerResponse(e.to_string()))
}

// ============================================================
// Decision services
// ============================================================

/// Blocking decision service, called inline by [`crate::HierarchicalDriver::next`].
pub trait DecisionService {
    /// Return the raw text of the manager's answer.
    fn decide(&self, request: &DecisionRequest) -> Result<String, EngineError>;
}

/// Awaitable decision service for [`crate::HierarchicalDriver::next_async`].
#[async_trait]
pub trait AsyncDecisionService: Send + Sync {
    async fn decide_async(&self, request: &DecisionRequest) -> Result<String, EngineError>;
}

/// Replays canned answers in order. Fails once the queue runs dry.
#[derive(Debug, Default)]
pub struct ScriptedDecisionService {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedDecisionService {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// User prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn answer(&self, request: &DecisionRequest) -> Result<String, EngineError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.user_prompt.clone());
        }
        self.responses
            .lock()
            .map_err(|_| EngineError::DecisionService("response queue poisoned".to_owned()))?
            .pop_front()
            .ok_or_else(|| EngineError::DecisionService("no scripted responses left".to_owned()))
    }
}

impl DecisionService for ScriptedDecisionService {
    fn decide(&self, request: &DecisionRequest) -> Result<String, EngineError> {
        self.answer(request)
    }
}

#[async_trait]
impl AsyncDecisionService for ScriptedDecisionService {
    async fn decide_async(&self, request: &DecisionRequest) -> Result<String, EngineError> {
        self.answer(request)
    }
}
