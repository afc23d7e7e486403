//! `MockAgent`: a test double for `TaskAgent`.
//!
//! Used by the engine's tests and by the CLI's dry-run mode, where a real
//! LLM-backed agent is either unavailable or irrelevant.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::{AgentError, AgentOutput, TaskAgent, TaskInput};

/// Behaviour injected into `MockAgent` at construction time.
pub enum MockBehaviour {
    /// Answer with the task's expected output, or `"<task name> done"`.
    Echo,
    /// Answer from a per-task-name script. The last scripted answer for a
    /// task is repeated once the script runs dry; unscripted tasks echo.
    Script(Mutex<HashMap<String, VecDeque<AgentOutput>>>),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock agent that records every task it receives and answers with a
/// programmer-specified result.
pub struct MockAgent {
    pub name: String,
    pub behaviour: MockBehaviour,
    /// All inputs seen by this agent (in call order).
    pub calls: Arc<Mutex<Vec<TaskInput>>>,
}

impl MockAgent {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds, echoing the expected output.
    pub fn echoing(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Echo)
    }

    /// Create a mock that answers each task name from `script`.
    pub fn scripted(
        name: impl Into<String>,
        script: HashMap<String, Vec<AgentOutput>>,
    ) -> Self {
        let script = script
            .into_iter()
            .map(|(task, outputs)| (task, VecDeque::from(outputs)))
            .collect();
        Self::with_behaviour(name, MockBehaviour::Script(Mutex::new(script)))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Number of tasks this agent has been asked to perform.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Names of the tasks performed, in call order.
    pub fn performed(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.name.clone()).collect()
    }

    fn echo(input: &TaskInput) -> AgentOutput {
        match &input.expected_output {
            Some(expected) => AgentOutput::text(expected.clone()),
            None => AgentOutput::text(format!("{} done", input.name)),
        }
    }
}

#[async_trait]
impl TaskAgent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self, input: TaskInput) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push(input.clone());
        debug!(agent = %self.name, task = %input.name, "mock agent performing task");

        match &self.behaviour {
            MockBehaviour::Echo => Ok(Self::echo(&input)),
            MockBehaviour::Script(script) => {
                let mut script = script.lock().unwrap();
                let output = match script.get_mut(&input.name) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                };
                Ok(output.unwrap_or_else(|| Self::echo(&input)))
            }
            MockBehaviour::FailRetryable(msg) => Err(AgentError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg)     => Err(AgentError::Fatal(msg.clone())),
        }
    }
}
