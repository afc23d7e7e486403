//! Core domain models for the orchestration engine.
//!
//! These types are the source of truth for what a task graph looks like in
//! memory. They deserialize straight from the `tasks` array of a workflow
//! definition file.

use std::fmt;
use std::path::PathBuf;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Registry key of a task. Assigned by the registry, never reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status / type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    #[serde(alias = "task")]
    Regular,
    /// Work is delegated to subtasks generated from `input_file`.
    Loop,
    /// Successor is picked by matching the result against `condition`.
    Decision,
}

impl TaskType {
    /// Whether the navigator consults the condition table for this type.
    pub fn uses_conditions(self) -> bool {
        matches!(self, TaskType::Loop | TaskType::Decision)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Regular => "regular",
            TaskType::Loop => "loop",
            TaskType::Decision => "decision",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Condition table
// ---------------------------------------------------------------------------

/// Right-hand side of a condition branch: a task name, or a list whose first
/// element is the task name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionTarget {
    Name(String),
    Names(Vec<String>),
}

impl ConditionTarget {
    /// Branch that routes to `name`.
    pub fn to(name: impl Into<String>) -> Self {
        ConditionTarget::Names(vec![name.into()])
    }

    /// Branch that ends the run.
    pub fn exit() -> Self {
        ConditionTarget::Names(Vec::new())
    }

    /// The task name this branch routes to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            ConditionTarget::Name(name) => Some(name.as_str()),
            ConditionTarget::Names(names) => names.first().map(String::as_str),
        }
    }

    /// Empty targets and the literal `exit` terminate the run.
    pub fn is_exit(&self) -> bool {
        match self.target() {
            None => true,
            Some(name) => name.is_empty() || name == "exit",
        }
    }
}

/// Ordered mapping from decision label to branch target.
///
/// Declaration order is preserved so that "first matching label wins" is
/// well defined even when two labels differ only by case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionTable {
    branches: Vec<(String, ConditionTarget)>,
}

impl ConditionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `label` to `target`, replacing an existing branch with the exact
    /// same label in place.
    pub fn insert(&mut self, label: impl Into<String>, target: ConditionTarget) {
        let label = label.into();
        match self.branches.iter_mut().find(|(l, _)| *l == label) {
            Some((_, existing)) => *existing = target,
            None => self.branches.push((label, target)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&ConditionTarget> {
        self.branches.iter().find(|(l, _)| l == label).map(|(_, t)| t)
    }

    /// First branch whose label equals `decision`, ignoring case.
    pub fn matching(&self, decision: &str) -> Option<(&str, &ConditionTarget)> {
        self.branches
            .iter()
            .find(|(label, _)| label.to_lowercase() == decision)
            .map(|(label, target)| (label.as_str(), target))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConditionTarget)> {
        self.branches.iter().map(|(l, t)| (l.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl<L: Into<String>> FromIterator<(L, ConditionTarget)> for ConditionTable {
    fn from_iter<I: IntoIterator<Item = (L, ConditionTarget)>>(iter: I) -> Self {
        let mut table = ConditionTable::new();
        for (label, target) in iter {
            table.insert(label, target);
        }
        table
    }
}

impl Serialize for ConditionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.branches.len()))?;
        for (label, target) in &self.branches {
            map.serialize_entry(label, target)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConditionTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ConditionTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of decision labels to task names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut table = ConditionTable::new();
                while let Some((label, target)) = access.next_entry::<String, ConditionTarget>()? {
                    table.insert(label, target);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Structured half of a task result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// Label the navigator routes on; overrides the raw text when present.
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Output recorded on a task once it has been executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub raw: String,
    #[serde(default)]
    pub structured: Option<StructuredOutput>,
}

impl TaskResult {
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            structured: None,
        }
    }

    pub fn with_decision(raw: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            structured: Some(StructuredOutput {
                decision: Some(decision.into()),
                payload: None,
            }),
        }
    }

    /// The label matched against a condition table: the structured decision
    /// when present, else the raw text. Lower-cased and trimmed.
    pub fn decision_label(&self) -> String {
        let label = self
            .structured
            .as_ref()
            .and_then(|s| s.decision.as_deref())
            .unwrap_or(&self.raw);
        label.trim().to_lowercase()
    }

    /// Like [`decision_label`](Self::decision_label), but falls back to the
    /// last non-empty line of the raw text, where loop progress markers go.
    pub fn progress_label(&self) -> String {
        if let Some(decision) = self.structured.as_ref().and_then(|s| s.decision.as_deref()) {
            return decision.trim().to_lowercase();
        }
        self.raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("")
            .to_lowercase()
    }
}

impl From<agents::AgentOutput> for TaskResult {
    fn from(output: agents::AgentOutput) -> Self {
        let structured = if output.decision.is_some() || output.structured.is_some() {
            Some(StructuredOutput {
                decision: output.decision,
                payload: output.structured,
            })
        } else {
            None
        };
        Self {
            raw: output.raw,
            structured,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work the engine schedules but never executes itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by [`crate::TaskRegistry::insert`]; ignored on input.
    #[serde(default, skip_deserializing)]
    pub id: TaskId,
    /// Unique among the tasks of a run; the key for every cross reference.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Name of the agent assigned to perform this task.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub task_type: TaskType,
    /// Default successors by name. Only the first entry is followed.
    #[serde(default)]
    pub next_tasks: Vec<String>,
    /// Derived from every other task's `next_tasks` when a workflow starts.
    #[serde(default, skip_deserializing)]
    pub previous_tasks: Vec<String>,
    #[serde(default)]
    pub condition: ConditionTable,
    /// Names of tasks whose results are injected regardless of adjacency.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default, skip_deserializing)]
    pub subtasks_created: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_next<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_tasks = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, label: impl Into<String>, target: ConditionTarget) -> Self {
        self.condition.insert(label, target);
        self
    }

    pub fn with_context<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn as_start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Record `result` and mark the task completed, as an executor does when
    /// it hands control back to a driver.
    pub fn complete(&mut self, result: TaskResult) {
        self.result = Some(result);
        self.status = TaskStatus::Completed;
    }

    /// Whether this task was generated by expanding the loop named `loop_name`.
    pub fn is_subtask_of(&self, loop_name: &str) -> bool {
        self.name
            .strip_prefix(loop_name)
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_target_exit_forms() {
        assert!(ConditionTarget::exit().is_exit());
        assert!(ConditionTarget::Name(String::new()).is_exit());
        assert!(ConditionTarget::Name("exit".into()).is_exit());
        assert!(ConditionTarget::Names(vec!["exit".into(), "b".into()]).is_exit());
        assert!(!ConditionTarget::to("review").is_exit());
        assert_eq!(ConditionTarget::Names(vec!["a".into(), "b".into()]).target(), Some("a"));
    }

    #[test]
    fn condition_table_keeps_declaration_order() {
        let table: ConditionTable = serde_json::from_str(
            r#"{ "Retry": ["draft"], "retry": "other", "done": [] }"#,
        )
        .expect("valid table");

        let labels: Vec<&str> = table.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["Retry", "retry", "done"]);

        let (label, target) = table.matching("retry").expect("case-insensitive match");
        assert_eq!(label, "Retry");
        assert_eq!(target.target(), Some("draft"));
    }

    #[test]
    fn condition_table_insert_replaces_in_place() {
        let mut table = ConditionTable::new();
        table.insert("done", ConditionTarget::to("next"));
        table.insert("retry", ConditionTarget::to("current"));
        table.insert("done", ConditionTarget::to("step_2"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.iter().next().map(|(l, _)| l), Some("done"));
        assert_eq!(table.get("done").and_then(|t| t.target()), Some("step_2"));
    }

    #[test]
    fn structured_decision_wins_over_raw_text() {
        let plain = TaskResult::text("  DONE \n");
        assert_eq!(plain.decision_label(), "done");

        let structured = TaskResult::with_decision("done", "Retry");
        assert_eq!(structured.decision_label(), "retry");
    }

    #[test]
    fn progress_label_reads_the_last_marker() {
        assert_eq!(TaskResult::text("seed\nmore\n  Done \n\n").progress_label(), "done");
        assert_eq!(TaskResult::text("").progress_label(), "");
        assert_eq!(TaskResult::with_decision("seed\nmore", "Exit").progress_label(), "exit");
    }

    #[test]
    fn agent_output_converts_to_tagged_result() {
        let plain: TaskResult = agents::AgentOutput::text("hello").into();
        assert!(plain.structured.is_none());

        let decided: TaskResult = agents::AgentOutput::with_decision("hm", "exit").into();
        assert_eq!(decided.decision_label(), "exit");
    }

    #[test]
    fn task_deserializes_with_defaults() {
        let task: Task = serde_json::from_str(
            r#"{
                "name": "review",
                "task_type": "decision",
                "condition": { "approved": ["publish"], "rejected": "draft" },
                "previous_tasks": ["ignored"]
            }"#,
        )
        .expect("valid task");

        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.task_type, TaskType::Decision);
        assert!(task.previous_tasks.is_empty());
        assert_eq!(task.condition.len(), 2);

        let legacy: Task = serde_json::from_str(r#"{ "name": "x", "task_type": "task" }"#).unwrap();
        assert_eq!(legacy.task_type, TaskType::Regular);
    }

    #[test]
    fn subtask_prefix_requires_separator() {
        let sub = Task::new("questions_2", "");
        assert!(sub.is_subtask_of("questions"));
        assert!(!sub.is_subtask_of("quest"));
        assert!(!Task::new("questions", "").is_subtask_of("questions"));
    }
}
