//! `engine` crate: task model, graph navigation, loop expansion and the
//! three execution drivers.

pub mod config;
pub mod definition;
pub mod error;
pub mod fallback;
pub mod graph;
pub mod hierarchical;
pub mod loop_expander;
pub mod manager;
pub mod models;
pub mod navigator;
pub mod process;
pub mod registry;
pub mod run_context;
pub mod runner;
pub mod sequential;
pub mod workflow;

pub use config::ProcessConfig;
pub use definition::{AgentSpec, WorkflowDefinition};
pub use error::EngineError;
pub use graph::{upstream_context, validate_graph, GraphReport};
pub use hierarchical::{HierarchicalDriver, HierarchicalStep};
pub use manager::{
    AsyncDecisionService, DecisionService, ManagerInstructions, ScriptedDecisionService,
};
pub use models::{ConditionTarget, Task, TaskId, TaskResult, TaskStatus, TaskType};
pub use process::{Process, ProcessMode, TaskDriver};
pub use registry::{StatusSummary, TaskRegistry};
pub use run_context::RunContext;
pub use runner::{AgentTable, RunReport, Runner};
pub use sequential::SequentialDriver;
pub use workflow::WorkflowDriver;
