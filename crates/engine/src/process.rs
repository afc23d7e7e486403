//! Process facade: pick a traversal mode and get a driver for it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ProcessConfig;
use crate::hierarchical::HierarchicalDriver;
use crate::manager::{AsyncDecisionService, DecisionService};
use crate::models::TaskId;
use crate::registry::TaskRegistry;
use crate::sequential::SequentialDriver;
use crate::workflow::WorkflowDriver;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    #[default]
    Sequential,
    Workflow,
    Hierarchical,
}

impl ProcessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessMode::Sequential => "sequential",
            ProcessMode::Workflow => "workflow",
            ProcessMode::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ProcessMode::Sequential),
            "workflow" => Ok(ProcessMode::Workflow),
            "hierarchical" => Ok(ProcessMode::Hierarchical),
            other => Err(format!("unknown process mode '{other}'")),
        }
    }
}

/// Configuration and agent roster shared by every driver of a run.
#[derive(Debug, Clone, Default)]
pub struct Process {
    pub config: ProcessConfig,
    /// Names of the agents available to the run.
    pub agents: Vec<String>,
}

impl Process {
    pub fn new(config: ProcessConfig, agents: Vec<String>) -> Self {
        Self { config, agents }
    }

    pub fn sequential(&self) -> SequentialDriver {
        SequentialDriver::new()
    }

    pub fn workflow(&self) -> WorkflowDriver {
        WorkflowDriver::new(self.config.clone())
    }

    pub fn hierarchical(&self) -> HierarchicalDriver {
        HierarchicalDriver::new(self.config.clone(), self.agents.clone())
    }

    pub fn driver(&self, mode: ProcessMode) -> TaskDriver {
        match mode {
            ProcessMode::Sequential => TaskDriver::Sequential(self.sequential()),
            ProcessMode::Workflow => TaskDriver::Workflow(self.workflow()),
            ProcessMode::Hierarchical => TaskDriver::Hierarchical(self.hierarchical()),
        }
    }
}

/// Any of the three drivers behind one resumption interface.
pub enum TaskDriver {
    Sequential(SequentialDriver),
    Workflow(WorkflowDriver),
    Hierarchical(HierarchicalDriver),
}

impl TaskDriver {
    pub fn mode(&self) -> ProcessMode {
        match self {
            TaskDriver::Sequential(_) => ProcessMode::Sequential,
            TaskDriver::Workflow(_) => ProcessMode::Workflow,
            TaskDriver::Hierarchical(_) => ProcessMode::Hierarchical,
        }
    }

    /// The synthetic manager task, in hierarchical mode once created.
    pub fn manager_task(&self) -> Option<TaskId> {
        match self {
            TaskDriver::Hierarchical(d) => d.manager_task(),
            TaskDriver::Sequential(_) | TaskDriver::Workflow(_) => None,
        }
    }

    /// The decision service is only consulted in hierarchical mode.
    pub fn next(
        &mut self,
        registry: &mut TaskRegistry,
        service: &dyn DecisionService,
    ) -> Option<TaskId> {
        match self {
            TaskDriver::Sequential(d) => d.next(registry),
            TaskDriver::Workflow(d) => d.next(registry),
            TaskDriver::Hierarchical(d) => d.next(registry, service),
        }
    }

    pub async fn next_async(
        &mut self,
        registry: &mut TaskRegistry,
        service: &dyn AsyncDecisionService,
    ) -> Option<TaskId> {
        match self {
            TaskDriver::Sequential(d) => d.next(registry),
            TaskDriver::Workflow(d) => d.next(registry),
            TaskDriver::Hierarchical(d) => d.next_async(registry, service).await,
        }
    }
}
