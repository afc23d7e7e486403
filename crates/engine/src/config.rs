//! Tuning knobs shared by every driver.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How many times the fallback selector may pick the same task.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Workflow iteration budget when none is configured.
pub const DEFAULT_MAX_ITER: usize = 10;

/// Loop source used when a loop task declares no `input_file`.
pub const DEFAULT_INPUT_FILE: &str = "tasks.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Upper bound on workflow cycles; reaching it halts the run.
    pub max_iter: usize,
    /// Fallback selections allowed per task before it is marked failed.
    pub retry_limit: u32,
    /// Loop source for loop tasks without an explicit `input_file`.
    pub default_input_file: PathBuf,
    /// Model the hierarchical manager asks for its decisions.
    pub manager_llm: Option<String>,
    pub manager_temperature: f32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            retry_limit: DEFAULT_RETRY_LIMIT,
            default_input_file: PathBuf::from(DEFAULT_INPUT_FILE),
            manager_llm: None,
            manager_temperature: 0.7,
        }
    }
}
