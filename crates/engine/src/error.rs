//! Engine-level error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::TaskId;

/// Errors produced by the engine.
///
/// None of these cross a driver's resumption boundary: drivers log them and
/// either degrade the run or end it. They surface from the definition and
/// registry APIs, and from the decision-service seam.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Definition errors ------

    /// Two tasks share the same name.
    #[error("duplicate task name: '{0}'")]
    DuplicateTaskName(String),

    /// A task id does not exist in the registry.
    #[error("unknown task id {0}")]
    UnknownTask(TaskId),

    /// There is nothing to run.
    #[error("task registry is empty")]
    EmptyRegistry,

    /// The workflow definition could not be parsed.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] serde_json::Error),

    // ------ Loop source errors ------

    #[error("cannot read loop source '{path}': {source}")]
    LoopSourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse loop source '{path}': {source}")]
    LoopSourceCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    // ------ Manager errors ------

    /// The decision service could not be reached or refused the request.
    #[error("decision service failed: {0}")]
    DecisionService(String),

    /// The decision service answered with something that is not a
    /// `{task_id, agent_name, action}` object.
    #[error("malformed manager response: {0}")]
    MalformedManagerResponse(String),
}
