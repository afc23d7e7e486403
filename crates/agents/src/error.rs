//! Agent-level error type.

use thiserror::Error;

/// Errors returned by an agent's `perform` method.
///
/// The runner uses the variant to decide what happens to the task:
/// - `Retryable`: the task is left `not_started` so fallback selection can
///   offer it again (bounded by the retry limit).
/// - `Fatal`: the task is marked `failed` and never offered again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure; the task may be offered again.
    #[error("retryable agent error: {0}")]
    Retryable(String),

    /// Permanent failure; the task is abandoned.
    #[error("fatal agent error: {0}")]
    Fatal(String),
}
