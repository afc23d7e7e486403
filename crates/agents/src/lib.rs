//! `agents` crate: the `TaskAgent` contract and a scripted mock agent.
//!
//! The engine never performs a task itself. Whoever drives a run hands each
//! yielded task to a [`TaskAgent`] and writes the [`AgentOutput`] back into
//! the task registry.

pub mod error;
pub mod traits;
pub mod mock;

pub use error::AgentError;
pub use traits::{AgentOutput, TaskAgent, TaskInput};
