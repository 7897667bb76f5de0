//! Failure taxonomy for the adaptation loop
//!
//! Failures are scoped: an action-level failure never aborts its
//! siblings, a cycle-level failure never aborts the process.

use thiserror::Error;

/// Errors that terminate or degrade a single adaptation cycle
#[derive(Debug, Error)]
pub enum CycleError {
    /// No telemetry could be collected; the cycle aborts before any
    /// decision is made.
    #[error("telemetry collection failed: {0}")]
    Collection(String),

    /// A control-plane call failed or timed out.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Optimistic write contention persisted through every retry.
    #[error("conflicting update on {service} after {attempts} attempts")]
    Conflict { service: String, attempts: u32 },

    /// Knowledge persistence failed; in-memory state is retained and the
    /// next periodic save retries.
    #[error("knowledge persistence failed: {0}")]
    Learning(String),

    /// A decision referenced an action the executor does not support.
    #[error("unknown action kind: {0}")]
    UnknownAction(String),
}

impl CycleError {
    /// Short classification tag used in logs and audit rows
    pub fn class(&self) -> &'static str {
        match self {
            CycleError::Collection(_) => "collection",
            CycleError::Execution(_) => "execution",
            CycleError::Conflict { .. } => "conflict",
            CycleError::Learning(_) => "learning",
            CycleError::UnknownAction(_) => "unknown_action",
        }
    }
}
