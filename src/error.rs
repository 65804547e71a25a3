//! Router Error Taxonomy
//!
//! Every failure the dispatch core can surface to a caller. Transport plumbing
//! (sockets, frame codec) reports through `anyhow` instead; these variants are the
//! ones the HTTP boundary maps to status codes.

use crate::registry::types::{CorrelationId, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// Malformed registration. Fatal to that connection attempt.
    #[error("invalid function config: {0}")]
    InvalidConfig(String),

    /// A worker tried to serve a second function.
    #[error("worker {worker_id} is already bound to function '{function_name}'")]
    DuplicateFunction {
        worker_id: WorkerId,
        function_name: String,
    },

    /// The payload cannot fit in a single data-channel frame.
    #[error("payload of {len} bytes exceeds the limit of {limit}")]
    PayloadTooLarge { len: usize, limit: usize },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("no workers available for function '{0}'")]
    NoWorkersAvailable(String),

    /// Every active worker is at `max_concurrency`.
    #[error("all workers for function '{0}' are saturated")]
    Saturated(String),

    #[error("call {correlation_id} exceeded its {timeout_ms}ms timeout")]
    Timeout {
        correlation_id: CorrelationId,
        timeout_ms: u32,
    },

    #[error("worker {0} disconnected")]
    WorkerDisconnected(WorkerId),

    /// The worker replied with an error instead of a payload.
    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

impl RouterError {
    /// Stable, machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::InvalidConfig(_) => "invalid_config",
            RouterError::DuplicateFunction { .. } => "duplicate_function",
            RouterError::PayloadTooLarge { .. } => "payload_too_large",
            RouterError::UnknownFunction(_) => "unknown_function",
            RouterError::NoWorkersAvailable(_) => "no_workers_available",
            RouterError::Saturated(_) => "saturated",
            RouterError::Timeout { .. } => "timeout",
            RouterError::WorkerDisconnected(_) => "worker_disconnected",
            RouterError::WorkerFailed(_) => "worker_failed",
        }
    }
}
