//! Error taxonomy for the dispatch engine.
//!
//! Every error reaching the engine's top level is converted into a failed
//! receipt; none propagate past the per-request boundary.

use thiserror::Error;

use crate::types::NodeId;

/// Errors raised by the rule graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("graph manifest error: {0}")]
    Manifest(String),
}

/// Errors raised by the operation actuator. The `index` names the operation
/// at which the list was aborted.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("operation {index}: path escapes sandbox: {path}")]
    PathOutsideSandbox { index: usize, path: String },
    #[error("operation {index}: unsafe path: {reason}")]
    UnsafePath { index: usize, reason: String },
    #[error("operation {index}: blocked command: {reason}")]
    BlockedCommand { index: usize, reason: String },
    #[error("operation {index}: command timed out after {timeout_ms}ms")]
    Timeout { index: usize, timeout_ms: u64 },
    #[error("operation {index}: exec failed: {detail}")]
    ExecFailed { index: usize, detail: String },
    #[error("operation {index}: io error: {source}")]
    Io {
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("sandbox root unavailable: {path}: {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ActuatorError {
    /// Index of the operation the failure points at, when applicable.
    pub fn index(&self) -> Option<usize> {
        match self {
            ActuatorError::PathOutsideSandbox { index, .. }
            | ActuatorError::UnsafePath { index, .. }
            | ActuatorError::BlockedCommand { index, .. }
            | ActuatorError::Timeout { index, .. }
            | ActuatorError::ExecFailed { index, .. }
            | ActuatorError::Io { index, .. } => Some(*index),
            ActuatorError::RootUnavailable { .. } => None,
        }
    }
}

/// Top-level dispatch error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No matching edge and no fallback node configured. Fatal to the
    /// dispatch, recorded, never process-fatal.
    #[error("no matching edge and no fallback node configured for signal '{0}'")]
    Resolution(String),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    /// The external fallback resolver exceeded the task's time budget.
    #[error("fallback resolver exceeded time budget of {0}ms")]
    ResolverTimeout(u64),
    /// Uncaught failure while evaluating node logic, contained at the node
    /// boundary.
    #[error("node evaluation fault: {0}")]
    NodeFault(String),
    #[error("resolver error: {0}")]
    Resolver(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("receipt sink error: {0}")]
    Sink(String),
    #[error("configuration error: {0}")]
    Config(String),
}
