//! External fallback resolver contract.
//!
//! The engine consumes this capability as a black box: given a task and a
//! snapshot of the rule graph, the resolver proposes a response, optional
//! operations and a self-reported difficulty estimate. The estimate is
//! advisory; the calibration store's historical record is authoritative.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ResolverConfig, ResolverKind};
use crate::errors::EngineError;
use crate::rule_graph::GraphSnapshot;
use crate::types::{Operation, Task};

pub mod http;
pub mod stub;

pub use http::HttpResolver;
pub use stub::StubResolver;

/// What a fallback resolver proposes for a task it was handed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverOutcome {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Self-reported difficulty estimate in [0, 1].
    #[serde(default = "default_difficulty")]
    pub difficulty: f64,
    /// Optional label for the unit of work, used when the engine learns the
    /// outcome as a graph node.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_difficulty() -> f64 {
    0.3
}

/// Contract consumed by the dispatch engine. Implementations may block or
/// take substantial wall-clock time; the engine enforces the task's time
/// budget around every call.
#[async_trait]
pub trait FallbackResolver: Send + Sync {
    async fn resolve_fallback(
        &self,
        task: &Task,
        graph: &GraphSnapshot,
    ) -> Result<ResolverOutcome, EngineError>;

    fn name(&self) -> &str {
        "resolver"
    }
}

/// Build the configured resolver implementation.
pub fn build_resolver(
    config: &ResolverConfig,
) -> Result<Arc<dyn FallbackResolver>, EngineError> {
    match config.kind {
        ResolverKind::Stub => Ok(Arc::new(StubResolver::new())),
        ResolverKind::Http => Ok(Arc::new(HttpResolver::new(config)?)),
    }
}
