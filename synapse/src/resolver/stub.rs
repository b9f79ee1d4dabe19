//! Deterministic offline resolver for tests, demos and validation suites.
//!
//! Difficulty self-reports follow the goal prefix: `easy` 0.1, `hard` 0.7,
//! `impossible` 0.9, anything else 0.3. Behavior mirrors the difficulty:
//! easy and hard goals echo their `message` input (hard after a short
//! simulated delay), impossible goals always fail.

use async_trait::async_trait;
use std::time::Duration;

use super::{FallbackResolver, ResolverOutcome};
use crate::errors::EngineError;
use crate::rule_graph::GraphSnapshot;
use crate::types::{Operation, Task};

const HARD_DELAY_MS: u64 = 25;

#[derive(Debug, Default)]
pub struct StubResolver;

impl StubResolver {
    pub fn new() -> Self {
        Self
    }

    fn difficulty_for(goal: &str) -> f64 {
        if goal.contains("easy") {
            0.1
        } else if goal.contains("hard") {
            0.7
        } else if goal.contains("impossible") {
            0.9
        } else {
            0.3
        }
    }
}

#[async_trait]
impl FallbackResolver for StubResolver {
    async fn resolve_fallback(
        &self,
        task: &Task,
        _graph: &GraphSnapshot,
    ) -> Result<ResolverOutcome, EngineError> {
        let goal = task.goal.to_lowercase();
        let difficulty = Self::difficulty_for(&goal);

        if goal.contains("impossible") {
            return Err(EngineError::Resolver(format!(
                "cannot satisfy goal '{}'",
                task.goal
            )));
        }

        if goal.contains("hard") {
            tokio::time::sleep(Duration::from_millis(HARD_DELAY_MS)).await;
        }

        let message = task
            .inputs
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("hello from synapse")
            .to_string();

        // file.write goals carry their side effect as an operation so the
        // actuator, not the resolver, performs the mutation.
        let operations = if goal.contains("file.write") {
            let path = task
                .inputs
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| EngineError::Resolver("path input required".to_string()))?;
            let content = task
                .inputs
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| EngineError::Resolver("content input required".to_string()))?;
            vec![Operation::Write {
                path: path.to_string(),
                content: content.to_string(),
            }]
        } else {
            Vec::new()
        };

        Ok(ResolverOutcome {
            response: Some(message),
            operations,
            difficulty,
            label: Some(format!("mem {}", task.signal())),
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}
