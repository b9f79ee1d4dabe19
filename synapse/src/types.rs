//! Core data model shared across the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable key addressing a node in the rule graph.
pub type NodeId = String;

/// Opaque token extracted from (or embedded in) a task, used as the
/// edge-lookup key during resolution.
pub type Signal = String;

/// A bounded side-effecting operation emitted by an edge or a resolver.
///
/// Serialized with an `op` tag so manifests and resolver payloads can spell
/// operations as `{op: write, path: ..., content: ...}` /
/// `{op: exec, cmd: ..., args: [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Write {
        path: String,
        content: String,
    },
    Exec {
        #[serde(rename = "cmd")]
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Write { .. } => "write",
            Operation::Exec { .. } => "exec",
        }
    }
}

/// Numeric thresholds supplied by the caller with every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Confidence gate: fallback results at or above this trust are eligible
    /// to be learned as deterministic edges.
    pub gate: f64,
    /// Wall-clock budget for the fallback resolver call.
    pub time_budget_ms: u64,
    /// Maximum acceptable risk, recorded with the dispatch.
    pub max_risk: f64,
    /// Size budget, recorded with the dispatch.
    pub size_budget: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            gate: 0.5,
            time_budget_ms: 300_000,
            max_risk: 0.2,
            size_budget: 120,
        }
    }
}

/// An incoming unit of work: a goal identifier, an opaque input mapping and
/// the caller's policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub goal: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub policy: Policy,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            inputs: serde_json::Map::new(),
            policy: Policy::default(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// The signal used for edge lookup: an explicit `signal` input when
    /// present, otherwise the goal identifier. Lowercased so manifests and
    /// callers agree on the key.
    pub fn signal(&self) -> Signal {
        self.inputs
            .get("signal")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.goal)
            .to_lowercase()
    }

    /// Coarse classification bucket used by the calibration store: the goal
    /// text up to the first `.` separator (`"easy.echo1"` -> `"easy"`).
    pub fn signature(&self) -> String {
        self.goal
            .split('.')
            .next()
            .unwrap_or(&self.goal)
            .to_lowercase()
    }
}

/// Confidence bits produced once per dispatch and never mutated after being
/// attached to a receipt.
///
/// `u` is uncertainty, `t` is trust, `e` flags an error during the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBits {
    pub u: f64,
    pub t: f64,
    pub e: bool,
}

impl ConfidenceBits {
    pub fn new(u: f64, t: f64, e: bool) -> Self {
        Self {
            u: u.clamp(0.0, 1.0),
            t: t.clamp(0.0, 1.0),
            e,
        }
    }
}

/// Which path a dispatch took through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Satisfied entirely by a rule-graph edge.
    Deterministic,
    /// Routed to the external fallback resolver.
    Fallback,
    /// Neither path produced a usable result.
    Failed,
}

/// Per-operation report emitted by the actuator, kept on the receipt so the
/// audit trail stays accurate under partial failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub index: usize,
    pub kind: String,
    pub detail: String,
}

/// Immutable audit record of one dispatch outcome.
///
/// `seq` is assigned atomically by the receipt log: strictly increasing and
/// gap-free within a single engine lifetime. `chain_hash` links each receipt
/// to its predecessor for integrity verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub seq: u64,
    pub receipt_id: String,
    pub signature: String,
    pub goal: String,
    pub node_path: Vec<NodeId>,
    pub response: Option<String>,
    pub operations: Vec<OperationRecord>,
    pub bits: ConfidenceBits,
    pub outcome: DispatchOutcome,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp_ms: u64,
    pub chain_hash: String,
}

/// What the caller gets back from `Engine::dispatch`. Every dispatch receives
/// a response, failures included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub seq: u64,
    pub outcome: DispatchOutcome,
    pub node_path: Vec<NodeId>,
    pub response: Option<String>,
    pub operations: Vec<OperationRecord>,
    pub bits: ConfidenceBits,
    pub success: bool,
    pub error: Option<String>,
}

impl DispatchResponse {
    pub fn from_receipt(receipt: &Receipt) -> Self {
        Self {
            seq: receipt.seq,
            outcome: receipt.outcome,
            node_path: receipt.node_path.clone(),
            response: receipt.response.clone(),
            operations: receipt.operations.clone(),
            bits: receipt.bits,
            success: receipt.success,
            error: receipt.error.clone(),
        }
    }
}

/// Running calibration statistics for one task signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub attempts: u64,
    pub failures: u64,
    /// Decay-weighted moving average of recorded trust values.
    pub trust_ewma: f64,
    pub avg_t_success: f64,
    pub avg_t_failure: f64,
    /// Whether the most recent dispatch for this signature errored.
    pub last_error: bool,
}

impl CalibrationEntry {
    pub fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.failures as f64 / self.attempts as f64
        }
    }
}

/// Convenience alias for string-keyed JSON maps used in resolver payloads.
pub type InputMap = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_prefers_explicit_input() {
        let task = Task::new("build.infra")
            .with_input("signal", serde_json::json!("Status Check"));
        assert_eq!(task.signal(), "status check");
    }

    #[test]
    fn signal_falls_back_to_goal() {
        let task = Task::new("Hello.Test");
        assert_eq!(task.signal(), "hello.test");
    }

    #[test]
    fn signature_is_goal_prefix() {
        assert_eq!(Task::new("easy.echo1").signature(), "easy");
        assert_eq!(Task::new("standalone").signature(), "standalone");
    }

    #[test]
    fn operation_serde_uses_op_tag() {
        let op: Operation =
            serde_json::from_str(r#"{"op":"exec","cmd":"echo","args":["hi"]}"#).unwrap();
        assert_eq!(
            op,
            Operation::Exec {
                command: "echo".to_string(),
                args: vec!["hi".to_string()],
            }
        );
        let write = Operation::Write {
            path: "notes/a.txt".to_string(),
            content: "x".to_string(),
        };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["op"], "write");
    }

    #[test]
    fn confidence_bits_are_clamped() {
        let bits = ConfidenceBits::new(1.7, -0.2, true);
        assert_eq!(bits.u, 1.0);
        assert_eq!(bits.t, 0.0);
        assert!(bits.e);
    }
}
