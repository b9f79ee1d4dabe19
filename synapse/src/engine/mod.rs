//! Dispatch Engine
//!
//! Orchestrates a dispatch end to end: derive the signal, resolve against
//! the rule graph, fall back to the external resolver on a miss, compute
//! confidence bits from the calibration record, run operations through the
//! actuator, append exactly one receipt, and feed the outcome back into the
//! calibration store. Every error reaching this level becomes a failed
//! receipt; nothing crosses the per-request boundary.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::actuator::Actuator;
use crate::calibration::CalibrationStore;
use crate::config::{EngineConfig, ReceiptConfig, SandboxConfig};
use crate::errors::EngineError;
use crate::receipts::{ReceiptDraft, ReceiptLog};
use crate::resolver::FallbackResolver;
use crate::rule_graph::{derive_node_id, Edge, Node, RuleGraph};
use crate::types::{
    ConfidenceBits, DispatchOutcome, DispatchResponse, NodeId, Operation, OperationRecord, Receipt,
    Task,
};

/// Result of the node-evaluation stage, before actuation and receipt
/// writing.
#[derive(Debug)]
struct Evaluation {
    outcome: DispatchOutcome,
    node_path: Vec<NodeId>,
    response: Option<String>,
    operations: Vec<Operation>,
    difficulty: f64,
    label: Option<String>,
}

/// The dispatch engine. Owns the rule graph, calibration store and receipt
/// log for the lifetime of the process; callers interact only through
/// `dispatch` and the read-only accessors.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    graph: Arc<RuleGraph>,
    calibration: Arc<CalibrationStore>,
    receipts: Arc<ReceiptLog>,
    actuator: Arc<Actuator>,
    resolver: Arc<dyn FallbackResolver>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        graph: RuleGraph,
        resolver: Arc<dyn FallbackResolver>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let actuator = Actuator::new(&config.sandbox)?;
        let receipts = ReceiptLog::new(&config.receipts)?;
        let calibration = CalibrationStore::new(config.calibration.clone());
        graph.ensure_node(&config.engine.root_node, "ROOT");

        Ok(Self {
            config: Arc::new(config),
            graph: Arc::new(graph),
            calibration: Arc::new(calibration),
            receipts: Arc::new(receipts),
            actuator: Arc::new(actuator),
            resolver,
        })
    }

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }

    pub fn receipts(&self) -> &ReceiptLog {
        &self.receipts
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch one task. Always returns a response and writes exactly one
    /// receipt, whether the path was deterministic, fallback, or failed
    /// outright.
    pub async fn dispatch(&self, task: Task) -> DispatchResponse {
        let signal = task.signal();
        let signature = task.signature();
        let gate = task.policy.gate;

        // Node-evaluation boundary: resolution and the resolver call run in
        // their own task so a panic in per-node logic is contained and
        // converted into a failed receipt instead of tearing the engine down.
        let eval_engine = self.clone();
        let eval_task = task.clone();
        let eval_signal = signal.clone();
        let evaluation = match tokio::spawn(async move {
            eval_engine.evaluate(&eval_task, &eval_signal).await
        })
        .await
        {
            Ok(result) => result,
            Err(join_error) => Err(EngineError::NodeFault(panic_message(join_error))),
        };

        // The actuate-and-record stage runs detached: once an operation list
        // has started, dropping the dispatch future must not cancel it
        // mid-list, and its receipt must still land.
        let finish_engine = self.clone();
        let finish_goal = task.goal.clone();
        let finish_signal = signal.clone();
        let finish_signature = signature.clone();
        let finished = tokio::spawn(async move {
            finish_engine
                .finish(finish_goal, finish_signal, finish_signature, gate, evaluation)
                .await
        })
        .await;

        let receipt = match finished {
            Ok(receipt) => receipt,
            Err(join_error) => {
                // Engine-internal fault after evaluation; still answer and
                // still leave an audit record.
                let bits = self.bits_for(&signature, DispatchOutcome::Failed, 0.5, false);
                let receipt = self.receipts.append(ReceiptDraft {
                    signature: signature.clone(),
                    goal: task.goal.clone(),
                    node_path: vec![self.config.engine.root_node.clone()],
                    response: None,
                    operations: Vec::new(),
                    bits,
                    outcome: DispatchOutcome::Failed,
                    success: false,
                    error: Some(panic_message(join_error)),
                });
                self.calibration
                    .record(&signature, receipt.success, receipt.bits.t);
                receipt
            }
        };

        DispatchResponse::from_receipt(&receipt)
    }

    /// Actuate, compute bits, append the receipt and update calibration.
    /// Exactly one receipt per dispatch, on every path.
    async fn finish(
        &self,
        goal: String,
        signal: String,
        signature: String,
        gate: f64,
        evaluation: Result<Evaluation, EngineError>,
    ) -> Receipt {
        let (draft, learned) = match evaluation {
            Ok(eval) => {
                let (applied, actuator_error) = match self.actuator.apply(&eval.operations).await {
                    Ok(records) => (records, None),
                    Err(failure) => (failure.applied, Some(failure.error)),
                };
                let success = actuator_error.is_none();
                let bits = self.bits_for(&signature, eval.outcome, eval.difficulty, success);
                let learned = success
                    && self.config.engine.learning
                    && eval.outcome == DispatchOutcome::Fallback
                    && bits.t >= gate;
                if learned {
                    self.learn(&signal, &eval);
                }
                (
                    ReceiptDraft {
                        signature: signature.clone(),
                        goal,
                        node_path: eval.node_path,
                        response: eval.response,
                        operations: applied,
                        bits,
                        outcome: eval.outcome,
                        success,
                        error: actuator_error.map(|e| e.to_string()),
                    },
                    learned,
                )
            }
            Err(error) => {
                let bits = self.bits_for(&signature, DispatchOutcome::Failed, 0.5, false);
                (
                    ReceiptDraft {
                        signature: signature.clone(),
                        goal,
                        node_path: vec![self.config.engine.root_node.clone()],
                        response: None,
                        operations: Vec::<OperationRecord>::new(),
                        bits,
                        outcome: DispatchOutcome::Failed,
                        success: false,
                        error: Some(error.to_string()),
                    },
                    false,
                )
            }
        };

        let receipt = self.receipts.append(draft);
        self.calibration
            .record(&signature, receipt.success, receipt.bits.t);

        info!(
            seq = receipt.seq,
            goal = %receipt.goal,
            outcome = ?receipt.outcome,
            success = receipt.success,
            u = receipt.bits.u,
            t = receipt.bits.t,
            learned,
            "dispatch complete"
        );
        receipt
    }

    /// Resolve the task to a unit of work: a deterministic edge when one
    /// matches, the external resolver otherwise. No graph or calibration
    /// lock is held across the resolver call; it operates on a snapshot.
    async fn evaluate(&self, task: &Task, signal: &str) -> Result<Evaluation, EngineError> {
        let root = self.config.engine.root_node.clone();

        if let Some(edge) = self.graph.resolve(&root, signal) {
            return Ok(Evaluation {
                outcome: DispatchOutcome::Deterministic,
                node_path: vec![root, edge.target.clone()],
                response: edge.response,
                operations: edge.operations,
                difficulty: 0.0,
                label: None,
            });
        }

        let fallback = self
            .graph
            .fallback_node()
            .ok_or_else(|| EngineError::Resolution(signal.to_string()))?;
        let snapshot = self.graph.snapshot();

        let budget = Duration::from_millis(task.policy.time_budget_ms);
        let outcome = match timeout(budget, self.resolver.resolve_fallback(task, &snapshot)).await {
            Ok(result) => result?,
            Err(_) => return Err(EngineError::ResolverTimeout(task.policy.time_budget_ms)),
        };

        Ok(Evaluation {
            outcome: DispatchOutcome::Fallback,
            node_path: vec![root, fallback],
            response: outcome.response,
            operations: outcome.operations,
            difficulty: outcome.difficulty.clamp(0.0, 1.0),
            label: outcome.label,
        })
    }

    /// Compute the confidence bits for this dispatch from the calibration
    /// record, the path taken, and whether execution succeeded.
    fn bits_for(
        &self,
        signature: &str,
        outcome: DispatchOutcome,
        difficulty: f64,
        success: bool,
    ) -> ConfidenceBits {
        let cal = &self.config.calibration;
        if success {
            match outcome {
                DispatchOutcome::Deterministic => {
                    let u = self.calibration.deterministic_uncertainty(signature);
                    let t = self
                        .calibration
                        .blended_trust(signature, 0.9)
                        .max(cal.deterministic_t_floor);
                    ConfidenceBits::new(u, t, false)
                }
                _ => {
                    let u = self.calibration.uncertainty(signature, difficulty);
                    let t = self.calibration.blended_trust(signature, 0.9);
                    ConfidenceBits::new(u, t, false)
                }
            }
        } else {
            let base = match outcome {
                DispatchOutcome::Deterministic => {
                    self.calibration.deterministic_uncertainty(signature)
                }
                _ => self.calibration.uncertainty(signature, difficulty),
            };
            let u = base + cal.error_u_bump;
            let t = self
                .calibration
                .blended_trust(signature, 0.3)
                .min(cal.failure_t_ceiling);
            ConfidenceBits::new(u, t, true)
        }
    }

    /// Install a successful fallback outcome as a deterministic edge so
    /// subsequent dispatches with the same signal skip the resolver. This is
    /// the runtime graph-growth mechanism; the upsert is visible to every
    /// resolution that starts after it completes.
    fn learn(&self, signal: &str, eval: &Evaluation) {
        let label = eval
            .label
            .clone()
            .unwrap_or_else(|| format!("mem {}", signal));
        let node_id = derive_node_id(&format!("{}:{}", signal, label));
        self.graph.upsert_node(Node::new(node_id.as_str(), label.as_str()));

        let mut edge = Edge::new(signal, node_id.as_str());
        edge.response = eval.response.clone();
        edge.operations = eval.operations.clone();
        match self
            .graph
            .upsert_edge(&self.config.engine.root_node, edge)
        {
            Ok(_) => info!(signal, node = %node_id, "learned deterministic edge"),
            Err(e) => warn!(signal, error = %e, "failed to learn edge"),
        }
    }

    /// Build an isolated engine for validation runs: same graph contents by
    /// snapshot, fresh calibration namespace and receipt log, actuator
    /// rooted in the given directory, learning disabled so suites leave no
    /// `upsert_*` side effects behind.
    pub fn validation_harness(
        &self,
        sandbox_root: std::path::PathBuf,
    ) -> Result<Engine, EngineError> {
        let mut config = (*self.config).clone();
        config.engine.learning = false;
        config.sandbox = SandboxConfig {
            roots: vec![sandbox_root],
            strict: false,
            exec_timeout_ms: config.sandbox.exec_timeout_ms,
        };
        config.receipts = ReceiptConfig::default();
        let graph = RuleGraph::from_snapshot(self.graph.snapshot());
        Engine::new(config, graph, self.resolver.clone())
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if join_error.is_panic() {
        let payload = join_error.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "node logic panicked".to_string()
        }
    } else {
        join_error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StubResolver;
    use tempfile::tempdir;

    fn engine_with_sandbox(dir: &std::path::Path) -> Engine {
        let mut config = EngineConfig::default();
        config.sandbox.roots = vec![dir.to_path_buf()];
        Engine::new(config, RuleGraph::new(), Arc::new(StubResolver::new())).unwrap()
    }

    #[tokio::test]
    async fn resolution_error_without_fallback_node() {
        let dir = tempdir().unwrap();
        let engine = engine_with_sandbox(dir.path());
        let response = engine.dispatch(Task::new("easy.echo")).await;
        assert!(!response.success);
        assert!(response.bits.e);
        assert_eq!(response.outcome, DispatchOutcome::Failed);
        assert!(response.error.unwrap().contains("no matching edge"));
        // The failure still produced a receipt.
        assert_eq!(engine.receipts().len(), 1);
    }

    #[tokio::test]
    async fn deterministic_hit_uses_edge_response() {
        let dir = tempdir().unwrap();
        let engine = engine_with_sandbox(dir.path());
        engine
            .graph()
            .upsert_edge("root", Edge::new("hello.test", "root").with_response("ok"))
            .unwrap();
        let response = engine.dispatch(Task::new("hello.test")).await;
        assert!(response.success);
        assert_eq!(response.outcome, DispatchOutcome::Deterministic);
        assert_eq!(response.response.as_deref(), Some("ok"));
        assert!(!response.bits.e);
    }

    #[tokio::test]
    async fn engine_survives_panicking_resolver() {
        struct PanickingResolver;

        #[async_trait::async_trait]
        impl FallbackResolver for PanickingResolver {
            async fn resolve_fallback(
                &self,
                _task: &Task,
                _graph: &crate::rule_graph::GraphSnapshot,
            ) -> Result<crate::resolver::ResolverOutcome, EngineError> {
                panic!("node fractured");
            }
        }

        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.sandbox.roots = vec![dir.path().to_path_buf()];
        let graph = RuleGraph::new();
        graph.upsert_node(Node::new("router", "AI_ROUTER").fallback());
        let engine = Engine::new(config, graph, Arc::new(PanickingResolver)).unwrap();

        let response = engine.dispatch(Task::new("anything")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("node fractured"));

        // Engine keeps serving after the fault.
        let second = engine.dispatch(Task::new("again")).await;
        assert_eq!(second.seq, 2);
    }
}
