//! End-to-end dispatch scenarios: deterministic hits, edge replacement,
//! resolver timeouts and post-failure uncertainty.

use std::sync::Arc;
use synapse::config::EngineConfig;
use synapse::rule_graph::{Edge, Node, RuleGraph};
use synapse::types::{DispatchOutcome, Policy};
use synapse::{Engine, StubResolver, Task};

fn engine_with_fallback(dir: &std::path::Path) -> Engine {
    let mut config = EngineConfig::default();
    config.sandbox.roots = vec![dir.to_path_buf()];
    let graph = RuleGraph::new();
    graph.upsert_node(Node::new("router", "AI_ROUTER").fallback());
    Engine::new(config, graph, Arc::new(StubResolver::new())).unwrap()
}

#[tokio::test]
async fn deterministic_hello_test_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());
    engine
        .graph()
        .upsert_edge("root", Edge::new("hello.test", "root").with_response("ok"))
        .unwrap();

    let task = Task::new("hello.test").with_input("message", serde_json::json!("hello"));
    let response = engine.dispatch(task).await;

    assert!(response.success);
    assert_eq!(response.outcome, DispatchOutcome::Deterministic);
    assert_eq!(response.response.as_deref(), Some("ok"));
    assert!(!response.bits.e);
    assert!(response.bits.u <= engine.config().calibration.deterministic_u_ceiling);
    assert!(response.bits.t >= engine.config().calibration.deterministic_t_floor);
    assert!(response.operations.is_empty());
    // Exactly one sequence number consumed.
    assert_eq!(response.seq, 1);
    assert_eq!(engine.receipts().len(), 1);
}

#[tokio::test]
async fn upserted_edge_is_used_until_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());
    engine
        .graph()
        .upsert_edge("root", Edge::new("status", "root").with_response("first"))
        .unwrap();

    let before = engine.dispatch(Task::new("status")).await;
    assert_eq!(before.response.as_deref(), Some("first"));

    engine
        .graph()
        .upsert_edge("root", Edge::new("status", "root").with_response("second"))
        .unwrap();

    let after = engine.dispatch(Task::new("status")).await;
    assert_eq!(after.response.as_deref(), Some("second"));
    // Replacement, not accumulation.
    assert_eq!(engine.graph().node("root").unwrap().edges.len(), 1);
}

#[tokio::test]
async fn resolver_timeout_becomes_failed_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    // The stub's hard path sleeps longer than this budget.
    let task = Task::new("hard.slow").with_policy(Policy {
        time_budget_ms: 1,
        ..Policy::default()
    });
    let response = engine.dispatch(task).await;

    assert!(!response.success);
    assert!(response.bits.e);
    assert_eq!(response.outcome, DispatchOutcome::Failed);
    assert!(response.error.unwrap().contains("time budget"));
    // The aborted dispatch still produced its receipt.
    assert_eq!(engine.receipts().len(), 1);
}

#[tokio::test]
async fn recorded_failure_raises_uncertainty_for_next_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    let first = engine.dispatch(Task::new("impossible.fail")).await;
    assert!(first.bits.e);
    let second = engine.dispatch(Task::new("impossible.fail")).await;
    assert!(
        second.bits.u >= first.bits.u,
        "u must not drop after a failure: {} then {}",
        first.bits.u,
        second.bits.u
    );
    assert!(second.bits.u > first.bits.u - f64::EPSILON);
}

#[tokio::test]
async fn failure_keeps_trust_capped() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    let response = engine.dispatch(Task::new("impossible.fail")).await;
    assert!(response.bits.t <= engine.config().calibration.failure_t_ceiling);
}

#[tokio::test]
async fn fallback_write_outside_allow_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    let task = Task::new("file.write")
        .with_input("path", serde_json::json!("/etc/passwd"))
        .with_input("content", serde_json::json!("x"));
    let response = engine.dispatch(task).await;

    assert!(!response.success);
    assert!(response.bits.e);
    assert!(response.error.unwrap().contains("escapes sandbox"));
    assert!(response.operations.is_empty());
    // Nothing was written inside the sandbox either.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn fallback_write_inside_allow_list_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    let task = Task::new("file.write")
        .with_input("path", serde_json::json!("out/result.txt"))
        .with_input("content", serde_json::json!("body"));
    let response = engine.dispatch(task).await;

    assert!(response.success);
    assert_eq!(response.operations.len(), 1);
    let written = std::fs::read_to_string(dir.path().join("out/result.txt")).unwrap();
    assert_eq!(written, "body");
}

#[tokio::test]
async fn every_failed_dispatch_still_gets_a_response() {
    let dir = tempfile::tempdir().unwrap();
    // No fallback node at all: resolution itself fails.
    let mut config = EngineConfig::default();
    config.sandbox.roots = vec![dir.path().to_path_buf()];
    let engine = Engine::new(config, RuleGraph::new(), Arc::new(StubResolver::new())).unwrap();

    let response = engine.dispatch(Task::new("nowhere.to.go")).await;
    assert!(!response.success);
    assert!(response.bits.e);
    assert!(response.error.is_some());
    assert_eq!(engine.receipts().len(), 1);
}
