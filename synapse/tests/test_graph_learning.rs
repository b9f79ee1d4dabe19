//! Runtime graph growth: successful fallback outcomes above the policy gate
//! become deterministic edges visible to subsequent resolutions.

use std::sync::Arc;
use synapse::config::EngineConfig;
use synapse::rule_graph::{Node, RuleGraph};
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
async fn confident_fallback_outcome_is_learned_as_edge() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    let task = Task::new("easy.learn").with_input("message", serde_json::json!("hi"));
    let first = engine.dispatch(task.clone()).await;
    assert_eq!(first.outcome, DispatchOutcome::Fallback);

    // The upsert is visible to resolutions that start after it completed.
    let edge = engine.graph().resolve("root", "easy.learn");
    assert!(edge.is_some(), "fallback outcome should have been learned");

    let second = engine.dispatch(task).await;
    assert_eq!(second.outcome, DispatchOutcome::Deterministic);
    assert_eq!(second.response.as_deref(), Some("hi"));
}

#[tokio::test]
async fn outcome_below_gate_is_not_learned() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    // Gate above anything the trust computation can produce.
    let task = Task::new("easy.skeptic")
        .with_input("message", serde_json::json!("hi"))
        .with_policy(Policy {
            gate: 0.95,
            ..Policy::default()
        });
    let first = engine.dispatch(task.clone()).await;
    assert_eq!(first.outcome, DispatchOutcome::Fallback);
    assert!(engine.graph().resolve("root", "easy.skeptic").is_none());

    let second = engine.dispatch(task).await;
    assert_eq!(second.outcome, DispatchOutcome::Fallback);
}

#[tokio::test]
async fn failed_fallback_is_never_learned() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());

    engine.dispatch(Task::new("impossible.learn")).await;
    assert!(engine.graph().resolve("root", "impossible.learn").is_none());
}

#[tokio::test]
async fn learned_node_key_is_stable_across_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_fallback(dir.path());
    let nodes_before = engine.graph().node_count();

    // Learning twice for the same signal must not grow the arena twice.
    engine.dispatch(Task::new("easy.repeat")).await;
    let nodes_after_first = engine.graph().node_count();
    engine.dispatch(Task::new("easy.repeat")).await;
    assert_eq!(engine.graph().node_count(), nodes_after_first);
    assert_eq!(nodes_after_first, nodes_before + 1);
}
