//! Receipt ordering guarantees under concurrent dispatch.

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use synapse::config::EngineConfig;
use synapse::rule_graph::{Node, RuleGraph};
use synapse::{Engine, StubResolver, Task};

fn engine(dir: &std::path::Path) -> Engine {
    let mut config = EngineConfig::default();
    config.sandbox.roots = vec![dir.to_path_buf()];
    let graph = RuleGraph::new();
    graph.upsert_node(Node::new("router", "AI_ROUTER").fallback());
    Engine::new(config, graph, Arc::new(StubResolver::new())).unwrap()
}

#[tokio::test]
async fn concurrent_dispatches_get_unique_gap_free_sequence_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let task = Task::new(format!("easy.concurrent{i}"))
                    .with_input("message", serde_json::json!(format!("m{i}")));
                engine.dispatch(task).await.seq
            })
        })
        .collect();

    let mut seqs: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=32).collect::<Vec<u64>>());
    assert_eq!(engine.receipts().len(), 32);
    assert!(engine.receipts().verify_integrity());
}

#[tokio::test]
async fn mixed_failures_leave_no_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let goal = if i % 2 == 0 {
                    format!("easy.mix{i}")
                } else {
                    format!("impossible.mix{i}")
                };
                engine.dispatch(Task::new(goal)).await.seq
            })
        })
        .collect();

    let mut seqs: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=16).collect::<Vec<u64>>());
    assert!(engine.receipts().verify_integrity());
}

#[tokio::test]
async fn tail_and_read_from_respect_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    for i in 0..6 {
        engine.dispatch(Task::new(format!("easy.seq{i}"))).await;
    }

    let tail = engine.receipts().tail(3);
    assert_eq!(tail.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![4, 5, 6]);

    let from = engine.receipts().read_from(5);
    assert_eq!(from.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![5, 6]);
}

#[tokio::test]
async fn jsonl_sink_records_every_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let sink = dir.path().join("trace/receipts.jsonl");
    let mut config = EngineConfig::default();
    config.sandbox.roots = vec![dir.path().join("sandbox")];
    config.receipts.path = Some(sink.clone());

    let graph = RuleGraph::new();
    graph.upsert_node(Node::new("router", "AI_ROUTER").fallback());
    let engine = Engine::new(config, graph, Arc::new(StubResolver::new())).unwrap();

    engine.dispatch(Task::new("easy.sink1")).await;
    engine.dispatch(Task::new("impossible.sink2")).await;

    let raw = std::fs::read_to_string(&sink).unwrap();
    let receipts: Vec<synapse::Receipt> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(receipts.len(), 2);
    assert!(receipts[0].success);
    assert!(!receipts[1].success);
    assert!(synapse::receipts::verify_chain(&receipts));
}
