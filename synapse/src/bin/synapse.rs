//! Synapse CLI - dispatch tasks, run validation suites, inspect receipts.
//!
//! ```bash
//! # Dispatch a goal against a seeded graph
//! synapse --graph manifests/graph.yaml dispatch --goal hello.test
//!
//! # Dispatch with inputs and an explicit signal
//! synapse dispatch --goal file.write --input path=notes/a.txt --input content=hi
//!
//! # Run a validation suite
//! synapse validate easy
//!
//! # Tail the receipt log after a batch of dispatches
//! synapse --receipts trace/receipts.jsonl dispatch --goal easy.echo1
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use synapse::config::EngineConfig;
use synapse::resolver::build_resolver;
use synapse::rule_graph::RuleGraph;
use synapse::types::{Policy, Task};
use synapse::validation::{Suite, ValidationRunner};
use synapse::Engine;

#[derive(Parser)]
#[command(name = "synapse")]
#[command(version)]
#[command(about = "Signal-driven dispatch engine with metacognitive calibration", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to a YAML graph seed manifest
    #[arg(short, long, global = true, value_name = "FILE")]
    graph: Option<PathBuf>,

    /// Append receipts to this JSONL file (overrides config)
    #[arg(long, global = true, value_name = "FILE", env = "SYNAPSE_RECEIPTS")]
    receipts: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a single task and print the response
    Dispatch {
        /// Goal identifier (e.g. "hello.test")
        #[arg(long)]
        goal: String,

        /// Explicit signal; defaults to the goal
        #[arg(long)]
        signal: Option<String>,

        /// Input entries as key=value pairs
        #[arg(long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Confidence gate for learning fallback outcomes
        #[arg(long, default_value_t = 0.5)]
        gate: f64,

        /// Resolver time budget in milliseconds
        #[arg(long, default_value_t = 300_000)]
        time_budget_ms: u64,
    },

    /// Run a validation suite and print the report
    Validate {
        /// Suite name: easy, hard, impossible or adaptive
        suite: String,
    },

    /// Inspect the receipt log
    Receipts {
        /// Show only the most recent N receipts
        #[arg(long, default_value_t = 20)]
        tail: usize,

        /// Re-derive and check the hash chain
        #[arg(long)]
        verify: bool,
    },

    /// Show the current rule graph
    Graph,
}

fn parse_input(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("input '{}' is not KEY=VALUE", raw))?;
    // Values that parse as JSON are kept structured; everything else is a string.
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn build_engine(cli: &Cli) -> Result<Engine> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(path) = &cli.receipts {
        config.receipts.path = Some(path.clone());
    }

    let graph = match &cli.graph {
        Some(path) => RuleGraph::load_manifest(path)
            .with_context(|| format!("loading graph manifest {}", path.display()))?,
        None => RuleGraph::new(),
    };

    let resolver = build_resolver(&config.resolver)?;
    Ok(Engine::new(config, graph, resolver)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli)?;

    match &cli.command {
        Commands::Dispatch {
            goal,
            signal,
            inputs,
            gate,
            time_budget_ms,
        } => {
            let mut task = Task::new(goal.clone()).with_policy(Policy {
                gate: *gate,
                time_budget_ms: *time_budget_ms,
                ..Policy::default()
            });
            if let Some(signal) = signal {
                task = task.with_input("signal", serde_json::json!(signal));
            }
            for raw in inputs {
                let (key, value) = parse_input(raw)?;
                task = task.with_input(key, value);
            }
            let response = engine.dispatch(task).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Validate { suite } => {
            let suite: Suite = suite.parse()?;
            let runner = ValidationRunner::new(&engine)?;
            let report = runner.run(suite).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("{}", report.summary);
        }

        Commands::Receipts { tail, verify } => {
            // A fresh process has an empty in-memory log; the JSONL sink is
            // the stream that survives across runs.
            let receipts = match &engine.config().receipts.path {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("reading receipts {}", path.display()))?;
                    raw.lines()
                        .filter_map(|line| serde_json::from_str(line).ok())
                        .collect::<Vec<synapse::Receipt>>()
                }
                None => engine.receipts().read_from(0),
            };
            if *verify {
                let ok = synapse::receipts::verify_chain(&receipts);
                eprintln!("chain integrity: {}", if ok { "ok" } else { "BROKEN" });
            }
            let start = receipts.len().saturating_sub(*tail);
            println!("{}", serde_json::to_string_pretty(&receipts[start..])?);
        }

        Commands::Graph => {
            let snapshot = engine.graph().snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
