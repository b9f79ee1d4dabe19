//! Synapse - signal-driven dispatch engine with metacognitive calibration.
//!
//! A task comes in with a goal, an input mapping and policy thresholds. The
//! engine derives a signal, resolves it against a concurrent rule graph
//! (deterministic edge hit) or delegates to an external fallback resolver
//! (miss), executes any side-effecting operations through a sandboxed
//! actuator, appends an immutable receipt, and updates per-signature
//! calibration statistics so that reported uncertainty and trust track real
//! outcomes over time.

pub mod actuator;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod errors;
pub mod receipts;
pub mod resolver;
pub mod rule_graph;
pub mod types;
pub mod validation;

pub use crate::config::EngineConfig;
pub use crate::engine::Engine;
pub use crate::errors::{ActuatorError, EngineError, GraphError};
pub use crate::resolver::{build_resolver, FallbackResolver, ResolverOutcome, StubResolver};
pub use crate::rule_graph::{Edge, GraphSnapshot, Node, RuleGraph};
pub use crate::types::{
    ConfidenceBits, DispatchOutcome, DispatchResponse, Operation, Policy, Receipt, Task,
};
pub use crate::validation::{Suite, SuiteReport, ValidationRunner};
