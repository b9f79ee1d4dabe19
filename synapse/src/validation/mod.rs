//! Validation Runner
//!
//! Drives canned task suites through the dispatch engine and scores how well
//! the reported confidence bits track reality. Suites run against an
//! isolated harness: a snapshot of the rule graph, a fresh calibration
//! namespace and a throwaway sandbox directory, so real traffic sees no
//! side effects from validation.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tempfile::TempDir;
use tracing::info;

use crate::engine::Engine;
use crate::errors::EngineError;
use crate::types::{ConfidenceBits, Policy, Task};

/// Named validation suites with known expected-difficulty labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    Easy,
    Hard,
    Impossible,
    Adaptive,
}

impl Suite {
    pub fn name(&self) -> &'static str {
        match self {
            Suite::Easy => "easy",
            Suite::Hard => "hard",
            Suite::Impossible => "impossible",
            Suite::Adaptive => "adaptive",
        }
    }
}

impl FromStr for Suite {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Suite::Easy),
            "hard" => Ok(Suite::Hard),
            "impossible" => Ok(Suite::Impossible),
            "adaptive" => Ok(Suite::Adaptive),
            other => Err(EngineError::Config(format!("unknown suite: {}", other))),
        }
    }
}

/// Score and bits for one suite task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub goal: String,
    pub expected_difficulty: f64,
    pub bits: ConfidenceBits,
    pub score: f64,
}

/// Aggregate result of one suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub score: f64,
    pub mean_u: f64,
    pub mean_t: f64,
    pub error_count: usize,
    pub results: Vec<TaskResult>,
    pub summary: String,
}

/// Runs suites against an isolated harness built from a live engine.
pub struct ValidationRunner {
    harness: Engine,
    // Keeps the sandbox directory alive for the runner's lifetime.
    _sandbox: TempDir,
}

impl ValidationRunner {
    pub fn new(engine: &Engine) -> Result<Self, EngineError> {
        let sandbox = TempDir::new()
            .map_err(|e| EngineError::Config(format!("validation sandbox: {}", e)))?;
        let harness = engine.validation_harness(sandbox.path().to_path_buf())?;
        Ok(Self {
            harness,
            _sandbox: sandbox,
        })
    }

    /// Run one suite sequentially (calibration state accumulates within the
    /// run, which is what the adaptive suite measures).
    pub async fn run(&self, suite: Suite) -> SuiteReport {
        let policy = Policy {
            gate: 0.5,
            time_budget_ms: 5_000,
            max_risk: 0.5,
            size_budget: 120,
        };

        let mut results = Vec::new();
        for (goal, expected_difficulty, message) in suite_tasks(suite) {
            let mut task = Task::new(goal).with_policy(policy.clone());
            if let Some(message) = message {
                task = task.with_input("message", serde_json::json!(message));
            }
            let response = self.harness.dispatch(task).await;
            let score = metacognitive_score(&response.bits, expected_difficulty);
            results.push(TaskResult {
                goal: goal.to_string(),
                expected_difficulty,
                bits: response.bits,
                score,
            });
        }

        let score = mean(results.iter().map(|r| r.score));
        let mean_u = mean(results.iter().map(|r| r.bits.u));
        let mean_t = mean(results.iter().map(|r| r.bits.t));
        let error_count = results.iter().filter(|r| r.bits.e).count();
        let summary = summarize(&results, score);
        info!(suite = suite.name(), score, mean_u, mean_t, "suite complete");

        SuiteReport {
            suite: suite.name().to_string(),
            score,
            mean_u,
            mean_t,
            error_count,
            results,
            summary,
        }
    }
}

/// Fixed synthetic tasks per suite: (goal, expected difficulty, message).
fn suite_tasks(suite: Suite) -> Vec<(&'static str, f64, Option<&'static str>)> {
    match suite {
        Suite::Easy => vec![
            ("easy.echo1", 0.1, Some("test1")),
            ("easy.echo2", 0.1, Some("test2")),
            ("easy.echo3", 0.1, Some("test3")),
        ],
        Suite::Hard => vec![
            ("hard.delay1", 0.7, Some("slow1")),
            ("hard.delay2", 0.7, Some("slow2")),
            ("hard.delay3", 0.7, Some("slow3")),
        ],
        Suite::Impossible => vec![
            ("impossible.fail1", 0.9, None),
            ("impossible.fail2", 0.9, None),
            ("impossible.fail3", 0.9, None),
        ],
        Suite::Adaptive => vec![
            ("easy.adapt1", 0.1, Some("adapt1")),
            ("hard.adapt2", 0.7, Some("adapt2")),
            ("impossible.adapt3", 0.9, None),
            // Same signature as adapt1; the store should have learned.
            ("easy.adapt4", 0.1, Some("adapt4")),
        ],
    }
}

/// Aggregate score in [0, 1] from three sub-scores:
/// uncertainty-calibration, failure-awareness and trust-calibration.
pub fn metacognitive_score(bits: &ConfidenceBits, expected_difficulty: f64) -> f64 {
    let uncertainty_accuracy = 1.0 - (bits.u - expected_difficulty).abs();

    let failure_awareness = if bits.e {
        // High uncertainty when failing is good.
        bits.u
    } else {
        // Low uncertainty when succeeding is good.
        1.0 - bits.u.max(0.3)
    };

    let trust_calibration = if bits.e { 1.0 - bits.t } else { bits.t };

    (uncertainty_accuracy * 0.4 + failure_awareness * 0.4 + trust_calibration * 0.2)
        .clamp(0.0, 1.0)
}

fn summarize(results: &[TaskResult], score: f64) -> String {
    let status = if score >= 0.8 {
        "EXCELLENT metacognitive control"
    } else if score >= 0.6 {
        "GOOD metacognitive awareness"
    } else if score >= 0.4 {
        "MODERATE self-monitoring"
    } else {
        "POOR metacognitive calibration"
    };

    let u_min = results.iter().map(|r| r.bits.u).fold(1.0_f64, f64::min);
    let u_max = results.iter().map(|r| r.bits.u).fold(0.0_f64, f64::max);
    let t_min = results.iter().map(|r| r.bits.t).fold(1.0_f64, f64::min);
    let t_max = results.iter().map(|r| r.bits.t).fold(0.0_f64, f64::max);
    let errors = results.iter().filter(|r| r.bits.e).count();

    format!(
        "{} (score: {:.2}). Errors: {}/{}. U range: {:.2}-{:.2}. T range: {:.2}-{:.2}",
        status,
        score,
        errors,
        results.len(),
        u_min,
        u_max,
        t_min,
        t_max
    )
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        0.0
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_parses_from_str() {
        assert_eq!("easy".parse::<Suite>().unwrap(), Suite::Easy);
        assert_eq!("IMPOSSIBLE".parse::<Suite>().unwrap(), Suite::Impossible);
        assert!("bogus".parse::<Suite>().is_err());
    }

    #[test]
    fn score_rewards_calibrated_success() {
        let bits = ConfidenceBits::new(0.1, 0.9, false);
        let score = metacognitive_score(&bits, 0.1);
        assert!(score > 0.8, "got {score}");
    }

    #[test]
    fn score_rewards_aware_failure() {
        let aware = ConfidenceBits::new(0.9, 0.2, true);
        let oblivious = ConfidenceBits::new(0.1, 0.9, true);
        assert!(
            metacognitive_score(&aware, 0.9) > metacognitive_score(&oblivious, 0.9)
        );
    }

    #[test]
    fn score_penalizes_misplaced_confidence() {
        let overconfident = ConfidenceBits::new(0.05, 0.95, true);
        let score = metacognitive_score(&overconfident, 0.9);
        assert!(score < 0.4, "got {score}");
    }
}
