//! Configuration for the engine and its stores.
//!
//! Loaded from TOML; every section has serde defaults so a partial file (or
//! no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: CoreConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read {}: {}", path.display(), e)))?;
        let config: EngineConfig = toml::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.calibration.validate()?;
        if self.sandbox.roots.is_empty() {
            return Err(EngineError::Config(
                "sandbox.roots must name at least one allow-listed directory".to_string(),
            ));
        }
        Ok(())
    }
}

/// Engine orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Node the resolution walk starts from.
    pub root_node: String,
    /// Whether successful fallback dispatches above the policy gate are
    /// upserted back into the graph as deterministic edges.
    pub learning: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            root_node: "root".to_string(),
            learning: true,
        }
    }
}

/// Tuning for the calibration store and confidence-bit computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Decay factor for the trust EWMA; higher means history weighs more.
    pub decay: f64,
    /// Multiplicative cut applied to trust immediately after a failure.
    pub failure_cut: f64,
    /// Weight of the historical failure rate in the uncertainty blend.
    pub history_weight: f64,
    /// Weight of the resolver's self-reported difficulty (advisory).
    pub difficulty_weight: f64,
    /// Below this many samples the historical record is ignored and the
    /// self-report is used as-is.
    pub min_samples: u64,
    /// Floor for any computed uncertainty.
    pub u_floor: f64,
    /// Ceiling for uncertainty on the deterministic path.
    pub deterministic_u_ceiling: f64,
    /// Seed trust for deterministic hits with no history.
    pub deterministic_t_floor: f64,
    /// Trust is capped below this value whenever a dispatch errors.
    pub failure_t_ceiling: f64,
    /// Added to uncertainty on the receipt of a failed dispatch.
    pub error_u_bump: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            decay: 0.8,
            failure_cut: 0.5,
            history_weight: 0.6,
            difficulty_weight: 0.4,
            min_samples: 3,
            u_floor: 0.05,
            deterministic_u_ceiling: 0.2,
            deterministic_t_floor: 0.9,
            failure_t_ceiling: 0.4,
            error_u_bump: 0.2,
        }
    }
}

impl CalibrationConfig {
    /// Decay factor, with an optional environment override
    /// (`SYNAPSE_CALIBRATION_DECAY`).
    pub fn effective_decay(&self) -> f64 {
        std::env::var("SYNAPSE_CALIBRATION_DECAY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(self.decay)
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("decay", self.decay),
            ("failure_cut", self.failure_cut),
            ("history_weight", self.history_weight),
            ("difficulty_weight", self.difficulty_weight),
            ("u_floor", self.u_floor),
            ("deterministic_u_ceiling", self.deterministic_u_ceiling),
            ("deterministic_t_floor", self.deterministic_t_floor),
            ("failure_t_ceiling", self.failure_t_ceiling),
            ("error_u_bump", self.error_u_bump),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "calibration.{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Actuator sandbox boundary: a fixed allow-list of root paths, configured at
/// startup and never altered at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Allow-listed root directories. The first root is the working
    /// directory for `exec` operations and the base for relative paths.
    pub roots: Vec<PathBuf>,
    /// Reject commands matching the risky-capability screen.
    pub strict: bool,
    /// Wall-clock budget for a single `exec` operation.
    pub exec_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("data")],
            strict: false,
            exec_timeout_ms: 30_000,
        }
    }
}

/// Which fallback resolver implementation to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Deterministic offline resolver for tests and demos.
    Stub,
    /// OpenAI-compatible chat-completions endpoint.
    Http,
}

/// External fallback resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub kind: ResolverKind,
    /// Endpoint for the HTTP resolver; `SYNAPSE_RESOLVER_URL` overrides.
    pub base_url: Option<String>,
    /// Model identifier; `SYNAPSE_RESOLVER_MODEL` overrides.
    pub model: Option<String>,
    /// API key; usually supplied via `SYNAPSE_RESOLVER_API_KEY`.
    pub api_key: Option<String>,
    /// HTTP client timeout. The per-dispatch budget in `Policy` still
    /// applies on top of this.
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind: ResolverKind::Stub,
            base_url: None,
            model: None,
            api_key: None,
            timeout_secs: 60,
        }
    }
}

/// Receipt log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptConfig {
    /// Optional append-only JSONL sink, one self-contained receipt per line.
    pub path: Option<PathBuf>,
    /// Capacity of the in-memory structured log buffer;
    /// `SYNAPSE_LOG_BUFFER_CAPACITY` overrides.
    pub log_buffer_capacity: Option<usize>,
}

/// Expectations the validation runner reports against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub easy_u_max: f64,
    pub easy_t_min: f64,
    pub impossible_u_min: f64,
    pub impossible_t_max: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            easy_u_max: 0.3,
            easy_t_min: 0.6,
            impossible_u_min: 0.6,
            impossible_t_max: 0.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [calibration]
            decay = 0.9

            [sandbox]
            roots = ["work"]
            strict = true
            exec_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.calibration.decay, 0.9);
        assert_eq!(config.calibration.failure_cut, 0.5);
        assert!(config.sandbox.strict);
        assert_eq!(config.engine.root_node, "root");
        assert_eq!(config.resolver.kind, ResolverKind::Stub);
    }

    #[test]
    fn out_of_range_calibration_rejected() {
        let mut config = EngineConfig::default();
        config.calibration.decay = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_sandbox_roots_rejected() {
        let mut config = EngineConfig::default();
        config.sandbox.roots.clear();
        assert!(config.validate().is_err());
    }
}
