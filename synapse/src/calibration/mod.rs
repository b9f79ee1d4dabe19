//! Calibration Store
//!
//! Per task-signature running statistics that turn historical outcomes into
//! confidence adjustments. Uncertainty rises monotonically with the
//! historical failure rate of a signature; trust is a decay-weighted moving
//! average of recorded trust values, cut immediately on failure and only
//! recovering gradually on subsequent successes.

use dashmap::DashMap;

use crate::config::CalibrationConfig;
use crate::types::CalibrationEntry;

/// Concurrent calibration store. Entries for distinct signatures update
/// fully in parallel; same-signature updates serialize on the map shard.
#[derive(Debug)]
pub struct CalibrationStore {
    config: CalibrationConfig,
    entries: DashMap<String, CalibrationEntry>,
}

impl CalibrationStore {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Snapshot of the entry for a signature; a zeroed entry when absent.
    /// Entries are created lazily by `record` and never deleted during
    /// normal operation.
    pub fn lookup(&self, signature: &str) -> CalibrationEntry {
        self.entries
            .get(signature)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Record one dispatch outcome and the trust value attached to its
    /// receipt.
    pub fn record(&self, signature: &str, success: bool, t: f64) {
        let decay = self.config.effective_decay();
        let t = t.clamp(0.0, 1.0);
        let mut entry = self.entries.entry(signature.to_string()).or_default();

        let first_sample = entry.attempts == 0;
        entry.attempts += 1;

        if success {
            let successes = entry.attempts - entry.failures;
            entry.avg_t_success = running_mean(entry.avg_t_success, successes, t);
            entry.trust_ewma = if first_sample {
                t
            } else {
                entry.trust_ewma * decay + t * (1.0 - decay)
            };
            entry.last_error = false;
        } else {
            entry.failures += 1;
            entry.avg_t_failure = running_mean(entry.avg_t_failure, entry.failures, t);
            // Shift trust toward zero at once; recovery only happens through
            // later successes feeding the EWMA.
            let blended = if first_sample {
                t
            } else {
                entry.trust_ewma * decay + t * (1.0 - decay)
            };
            entry.trust_ewma = blended.min(t) * self.config.failure_cut;
            entry.last_error = true;
        }
    }

    /// Historical failure rate for a signature.
    pub fn failure_rate(&self, signature: &str) -> f64 {
        self.lookup(signature).failure_rate()
    }

    /// Uncertainty for a fallback dispatch: the historical failure rate is
    /// authoritative, the resolver's self-reported difficulty advisory.
    /// Below `min_samples` the self-report is all we have. An error on the
    /// signature's previous dispatch raises the next estimate.
    pub fn uncertainty(&self, signature: &str, difficulty: f64) -> f64 {
        let entry = self.lookup(signature);
        let difficulty = difficulty.clamp(0.0, 1.0);
        let mut u = if entry.attempts < self.config.min_samples {
            difficulty
        } else {
            self.config.history_weight * entry.failure_rate()
                + self.config.difficulty_weight * difficulty
        };
        if entry.last_error {
            u += self.config.error_u_bump;
        }
        u.clamp(self.config.u_floor, 1.0)
    }

    /// Uncertainty for a deterministic hit: bounded by the configured
    /// ceiling, still rising with the signature's failure history.
    pub fn deterministic_uncertainty(&self, signature: &str) -> f64 {
        let entry = self.lookup(signature);
        let mut u = self.config.history_weight * entry.failure_rate();
        if entry.last_error {
            u += self.config.error_u_bump;
        }
        u.max(self.config.u_floor)
            .min(self.config.deterministic_u_ceiling)
    }

    /// Blend an observed trust value with the signature's EWMA. The first
    /// sample for a signature is taken as-is.
    pub fn blended_trust(&self, signature: &str, observed: f64) -> f64 {
        let entry = self.lookup(signature);
        if entry.attempts == 0 {
            observed
        } else {
            let decay = self.config.effective_decay();
            entry.trust_ewma * decay + observed * (1.0 - decay)
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// All tracked signatures, for reporting.
    pub fn signatures(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

fn running_mean(prior: f64, count: u64, sample: f64) -> f64 {
    if count == 0 {
        return sample;
    }
    prior + (sample - prior) / count as f64
}
