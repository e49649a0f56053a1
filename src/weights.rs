//! Weighted prize table and draw selection.

use crate::error::EngineError;
use crate::types::{PrizeOutcome, WeightedOutcome};
use rand::Rng;
use rand::distributions::Standard;
use rand::rngs::OsRng;

/// Reward categories with normalized selection probabilities.
///
/// Weights are relative proportions, not percentages: any positive total is
/// accepted and renormalized to a distribution summing to 1. A table whose
/// weights sum to 87 or 130 behaves identically to the same ratios scaled
/// to 100. This is intentional policy.
#[derive(Debug, Clone)]
pub struct WeightTable {
    entries: Vec<WeightedOutcome>,
    probabilities: Vec<f64>,
}

impl WeightTable {
    pub fn new(entries: Vec<WeightedOutcome>) -> Result<Self, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::Config("prize table is empty".into()));
        }
        for e in &entries {
            if !e.weight.is_finite() || e.weight <= 0.0 {
                return Err(EngineError::Config(format!(
                    "prize weight must be positive and finite, got {} for {}",
                    e.weight,
                    e.outcome.label()
                )));
            }
        }
        let total: f64 = entries.iter().map(|e| e.weight).sum();
        let probabilities = entries.iter().map(|e| e.weight / total).collect();
        Ok(Self { entries, probabilities })
    }

    /// Normalized probabilities in table-declared order. Sums to 1 within
    /// floating-point tolerance.
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &PrizeOutcome> {
        self.entries.iter().map(|e| &e.outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select the outcome whose cumulative probability interval contains
    /// `variate` (expected in `[0, 1)`), walking entries in declared order.
    ///
    /// If rounding leaves no interval matching (variate ≈ 1), the
    /// last-declared outcome is returned rather than failing.
    pub fn draw(&self, variate: f64) -> &PrizeOutcome {
        let mut cumulative = 0.0;
        for (entry, p) in self.entries.iter().zip(&self.probabilities) {
            cumulative += p;
            if variate < cumulative {
                return &entry.outcome;
            }
        }
        // Numerical edge case: fall through to the last entry.
        &self.entries[self.entries.len() - 1].outcome
    }
}

/// Sample a draw variate in `[0, 1)` from the OS CSPRNG.
///
/// Production draws must never use a statistically weak source; seeded
/// generators are for test determinism only.
pub fn draw_variate() -> f64 {
    OsRng.sample(Standard)
}
