//! Auto-Tuner Module
//!
//! One-step budget controller driven by the observed hit rate.
//!
//! - hit rate below 0.5 and budget above the 1 MiB floor: shrink by 10%
//! - hit rate above 0.8 and usage at or above 80% of budget: grow by 10%

use serde::Serialize;

use crate::cache::NamespaceStats;

/// Budgets are never tuned below this floor.
pub const MIN_BUDGET: u64 = 1024 * 1024;

pub const LOW_HIT_RATE: f64 = 0.5;
pub const HIGH_HIT_RATE: f64 = 0.8;
pub const HIGH_UTILIZATION: f64 = 0.8;
pub const STEP: f64 = 0.1;

// == Tune Outcome ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TuneOutcome {
    Unchanged { budget: u64 },
    Shrunk { from: u64, to: u64 },
    Grown { from: u64, to: u64 },
}

impl TuneOutcome {
    /// Budget after the tick.
    pub fn budget(&self) -> u64 {
        match *self {
            TuneOutcome::Unchanged { budget } => budget,
            TuneOutcome::Shrunk { to, .. } | TuneOutcome::Grown { to, .. } => to,
        }
    }
}

// == Next Budget ==
/// Computes the budget for the next period from accumulated stats.
///
/// `stats.max_size` and `stats.total_size` must reflect the namespace's
/// current budget and usage.
pub fn next_budget(stats: &NamespaceStats) -> TuneOutcome {
    let budget = stats.max_size;
    if stats.total_requests == 0 {
        return TuneOutcome::Unchanged { budget };
    }

    let hit_rate = stats.hit_rate();
    if hit_rate < LOW_HIT_RATE && budget > MIN_BUDGET {
        let to = ((budget as f64 * (1.0 - STEP)) as u64).max(MIN_BUDGET);
        return TuneOutcome::Shrunk { from: budget, to };
    }

    if hit_rate > HIGH_HIT_RATE && stats.utilization() >= HIGH_UTILIZATION {
        let to = ((budget as f64 * (1.0 + STEP)) as u64).max(budget.saturating_add(1));
        return TuneOutcome::Grown { from: budget, to };
    }

    TuneOutcome::Unchanged { budget }
}
