//! Sequential probability ratio test and Elo estimation.
//!
//! Everything here is a pure function of aggregate outcome counts, so the
//! statistic can be recomputed from scratch after every batch without
//! keeping per-game history.
//!
//! The LLR uses the generalized SPRT approximation over logistic Elo:
//!
//! ```text
//! LLR ≈ N (s1 - s0) (2 mu - s0 - s1) / (2 var)
//! ```
//!
//! where `s0`/`s1` are the expected scores under the two hypotheses and
//! `mu`/`var` are the mean and variance of the observed per-sample score.
//! For trinomial counts a sample is one game; for pentanomial counts it is
//! one game pair, which removes the opening-to-opening variance.

use serde::{Deserialize, Serialize};

/// Smallest count used in place of an empty bucket
const EMPTY_BUCKET: f64 = 1e-3;

/// Score probabilities are kept strictly inside (0, 1)
const SCORE_EPSILON: f64 = 1e-6;

/// Two-sided 95% normal quantile
const Z_95: f64 = 1.959_963_984_540_054;

/// Expected score for a given Elo difference on the logistic scale.
pub fn expected_score(elo: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-elo / 400.0))
}

/// Inverse of [`expected_score`].
pub fn logistic_elo(score: f64) -> f64 {
    let score = score.clamp(SCORE_EPSILON, 1.0 - SCORE_EPSILON);
    -400.0 * (1.0 / score - 1.0).log10()
}

/// Decision thresholds derived from type-1 (`alpha`) and type-2 (`beta`)
/// error rates. Returns `(lower, upper)`.
pub fn llr_bounds(alpha: f64, beta: f64) -> (f64, f64) {
    let lower = (beta / (1.0 - alpha)).ln();
    let upper = ((1.0 - beta) / alpha).ln();
    (lower, upper)
}

/// LLR of `(losses, draws, wins)` for H1: `elo_upper` against H0: `elo_lower`.
pub fn trinomial_llr(counts: [u64; 3], elo_lower: f64, elo_upper: f64) -> f64 {
    gsprt_llr(&counts, elo_lower, elo_upper)
}

/// LLR of `(LL, LD, DD, DW, WW)` game pairs for H1: `elo_upper` against H0: `elo_lower`.
pub fn pentanomial_llr(counts: [u64; 5], elo_lower: f64, elo_upper: f64) -> f64 {
    gsprt_llr(&counts, elo_lower, elo_upper)
}

fn gsprt_llr(counts: &[u64], elo_lower: f64, elo_upper: f64) -> f64 {
    if counts.iter().all(|&c| c == 0) {
        return 0.0;
    }

    // Empty buckets would pin the variance at zero on lopsided samples
    let clamped: Vec<f64> = counts.iter().map(|&c| (c as f64).max(EMPTY_BUCKET)).collect();
    let n: f64 = clamped.iter().sum();
    let (mu, var) = score_moments(&clamped);

    if var <= 0.0 {
        return 0.0;
    }

    let s0 = expected_score(elo_lower);
    let s1 = expected_score(elo_upper);
    n * (s1 - s0) * (2.0 * mu - s0 - s1) / (2.0 * var)
}

/// Mean and variance of the per-sample score, with sample points spread
/// evenly over [0, 1] from the worst bucket to the best.
fn score_moments(counts: &[f64]) -> (f64, f64) {
    let n: f64 = counts.iter().sum();
    let div = (counts.len() - 1) as f64;

    let mu = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| (i as f64 / div) * c)
        .sum::<f64>()
        / n;

    let var = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| (i as f64 / div - mu).powi(2) * c)
        .sum::<f64>()
        / n;

    (mu, var)
}

/// Elo estimate with a 95% confidence interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EloInterval {
    pub lower: f64,
    pub elo: f64,
    pub upper: f64,
}

impl EloInterval {
    /// The larger of the two distances from the estimate to its bounds.
    pub fn error_margin(&self) -> f64 {
        (self.upper - self.elo).max(self.elo - self.lower)
    }
}

/// Elo interval from either trinomial or pentanomial counts, ordered from
/// worst to best outcome.
pub fn elo_interval(counts: &[u64]) -> EloInterval {
    let total: u64 = counts.iter().sum();
    if total == 0 || counts.len() < 2 {
        return EloInterval::default();
    }

    let as_f64: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    let (mu, var) = score_moments(&as_f64);
    let stderr = (var / total as f64).sqrt();

    EloInterval {
        lower: logistic_elo(mu - Z_95 * stderr),
        elo: logistic_elo(mu),
        upper: logistic_elo(mu + Z_95 * stderr),
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod stats_tests;
