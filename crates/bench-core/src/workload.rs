//! Test lifecycle and mode-specific stopping rules.
//!
//! A [`Workload`] compares a dev build against a base build. It starts out
//! pending, becomes active on approval, accumulates worker batches and
//! finishes once its mode's stopping rule fires. A soft delete freezes it
//! regardless of the other flags.
//!
//! [`Workload::apply_batch`] assumes the caller holds exclusive access to the
//! workload for the whole read-modify-decide-write cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::outcomes::{BatchDelta, Pentanomial, Trinomial};
use crate::spsa::SpsaConfig;
use crate::stats::{self, EloInterval};
use crate::time_control::{uses_time_based_tc, TimeControl};

pub type TestId = u64;

/// Engine name plus the source revision under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineBuild {
    pub engine: String,
    /// Branch or tag name
    pub name: String,
    pub sha: String,
}

/// Type-1 and type-2 error rates for an SPRT.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRates {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for ErrorRates {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            beta: 0.05,
        }
    }
}

impl ErrorRates {
    fn validate(&self) -> CoreResult<()> {
        let in_range = |p: f64| p > 0.0 && p < 1.0;
        if in_range(self.alpha) && in_range(self.beta) {
            Ok(())
        } else {
            Err(CoreError::InvalidConfig(format!(
                "error rates must lie in (0, 1), got alpha={} beta={}",
                self.alpha, self.beta
            )))
        }
    }
}

/// Elo hypotheses and the LLR thresholds derived from the error rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtBounds {
    pub elo_lower: f64,
    pub elo_upper: f64,
    pub lower_llr: f64,
    pub upper_llr: f64,
}

impl SprtBounds {
    pub fn new(elo_lower: f64, elo_upper: f64, rates: ErrorRates) -> CoreResult<Self> {
        rates.validate()?;
        if !(elo_lower < elo_upper) {
            return Err(CoreError::InvalidConfig(format!(
                "SPRT needs elo_lower < elo_upper, got [{elo_lower}, {elo_upper}]"
            )));
        }
        let (lower_llr, upper_llr) = stats::llr_bounds(rates.alpha, rates.beta);
        Ok(Self {
            elo_lower,
            elo_upper,
            lower_llr,
            upper_llr,
        })
    }
}

/// How a test decides it is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum TestMode {
    Sprt(SprtBounds),
    Games { max_games: u64 },
    Spsa(SpsaConfig),
    Datagen { max_games: u64 },
}

impl TestMode {
    pub fn label(&self) -> &'static str {
        match self {
            TestMode::Sprt(_) => "SPRT",
            TestMode::Games { .. } => "GAMES",
            TestMode::Spsa(_) => "SPSA",
            TestMode::Datagen { .. } => "DATAGEN",
        }
    }
}

/// Mode as submitted, before SPRT thresholds are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum ModeSpec {
    Sprt {
        elo_lower: f64,
        elo_upper: f64,
        #[serde(default)]
        rates: Option<ErrorRates>,
    },
    Games {
        max_games: u64,
    },
    Spsa(SpsaConfig),
    Datagen {
        max_games: u64,
    },
}

fn default_true() -> bool {
    true
}

/// A request to create a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub author: String,
    pub dev: EngineBuild,
    pub base: EngineBuild,
    pub dev_time_control: String,
    pub base_time_control: String,
    #[serde(flatten)]
    pub mode: ModeSpec,
    #[serde(default = "default_true")]
    pub use_tri: bool,
    #[serde(default = "default_true")]
    pub use_penta: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub upload_pgns: bool,
}

/// The single lifecycle state derived from a workload's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Active,
    Awaiting,
    Finished,
    Deleted,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestStatus::Pending => "pending",
            TestStatus::Active => "active",
            TestStatus::Awaiting => "awaiting",
            TestStatus::Finished => "finished",
            TestStatus::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// What happened to a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Counters updated, keep playing
    Continue,
    /// Counters updated and the stopping rule fired on this batch
    Finished,
    /// The test was already finished or deleted; nothing was applied
    Rejected,
}

impl BatchOutcome {
    /// Whether the submitting worker should stop playing this test.
    pub fn halt(self) -> bool {
        !matches!(self, BatchOutcome::Continue)
    }

    pub fn just_finished(self) -> bool {
        matches!(self, BatchOutcome::Finished)
    }
}

/// Cumulative counters after a validated batch.
struct MergedCounts {
    trinomial: Trinomial,
    pentanomial: Pentanomial,
    games: u64,
}

/// One dev-vs-base comparison and its cumulative results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: TestId,
    pub author: String,
    pub dev: EngineBuild,
    pub base: EngineBuild,
    pub dev_time_control: TimeControl,
    pub base_time_control: TimeControl,
    pub mode: TestMode,
    pub use_tri: bool,
    pub use_penta: bool,
    pub upload_pgns: bool,

    pub trinomial: Trinomial,
    pub pentanomial: Pentanomial,
    pub games: u64,

    pub current_llr: f64,
    pub passed: bool,
    pub failed: bool,
    pub finished: bool,
    /// Sticky once any crash or illegal move is reported
    pub error: bool,
    pub approved: bool,
    pub awaiting: bool,
    pub deleted: bool,
    pub priority: i32,

    pub creation: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Workload {
    /// Validate a creation request and build a pending test.
    ///
    /// `default_rates` applies to SPRT tests that do not carry their own.
    pub fn create(
        id: TestId,
        spec: WorkloadSpec,
        default_rates: ErrorRates,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let dev_time_control = TimeControl::parse(&spec.dev_time_control)?;
        let base_time_control = TimeControl::parse(&spec.base_time_control)?;

        if !spec.use_tri && !spec.use_penta {
            return Err(CoreError::InvalidConfig(
                "one of use_tri or use_penta must be set".to_string(),
            ));
        }

        let mode = match spec.mode {
            ModeSpec::Sprt {
                elo_lower,
                elo_upper,
                rates,
            } => TestMode::Sprt(SprtBounds::new(
                elo_lower,
                elo_upper,
                rates.unwrap_or(default_rates),
            )?),
            ModeSpec::Games { max_games } | ModeSpec::Datagen { max_games } if max_games == 0 => {
                return Err(CoreError::InvalidConfig(
                    "max_games must be positive".to_string(),
                ));
            }
            ModeSpec::Games { max_games } => TestMode::Games { max_games },
            ModeSpec::Datagen { max_games } => TestMode::Datagen { max_games },
            ModeSpec::Spsa(config) => {
                config.validate()?;
                TestMode::Spsa(config)
            }
        };

        Ok(Self {
            id,
            author: spec.author,
            dev: spec.dev,
            base: spec.base,
            dev_time_control,
            base_time_control,
            mode,
            use_tri: spec.use_tri,
            use_penta: spec.use_penta,
            upload_pgns: spec.upload_pgns,
            trinomial: Trinomial::default(),
            pentanomial: Pentanomial::default(),
            games: 0,
            current_llr: 0.0,
            passed: false,
            failed: false,
            finished: false,
            error: false,
            approved: false,
            awaiting: false,
            deleted: false,
            priority: spec.priority,
            creation: now,
            updated: now,
        })
    }

    pub fn status(&self) -> TestStatus {
        if self.deleted {
            TestStatus::Deleted
        } else if self.finished {
            TestStatus::Finished
        } else if self.awaiting {
            TestStatus::Awaiting
        } else if !self.approved {
            TestStatus::Pending
        } else {
            TestStatus::Active
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finished || self.deleted
    }

    pub fn uses_time_based_tc(&self) -> bool {
        uses_time_based_tc(&self.dev_time_control, &self.base_time_control, self.upload_pgns)
    }

    /// Pending -> Active
    pub fn approve(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(TestStatus::Pending, "approve")?;
        self.approved = true;
        self.updated = now;
        Ok(())
    }

    /// Active -> Awaiting
    pub fn pause(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(TestStatus::Active, "pause")?;
        self.awaiting = true;
        self.updated = now;
        Ok(())
    }

    /// Awaiting -> Active
    pub fn resume(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(TestStatus::Awaiting, "resume")?;
        self.awaiting = false;
        self.updated = now;
        Ok(())
    }

    /// Soft delete. Absorbing: no further transitions or batches.
    pub fn delete(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.deleted {
            return Err(CoreError::InvalidTransition {
                status: TestStatus::Deleted,
                action: "delete",
            });
        }
        self.deleted = true;
        self.updated = now;
        Ok(())
    }

    fn expect_status(&self, expected: TestStatus, action: &'static str) -> CoreResult<()> {
        let status = self.status();
        if status == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition { status, action })
        }
    }

    /// Reject deltas that do not fit this test, before anything is mutated.
    pub fn validate_delta(&self, delta: &BatchDelta) -> CoreResult<()> {
        self.merged_counts(delta).map(|_| ())
    }

    /// The counters this test would hold after `delta`, computed without
    /// touching `self`.
    fn merged_counts(&self, delta: &BatchDelta) -> CoreResult<MergedCounts> {
        let overflow = || CoreError::MalformedDelta("batch counts overflow".to_string());

        let games = delta.trinomial.checked_total_games().ok_or_else(overflow)?;
        let pairs = delta.pentanomial.checked_total_pairs().ok_or_else(overflow)?;

        if self.use_penta {
            if pairs.checked_mul(2) != Some(games) {
                return Err(CoreError::MalformedDelta(format!(
                    "{pairs} game pairs do not account for {games} games"
                )));
            }
            let game_points = delta.trinomial.checked_half_points().ok_or_else(overflow)?;
            let pair_points = delta.pentanomial.checked_half_points().ok_or_else(overflow)?;
            if game_points != pair_points {
                return Err(CoreError::MalformedDelta(format!(
                    "game pairs score {pair_points} half points, games score {game_points}"
                )));
            }
        } else if pairs != 0 {
            return Err(CoreError::MalformedDelta(
                "pentanomial results sent to a trinomial-only test".to_string(),
            ));
        }

        match &self.mode {
            TestMode::Spsa(config) => config.check_updates(&delta.spsa)?,
            _ if !delta.spsa.is_empty() => {
                return Err(CoreError::MalformedDelta(format!(
                    "SPSA updates sent to a {} test",
                    self.mode.label()
                )));
            }
            _ => {}
        }

        Ok(MergedCounts {
            trinomial: self.trinomial.checked_add(&delta.trinomial).ok_or_else(overflow)?,
            pentanomial: self
                .pentanomial
                .checked_add(&delta.pentanomial)
                .ok_or_else(overflow)?,
            games: self.games.checked_add(games).ok_or_else(overflow)?,
        })
    }

    /// Merge one worker batch and re-evaluate the stopping rule.
    ///
    /// Finished or deleted tests reject the batch without touching any
    /// counter, so late submissions cannot disturb final results.
    pub fn apply_batch(
        &mut self,
        delta: &BatchDelta,
        now: DateTime<Utc>,
    ) -> CoreResult<BatchOutcome> {
        if self.is_terminal() {
            return Ok(BatchOutcome::Rejected);
        }
        let merged = self.merged_counts(delta)?;

        self.trinomial = merged.trinomial;
        self.pentanomial = merged.pentanomial;
        self.games = merged.games;
        self.error |= delta.errors.is_error();

        match &mut self.mode {
            TestMode::Sprt(bounds) => {
                if self.use_penta {
                    self.current_llr = stats::pentanomial_llr(
                        self.pentanomial.as_array(),
                        bounds.elo_lower,
                        bounds.elo_upper,
                    );
                } else if self.use_tri {
                    self.current_llr = stats::trinomial_llr(
                        self.trinomial.as_array(),
                        bounds.elo_lower,
                        bounds.elo_upper,
                    );
                }
                self.passed = self.current_llr > bounds.upper_llr;
                self.failed = self.current_llr < bounds.lower_llr;
                self.finished = self.passed || self.failed;
            }
            TestMode::Games { max_games } => {
                let done = self.games >= *max_games;
                self.passed = done && self.trinomial.wins >= self.trinomial.losses;
                self.failed = done && self.trinomial.wins < self.trinomial.losses;
                self.finished = self.passed || self.failed;
            }
            TestMode::Spsa(config) => {
                config.apply_updates(&delta.spsa);
                self.finished = self.games >= config.target_games();
                self.passed = self.finished;
            }
            TestMode::Datagen { max_games } => {
                self.finished = self.games >= *max_games;
                self.passed = self.finished;
            }
        }

        self.updated = now;

        Ok(if self.finished {
            BatchOutcome::Finished
        } else {
            BatchOutcome::Continue
        })
    }

    /// Elo interval over whichever counters drive this test.
    pub fn elo_interval(&self) -> EloInterval {
        if self.use_penta {
            stats::elo_interval(&self.pentanomial.as_array())
        } else {
            stats::elo_interval(&self.trinomial.as_array())
        }
    }
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod workload_tests;
