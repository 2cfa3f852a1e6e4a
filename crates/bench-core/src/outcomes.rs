//! Outcome counters reported by workers

use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Game-level outcome tally, from the dev engine's perspective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trinomial {
    pub losses: u64,
    pub draws: u64,
    pub wins: u64,
}

impl Trinomial {
    pub fn new(losses: u64, draws: u64, wins: u64) -> Self {
        Self {
            losses,
            draws,
            wins,
        }
    }

    /// Parse the worker wire form `"losses draws wins"`.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let [losses, draws, wins] = parse_counts::<3>(text, "trinomial")?;
        Ok(Self::new(losses, draws, wins))
    }

    /// Saturates instead of overflowing; use [`Trinomial::checked_total_games`]
    /// on counts that have not been validated.
    pub fn total_games(&self) -> u64 {
        self.checked_total_games().unwrap_or(u64::MAX)
    }

    pub fn checked_total_games(&self) -> Option<u64> {
        self.losses.checked_add(self.draws)?.checked_add(self.wins)
    }

    /// Score in half points: two per win, one per draw.
    pub fn checked_half_points(&self) -> Option<u64> {
        self.wins.checked_mul(2)?.checked_add(self.draws)
    }

    /// Counter-wise sum, or `None` if any counter overflows.
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        Some(Self {
            losses: self.losses.checked_add(rhs.losses)?,
            draws: self.draws.checked_add(rhs.draws)?,
            wins: self.wins.checked_add(rhs.wins)?,
        })
    }

    /// Score from the dev engine's perspective (1 for win, 0.5 for draw, 0 for loss)
    pub fn score(&self) -> f64 {
        let total = self.total_games() as f64;
        if total == 0.0 {
            return 0.5;
        }
        (self.wins as f64 + 0.5 * self.draws as f64) / total
    }

    /// Counts ordered from worst to best outcome.
    pub fn as_array(&self) -> [u64; 3] {
        [self.losses, self.draws, self.wins]
    }
}

impl AddAssign for Trinomial {
    fn add_assign(&mut self, rhs: Self) {
        self.losses = self.losses.saturating_add(rhs.losses);
        self.draws = self.draws.saturating_add(rhs.draws);
        self.wins = self.wins.saturating_add(rhs.wins);
    }
}

/// Game-pair outcome tally. Each pair plays one opening from both sides,
/// so `LD` means one loss and one draw across the pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pentanomial {
    #[serde(rename = "LL")]
    pub ll: u64,
    #[serde(rename = "LD")]
    pub ld: u64,
    #[serde(rename = "DD")]
    pub dd: u64,
    #[serde(rename = "DW")]
    pub dw: u64,
    #[serde(rename = "WW")]
    pub ww: u64,
}

impl Pentanomial {
    pub fn new(ll: u64, ld: u64, dd: u64, dw: u64, ww: u64) -> Self {
        Self { ll, ld, dd, dw, ww }
    }

    /// Parse the worker wire form `"LL LD DD DW WW"`.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let [ll, ld, dd, dw, ww] = parse_counts::<5>(text, "pentanomial")?;
        Ok(Self::new(ll, ld, dd, dw, ww))
    }

    pub fn total_pairs(&self) -> u64 {
        self.checked_total_pairs().unwrap_or(u64::MAX)
    }

    pub fn checked_total_pairs(&self) -> Option<u64> {
        self.as_array()
            .iter()
            .try_fold(0u64, |total, &count| total.checked_add(count))
    }

    /// Score in half points over both games of every pair, so it is directly
    /// comparable with [`Trinomial::checked_half_points`].
    pub fn checked_half_points(&self) -> Option<u64> {
        self.as_array()
            .iter()
            .zip(0u64..)
            .try_fold(0u64, |total, (&count, points)| {
                total.checked_add(count.checked_mul(points)?)
            })
    }

    /// Counter-wise sum, or `None` if any counter overflows.
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        Some(Self {
            ll: self.ll.checked_add(rhs.ll)?,
            ld: self.ld.checked_add(rhs.ld)?,
            dd: self.dd.checked_add(rhs.dd)?,
            dw: self.dw.checked_add(rhs.dw)?,
            ww: self.ww.checked_add(rhs.ww)?,
        })
    }

    /// Counts ordered from worst to best pair outcome.
    pub fn as_array(&self) -> [u64; 5] {
        [self.ll, self.ld, self.dd, self.dw, self.ww]
    }
}

impl AddAssign for Pentanomial {
    fn add_assign(&mut self, rhs: Self) {
        self.ll = self.ll.saturating_add(rhs.ll);
        self.ld = self.ld.saturating_add(rhs.ld);
        self.dd = self.dd.saturating_add(rhs.dd);
        self.dw = self.dw.saturating_add(rhs.dw);
        self.ww = self.ww.saturating_add(rhs.ww);
    }
}

/// Engine misbehaviour observed while playing a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchErrors {
    pub crashes: u64,
    pub timelosses: u64,
    pub illegals: u64,
}

impl MatchErrors {
    /// Timelosses are telemetry only; crashes and illegal moves are real errors.
    pub fn is_error(&self) -> bool {
        self.crashes > 0 || self.illegals > 0
    }
}

impl AddAssign for MatchErrors {
    fn add_assign(&mut self, rhs: Self) {
        self.crashes = self.crashes.saturating_add(rhs.crashes);
        self.timelosses = self.timelosses.saturating_add(rhs.timelosses);
        self.illegals = self.illegals.saturating_add(rhs.illegals);
    }
}

/// One worker submission: outcome deltas plus error counters.
///
/// `spsa` carries the per-parameter updates for SPSA tests and must be empty
/// for every other mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDelta {
    pub trinomial: Trinomial,
    pub pentanomial: Pentanomial,
    pub errors: MatchErrors,
    #[serde(default)]
    pub spsa: BTreeMap<String, f64>,
}

impl BatchDelta {
    pub fn new(trinomial: Trinomial, pentanomial: Pentanomial) -> Self {
        Self {
            trinomial,
            pentanomial,
            ..Default::default()
        }
    }

    pub fn with_errors(mut self, errors: MatchErrors) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_spsa(mut self, name: &str, update: f64) -> Self {
        self.spsa.insert(name.to_string(), update);
        self
    }

    pub fn games(&self) -> u64 {
        self.trinomial.total_games()
    }
}

impl AddAssign for BatchDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.trinomial += rhs.trinomial;
        self.pentanomial += rhs.pentanomial;
        self.errors += rhs.errors;
        for (name, update) in rhs.spsa {
            *self.spsa.entry(name).or_insert(0.0) += update;
        }
    }
}

fn parse_counts<const N: usize>(text: &str, what: &str) -> CoreResult<[u64; N]> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != N {
        return Err(CoreError::MalformedDelta(format!(
            "{} needs {} counts, got {:?}",
            what, N, text
        )));
    }

    let mut counts = [0u64; N];
    for (slot, field) in counts.iter_mut().zip(fields) {
        *slot = field.parse().map_err(|_| {
            CoreError::MalformedDelta(format!(
                "{what} count {field:?} is not a non-negative integer"
            ))
        })?;
    }
    Ok(counts)
}
