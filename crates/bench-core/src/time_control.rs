//! Time control parsing and classification.
//!
//! Human-entered time controls come in many spellings. This module reduces
//! them to a canonical string once, up front, so that every consumer can
//! branch on a small closed set of [`ControlKind`]s instead of re-parsing.
//!
//! Accepted forms:
//! - Fixed budgets: `N=`/`nodes=`, `D=`/`depth=`, `MT=`/`movetime=` (any case)
//! - Fischer clocks: `base` or `base+inc`, e.g. `10+0.1`
//! - Cyclic clocks: `moves/base` or `moves/base+inc`, e.g. `40/60+0.5`

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

static FIXED_BUDGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(nodes|n|depth|d|movetime|mt)=(\d+)$").expect("fixed budget pattern")
});

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)/)?(\d+(?:\.\d+)?|\.\d+)(?:\+(\d+(?:\.\d+)?|\.\d+))?$")
        .expect("clock pattern")
});

/// The closed set of time control kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    FixedNodes,
    FixedDepth,
    FixedTime,
    Cyclic,
    Fischer,
}

impl ControlKind {
    /// Fixed node or depth budgets do not depend on wall-clock time.
    pub fn is_time_based(self) -> bool {
        !matches!(self, ControlKind::FixedNodes | ControlKind::FixedDepth)
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlKind::FixedNodes => "FIXED-NODES",
            ControlKind::FixedDepth => "FIXED-DEPTH",
            ControlKind::FixedTime => "FIXED-TIME",
            ControlKind::Cyclic => "CYCLIC",
            ControlKind::Fischer => "FISCHER",
        };
        f.write_str(name)
    }
}

/// The first numeric field of a canonical time control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlBase {
    /// Nodes, plies or milliseconds for the fixed kinds
    Fixed(u64),
    /// Seconds (or moves-per-cycle for cyclic controls)
    Clock(f64),
}

impl ControlBase {
    pub fn as_f64(self) -> f64 {
        match self {
            ControlBase::Fixed(value) => value as f64,
            ControlBase::Clock(value) => value,
        }
    }
}

/// A validated, canonical time control string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeControl(String);

impl TimeControl {
    /// Parse free-form user input into its canonical form.
    pub fn parse(text: &str) -> CoreResult<Self> {
        parse(text).map(TimeControl)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ControlKind {
        classify(&self.0)
    }

    pub fn base(&self) -> ControlBase {
        // Canonical strings always carry a leading number.
        base(&self.0).unwrap_or(ControlBase::Clock(0.0))
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TimeControl {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        TimeControl::parse(&value)
    }
}

impl From<TimeControl> for String {
    fn from(value: TimeControl) -> Self {
        value.0
    }
}

/// Canonicalize a time control string.
///
/// Fixed budgets become `N=<n>`, `D=<n>` or `MT=<n>`. Clocks become
/// `base+inc` or `moves/base+inc` with one decimal on the base and two on
/// the increment. Anything else is an [`CoreError::InvalidTimeControl`].
pub fn parse(text: &str) -> CoreResult<String> {
    let trimmed = text.trim();

    if let Some(caps) = FIXED_BUDGET.captures(trimmed) {
        let tag = match caps[1].to_ascii_uppercase().as_str() {
            "N" | "NODES" => "N",
            "D" | "DEPTH" => "D",
            _ => "MT",
        };
        let value: u64 = caps[2]
            .parse()
            .map_err(|_| CoreError::InvalidTimeControl(text.to_string()))?;
        return Ok(format!("{tag}={value}"));
    }

    if let Some(caps) = CLOCK.captures(trimmed) {
        let invalid = || CoreError::InvalidTimeControl(text.to_string());

        let base: f64 = caps[2].parse().map_err(|_| invalid())?;
        let inc: f64 = match caps.get(3) {
            Some(m) => m.as_str().parse().map_err(|_| invalid())?,
            None => 0.0,
        };

        return Ok(match caps.get(1) {
            Some(moves) => {
                let moves: u64 = moves.as_str().parse().map_err(|_| invalid())?;
                format!("{moves}/{base:.1}+{inc:.2}")
            }
            None => format!("{base:.1}+{inc:.2}"),
        });
    }

    Err(CoreError::InvalidTimeControl(text.to_string()))
}

/// Classify a canonical time control. Purely syntactic.
pub fn classify(canonical: &str) -> ControlKind {
    if canonical.starts_with("N=") {
        ControlKind::FixedNodes
    } else if canonical.starts_with("D=") {
        ControlKind::FixedDepth
    } else if canonical.starts_with("MT=") {
        ControlKind::FixedTime
    } else if canonical.contains('/') {
        ControlKind::Cyclic
    } else {
        ControlKind::Fischer
    }
}

/// Extract the first numeric field of a canonical time control.
pub fn base(canonical: &str) -> CoreResult<ControlBase> {
    let invalid = || CoreError::InvalidTimeControl(canonical.to_string());

    match classify(canonical) {
        ControlKind::FixedNodes | ControlKind::FixedDepth | ControlKind::FixedTime => {
            let (_, value) = canonical.split_once('=').ok_or_else(invalid)?;
            value.parse().map(ControlBase::Fixed).map_err(|_| invalid())
        }
        ControlKind::Cyclic => {
            let (moves, _) = canonical.split_once('/').ok_or_else(invalid)?;
            moves.parse().map(ControlBase::Clock).map_err(|_| invalid())
        }
        ControlKind::Fischer => {
            let head = canonical.split('+').next().unwrap_or(canonical);
            head.parse().map(ControlBase::Clock).map_err(|_| invalid())
        }
    }
}

/// Whether a dev/base pairing needs wall-clock time to play out.
///
/// Verbose PGN uploads record clock data, so they count as time based too.
pub fn uses_time_based_tc(dev: &TimeControl, base: &TimeControl, verbose_pgns: bool) -> bool {
    verbose_pgns || dev.kind().is_time_based() || base.kind().is_time_based()
}

#[cfg(test)]
#[path = "time_control_tests.rs"]
mod time_control_tests;
