//! Finished-test summaries handed to notification collaborators

use serde::{Deserialize, Serialize};

use crate::outcomes::{Pentanomial, Trinomial};
use crate::workload::{TestId, TestMode, Workload};

/// Reported outcome of a finished test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    /// Fixed-games test whose error bar still contains zero
    Inconclusive,
}

impl Outcome {
    pub fn describe(self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Inconclusive => "is inconclusive",
        }
    }
}

/// Snapshot of a test at the moment it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub test_id: TestId,
    pub author: String,
    pub dev_name: String,
    pub base_name: String,
    pub dev_time_control: String,
    pub base_time_control: String,
    pub mode: String,
    pub outcome: Outcome,
    pub elo: f64,
    /// Largest distance from the estimate to either 95% bound
    pub error: f64,
    pub trinomial: Trinomial,
    /// Present only for tests driven by game pairs
    pub pentanomial: Option<Pentanomial>,
}

impl TestSummary {
    pub fn from_workload(test: &Workload) -> Self {
        let interval = test.elo_interval();
        let error = interval.error_margin();

        let mode = match &test.mode {
            TestMode::Games { max_games } => format!("{max_games} games"),
            TestMode::Sprt(bounds) => {
                format!("SPRT [{:.2}, {:.2}]", bounds.elo_lower, bounds.elo_upper)
            }
            TestMode::Spsa(config) => format!("SPSA {} iterations", config.iterations),
            TestMode::Datagen { max_games } => format!("DATAGEN {max_games} games"),
        };

        // Only fixed-games tests get the error bar check
        let outcome = match test.mode {
            TestMode::Games { .. } if interval.elo.abs() < error => Outcome::Inconclusive,
            _ if test.passed => Outcome::Passed,
            _ => Outcome::Failed,
        };

        Self {
            test_id: test.id,
            author: test.author.clone(),
            dev_name: test.dev.name.clone(),
            base_name: test.base.name.clone(),
            dev_time_control: test.dev_time_control.to_string(),
            base_time_control: test.base_time_control.to_string(),
            mode,
            outcome,
            elo: interval.elo,
            error,
            trinomial: test.trinomial,
            pentanomial: test.use_penta.then_some(test.pentanomial),
        }
    }

    pub fn title(&self) -> String {
        format!(
            "Test `{}` vs `{}` {}",
            self.dev_name,
            self.base_name,
            self.outcome.describe()
        )
    }

    /// Generate a text report
    pub fn render(&self) -> String {
        let mut report = String::new();
        report.push_str(&format!("=== {} ===\n", self.title()));
        report.push_str(&format!("Author: {}\n", self.author));
        report.push_str(&format!(
            "Dev: {}s  Base: {}s\n",
            self.dev_time_control, self.base_time_control
        ));
        report.push_str(&format!("Mode: {}\n", self.mode));
        report.push_str(&format!(
            "{:>8} {:>8} {:>8}\n{:>8} {:>8} {:>8}\n",
            "Wins",
            "Losses",
            "Draws",
            self.trinomial.wins,
            self.trinomial.losses,
            self.trinomial.draws
        ));
        report.push_str(&format!("Elo: {:.2} ± {:.2} (95%)\n", self.elo, self.error));
        if let Some(penta) = &self.pentanomial {
            report.push_str(&format!(
                "Pentanomial (0-2): {}, {}, {}, {}, {}\n",
                penta.ll, penta.ld, penta.dd, penta.dw, penta.ww
            ));
        }
        report
    }
}
