//! Listing queries over a collection of tests

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::workload::{TestStatus, Workload};

/// A named predicate plus ordering over workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestQuery {
    /// Waiting for approval, newest first
    Pending,
    /// Approved and running, highest priority then highest LLR first
    Active,
    /// Finished, most recently updated first
    Completed,
    /// Paused by an operator, newest first
    Awaiting,
}

impl TestQuery {
    pub fn matches(self, test: &Workload) -> bool {
        let wanted = match self {
            TestQuery::Pending => TestStatus::Pending,
            TestQuery::Active => TestStatus::Active,
            TestQuery::Completed => TestStatus::Finished,
            TestQuery::Awaiting => TestStatus::Awaiting,
        };
        test.status() == wanted
    }

    pub fn compare(self, a: &Workload, b: &Workload) -> Ordering {
        match self {
            TestQuery::Pending | TestQuery::Awaiting => b.creation.cmp(&a.creation),
            TestQuery::Active => b.priority.cmp(&a.priority).then_with(|| {
                b.current_llr
                    .partial_cmp(&a.current_llr)
                    .unwrap_or(Ordering::Equal)
            }),
            TestQuery::Completed => b.updated.cmp(&a.updated),
        }
    }

    /// Filter and order `tests`.
    pub fn select<'a, I>(self, tests: I) -> Vec<&'a Workload>
    where
        I: IntoIterator<Item = &'a Workload>,
    {
        let mut selected: Vec<_> = tests.into_iter().filter(|t| self.matches(t)).collect();
        selected.sort_by(|a, b| self.compare(a, b));
        selected
    }
}
