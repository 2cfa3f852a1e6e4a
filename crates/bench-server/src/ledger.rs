//! Reporting-only aggregates: per-result rows and per-user profiles.
//!
//! Every update here is a commutative saturating atomic add (or a
//! last-writer-wins timestamp), so concurrent submissions need no lock and
//! may land in any order. Nothing reads these back to decide whether a test
//! is finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bench_core::{BatchDelta, TestId};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

pub type ResultId = u64;

/// Counters for one (test, worker batch class) pairing.
#[derive(Debug, Default)]
pub struct ResultRow {
    pub test_id: TestId,
    games: AtomicU64,
    losses: AtomicU64,
    draws: AtomicU64,
    wins: AtomicU64,
    ll: AtomicU64,
    ld: AtomicU64,
    dd: AtomicU64,
    dw: AtomicU64,
    ww: AtomicU64,
    crashes: AtomicU64,
    timeloss: AtomicU64,
    updated: AtomicI64,
}

/// Plain copy of a [`ResultRow`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultCounts {
    pub test_id: TestId,
    pub games: u64,
    pub losses: u64,
    pub draws: u64,
    pub wins: u64,
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
    pub crashes: u64,
    pub timeloss: u64,
}

impl ResultRow {
    fn new(test_id: TestId) -> Self {
        Self {
            test_id,
            ..Default::default()
        }
    }

    pub fn add(&self, delta: &BatchDelta, now: DateTime<Utc>) {
        let add = |counter: &AtomicU64, value: u64| saturating_add(counter, value);
        add(&self.games, delta.games());
        add(&self.losses, delta.trinomial.losses);
        add(&self.draws, delta.trinomial.draws);
        add(&self.wins, delta.trinomial.wins);
        add(&self.ll, delta.pentanomial.ll);
        add(&self.ld, delta.pentanomial.ld);
        add(&self.dd, delta.pentanomial.dd);
        add(&self.dw, delta.pentanomial.dw);
        add(&self.ww, delta.pentanomial.ww);
        add(&self.crashes, delta.errors.crashes);
        add(&self.timeloss, delta.errors.timelosses);
        self.updated.store(now.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn counts(&self) -> ResultCounts {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ResultCounts {
            test_id: self.test_id,
            games: get(&self.games),
            losses: get(&self.losses),
            draws: get(&self.draws),
            wins: get(&self.wins),
            ll: get(&self.ll),
            ld: get(&self.ld),
            dd: get(&self.dd),
            dw: get(&self.dw),
            ww: get(&self.ww),
            crashes: get(&self.crashes),
            timeloss: get(&self.timeloss),
        }
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.updated.load(Ordering::Relaxed))
    }
}

/// A user's cumulative contribution.
#[derive(Debug, Default)]
pub struct Profile {
    games: AtomicU64,
    updated: AtomicI64,
}

impl Profile {
    pub fn add_games(&self, games: u64, now: DateTime<Utc>) {
        saturating_add(&self.games, games);
        self.updated.store(now.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn games(&self) -> u64 {
        self.games.load(Ordering::Relaxed)
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.updated.load(Ordering::Relaxed))
    }
}

/// Counters stick at `u64::MAX` instead of wrapping
fn saturating_add(counter: &AtomicU64, value: u64) {
    // The closure never returns None, so the update always succeeds
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(value))
    });
}

/// Zero means "never"
pub(crate) fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

/// Result rows and user profiles.
#[derive(Debug, Default)]
pub struct Ledger {
    results: RwLock<HashMap<ResultId, Arc<ResultRow>>>,
    profiles: RwLock<HashMap<String, Arc<Profile>>>,
    next_result: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty result row for a test.
    pub fn open_result(&self, test_id: TestId) -> ResultId {
        let id = self.next_result.fetch_add(1, Ordering::Relaxed) + 1;
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(ResultRow::new(test_id)));
        id
    }

    pub fn result(&self, id: ResultId) -> Option<Arc<ResultRow>> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Fetch a user's profile, creating an empty one on first use.
    pub fn profile(&self, username: &str) -> Arc<Profile> {
        if let Some(profile) = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
        {
            return Arc::clone(profile);
        }

        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(profiles.entry(username.to_string()).or_default())
    }
}
