//! Worker machine identity, liveness and fleet throughput.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ledger::{millis_to_time, Ledger};

pub type MachineId = u64;

/// Capabilities a worker reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    #[serde(default)]
    pub mac_address: Option<String>,
    pub concurrency: u32,
    /// Anything else the worker reports (OS, CPU name, toolchains)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A registered worker.
#[derive(Debug)]
pub struct Machine {
    pub id: MachineId,
    pub user: String,
    pub info: MachineInfo,
    /// f64 bits of the measured million-nodes-per-second
    mnps: AtomicU64,
    /// Unix millis of the last contact
    updated: AtomicI64,
}

impl Machine {
    pub fn mnps(&self) -> f64 {
        f64::from_bits(self.mnps.load(Ordering::Relaxed))
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.updated.load(Ordering::Relaxed))
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        self.updated.store(now.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_throughput(&self, mnps: f64, now: DateTime<Utc>) {
        self.mnps.store(mnps.to_bits(), Ordering::Relaxed);
        self.touch(now);
    }

    fn seen_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen().is_some_and(|seen| seen >= cutoff)
    }
}

/// Aggregate capacity of recently seen machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub machines: usize,
    pub threads: u64,
    /// Sum of concurrency × measured throughput
    pub mnps: f64,
}

impl fmt::Display for FleetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ": {} Machines / {} Threads / {:.2} MNPS ",
            self.machines, self.threads, self.mnps
        )
    }
}

/// Registry of every machine that ever connected. Machines are never
/// removed, only aged out of the recency window.
#[derive(Debug, Default)]
pub struct MachineRegistry {
    machines: RwLock<HashMap<MachineId, Arc<Machine>>>,
    next_id: AtomicU64,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new machine, or resolve an existing one.
    ///
    /// An existing machine only resolves when its stored MAC address matches
    /// the supplied one. This is a soft guard against one worker claiming
    /// another's id, not authentication.
    pub fn resolve(
        &self,
        machine_id: Option<MachineId>,
        user: &str,
        info: MachineInfo,
        ledger: &Ledger,
        now: DateTime<Utc>,
    ) -> Option<Arc<Machine>> {
        let Some(id) = machine_id else {
            return Some(self.register(user, info, ledger, now));
        };

        let machine = self.get(id)?;
        let stored = machine.info.mac_address.as_deref()?;
        if info.mac_address.as_deref() != Some(stored) {
            warn!(machine_id = id, "MAC address mismatch on machine lookup");
            return None;
        }

        machine.touch(now);
        Some(machine)
    }

    fn register(
        &self,
        user: &str,
        info: MachineInfo,
        ledger: &Ledger,
        now: DateTime<Utc>,
    ) -> Arc<Machine> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let machine = Arc::new(Machine {
            id,
            user: user.to_string(),
            info,
            mnps: AtomicU64::new(0.0_f64.to_bits()),
            updated: AtomicI64::new(now.timestamp_millis()),
        });

        // Make sure the owner has a profile to credit games to
        ledger.profile(user);

        self.machines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&machine));

        info!(machine_id = id, user, "registered machine");
        machine
    }

    pub fn get(&self, id: MachineId) -> Option<Arc<Machine>> {
        self.machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Machines seen within `window` of `now`, optionally owned by `user`.
    pub fn recent(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        user: Option<&str>,
    ) -> Vec<Arc<Machine>> {
        let cutoff = now - window;
        self.machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| m.seen_since(cutoff))
            .filter(|m| user.map_or(true, |u| m.user == u))
            .cloned()
            .collect()
    }

    pub fn fleet_status(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        user: Option<&str>,
    ) -> FleetStatus {
        self.recent(now, window, user)
            .iter()
            .fold(FleetStatus::default(), |mut status, machine| {
                let threads = machine.info.concurrency as u64;
                status.machines += 1;
                status.threads += threads;
                status.mnps += threads as f64 * machine.mnps();
                status
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(mac: &str, concurrency: u32) -> MachineInfo {
        MachineInfo {
            mac_address: Some(mac.to_string()),
            concurrency,
            extra: serde_json::Map::new(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_register_then_resolve() {
        let registry = MachineRegistry::new();
        let ledger = Ledger::new();

        let machine = registry
            .resolve(None, "andrew", info("aa:bb:cc:dd:ee:ff", 8), &ledger, noon())
            .unwrap();
        assert_eq!(machine.user, "andrew");

        let again = registry
            .resolve(Some(machine.id), "andrew", info("aa:bb:cc:dd:ee:ff", 8), &ledger, noon())
            .unwrap();
        assert_eq!(again.id, machine.id);
    }

    #[test]
    fn test_mac_mismatch_never_resolves() {
        let registry = MachineRegistry::new();
        let ledger = Ledger::new();
        let machine = registry
            .resolve(None, "andrew", info("aa:bb:cc:dd:ee:ff", 8), &ledger, noon())
            .unwrap();

        let other = info("11:22:33:44:55:66", 8);
        let spoofed = registry.resolve(Some(machine.id), "andrew", other, &ledger, noon());
        assert!(spoofed.is_none());

        // The stored identity is untouched
        let stored = registry.get(machine.id).unwrap();
        assert_eq!(stored.info.mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));

        let missing = MachineInfo {
            mac_address: None,
            concurrency: 8,
            extra: serde_json::Map::new(),
        };
        assert!(registry
            .resolve(Some(machine.id), "andrew", missing, &ledger, noon())
            .is_none());
        assert!(registry
            .resolve(Some(999), "andrew", info("aa:bb:cc:dd:ee:ff", 8), &ledger, noon())
            .is_none());
    }

    #[test]
    fn test_stored_machine_without_mac_never_resolves() {
        let registry = MachineRegistry::new();
        let ledger = Ledger::new();
        let bare = MachineInfo {
            mac_address: None,
            concurrency: 2,
            extra: serde_json::Map::new(),
        };
        let machine = registry.resolve(None, "andrew", bare.clone(), &ledger, noon()).unwrap();
        assert!(registry.resolve(Some(machine.id), "andrew", bare, &ledger, noon()).is_none());
    }

    #[test]
    fn test_fleet_status_window() {
        let registry = MachineRegistry::new();
        let ledger = Ledger::new();
        let window = Duration::minutes(5);

        let fresh = registry
            .resolve(None, "andrew", info("01", 16), &ledger, noon())
            .unwrap();
        fresh.record_throughput(1.5, noon());

        let other = registry
            .resolve(None, "kim", info("02", 4), &ledger, noon())
            .unwrap();
        other.record_throughput(2.0, noon() - Duration::minutes(2));

        let stale = registry
            .resolve(None, "andrew", info("03", 32), &ledger, noon())
            .unwrap();
        stale.record_throughput(3.0, noon() - Duration::minutes(30));

        let status = registry.fleet_status(noon(), window, None);
        assert_eq!(status.machines, 2);
        assert_eq!(status.threads, 20);
        assert!((status.mnps - 32.0).abs() < 1e-9);
        assert_eq!(status.to_string(), ": 2 Machines / 20 Threads / 32.00 MNPS ");

        let mine = registry.fleet_status(noon(), window, Some("andrew"));
        assert_eq!(mine.machines, 1);
        assert_eq!(mine.threads, 16);
    }
}
