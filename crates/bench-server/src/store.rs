//! Test repository.
//!
//! Each test sits behind its own mutex. That mutex is the only exclusive
//! lock in the aggregation path: holding it serializes the
//! read-modify-decide-write cycle for one test without blocking any other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bench_core::{TestId, TestQuery, Workload};

/// Shared handle to one test's lock.
pub type TestHandle = Arc<Mutex<Workload>>;

/// Storage port for tests.
pub trait TestRepository: Send + Sync {
    /// Allocate the id for a test about to be inserted.
    fn next_id(&self) -> TestId;

    fn insert(&self, test: Workload) -> TestId;

    fn get(&self, id: TestId) -> Option<TestHandle>;

    /// Point-in-time copies of every stored test.
    fn snapshot(&self) -> Vec<Workload>;

    /// Owned, ordered listing for a query.
    fn query(&self, query: TestQuery) -> Vec<Workload> {
        let tests = self.snapshot();
        query.select(&tests).into_iter().cloned().collect()
    }
}

/// Lock a test, recovering the guard if a previous holder panicked.
///
/// `apply_batch` computes every new counter with checked arithmetic before
/// assigning any of them, so a poisoned test is never left half-updated.
pub fn lock_test(handle: &TestHandle) -> MutexGuard<'_, Workload> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tests: RwLock<HashMap<TestId, TestHandle>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestRepository for MemoryStore {
    fn next_id(&self) -> TestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn insert(&self, test: Workload) -> TestId {
        let id = test.id;
        self.tests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(test)));
        id
    }

    fn get(&self, id: TestId) -> Option<TestHandle> {
        self.tests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn snapshot(&self) -> Vec<Workload> {
        let handles: Vec<TestHandle> = self
            .tests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.iter().map(|h| lock_test(h).clone()).collect()
    }
}
