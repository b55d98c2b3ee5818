//! The small KV store backing ring membership (§4.1: "a map of
//! `instance_id -> descriptor` persisted in a small KV store with CAS
//! semantics").
//!
//! This workspace ships only an in-memory implementation: a real etcd/Consul
//! client is transport wiring, out of scope per §1. The trait exists so the
//! placement logic in [`crate::ring::Ring`] is testable against a fake, the
//! same way the teacher's test helpers (e.g. `iox_tests::util::TestCatalog`)
//! stand in for a real backend.

use crate::instance::InstanceDescriptor;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A snapshot of ring membership plus an opaque version used for
/// compare-and-swap.
#[derive(Debug, Clone, Default)]
pub struct RingSnapshot {
    /// CAS version; incremented on every successful write.
    pub version: u64,
    /// Current membership, keyed by instance id.
    pub instances: BTreeMap<String, InstanceDescriptor>,
}

/// Error returned when a compare-and-swap write loses a race.
#[derive(Debug, thiserror::Error)]
#[error("CAS conflict: expected version {expected}, store is at {actual}")]
pub struct CasConflict {
    /// The version the caller expected to overwrite.
    pub expected: u64,
    /// The version actually found in the store.
    pub actual: u64,
}

/// The ring's backing KV store. CAS failures are retried with bounded
/// backoff by callers (§4.1 "Failure").
pub trait RingStore: std::fmt::Debug + Send + Sync + 'static {
    /// Read the current snapshot.
    fn read(&self) -> RingSnapshot;

    /// Write a new snapshot if `expected_version` still matches the
    /// store's current version, returning the new version on success.
    fn compare_and_swap(
        &self,
        expected_version: u64,
        instances: BTreeMap<String, InstanceDescriptor>,
    ) -> Result<u64, CasConflict>;
}

/// In-memory [`RingStore`], sufficient for single-process tests and for the
/// zero-dependency "all compactors in one process" deployment shape.
#[derive(Debug, Default)]
pub struct InMemoryRingStore {
    state: Mutex<RingSnapshot>,
}

impl InMemoryRingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RingStore for InMemoryRingStore {
    fn read(&self) -> RingSnapshot {
        self.state.lock().clone()
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        instances: BTreeMap<String, InstanceDescriptor>,
    ) -> Result<u64, CasConflict> {
        let mut state = self.state.lock();
        if state.version != expected_version {
            return Err(CasConflict {
                expected: expected_version,
                actual: state.version,
            });
        }
        state.version += 1;
        state.instances = instances;
        Ok(state.version)
    }
}
