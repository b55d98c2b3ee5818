//! Consistent-hash ring: placement, shuffle-sharding and stability waits
//! (§3 "Ring", §4.1, §4.8).

use crate::hashing::fnv1a_32;
use crate::instance::{InstanceDescriptor, InstanceState};
use crate::store::RingStore;
use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tokens-per-instance, matching the teacher's default ring configuration.
pub const DEFAULT_TOKENS_PER_INSTANCE: usize = 128;

/// A request for placement: which lifecycle states may serve it.
#[derive(Debug, Clone, Copy)]
pub struct RingOp {
    admitted: &'static [InstanceState],
}

impl RingOp {
    /// Only fully ACTIVE instances may own compaction or cleanup work
    /// (§3 "execution ownership").
    pub fn compaction() -> Self {
        Self {
            admitted: &[InstanceState::Active],
        }
    }

    /// ACTIVE and LEAVING instances both count for rollout-stability
    /// purposes (§3 "visible for rollout stability").
    pub fn stability() -> Self {
        Self {
            admitted: &[InstanceState::Active, InstanceState::Leaving],
        }
    }

    fn admits(&self, state: InstanceState) -> bool {
        self.admitted.contains(&state)
    }
}

/// The result of a `Ring::get` placement lookup: the distinct instances
/// that own a hash, in ring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSet(pub Vec<String>);

/// Errors raised while resolving placement.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Fewer distinct admitted instances exist on the ring than requested.
    #[error("not enough instances: need {want}, ring has {have}")]
    NotEnoughInstances { want: usize, have: usize },
    /// The ring has no members at all.
    #[error("ring is empty")]
    Empty,
}

/// A read-through view over a [`RingStore`], plus the subset of membership
/// operations the compactor binary needs (§4.1).
#[derive(Debug, Clone)]
pub struct Ring {
    store: Arc<dyn RingStore>,
}

impl Ring {
    /// Wrap a backing store.
    pub fn new(store: Arc<dyn RingStore>) -> Self {
        Self { store }
    }

    /// Register this instance as PENDING with freshly derived tokens,
    /// or update its heartbeat if already present (§3 "Lifecycle").
    pub fn register(
        &self,
        id: &str,
        zone: &str,
        num_tokens: usize,
        now_unix_secs: i64,
    ) -> Result<(), crate::store::CasConflict> {
        loop {
            let snapshot = self.store.read();
            if snapshot.instances.contains_key(id) {
                return Ok(());
            }
            let mut instances = snapshot.instances.clone();
            let tokens = derive_tokens(id, num_tokens);
            instances.insert(
                id.to_string(),
                InstanceDescriptor {
                    id: id.to_string(),
                    zone: zone.to_string(),
                    state: InstanceState::Pending,
                    heartbeat_timestamp: now_unix_secs,
                    registered_timestamp: now_unix_secs,
                    tokens,
                },
            );
            match self.store.compare_and_swap(snapshot.version, instances) {
                Ok(_) => return Ok(()),
                Err(conflict) if conflict.actual == snapshot.version => {
                    return Err(conflict);
                }
                Err(_) => continue,
            }
        }
    }

    /// Transition this instance to `state`.
    pub fn set_state(&self, id: &str, state: InstanceState) {
        loop {
            let snapshot = self.store.read();
            let mut instances = snapshot.instances.clone();
            match instances.get_mut(id) {
                Some(descriptor) => descriptor.state = state,
                None => return,
            }
            if self
                .store
                .compare_and_swap(snapshot.version, instances)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Refresh this instance's heartbeat timestamp.
    pub fn heartbeat(&self, id: &str, now_unix_secs: i64) {
        loop {
            let snapshot = self.store.read();
            let mut instances = snapshot.instances.clone();
            match instances.get_mut(id) {
                Some(descriptor) => descriptor.heartbeat_timestamp = now_unix_secs,
                None => return,
            }
            if self
                .store
                .compare_and_swap(snapshot.version, instances)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Remove this instance from the ring entirely (clean shutdown).
    pub fn unregister(&self, id: &str) {
        loop {
            let snapshot = self.store.read();
            if !snapshot.instances.contains_key(id) {
                return;
            }
            let mut instances = snapshot.instances.clone();
            instances.remove(id);
            if self
                .store
                .compare_and_swap(snapshot.version, instances)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Current membership snapshot.
    pub fn instances(&self) -> BTreeMap<String, InstanceDescriptor> {
        self.store.read().instances
    }

    /// Whether `id` is currently a member, in any state.
    pub fn has_instance(&self, id: &str) -> bool {
        self.store.read().instances.contains_key(id)
    }

    /// Resolve placement for `hash` under `op`, walking the combined token
    /// ring clockwise and collecting the next `replication_factor` distinct
    /// admitted instances (§4.1 "Get").
    pub fn get(&self, hash: u32, op: RingOp, replication_factor: usize) -> Result<ReplicationSet, RingError> {
        self.get_among(hash, op, replication_factor, None)
    }

    /// Resolve placement for `hash` under `op`, restricted to the token ring
    /// formed by `members` alone (§4.8: a job's sharding-key hash must be
    /// resolved within the tenant's subring, not the whole ring — otherwise
    /// the global next-owner for a hash can land outside the tenant's
    /// shuffle-shard and the job goes unowned).
    pub fn get_within(
        &self,
        hash: u32,
        op: RingOp,
        replication_factor: usize,
        members: &[String],
    ) -> Result<ReplicationSet, RingError> {
        self.get_among(hash, op, replication_factor, Some(members))
    }

    fn get_among(
        &self,
        hash: u32,
        op: RingOp,
        replication_factor: usize,
        members: Option<&[String]>,
    ) -> Result<ReplicationSet, RingError> {
        let instances = self.instances();
        if instances.is_empty() {
            return Err(RingError::Empty);
        }

        let mut tokens: Vec<(u32, &str)> = instances
            .values()
            .filter(|d| op.admits(d.state))
            .filter(|d| members.map(|m| m.contains(&d.id)).unwrap_or(true))
            .flat_map(|d| d.tokens.iter().map(move |t| (*t, d.id.as_str())))
            .collect();
        tokens.sort_unstable();

        if tokens.is_empty() {
            return Err(RingError::NotEnoughInstances {
                want: replication_factor,
                have: 0,
            });
        }

        let start = tokens.partition_point(|(t, _)| *t < hash);
        let mut owners = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..tokens.len() {
            let (_, id) = tokens[(start + i) % tokens.len()];
            if seen.insert(id) {
                owners.push(id.to_string());
            }
            if owners.len() == replication_factor {
                break;
            }
        }

        if owners.len() < replication_factor {
            return Err(RingError::NotEnoughInstances {
                want: replication_factor,
                have: owners.len(),
            });
        }
        Ok(ReplicationSet(owners))
    }

    /// Deterministically select `shard_size` ACTIVE instances for `tenant`
    /// (§4.8 "tenant_shard_size"). `shard_size == 0` means "use the whole
    /// ring". The selection is a pure function of ring membership and
    /// `tenant`, so every instance computes the same subring independently.
    pub fn shuffle_shard(&self, tenant: &str, shard_size: usize) -> Vec<String> {
        let mut active: Vec<String> = self
            .instances()
            .into_values()
            .filter(|d| d.state == InstanceState::Active)
            .map(|d| d.id)
            .collect();
        active.sort();

        if shard_size == 0 || shard_size >= active.len() {
            return active;
        }

        let seed = fnv1a_32(tenant.as_bytes());
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(seed));
        active.shuffle(&mut rng);
        active.truncate(shard_size);
        active.sort();
        active
    }

    /// Poll until `id` reaches `target` state, or `timeout` elapses.
    pub async fn wait_instance_state(
        &self,
        id: &str,
        target: InstanceState,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self
                .instances()
                .get(id)
                .map(|d| d.state == target)
                .unwrap_or(false)
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline || cancel.is_cancelled() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Wait for the ring to go `min_stability` without a membership change,
    /// giving up after `max_wait` regardless (§4.1 "Ring stability").
    pub async fn wait_ring_stability(
        &self,
        min_stability: Duration,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut last = self.store.read().version;
        let mut stable_since = tokio::time::Instant::now();
        loop {
            if tokio::time::Instant::now().duration_since(stable_since) >= min_stability {
                return;
            }
            if tokio::time::Instant::now() >= deadline || cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = cancel.cancelled() => return,
            }
            let current = self.store.read().version;
            if current != last {
                last = current;
                stable_since = tokio::time::Instant::now();
            }
        }
    }
}

/// Derive `num_tokens` pseudorandom token positions for an instance id,
/// seeded by the id itself so tokens are stable across restarts with the
/// same id (§3 "Ring ... tokens are derived deterministically").
fn derive_tokens(id: &str, num_tokens: usize) -> Vec<u32> {
    (0..num_tokens)
        .map(|i| fnv1a_32(format!("{id}-{i}").as_bytes()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRingStore;

    fn ring_with(instances: &[(&str, InstanceState)]) -> Ring {
        let store = Arc::new(InMemoryRingStore::new());
        let ring = Ring::new(store.clone());
        for (id, state) in instances {
            ring.register(id, "zone-a", 16, 0).unwrap();
            ring.set_state(id, *state);
        }
        ring
    }

    #[test]
    fn get_requires_enough_admitted_instances() {
        let ring = ring_with(&[("a", InstanceState::Active)]);
        let err = ring.get(42, RingOp::compaction(), 2).unwrap_err();
        assert!(matches!(err, RingError::NotEnoughInstances { want: 2, have: 1 }));
    }

    #[test]
    fn get_is_deterministic_for_a_fixed_ring() {
        let ring = ring_with(&[
            ("a", InstanceState::Active),
            ("b", InstanceState::Active),
            ("c", InstanceState::Active),
        ]);
        let first = ring.get(7, RingOp::compaction(), 2).unwrap();
        let second = ring.get(7, RingOp::compaction(), 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pending_instances_are_excluded_from_compaction_ownership() {
        let ring = ring_with(&[("a", InstanceState::Active), ("b", InstanceState::Pending)]);
        let err = ring.get(1, RingOp::compaction(), 2).unwrap_err();
        assert!(matches!(err, RingError::NotEnoughInstances { have: 1, .. }));
    }

    #[test]
    fn shuffle_shard_is_stable_across_calls() {
        let ring = ring_with(&[
            ("a", InstanceState::Active),
            ("b", InstanceState::Active),
            ("c", InstanceState::Active),
            ("d", InstanceState::Active),
        ]);
        let first = ring.shuffle_shard("tenant-1", 2);
        let second = ring.shuffle_shard("tenant-1", 2);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn shuffle_shard_zero_means_whole_ring() {
        let ring = ring_with(&[("a", InstanceState::Active), ("b", InstanceState::Active)]);
        assert_eq!(ring.shuffle_shard("tenant-1", 0).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_instance_state_times_out_if_never_reached() {
        let ring = ring_with(&[("a", InstanceState::Pending)]);
        let cancel = CancellationToken::new();
        let reached = ring
            .wait_instance_state("a", InstanceState::Active, Duration::from_millis(300), &cancel)
            .await;
        assert!(!reached);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_instance_state_succeeds_once_state_matches() {
        let ring = ring_with(&[("a", InstanceState::Active)]);
        let cancel = CancellationToken::new();
        let reached = ring
            .wait_instance_state("a", InstanceState::Active, Duration::from_millis(300), &cancel)
            .await;
        assert!(reached);
    }
}
