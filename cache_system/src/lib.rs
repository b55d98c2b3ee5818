//! Bounded per-tenant cache of parsed block metadata (§4.3).
//!
//! Grounded on the shape of the teacher's `cache_system::cache::driver`
//! module (a backend store driven through a thin façade that reports
//! hits/misses), simplified here to a synchronous LRU: the meta syncer
//! itself decides hit vs. miss and performs any fetch, so no loader
//! indirection is needed the way the teacher's async `CacheDriver` requires
//! one for coalescing concurrent queries.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

use data_types::{Block, BlockId};
use hashlink::LruCache;
use metric::{Attributes, Registry, U64Counter, U64Gauge};
use parking_lot::Mutex;
use std::sync::Arc;

/// Snapshot of cache counters (§4.3 "reports items, bytes, hits, misses").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently resident.
    pub items: u64,
    /// Approximate total size in bytes of cached blocks' files.
    pub bytes: u64,
    /// Cumulative cache hits.
    pub hits: u64,
    /// Cumulative cache misses.
    pub misses: u64,
}

/// Only blocks that are expensive to reparse are worth caching: high
/// compaction level (large merged output) with a bounded ancestor count
/// (§4.3 "only blocks with `compaction_level >= min_level` and
/// `len(sources) <= max_sources` are admitted").
#[derive(Debug, Clone, Copy)]
pub struct AdmissionPolicy {
    /// Minimum compaction level to admit.
    pub min_level: u32,
    /// Maximum `sources` length to admit.
    pub max_sources: usize,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            min_level: 2,
            max_sources: 1_000,
        }
    }
}

struct State {
    entries: LruCache<BlockId, Arc<Block>>,
    bytes: u64,
}

/// A bounded, per-tenant `block_id -> parsed meta` cache, evicted
/// least-recently-used.
#[derive(Debug)]
pub struct MetaCache {
    state: Mutex<State>,
    max_entries: usize,
    policy: AdmissionPolicy,
    hits: Arc<U64Counter>,
    misses: Arc<U64Counter>,
    items_gauge: Arc<U64Gauge>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("len", &self.entries.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl MetaCache {
    /// Create a new cache bounded at `max_entries`, registering its gauges
    /// and counters under `tenant` in `registry`.
    pub fn new(
        tenant: &str,
        max_entries: usize,
        policy: AdmissionPolicy,
        registry: &Registry,
    ) -> Self {
        let attrs = Attributes::from([("tenant", tenant)]);
        let hits = registry
            .register_counter("meta_cache_hits_total", "meta cache hits")
            .recorder(attrs.clone());
        let misses = registry
            .register_counter("meta_cache_misses_total", "meta cache misses")
            .recorder(attrs.clone());
        let items_gauge = registry
            .register_gauge("meta_cache_items", "meta cache resident entry count")
            .recorder(attrs);
        Self {
            state: Mutex::new(State {
                entries: LruCache::new(max_entries.max(1)),
                bytes: 0,
            }),
            max_entries,
            policy,
            hits,
            misses,
            items_gauge,
        }
    }

    /// Look up a block by id, bumping its recency on hit.
    pub fn get(&self, id: &BlockId) -> Option<Arc<Block>> {
        let mut state = self.state.lock();
        let found = state.entries.get(id).cloned();
        if found.is_some() {
            self.hits.inc(1);
        } else {
            self.misses.inc(1);
        }
        found
    }

    /// Insert a freshly parsed block. Silently a no-op if the block fails
    /// the admission policy (§4.3) — the caller should proceed to use the
    /// value without it ever having been cached.
    pub fn insert(&self, block: Arc<Block>) {
        if block.compaction_level < self.policy.min_level
            || block.sources.len() > self.policy.max_sources
        {
            return;
        }
        let size: u64 = block.files.iter().map(|f| f.size_bytes).sum();
        let mut state = self.state.lock();
        if let Some(evicted) = state.entries.insert(block.id, block) {
            state.bytes = state.bytes.saturating_sub(
                evicted.files.iter().map(|f| f.size_bytes).sum(),
            );
        }
        state.bytes += size;
        // hashlink's LruCache doesn't itself enforce a capacity bound on
        // insert; evict manually down to max_entries.
        while state.entries.len() > self.max_entries {
            if let Some((_, evicted)) = state.entries.remove_lru() {
                state.bytes = state
                    .bytes
                    .saturating_sub(evicted.files.iter().map(|f| f.size_bytes).sum());
            } else {
                break;
            }
        }
        self.items_gauge.set(state.entries.len() as u64);
    }

    /// Remove an entry, e.g. because its block was deleted.
    pub fn remove(&self, id: &BlockId) {
        let mut state = self.state.lock();
        if let Some(removed) = state.entries.remove(id) {
            state.bytes = state
                .bytes
                .saturating_sub(removed.files.iter().map(|f| f.size_bytes).sum());
        }
        self.items_gauge.set(state.entries.len() as u64);
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            items: state.entries.len() as u64,
            bytes: state.bytes,
            hits: self.hits.fetch(),
            misses: self.misses.fetch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{BlockFile, BlockStats, TimestampMillis};
    use std::collections::{BTreeMap, BTreeSet};

    fn block(level: u32, sources: usize, size: u64) -> Arc<Block> {
        let id = BlockId::generate_at(1);
        let mut src = BTreeSet::new();
        for i in 0..sources.max(1) {
            src.insert(BlockId::generate_at(i as u64 + 1));
        }
        if level == 1 {
            src.insert(id);
        }
        Arc::new(Block {
            id,
            min_time: TimestampMillis::new(0),
            max_time: TimestampMillis::new(1),
            compaction_level: level,
            sources: src,
            parents: BTreeSet::new(),
            resolution: 0,
            external_labels: BTreeMap::new(),
            files: vec![BlockFile {
                name: "index".into(),
                size_bytes: size,
            }],
            uploaded_at: 0,
            out_of_order: false,
            stats: BlockStats::default(),
        })
    }

    #[test]
    fn admission_policy_rejects_cheap_blocks() {
        let registry = Registry::new();
        let cache = MetaCache::new(
            "t",
            10,
            AdmissionPolicy {
                min_level: 2,
                max_sources: 5,
            },
            &registry,
        );
        let level1 = block(1, 1, 100);
        let id = level1.id;
        cache.insert(level1);
        assert!(cache.get(&id).is_none());
        assert_eq!(cache.stats().items, 0);
    }

    #[test]
    fn admitted_block_is_cached_and_evicted_lru() {
        let registry = Registry::new();
        let cache = MetaCache::new(
            "t",
            2,
            AdmissionPolicy {
                min_level: 2,
                max_sources: 5,
            },
            &registry,
        );
        let a = block(2, 1, 10);
        let b = block(2, 1, 10);
        let c = block(2, 1, 10);
        let (id_a, id_b, id_c) = (a.id, b.id, c.id);

        cache.insert(a);
        cache.insert(b);
        assert_eq!(cache.stats().items, 2);

        // touch `a` so it's more recent than `b`
        assert!(cache.get(&id_a).is_some());
        cache.insert(c);

        assert_eq!(cache.stats().items, 2);
        assert!(cache.get(&id_a).is_some());
        assert!(cache.get(&id_c).is_some());
        assert!(cache.get(&id_b).is_none());
    }
}
