//! Discovers blocks in a tenant's prefix, reconciles them against the meta
//! cache and marker objects, and garbage-collects superseded blocks (§4.4).

use crate::filters;
use crate::meta_json::parse_meta_json;
use cache_system::MetaCache;
use data_types::{Block, BlockId, DeletionMark};
use object_store_ext::{list_children, put_json, BucketStore};
use observability_deps::tracing::{debug, warn};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use time_provider::TimeProvider;
use tokio::sync::Semaphore;

const META_FILE: &str = "meta.json";
const DELETION_MARK_FILE: &str = "deletion-mark.json";
const NO_COMPACT_MARK_FILE: &str = "no-compact-mark.json";

/// One block that could not be synced, and why (§4.4 step 2, §7
/// "Corrupted metadata").
#[derive(Debug, Clone)]
pub struct PartialBlock {
    /// The block directory name (a [`BlockId`]'s string form).
    pub id: String,
    /// Human-readable cause.
    pub reason: String,
}

/// Result of one `sync_metas` call.
#[derive(Debug, Default)]
pub struct SyncResult {
    /// Blocks that survived the full filter chain.
    pub blocks: Vec<Block>,
    /// Block directories that failed to parse or were missing `meta.json`.
    pub partials: Vec<PartialBlock>,
}

/// Parameters controlling one sync, taken from [`data_types::CompactionConfig`]
/// so call sites don't need to pass the whole config struct through.
#[derive(Debug, Clone)]
pub struct SyncParams {
    /// Bound on concurrent `meta.json` fetches (§6 `meta_sync_concurrency`).
    pub meta_sync_concurrency: usize,
    /// External labels dropped by the label-remover filter.
    pub ignored_external_labels: Vec<String>,
}

/// Discovers and filters a tenant's surviving blocks (§4.4).
#[derive(Debug)]
pub struct MetaSyncer {
    store: Arc<dyn BucketStore>,
    cache: Arc<MetaCache>,
    time_provider: Arc<dyn TimeProvider>,
}

impl MetaSyncer {
    /// Build a syncer for one tenant's prefix, backed by `store` and
    /// caching parsed metas in `cache`.
    pub fn new(store: Arc<dyn BucketStore>, cache: Arc<MetaCache>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            cache,
            time_provider,
        }
    }

    /// Run the full `sync_metas` algorithm for `tenant` (§4.4 steps 1-4).
    pub async fn sync_metas(&self, tenant: &str, params: &SyncParams) -> SyncResult {
        let block_ids = self.list_block_ids(tenant).await;
        let no_compact_marked = self.list_no_compact_marks(tenant).await;

        let semaphore = Arc::new(Semaphore::new(params.meta_sync_concurrency.max(1)));
        let mut tasks = Vec::with_capacity(block_ids.len());
        for id in block_ids {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let cache = self.cache.clone();
            let tenant = tenant.to_string();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                fetch_one(&*store, &cache, &tenant, &id).await
            }));
        }

        let mut blocks = Vec::new();
        let mut partials = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(block)) => blocks.push(block),
                Ok(Err(partial)) => partials.push(partial),
                Err(join_err) => warn!(%join_err, "meta fetch task panicked"),
            }
        }

        filters::remove_ignored_labels(&mut blocks, &params.ignored_external_labels);
        let blocks = filters::dedup_by_sources(blocks);
        let blocks = filters::exclude_no_compact(blocks, &no_compact_marked);

        SyncResult { blocks, partials }
    }

    /// Mark every block redundant under a surviving superset for deletion
    /// (§4.4 `garbage_collect`). Returns the ids newly marked.
    pub async fn garbage_collect(&self, tenant: &str, surviving: &[Block]) -> Vec<BlockId> {
        let redundant = find_redundant(surviving);
        let mut newly_marked = Vec::new();
        for id in redundant {
            let mark_path = format!("{tenant}/{id}/{DELETION_MARK_FILE}");
            match self.store.attributes(&mark_path).await {
                Ok(_) => continue, // already marked; idempotent no-op (§4.4 guarantee c)
                Err(object_store_ext::Error::NotFound { .. }) => {}
                Err(e) => {
                    warn!(%e, %id, "failed to check existing deletion mark, skipping GC for this block");
                    continue;
                }
            }
            let mark = DeletionMark::new(id, self.time_provider.now().timestamp_secs(), "garbage collection");
            if let Err(e) = put_json(&*self.store, &mark_path, &mark).await {
                warn!(%e, %id, "failed to write GC deletion mark");
                continue;
            }
            newly_marked.push(id);
        }
        newly_marked
    }

    async fn list_block_ids(&self, tenant: &str) -> Vec<BlockId> {
        let names = list_children(&*self.store, &format!("{tenant}/")).await.unwrap_or_default();
        names.iter().filter_map(|n| BlockId::parse(n).ok()).collect()
    }

    async fn list_no_compact_marks(&self, tenant: &str) -> HashSet<BlockId> {
        let names = list_children(&*self.store, &format!("{tenant}/markers/"))
            .await
            .unwrap_or_default();
        names
            .iter()
            .filter_map(|n| n.strip_suffix(&format!("-{NO_COMPACT_MARK_FILE}")))
            .filter_map(|id| BlockId::parse(id).ok())
            .collect()
    }
}

async fn fetch_one(
    store: &dyn BucketStore,
    cache: &MetaCache,
    tenant: &str,
    id: &BlockId,
) -> Result<Block, PartialBlock> {
    if let Some(cached) = cache.get(id) {
        return Ok((*cached).clone());
    }

    let meta_path = format!("{tenant}/{id}/{META_FILE}");
    let (bytes, attrs) = match (
        store.get(&meta_path).await,
        store.attributes(&meta_path).await,
    ) {
        (Ok(bytes), Ok(attrs)) => (bytes, attrs),
        (Err(object_store_ext::Error::NotFound { .. }), _) | (_, Err(object_store_ext::Error::NotFound { .. })) => {
            return Err(PartialBlock {
                id: id.to_string(),
                reason: "missing meta.json".to_string(),
            });
        }
        (Err(e), _) | (_, Err(e)) => {
            return Err(PartialBlock {
                id: id.to_string(),
                reason: e.to_string(),
            });
        }
    };

    let block = match parse_meta_json(&bytes, attrs.last_modified_unix_secs) {
        Ok(block) => block,
        Err(e) => {
            return Err(PartialBlock {
                id: id.to_string(),
                reason: format!("corrupted meta.json: {e}"),
            });
        }
    };

    debug!(%id, "parsed meta.json, inserting into cache");
    cache.insert(Arc::new(block.clone()));
    Ok(block)
}

/// Blocks whose `sources` are a strict subset of some other surviving
/// block's `sources` at the same resolution (§4.4 `garbage_collect`'s
/// redundancy rule, and §8 invariant 1). Containment, not id membership: a
/// block with `sources = {s0}` is redundant under a block with
/// `sources = {s0, s1}` even though `s0`'s own id never appears as an
/// element of anyone's `sources` list.
fn find_redundant(surviving: &[Block]) -> BTreeSet<BlockId> {
    let mut redundant = BTreeSet::new();
    for sub in surviving {
        let covered = surviving.iter().any(|superset| {
            superset.id != sub.id
                && superset.resolution == sub.resolution
                && sub.sources.is_subset(&superset.sources)
                && sub.sources != superset.sources
        });
        if covered {
            redundant.insert(sub.id);
        }
    }
    redundant
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{BlockFile, BlockStats, TimestampMillis};
    use std::collections::BTreeMap;

    fn block(id: BlockId, level: u32, sources: &[BlockId], resolution: i64) -> Block {
        Block {
            id,
            min_time: TimestampMillis::new(0),
            max_time: TimestampMillis::new(7_200_000),
            compaction_level: level,
            sources: sources.iter().copied().collect(),
            parents: BTreeSet::new(),
            resolution,
            external_labels: BTreeMap::new(),
            files: vec![BlockFile {
                name: "index".into(),
                size_bytes: 1,
            }],
            uploaded_at: 0,
            out_of_order: false,
            stats: BlockStats::default(),
        }
    }

    #[test]
    fn gc_seed_scenario_level_3_covers_level_2s() {
        // §8 seed scenario: s0..s9 level 1; m1 covers s0..s3; m2 covers
        // s4..s7; m3 (level 3) covers s0..s8; m4/m5 at a different
        // resolution cover s9/s8 respectively. Expected survivors after one
        // GC pass: {s9, m3, m4, m5}.
        let s: Vec<BlockId> = (0..10).map(|i| BlockId::generate_at(i + 1)).collect();
        let m1 = BlockId::generate_at(100);
        let m2 = BlockId::generate_at(101);
        let m3 = BlockId::generate_at(102);
        let m4 = BlockId::generate_at(103);
        let m5 = BlockId::generate_at(104);

        let mut blocks: Vec<Block> = s.iter().map(|id| block(*id, 1, &[*id], 0)).collect();
        blocks.push(block(m1, 2, &s[0..4], 0));
        blocks.push(block(m2, 2, &s[4..8], 0));
        blocks.push(block(m3, 3, &s[0..9], 0));
        blocks.push(block(m4, 2, &[s[9]], 1000));
        blocks.push(block(m5, 2, &[s[8]], 1000));

        let redundant = find_redundant(&blocks);
        let survivors: BTreeSet<BlockId> = blocks
            .iter()
            .map(|b| b.id)
            .filter(|id| !redundant.contains(id))
            .collect();

        let expected: BTreeSet<BlockId> = [s[9], m3, m4, m5].into_iter().collect();
        assert_eq!(survivors, expected);
    }

    #[test]
    fn gc_is_idempotent_on_already_marked_blocks() {
        // Covered at the integration level by `MetaSyncer::garbage_collect`'s
        // existing-mark check; `find_redundant` itself is a pure function
        // that always returns the same set for the same input.
        let id = BlockId::generate_at(1);
        let superset = BlockId::generate_at(2);
        let blocks = vec![block(id, 1, &[id], 0), block(superset, 2, &[id], 0)];
        assert_eq!(find_redundant(&blocks), find_redundant(&blocks));
    }
}
