//! The blocks cleaner: retention, index maintenance, delayed hard
//! deletion, partial-block handling, and tenant teardown (§4.7).

use crate::index_io;
use compactor_core::{parse_meta_json, plan, PlannerConfig};
use data_types::{
    BlockId, BucketIndex, BucketIndexBlock, BucketIndexDeletionMark, CleanerConfig, DeletionMark,
    TenantDeletionMark,
};
use metric::{Attributes, Registry, U64Gauge};
use object_store_ext::{get_json, list_children, put_json, BucketStore};
use observability_deps::tracing::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use time_provider::TimeProvider;
use tokio::sync::Semaphore;

const DELETION_MARK_FILE: &str = "deletion-mark.json";
const NO_COMPACT_MARK_FILE: &str = "no-compact-mark.json";
const META_FILE: &str = "meta.json";
const TENANT_DELETION_MARK_PATH: &str = "markers/tenant-deletion-mark.json";

/// Summary of one cleanup cycle for a tenant, used by tests and logging.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Blocks newly marked for retention.
    pub retention_marked: usize,
    /// Blocks hard-deleted this cycle.
    pub hard_deleted: usize,
    /// Partial block directories newly marked.
    pub partials_marked: usize,
    /// Partial block directories hard-deleted (had a mark already).
    pub partials_deleted: usize,
    /// Whether the tenant was torn down entirely this cycle.
    pub tenant_torn_down: bool,
    /// Estimated number of pending compaction jobs, from the job-estimate
    /// pass (§4.7 step 8).
    pub estimated_pending_jobs: usize,
}

/// Runs the blocks-cleaner algorithm for one tenant at a time (§4.7).
#[derive(Debug)]
pub struct Cleaner {
    store: Arc<dyn BucketStore>,
    time_provider: Arc<dyn TimeProvider>,
    pending_jobs_gauge: Arc<U64Gauge>,
}

impl Cleaner {
    /// Build a cleaner over `store`, registering its metrics in `registry`.
    pub fn new(store: Arc<dyn BucketStore>, time_provider: Arc<dyn TimeProvider>, registry: &Registry) -> Self {
        let pending_jobs_gauge = registry
            .register_gauge(
                "compactor_estimated_pending_jobs",
                "estimated compaction jobs pending per tenant",
            )
            .recorder(Attributes::new());
        Self {
            store,
            time_provider,
            pending_jobs_gauge,
        }
    }

    /// Run one full cleanup cycle for `tenant` (§4.7 steps 1-8).
    pub async fn run_tenant_cycle(
        &self,
        tenant: &str,
        config: &CleanerConfig,
        planner_config: &PlannerConfig,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let now_secs = self.time_provider.now().timestamp_secs();

        // Step 6: tenant-deletion-mark handling takes priority over
        // everything else for a tenant that's being torn down.
        let tenant_mark_path = format!("{tenant}/{TENANT_DELETION_MARK_PATH}");
        if let Ok(mark) = get_json::<TenantDeletionMark>(&*self.store, &tenant_mark_path).await {
            if mark.eligible_for_hard_delete(now_secs, config.tenant_cleanup_delay.as_secs() as i64) {
                self.tear_down_tenant(tenant).await;
                report.tenant_torn_down = true;
                return report;
            }
        }

        // Step 1: existing index (only used to decide whether a prior
        // cycle's state looked sane; step 3 always recomputes it fresh).
        if let Err(e) = index_io::read_index(&*self.store, tenant).await {
            warn!(tenant, error = %e, "bucket index was corrupted, rebuilding from scratch");
        }

        let (parsed_blocks, partial_ids) = self.list_and_parse_blocks(tenant).await;

        // Step 2: retention.
        if let Some(retention) = config.retention {
            let cutoff = now_secs - retention.as_secs() as i64;
            for block in &parsed_blocks {
                if block.max_time.get() / 1000 >= cutoff {
                    continue;
                }
                let mark_path = format!("{tenant}/{}/{DELETION_MARK_FILE}", block.id);
                if self.store.attributes(&mark_path).await.is_ok() {
                    continue; // already marked
                }
                let mark = DeletionMark::new(block.id, now_secs, "retention");
                if put_json(&*self.store, &mark_path, &mark).await.is_ok() {
                    report.retention_marked += 1;
                }
            }
        }

        // Step 5: partial blocks.
        for id in &partial_ids {
            let mark_path = format!("{tenant}/{id}/{DELETION_MARK_FILE}");
            if self.store.attributes(&mark_path).await.is_ok() {
                self.hard_delete_block(tenant, *id).await;
                report.partials_deleted += 1;
                continue;
            }
            let age_secs = now_secs - (id.timestamp_millis() / 1000) as i64;
            let deletion_delay = config
                .partial_block_deletion_delay
                .map(|d| d.as_secs() as i64)
                .unwrap_or(i64::MAX);
            if age_secs >= deletion_delay {
                let mark = DeletionMark::new(*id, now_secs, "partial block");
                if put_json(&*self.store, &mark_path, &mark).await.is_ok() {
                    report.partials_marked += 1;
                }
            }
        }

        // Step 3: recompute the index — markers listed first (authoritative),
        // then block directories, per the ordering invariant in §4.7 step 3
        // and §5.
        let marks = self.list_deletion_marks(tenant).await;
        let marked_ids: HashSet<BlockId> = marks.iter().map(|m| m.block_id).collect();
        let index_blocks: Vec<BucketIndexBlock> = parsed_blocks
            .iter()
            .filter(|b| !marked_ids.contains(&b.id))
            .map(BucketIndexBlock::from)
            .collect();

        // Step 4: hard-delete blocks whose mark has aged past deletion_delay,
        // bounded by delete_blocks_concurrency.
        let semaphore = Arc::new(Semaphore::new(config.delete_blocks_concurrency.max(1)));
        let deletion_delay_secs = config.deletion_delay.as_secs() as i64;
        let mut deletions = Vec::new();
        for mark in &marks {
            if !mark_eligible_for_hard_delete(mark, now_secs, deletion_delay_secs) {
                continue;
            }
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let tenant = tenant.to_string();
            let id = mark.block_id;
            deletions.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                hard_delete(&*store, &tenant, id).await;
            }));
        }
        report.hard_deleted = deletions.len();
        for handle in deletions {
            let _ = handle.await;
        }

        // Step 7: write the refreshed index, or delete it if the tenant is
        // now empty.
        let surviving_marks: Vec<BucketIndexDeletionMark> = marks
            .into_iter()
            .filter(|m| !mark_eligible_for_hard_delete(m, now_secs, deletion_delay_secs))
            .collect();
        let index = BucketIndex::reconcile(index_blocks.clone(), surviving_marks, now_secs);
        if index.is_empty() {
            let _ = index_io::delete_index(&*self.store, tenant).await;
        } else if let Err(e) = index_io::write_index(&*self.store, tenant, &index).await {
            warn!(tenant, error = %e, "failed to write refreshed bucket index");
        }

        // Step 8: job-estimate metric, re-running the planner with the
        // dedup filter omitted (sources aren't persisted in the index).
        let estimate_blocks: Vec<data_types::Block> = index_blocks
            .iter()
            .map(|b| data_types::Block {
                id: b.id,
                min_time: b.min_time,
                max_time: b.max_time,
                compaction_level: b.compaction_level,
                sources: [b.id].into_iter().collect(),
                parents: Default::default(),
                resolution: b.resolution,
                external_labels: b.labels.clone(),
                files: b.files.clone(),
                uploaded_at: now_secs,
                out_of_order: false,
                stats: Default::default(),
            })
            .collect();
        let tenant_id = data_types::TenantId::new(tenant);
        let now_millis = data_types::TimestampMillis::new(now_secs * 1000);
        let estimated = plan(&tenant_id, &estimate_blocks, planner_config, now_millis)
            .map(|jobs| jobs.len())
            .unwrap_or(0);
        report.estimated_pending_jobs = estimated;
        self.pending_jobs_gauge.set(estimated as u64);

        info!(tenant, ?report, "cleanup cycle completed");
        report
    }

    async fn list_and_parse_blocks(&self, tenant: &str) -> (Vec<data_types::Block>, Vec<BlockId>) {
        let names = list_children(&*self.store, &format!("{tenant}/")).await.unwrap_or_default();
        let mut blocks = Vec::new();
        let mut partials = Vec::new();
        for name in names {
            let Ok(id) = BlockId::parse(&name) else { continue };
            let meta_path = format!("{tenant}/{id}/{META_FILE}");
            match (
                self.store.get(&meta_path).await,
                self.store.attributes(&meta_path).await,
            ) {
                (Ok(bytes), Ok(attrs)) => match parse_meta_json(&bytes, attrs.last_modified_unix_secs) {
                    Ok(block) => blocks.push(block),
                    Err(_) => partials.push(id),
                },
                _ => partials.push(id),
            }
        }
        (blocks, partials)
    }

    async fn list_deletion_marks(&self, tenant: &str) -> Vec<BucketIndexDeletionMark> {
        let names = list_children(&*self.store, &format!("{tenant}/markers/"))
            .await
            .unwrap_or_default();
        let mut marks = Vec::new();
        for name in names {
            let Some(id_part) = name.strip_suffix(&format!("-{DELETION_MARK_FILE}")) else {
                continue;
            };
            let Ok(id) = BlockId::parse(id_part) else { continue };
            let path = format!("{tenant}/markers/{name}");
            if let Ok(mark) = get_json::<DeletionMark>(&*self.store, &path).await {
                marks.push(BucketIndexDeletionMark {
                    block_id: id,
                    deletion_time: mark.deletion_time,
                });
            }
        }
        marks
    }

    async fn hard_delete_block(&self, tenant: &str, id: BlockId) {
        hard_delete(&*self.store, tenant, id).await;
    }

    async fn tear_down_tenant(&self, tenant: &str) {
        let names = list_children(&*self.store, &format!("{tenant}/")).await.unwrap_or_default();
        for name in names {
            if let Ok(id) = BlockId::parse(&name) {
                hard_delete(&*self.store, tenant, id).await;
            }
        }
        let _ = index_io::delete_index(&*self.store, tenant).await;
        let _ = self.store.delete(&format!("{tenant}/{TENANT_DELETION_MARK_PATH}")).await;
    }
}

/// Whether `deletion_delay_secs` has elapsed since an index-level mark was
/// written (§8 invariant 5), mirroring [`DeletionMark::eligible_for_hard_delete`]
/// for the narrower [`BucketIndexDeletionMark`] shape.
fn mark_eligible_for_hard_delete(mark: &BucketIndexDeletionMark, now_unix_secs: i64, deletion_delay_secs: i64) -> bool {
    now_unix_secs - mark.deletion_time >= deletion_delay_secs
}

async fn hard_delete(store: &dyn BucketStore, tenant: &str, id: BlockId) {
    for file in [META_FILE, "index", DELETION_MARK_FILE, NO_COMPACT_MARK_FILE] {
        let _ = store.delete(&format!("{tenant}/{id}/{file}")).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store_ext::{put_json, GlobalMarkerStore, ObjectStoreBucket};
    use std::time::Duration;
    use time_provider::MockProvider;

    fn planner_config() -> PlannerConfig {
        PlannerConfig {
            block_ranges: vec![Duration::from_secs(7200)],
            split_groups: 1,
            sharding_enabled: false,
            jobs_order: data_types::JobOrder::OldestFirst,
        }
    }

    fn meta_json_for(id: BlockId, min: i64, max: i64) -> serde_json::Value {
        serde_json::json!({
            "version": 1,
            "ulid": id.to_string(),
            "minTime": min,
            "maxTime": max,
            "stats": {"numSeries": 1, "numSamples": 1, "numFloatSamples": 1, "numHistogramSamples": 0},
            "compaction": {"level": 1, "sources": [id.to_string()], "parents": [], "outOfOrder": false},
            "thanos": {"labels": {}, "downsample": {"resolution": 0}, "source": "ingester", "files": [{"rel_path": "index", "size_bytes": 10}]}
        })
    }

    #[tokio::test]
    async fn retention_seed_scenario_marks_only_the_old_block() {
        let store: Arc<dyn BucketStore> = Arc::new(GlobalMarkerStore::new(ObjectStoreBucket::new(Arc::new(
            object_store::memory::InMemory::new(),
        ))));
        let now_secs = 1_000_000i64;
        let old_id = BlockId::generate_at(1);
        let young_id = BlockId::generate_at(2);

        let old_max_ms = (now_secs - 25 * 3600) * 1000;
        let young_max_ms = (now_secs - 3600) * 1000;
        store
            .upload(
                &format!("acme/{old_id}/meta.json"),
                serde_json::to_vec(&meta_json_for(old_id, old_max_ms - 1000, old_max_ms)).unwrap().into(),
            )
            .await
            .unwrap();
        store
            .upload(
                &format!("acme/{young_id}/meta.json"),
                serde_json::to_vec(&meta_json_for(young_id, young_max_ms - 1000, young_max_ms)).unwrap().into(),
            )
            .await
            .unwrap();

        let time_provider: Arc<dyn TimeProvider> = Arc::new(MockProvider::new(time_provider::Time::from_timestamp_secs(now_secs)));
        let registry = Registry::new();
        let cleaner = Cleaner::new(store.clone(), time_provider, &registry);

        let mut config = CleanerConfig::default();
        config.retention = Some(Duration::from_secs(24 * 3600));
        config.deletion_delay = Duration::from_secs(12 * 3600);

        let report = cleaner.run_tenant_cycle("acme", &config, &planner_config()).await;
        assert_eq!(report.retention_marked, 1);

        assert!(store.attributes(&format!("acme/{old_id}/deletion-mark.json")).await.is_ok());
        assert!(store.attributes(&format!("acme/{young_id}/deletion-mark.json")).await.is_err());
    }

    #[tokio::test]
    async fn hard_delete_respects_deletion_delay() {
        let store: Arc<dyn BucketStore> = Arc::new(GlobalMarkerStore::new(ObjectStoreBucket::new(Arc::new(
            object_store::memory::InMemory::new(),
        ))));
        let id = BlockId::generate_at(1);
        let mark = DeletionMark::new(id, 1_000, "retention");
        put_json(&*store, &format!("acme/{id}/deletion-mark.json"), &mark).await.unwrap();
        store
            .upload(
                &format!("acme/{id}/meta.json"),
                serde_json::to_vec(&meta_json_for(id, 0, 1000)).unwrap().into(),
            )
            .await
            .unwrap();

        let mock = Arc::new(MockProvider::new(time_provider::Time::from_timestamp_secs(1_999)));
        let time_provider: Arc<dyn TimeProvider> = mock.clone();
        let registry = Registry::new();
        let cleaner = Cleaner::new(store.clone(), time_provider, &registry);
        let mut config = CleanerConfig::default();
        config.deletion_delay = Duration::from_secs(1_000);

        let report = cleaner.run_tenant_cycle("acme", &config, &planner_config()).await;
        assert_eq!(report.hard_deleted, 0);
        assert!(store.get(&format!("acme/{id}/meta.json")).await.is_ok());

        mock.inc(Duration::from_secs(1));
        let report = cleaner.run_tenant_cycle("acme", &config, &planner_config()).await;
        assert_eq!(report.hard_deleted, 1);
        assert!(store.get(&format!("acme/{id}/meta.json")).await.is_err());
    }
}
