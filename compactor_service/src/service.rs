//! The multitenant compactor's per-cycle and per-cleanup-tick logic (§4.9):
//! `discover_tenants`, `run_cycle`, `run_cleanup_tick`. Wires the meta
//! syncer, planner, engine and blocks cleaner together the way the teacher's
//! `ioxd_compactor` server type wires `compactor::compact` over a catalog
//! (source not present in this workspace's reference pack; reconstructed
//! from §4.9's prose and the lower-level crates it names).

use crate::config::{CleanerConfigArgs, CompactionConfigArgs};
use cache_system::{AdmissionPolicy, MetaCache};
use compactor_core::{
    plan, Engine, EngineConfig, JobOutcome, MetadataMerger, MetaSyncer, PlanError, PlannerConfig, SyncParams,
};
use data_types::TenantId;
use garbage_collector::Cleaner;
use metric::Registry;
use object_store_ext::{list_children, BucketStore};
use observability_deps::tracing::{error, info, warn};
use sharder::{Coordinator, TenantFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time_provider::TimeProvider;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Tenant-facing state shared by both ticker loops.
pub struct Service {
    store: Arc<dyn BucketStore>,
    registry: Arc<Registry>,
    time_provider: Arc<dyn TimeProvider>,
    coordinator: Coordinator,
    tenant_filter: TenantFilter,
    compaction: CompactionConfigArgs,
    cleaner_args: CleanerConfigArgs,
    meta_caches: Mutex<HashMap<TenantId, Arc<MetaCache>>>,
    cleaner: Arc<Cleaner>,
    cleanup_in_flight: Arc<Mutex<HashSet<TenantId>>>,
}

impl Service {
    /// Build a service over `store`, sharing `registry`/`time_provider` with
    /// the rest of the process.
    pub fn new(
        store: Arc<dyn BucketStore>,
        registry: Arc<Registry>,
        time_provider: Arc<dyn TimeProvider>,
        coordinator: Coordinator,
        tenant_filter: TenantFilter,
        compaction: CompactionConfigArgs,
        cleaner_args: CleanerConfigArgs,
    ) -> Self {
        let cleaner = Arc::new(Cleaner::new(store.clone(), time_provider.clone(), &registry));
        Self {
            store,
            registry,
            time_provider,
            coordinator,
            tenant_filter,
            compaction,
            cleaner_args,
            meta_caches: Mutex::new(HashMap::new()),
            cleaner,
            cleanup_in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// List the bucket root, filtered by the allow/deny lists (§4.8).
    pub async fn discover_tenants(&self) -> Vec<TenantId> {
        let names = list_children(&*self.store, "").await.unwrap_or_else(|e| {
            warn!(%e, "failed to list bucket root for tenant discovery");
            Vec::new()
        });
        names
            .into_iter()
            .filter(|n| self.tenant_filter.permits(n))
            .map(TenantId::new)
            .collect()
    }

    async fn meta_cache_for(&self, tenant: &TenantId) -> Arc<MetaCache> {
        let mut caches = self.meta_caches.lock().await;
        caches
            .entry(tenant.clone())
            .or_insert_with(|| {
                Arc::new(MetaCache::new(
                    tenant.as_str(),
                    self.compaction.in_memory_tenant_meta_cache_size,
                    AdmissionPolicy::default(),
                    &self.registry,
                ))
            })
            .clone()
    }

    fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            block_ranges: self.compaction.block_ranges.clone(),
            split_groups: self.compaction.split_groups,
            sharding_enabled: self.compaction.sharding_enabled,
            jobs_order: self.compaction.compaction_jobs_order,
        }
    }

    /// Run one planning-and-execution cycle for every tenant this instance
    /// owns (§4.9 `run_cycle`, §2 "list tenants → meta syncer → planner →
    /// bucket compactor"). Bounded by `tenant_concurrency`; per-tenant
    /// failures never abort the cycle (§7 "storage and planning errors stay
    /// local to a tenant").
    pub async fn run_cycle(&self, cancel: &CancellationToken) {
        let tenants = self.discover_tenants().await;
        let owned: Vec<TenantId> = tenants.into_iter().filter(|t| self.coordinator.owns_tenant(t)).collect();
        info!(count = owned.len(), "starting compaction cycle");

        let semaphore = Arc::new(Semaphore::new(self.compaction.tenant_concurrency.max(1)));
        let merger: Arc<dyn compactor_core::BlockMerger> = Arc::new(MetadataMerger);
        let mut handles = Vec::with_capacity(owned.len());

        for tenant in owned {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = semaphore.clone();
            let cache = self.meta_cache_for(&tenant).await;
            let store = self.store.clone();
            let time_provider = self.time_provider.clone();
            let coordinator = self.coordinator.clone();
            let sync_params = SyncParams {
                meta_sync_concurrency: self.compaction.meta_sync_concurrency,
                ignored_external_labels: self.compaction.ignored_external_labels.clone(),
            };
            let planner_config = self.planner_config();
            let engine_config = EngineConfig {
                compaction_concurrency: self.compaction.compaction_concurrency,
                compaction_retries: self.compaction.compaction_retries,
                first_level_compaction_wait_period: self.compaction.first_level_compaction_wait_period,
                per_block_upload_concurrency: self.compaction.per_block_upload_concurrency,
            };
            let merger = merger.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                run_one_tenant_cycle(
                    &tenant,
                    &store,
                    &cache,
                    &time_provider,
                    &coordinator,
                    &merger,
                    &sync_params,
                    &planner_config,
                    &engine_config,
                    &cancel,
                )
                .await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(%e, "tenant compaction task panicked");
            }
        }
    }

    /// Run one cleanup tick: invoke the blocks cleaner for every tenant this
    /// instance owns, bounded by `cleanup_concurrency`, skipping any tenant
    /// whose previous tick is still in flight (§4.7 singleflight guard).
    pub async fn run_cleanup_tick(&self) {
        let tenants = self.discover_tenants().await;
        let owned: Vec<TenantId> = tenants.into_iter().filter(|t| self.coordinator.owns_cleanup(t)).collect();

        let semaphore = Arc::new(Semaphore::new(self.cleaner_args.cleanup_concurrency.max(1)));
        let cleaner_config = self.cleaner_args.to_domain();
        let planner_config = self.planner_config();
        let mut handles = Vec::with_capacity(owned.len());

        for tenant in owned {
            {
                let mut in_flight = self.cleanup_in_flight.lock().await;
                if !in_flight.insert(tenant.clone()) {
                    info!(%tenant, "skipping cleanup tick: previous cycle still running");
                    continue;
                }
            }
            let semaphore = semaphore.clone();
            let cleaner_config = cleaner_config.clone();
            let planner_config = planner_config.clone();
            let cleaner = self.cleaner.clone();
            let in_flight = self.cleanup_in_flight.clone();
            handles.push(tokio::spawn(run_one_cleanup(
                tenant,
                cleaner,
                semaphore,
                cleaner_config,
                planner_config,
                in_flight,
            )));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(%e, "cleanup task panicked");
            }
        }
    }
}

async fn run_one_cleanup(
    tenant: TenantId,
    cleaner: Arc<Cleaner>,
    semaphore: Arc<Semaphore>,
    cleaner_config: data_types::CleanerConfig,
    planner_config: PlannerConfig,
    in_flight: Arc<Mutex<HashSet<TenantId>>>,
) {
    let _permit = semaphore.acquire().await.expect("semaphore not closed");
    let report = cleaner.run_tenant_cycle(tenant.as_str(), &cleaner_config, &planner_config).await;
    info!(%tenant, ?report, "cleanup tick complete");
    in_flight.lock().await.remove(&tenant);
}

#[allow(clippy::too_many_arguments)]
async fn run_one_tenant_cycle(
    tenant: &TenantId,
    store: &Arc<dyn BucketStore>,
    cache: &Arc<MetaCache>,
    time_provider: &Arc<dyn TimeProvider>,
    coordinator: &Coordinator,
    merger: &Arc<dyn compactor_core::BlockMerger>,
    sync_params: &SyncParams,
    planner_config: &PlannerConfig,
    engine_config: &EngineConfig,
    cancel: &CancellationToken,
) {
    let syncer = MetaSyncer::new(store.clone(), cache.clone(), time_provider.clone());
    let sync_result = syncer.sync_metas(tenant.as_str(), sync_params).await;
    if !sync_result.partials.is_empty() {
        warn!(%tenant, count = sync_result.partials.len(), "partial blocks encountered during sync");
    }

    let newly_marked = syncer.garbage_collect(tenant.as_str(), &sync_result.blocks).await;
    if !newly_marked.is_empty() {
        info!(%tenant, count = newly_marked.len(), "marked redundant blocks for deletion");
    }

    let now = time_provider.now();
    let jobs = match plan(tenant, &sync_result.blocks, planner_config, data_types::TimestampMillis::new(now.timestamp_millis())) {
        Ok(jobs) => jobs,
        Err(PlanError::SplitWithShardingDisabled) => {
            error!(%tenant, "planning invariant violation: split job planned with sharding disabled, skipping tenant this cycle");
            return;
        }
    };
    if jobs.is_empty() {
        return;
    }

    let engine = Engine::new(store.clone(), merger.clone(), time_provider.clone());
    let outcomes = engine.run_jobs(tenant.as_str(), jobs, coordinator, engine_config, cancel).await;
    let completed = outcomes.iter().filter(|o| matches!(o, JobOutcome::Completed { .. })).count();
    let failed = outcomes.iter().filter(|o| matches!(o, JobOutcome::Failed { .. })).count();
    info!(%tenant, completed, failed, total = outcomes.len(), "tenant compaction cycle complete");
}
