//! Entry point for the `compactor` binary: parses configuration, builds the
//! object store and ring, then drives the lifecycle and ticker loops (§4.9).

mod admin;
mod config;
mod lifecycle;
mod service;
mod storage;

use clap::Parser;
use config::Config;
use metric::Registry;
use object_store_ext::{GlobalMarkerStore, MetricsBucketStore, ObjectStoreBucket};
use observability_deps::tracing::{error, info};
use sharder::{Coordinator, CoordinatorConfig, InMemoryRingStore, Ring, TenantFilter};
use std::process::ExitCode;
use std::sync::Arc;
use time_provider::{SystemProvider, TimeProvider};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let raw_store = match storage::make_object_store(&config.object_store) {
        Ok(store) => store,
        Err(e) => {
            error!(%e, "failed to construct object store");
            return ExitCode::FAILURE;
        }
    };

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
    let registry = Arc::new(Registry::new());

    let base = ObjectStoreBucket::new(raw_store);
    let marked = GlobalMarkerStore::new(base);
    let store: Arc<dyn object_store_ext::BucketStore> =
        Arc::new(MetricsBucketStore::new(marked, time_provider.clone(), &registry));

    let instance_id = config.ring.instance_id.clone().unwrap_or_else(|| "compactor-0".to_string());

    let ring_store = Arc::new(InMemoryRingStore::new());
    let ring = Ring::new(ring_store);

    let cancel = CancellationToken::new();

    let now_secs = time_provider.now().timestamp_secs();
    lifecycle::join(
        &ring,
        &instance_id,
        &config.ring.instance_zone,
        config.ring.tokens_per_instance,
        now_secs,
        config.ring.stability_min_duration,
        config.ring.stability_max_wait,
        &cancel,
    )
    .await;

    let coordinator_config = CoordinatorConfig {
        replication_factor: config.ring.replication_factor,
        tenant_shard_size: config.ring.tenant_shard_size,
    };
    let tenant_filter = TenantFilter::new(
        config.tenant_filter.enabled_tenants.clone(),
        config.tenant_filter.disabled_tenants.clone(),
    );
    let coordinator = Coordinator::new(ring.clone(), coordinator_config, tenant_filter.clone(), instance_id.clone());

    let svc = Arc::new(service::Service::new(
        store,
        registry.clone(),
        time_provider.clone(),
        coordinator,
        tenant_filter,
        config.compaction.clone(),
        config.cleaner.clone(),
    ));

    let heartbeat_handle = tokio::spawn(lifecycle::heartbeat_loop(
        ring.clone(),
        instance_id.clone(),
        config.ring.heartbeat_period,
        cancel.clone(),
    ));

    let admin_handle = tokio::spawn(admin::serve(config.admin.bind_address, registry.clone(), cancel.clone()));

    let compaction_handle = {
        let svc = svc.clone();
        let cancel = cancel.clone();
        let interval = config.compaction.compaction_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => svc.run_cycle(&cancel).await,
                    _ = cancel.cancelled() => return,
                }
            }
        })
    };

    let cleanup_handle = {
        let svc = svc.clone();
        let cancel = cancel.clone();
        let interval = config.cleaner.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => svc.run_cleanup_tick().await,
                    _ = cancel.cancelled() => return,
                }
            }
        })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "failed to install shutdown signal handler");
    }
    info!("shutdown signal received, leaving ring");
    cancel.cancel();

    let _ = tokio::join!(heartbeat_handle, admin_handle, compaction_handle, cleanup_handle);
    lifecycle::leave(&ring, &instance_id);

    ExitCode::SUCCESS
}
