//! CLI/env configuration, composed from flattened blocks the way the
//! teacher's `influxdb_iox run compactor` command composes `RunConfig` +
//! `CompactorConfig` (§4.9, §6 configuration table).

use data_types::{CleanerConfig, CompactionConfig, JobOrder};
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}


fn parse_job_order(s: &str) -> Result<JobOrder, String> {
    match s {
        "oldest-first" => Ok(JobOrder::OldestFirst),
        "newest-first" => Ok(JobOrder::NewestFirst),
        "largest-first" => Ok(JobOrder::LargestFirst),
        other => Err(format!(
            "invalid compaction_jobs_order {other:?}, expected oldest-first|newest-first|largest-first"
        )),
    }
}

fn parse_string_item(s: &str) -> Result<String, std::convert::Infallible> {
    Ok(s.to_string())
}

/// Which backend `--object-store` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ArgEnum)]
pub enum ObjectStoreKind {
    /// Volatile, process-local store; useful for demos and tests only.
    Memory,
    /// A directory on the local filesystem.
    File,
    #[cfg(feature = "aws")]
    /// Amazon S3 (or an S3-compatible endpoint).
    S3,
}

/// Object-store connection config (§1: "the object store is external").
#[derive(Debug, Clone, clap::Parser)]
pub struct ObjectStoreConfig {
    /// Which object store backend to use.
    #[clap(long = "object-store", env = "COMPACTOR_OBJECT_STORE", arg_enum, default_value = "memory")]
    pub kind: ObjectStoreKind,

    /// Root directory for the `file` backend.
    #[clap(long = "data-dir", env = "COMPACTOR_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Bucket name for the `s3` backend.
    #[clap(long = "bucket", env = "COMPACTOR_BUCKET")]
    pub bucket: Option<String>,
}

/// Planner/engine/meta-syncer configuration (§4.4-§4.6, §6).
#[derive(Debug, Clone, clap::Parser)]
pub struct CompactionConfigArgs {
    /// Comma-separated ordered compaction range durations; each must divide
    /// the next.
    #[clap(
        long = "compaction-block-ranges",
        env = "COMPACTOR_COMPACTION_BLOCK_RANGES",
        parse(try_from_str = parse_duration),
        default_value = "2h,12h,24h",
        value_delimiter = ','
    )]
    pub block_ranges: Vec<Duration>,

    /// Cycle period.
    #[clap(
        long = "compaction-interval",
        env = "COMPACTOR_COMPACTION_INTERVAL",
        parse(try_from_str = parse_duration),
        default_value = "60s"
    )]
    pub compaction_interval: Duration,

    /// Max in-flight jobs per tenant.
    #[clap(long = "compaction-concurrency", env = "COMPACTOR_COMPACTION_CONCURRENCY", default_value = "1")]
    pub compaction_concurrency: usize,

    /// Max tenants processed concurrently in one cycle (§5 "tenant-concurrency
    /// worker pool").
    #[clap(long = "tenant-concurrency", env = "COMPACTOR_TENANT_CONCURRENCY", default_value = "10")]
    pub tenant_concurrency: usize,

    /// Per-tenant retry budget.
    #[clap(long = "compaction-retries", env = "COMPACTOR_COMPACTION_RETRIES", default_value = "3")]
    pub compaction_retries: usize,

    /// Minimum age before level-1-only jobs are eligible.
    #[clap(
        long = "first-level-compaction-wait-period",
        env = "COMPACTOR_FIRST_LEVEL_COMPACTION_WAIT_PERIOD",
        parse(try_from_str = parse_duration),
        default_value = "0s"
    )]
    pub first_level_compaction_wait_period: Duration,

    /// Per-tenant per-cycle ceiling; unset disables it.
    #[clap(
        long = "max-compaction-time",
        env = "COMPACTOR_MAX_COMPACTION_TIME",
        parse(try_from_str = parse_duration)
    )]
    pub max_compaction_time: Option<Duration>,

    /// Number of buckets unsharded blocks are split into.
    #[clap(long = "split-groups", env = "COMPACTOR_SPLIT_GROUPS", default_value = "1")]
    pub split_groups: usize,

    /// Whether the split stage may run at all.
    #[clap(long = "sharding-enabled", env = "COMPACTOR_SHARDING_ENABLED")]
    pub sharding_enabled: bool,

    /// Parallel downloads per job.
    #[clap(long = "max-opening-blocks-concurrency", env = "COMPACTOR_MAX_OPENING_BLOCKS_CONCURRENCY", default_value = "1")]
    pub max_opening_blocks_concurrency: usize,

    /// Parallel closings; expensive, memory-heavy.
    #[clap(long = "max-closing-blocks-concurrency", env = "COMPACTOR_MAX_CLOSING_BLOCKS_CONCURRENCY", default_value = "1")]
    pub max_closing_blocks_concurrency: usize,

    /// Parallelism when writing new symbol tables.
    #[clap(long = "symbols-flushers-concurrency", env = "COMPACTOR_SYMBOLS_FLUSHERS_CONCURRENCY", default_value = "1")]
    pub symbols_flushers_concurrency: usize,

    /// Parallel meta fetches.
    #[clap(long = "meta-sync-concurrency", env = "COMPACTOR_META_SYNC_CONCURRENCY", default_value = "20")]
    pub meta_sync_concurrency: usize,

    /// Parallel block segment downloads.
    #[clap(long = "block-sync-concurrency", env = "COMPACTOR_BLOCK_SYNC_CONCURRENCY", default_value = "8")]
    pub block_sync_concurrency: usize,

    /// Parallel block-output uploads.
    #[clap(long = "per-block-upload-concurrency", env = "COMPACTOR_PER_BLOCK_UPLOAD_CONCURRENCY", default_value = "8")]
    pub per_block_upload_concurrency: usize,

    /// Cache entry budget for the per-tenant meta cache.
    #[clap(
        long = "in-memory-tenant-meta-cache-size",
        env = "COMPACTOR_IN_MEMORY_TENANT_META_CACHE_SIZE",
        default_value = "10000"
    )]
    pub in_memory_tenant_meta_cache_size: usize,

    /// Execution order for planned jobs: `oldest-first`, `newest-first`, or
    /// `largest-first`.
    #[clap(
        long = "compaction-jobs-order",
        env = "COMPACTOR_COMPACTION_JOBS_ORDER",
        parse(try_from_str = parse_job_order),
        default_value = "oldest-first"
    )]
    pub compaction_jobs_order: JobOrder,

    /// Whether to publish sparse index headers alongside output blocks.
    #[clap(long = "upload-sparse-index-headers", env = "COMPACTOR_UPLOAD_SPARSE_INDEX_HEADERS")]
    pub upload_sparse_index_headers: bool,

    /// External labels to drop during meta sync filtering.
    #[clap(
        long = "ignored-external-labels",
        env = "COMPACTOR_IGNORED_EXTERNAL_LABELS",
        parse(try_from_str = parse_string_item),
        value_delimiter = ','
    )]
    pub ignored_external_labels: Vec<String>,
}

impl CompactionConfigArgs {
    /// Convert to the plain domain config the compaction core operates on.
    pub fn to_domain(&self) -> CompactionConfig {
        CompactionConfig {
            block_ranges: self.block_ranges.clone(),
            compaction_interval: self.compaction_interval,
            compaction_concurrency: self.compaction_concurrency,
            compaction_retries: self.compaction_retries,
            first_level_compaction_wait_period: self.first_level_compaction_wait_period,
            max_compaction_time: self.max_compaction_time,
            split_groups: self.split_groups,
            sharding_enabled: self.sharding_enabled,
            max_opening_blocks_concurrency: self.max_opening_blocks_concurrency,
            max_closing_blocks_concurrency: self.max_closing_blocks_concurrency,
            symbols_flushers_concurrency: self.symbols_flushers_concurrency,
            meta_sync_concurrency: self.meta_sync_concurrency,
            block_sync_concurrency: self.block_sync_concurrency,
            per_block_upload_concurrency: self.per_block_upload_concurrency,
            in_memory_tenant_meta_cache_size: self.in_memory_tenant_meta_cache_size,
            compaction_jobs_order: self.compaction_jobs_order,
            upload_sparse_index_headers: self.upload_sparse_index_headers,
            ignored_external_labels: self.ignored_external_labels.clone(),
        }
    }
}

/// Blocks cleaner configuration (§4.7, §6).
#[derive(Debug, Clone, clap::Parser)]
pub struct CleanerConfigArgs {
    /// Cleaner cadence.
    #[clap(long = "cleanup-interval", env = "COMPACTOR_CLEANUP_INTERVAL", parse(try_from_str = parse_duration), default_value = "5m")]
    pub cleanup_interval: Duration,

    /// Per-tenant fan-out bound.
    #[clap(long = "cleanup-concurrency", env = "COMPACTOR_CLEANUP_CONCURRENCY", default_value = "5")]
    pub cleanup_concurrency: usize,

    /// Age beyond which blocks are retention-eligible; unset disables
    /// retention.
    #[clap(long = "retention", env = "COMPACTOR_RETENTION", parse(try_from_str = parse_duration))]
    pub retention: Option<Duration>,

    /// Time between mark and hard delete.
    #[clap(long = "deletion-delay", env = "COMPACTOR_DELETION_DELAY", parse(try_from_str = parse_duration), default_value = "12h")]
    pub deletion_delay: Duration,

    /// Delay before removing residual tenant artifacts.
    #[clap(long = "tenant-cleanup-delay", env = "COMPACTOR_TENANT_CLEANUP_DELAY", parse(try_from_str = parse_duration), default_value = "24h")]
    pub tenant_cleanup_delay: Duration,

    /// Minimum age before an unmarked partial block is marked; unset
    /// disables partial-block handling.
    #[clap(
        long = "partial-block-deletion-delay",
        env = "COMPACTOR_PARTIAL_BLOCK_DELETION_DELAY",
        parse(try_from_str = parse_duration),
        default_value = "24h"
    )]
    pub partial_block_deletion_delay: Duration,

    /// Parallel bound on hard-delete operations.
    #[clap(long = "delete-blocks-concurrency", env = "COMPACTOR_DELETE_BLOCKS_CONCURRENCY", default_value = "16")]
    pub delete_blocks_concurrency: usize,
}

impl CleanerConfigArgs {
    /// Convert to the plain domain config the blocks cleaner operates on.
    pub fn to_domain(&self) -> CleanerConfig {
        CleanerConfig {
            cleanup_interval: self.cleanup_interval,
            cleanup_concurrency: self.cleanup_concurrency,
            retention: self.retention,
            deletion_delay: self.deletion_delay,
            tenant_cleanup_delay: self.tenant_cleanup_delay,
            partial_block_deletion_delay: Some(self.partial_block_deletion_delay),
            delete_blocks_concurrency: self.delete_blocks_concurrency,
        }
    }
}

/// Sharding ring configuration (§6 `sharding_ring.*`).
#[derive(Debug, Clone, clap::Parser)]
pub struct RingConfig {
    /// Stable identifier for this instance on the ring; defaults to the
    /// hostname.
    #[clap(long = "instance-id", env = "COMPACTOR_INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Availability zone advertised on the ring.
    #[clap(long = "instance-zone", env = "COMPACTOR_INSTANCE_ZONE", default_value = "zone-a")]
    pub instance_zone: String,

    /// Tokens this instance claims on the ring.
    #[clap(long = "tokens-per-instance", env = "COMPACTOR_TOKENS_PER_INSTANCE", default_value = "128")]
    pub tokens_per_instance: usize,

    /// Replication factor used for job ownership lookups.
    #[clap(long = "replication-factor", env = "COMPACTOR_REPLICATION_FACTOR", default_value = "1")]
    pub replication_factor: usize,

    /// Per-tenant shuffle-shard size; 0 uses the whole ring.
    #[clap(long = "tenant-shard-size", env = "COMPACTOR_TENANT_SHARD_SIZE", default_value = "0")]
    pub tenant_shard_size: usize,

    /// Heartbeat period.
    #[clap(long = "heartbeat-period", env = "COMPACTOR_HEARTBEAT_PERIOD", parse(try_from_str = parse_duration), default_value = "5s")]
    pub heartbeat_period: Duration,

    /// How long without a heartbeat before an instance is UNHEALTHY.
    #[clap(long = "heartbeat-timeout", env = "COMPACTOR_HEARTBEAT_TIMEOUT", parse(try_from_str = parse_duration), default_value = "1m")]
    pub heartbeat_timeout: Duration,

    /// Minimum time the ring must be unchanged before it's considered
    /// stable.
    #[clap(long = "stability-min-duration", env = "COMPACTOR_STABILITY_MIN_DURATION", parse(try_from_str = parse_duration), default_value = "1m")]
    pub stability_min_duration: Duration,

    /// Upper bound on how long to wait for ring stability before giving up.
    #[clap(long = "stability-max-wait", env = "COMPACTOR_STABILITY_MAX_WAIT", parse(try_from_str = parse_duration), default_value = "5m")]
    pub stability_max_wait: Duration,
}

/// Allow/deny tenant filtering (§4.8, §6 `enabled_tenants`/`disabled_tenants`).
#[derive(Debug, Clone, clap::Parser)]
pub struct TenantFilterArgs {
    /// Comma-separated allow list; empty means all tenants are allowed.
    #[clap(long = "enabled-tenants", env = "COMPACTOR_ENABLED_TENANTS", parse(try_from_str = parse_string_item), value_delimiter = ',')]
    pub enabled_tenants: Vec<String>,

    /// Comma-separated deny list, applied after the allow list.
    #[clap(long = "disabled-tenants", env = "COMPACTOR_DISABLED_TENANTS", parse(try_from_str = parse_string_item), value_delimiter = ',')]
    pub disabled_tenants: Vec<String>,
}

/// Admin HTTP surface configuration (§1.1, §2).
#[derive(Debug, Clone, clap::Parser)]
pub struct AdminConfig {
    /// Bind address for `/metrics` and `/ready`.
    #[clap(long = "admin-bind-address", env = "COMPACTOR_ADMIN_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub bind_address: std::net::SocketAddr,
}

/// Top-level CLI configuration, composed the way the teacher's `run`
/// subcommand composes `RunConfig` + `CompactorConfig` via `#[clap(flatten)]`
/// (§4.9).
#[derive(Debug, Clone, clap::Parser)]
#[clap(
    name = "compactor",
    about = "Runs the background compaction service",
    long_about = "Run the multitenant block compactor.\n\nConfiguration is loaded from \
    command line flags, then environment variables, then defaults (highest precedence first)."
)]
pub struct Config {
    /// Logging filter, in `tracing-subscriber` `EnvFilter` syntax.
    #[clap(long = "log-filter", env = "COMPACTOR_LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    #[clap(flatten)]
    pub object_store: ObjectStoreConfig,

    #[clap(flatten)]
    pub compaction: CompactionConfigArgs,

    #[clap(flatten)]
    pub cleaner: CleanerConfigArgs,

    #[clap(flatten)]
    pub ring: RingConfig,

    #[clap(flatten)]
    pub tenant_filter: TenantFilterArgs,

    #[clap(flatten)]
    pub admin: AdminConfig,
}
