//! Configuration values recognized by the compaction core (§6 configuration
//! table). This crate defines the plain domain structs; `compactor_service`
//! layers `clap` parsing on top and converts into these.

use std::time::Duration;

/// Planner and bucket-compactor engine configuration (§4.5, §4.6).
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Ordered compaction range durations; each must divide the next.
    pub block_ranges: Vec<Duration>,
    /// Cycle period.
    pub compaction_interval: Duration,
    /// Max in-flight jobs per tenant.
    pub compaction_concurrency: usize,
    /// Per-tenant retry budget.
    pub compaction_retries: usize,
    /// Minimum age before level-1 blocks are eligible for a job.
    pub first_level_compaction_wait_period: Duration,
    /// Per-tenant per-cycle ceiling; `None` disables it.
    pub max_compaction_time: Option<Duration>,
    /// Number of buckets unsharded blocks are split into.
    pub split_groups: usize,
    /// Whether sharding (split stage) is enabled at all.
    pub sharding_enabled: bool,
    /// Parallel downloads per job.
    pub max_opening_blocks_concurrency: usize,
    /// Parallel closings.
    pub max_closing_blocks_concurrency: usize,
    /// Parallelism when writing new symbol tables.
    pub symbols_flushers_concurrency: usize,
    /// Parallel meta fetches.
    pub meta_sync_concurrency: usize,
    /// Parallel block segment downloads.
    pub block_sync_concurrency: usize,
    /// Parallel block-output uploads.
    pub per_block_upload_concurrency: usize,
    /// Cache entry budget for the meta cache.
    pub in_memory_tenant_meta_cache_size: usize,
    /// Execution order for planned jobs.
    pub compaction_jobs_order: crate::job::JobOrder,
    /// Whether to publish sparse index headers alongside output blocks.
    pub upload_sparse_index_headers: bool,
    /// External labels to drop during meta sync filtering (§4.4 step 3).
    pub ignored_external_labels: Vec<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            block_ranges: vec![
                Duration::from_secs(2 * 3600),
                Duration::from_secs(12 * 3600),
                Duration::from_secs(24 * 3600),
            ],
            compaction_interval: Duration::from_secs(60),
            compaction_concurrency: 1,
            compaction_retries: 3,
            first_level_compaction_wait_period: Duration::from_secs(0),
            max_compaction_time: None,
            split_groups: 1,
            sharding_enabled: false,
            max_opening_blocks_concurrency: 1,
            max_closing_blocks_concurrency: 1,
            symbols_flushers_concurrency: 1,
            meta_sync_concurrency: 20,
            block_sync_concurrency: 8,
            per_block_upload_concurrency: 8,
            in_memory_tenant_meta_cache_size: 10_000,
            compaction_jobs_order: crate::job::JobOrder::OldestFirst,
            upload_sparse_index_headers: false,
            ignored_external_labels: Vec::new(),
        }
    }
}

impl CompactionConfig {
    /// Validate that each configured range divides the next, as required by
    /// §6's configuration table. Returns the offending `(smaller, larger)`
    /// pair on failure.
    pub fn validate_block_ranges(&self) -> Result<(), (Duration, Duration)> {
        for pair in self.block_ranges.windows(2) {
            let (small, large) = (pair[0], pair[1]);
            if large.as_millis() % small.as_millis() != 0 {
                return Err((small, large));
            }
        }
        Ok(())
    }
}

/// Blocks cleaner configuration (§4.7).
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Cleaner cadence.
    pub cleanup_interval: Duration,
    /// Per-tenant fan-out bound.
    pub cleanup_concurrency: usize,
    /// Age beyond which blocks are retention-eligible.
    pub retention: Option<Duration>,
    /// Time between mark and hard delete.
    pub deletion_delay: Duration,
    /// Delay before removing residual tenant artifacts.
    pub tenant_cleanup_delay: Duration,
    /// Minimum age before an unmarked partial block is marked.
    pub partial_block_deletion_delay: Option<Duration>,
    /// Parallel bound on hard-delete operations.
    pub delete_blocks_concurrency: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5 * 60),
            cleanup_concurrency: 5,
            retention: None,
            deletion_delay: Duration::from_secs(12 * 3600),
            tenant_cleanup_delay: Duration::from_secs(24 * 3600),
            partial_block_deletion_delay: Some(Duration::from_secs(24 * 3600)),
            delete_blocks_concurrency: 16,
        }
    }
}
