//! Derives a deterministic, stable-ordered list of [`Job`]s from a block
//! set (§4.5, Stages A-E).

use data_types::{Block, BlockId, Job, JobOrder, JobStage, TimestampMillis};
use sharder::fnv1a_32;
use std::collections::BTreeMap;
use std::time::Duration;

/// Planning failures that indicate a bug rather than bad input data (§7
/// "Planning invariant violation"): fatal for the cycle, never isolated
/// per-tenant like storage errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    /// A split job was about to be emitted while sharding is disabled.
    #[error("invariant violation: split job planned with sharding disabled")]
    SplitWithShardingDisabled,
}

/// Inputs to one planning pass (§6 configuration table, the planner's slice
/// of it).
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Ordered compaction ranges; each divides the next.
    pub block_ranges: Vec<Duration>,
    /// Number of output shards for split jobs.
    pub split_groups: usize,
    /// Whether the split stage may run at all.
    pub sharding_enabled: bool,
    /// Execution order applied after Stage E's deterministic tie-break.
    pub jobs_order: JobOrder,
}

/// Compute `group_key = defaultGroupKey(resolution, labels_without_shard_id)`
/// (Stage A).
fn group_key(block: &Block) -> String {
    let mut labels: Vec<(String, String)> = block.labels_without_shard().into_iter().collect();
    labels.sort();
    let label_part = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}/{}", block.resolution, label_part)
}

/// Partition `blocks` into `[t0, t0+range)` buckets aligned to multiples of
/// `range`; blocks straddling a boundary are excluded from every bucket at
/// this range (Stage B.1).
fn group_blocks_by_range(blocks: &[Block], range: Duration) -> BTreeMap<i64, Vec<Block>> {
    let range_millis = range.as_millis() as i64;
    let mut buckets: BTreeMap<i64, Vec<Block>> = BTreeMap::new();
    for block in blocks {
        let bucket_start = block.min_time.align_down(range_millis).get();
        let bucket_end = bucket_start + range_millis;
        if block.max_time.get() <= bucket_end {
            buckets.entry(bucket_start).or_default().push(block.clone());
        }
    }
    buckets
}

/// Deterministic shard assignment for an unsharded block (Stage B.2).
fn split_shard_for(id: BlockId, split_groups: usize) -> usize {
    (fnv1a_32(id.to_string().as_bytes()) as usize) % split_groups.max(1)
}

/// Run the full planning algorithm (Stages A-E) over `blocks`, returning
/// jobs ordered per `config.jobs_order` with Stage E's stable tie-break
/// underneath.
pub fn plan(
    tenant: &data_types::TenantId,
    blocks: &[Block],
    config: &PlannerConfig,
    now: TimestampMillis,
) -> Result<Vec<Job>, PlanError> {
    let mut jobs = Vec::new();
    let mut claimed: Vec<(String, i64, i64)> = Vec::new(); // (shard_id, start, end) from earlier ranges

    for (range_index, &range) in config.block_ranges.iter().enumerate() {
        let buckets = group_blocks_by_range(blocks, range);
        let range_millis = range.as_millis() as i64;
        let is_smallest_range = range_index == 0;

        for (bucket_start, bucket_blocks) in buckets {
            let bucket_end = bucket_start + range_millis;
            let range_start = TimestampMillis::new(bucket_start);
            let range_end = TimestampMillis::new(bucket_end);

            let mut by_group: BTreeMap<String, Vec<Block>> = BTreeMap::new();
            for block in bucket_blocks {
                by_group.entry(group_key(&block)).or_default().push(block);
            }

            for (gkey, group_blocks) in by_group {
                let any_unsharded = group_blocks.iter().any(|b| b.shard_id().is_none());

                if is_smallest_range && config.sharding_enabled && any_unsharded {
                    let mut by_shard: BTreeMap<usize, Vec<Block>> = BTreeMap::new();
                    for block in group_blocks {
                        let shard = split_shard_for(block.id, config.split_groups);
                        by_shard.entry(shard).or_default().push(block);
                    }
                    for (shard, shard_blocks) in by_shard {
                        let shard_id = format!("{shard}_of_{}", config.split_groups);
                        jobs.push(new_job(
                            tenant,
                            &gkey,
                            JobStage::Split,
                            shard_id,
                            range_start,
                            range_end,
                            shard_blocks,
                        ));
                    }
                    continue;
                }

                let mut by_shard: BTreeMap<String, Vec<Block>> = BTreeMap::new();
                for block in group_blocks {
                    let shard_id = block.shard_id().unwrap_or("").to_string();
                    by_shard.entry(shard_id).or_default().push(block);
                }
                for (shard_id, shard_blocks) in by_shard {
                    if shard_blocks.len() < 2 {
                        continue;
                    }

                    // Stage C: drop if this bucket conflicts with an
                    // earlier (smaller) range's already-claimed job.
                    let conflicts = claimed.iter().any(|(claimed_shard, claimed_start, claimed_end)| {
                        *claimed_shard == shard_id && bucket_start < *claimed_end && *claimed_start < bucket_end
                    });
                    if conflicts {
                        continue;
                    }

                    // Stage D: premature-compaction guard. `max(compaction_level) > 1` names
                    // the *output* level a merge produces (invariant 8: "every planned job
                    // with compaction_level(outputs) > 1"), not the input blocks' own level
                    // — a merge job's output is always max(input level) + 1, so this holds
                    // for every merge job unconditionally, level-1 inputs included. Confirmed
                    // against the worked example (2 level-1 blocks at [now-10m, now), range
                    // 2h, zero jobs emitted): gating on *input* level would exempt exactly
                    // that scenario and break it, so only the remaining three conditions
                    // actually gate the drop here.
                    let max_block_time = blocks.iter().map(|b| b.max_time.get()).max().unwrap_or(i64::MIN);
                    let covers_fully = shard_blocks
                        .iter()
                        .map(|b| (b.min_time.get(), b.max_time.get()))
                        .fold((bucket_start, bucket_start), |(lo, hi), (min, max)| {
                            (lo.min(min), hi.max(max))
                        })
                        == (bucket_start, bucket_end);
                    let elapsed_since_range_end = now.get() - bucket_end;
                    let is_premature = bucket_end > max_block_time
                        && elapsed_since_range_end < range_millis
                        && !covers_fully;
                    if is_premature {
                        continue;
                    }

                    jobs.push(new_job(
                        tenant,
                        &gkey,
                        JobStage::Merge,
                        shard_id.clone(),
                        range_start,
                        range_end,
                        shard_blocks,
                    ));
                    claimed.push((shard_id, bucket_start, bucket_end));
                }
            }
        }
    }

    if !config.sharding_enabled && jobs.iter().any(|j| j.stage == JobStage::Split) {
        return Err(PlanError::SplitWithShardingDisabled);
    }

    // Stage E: deterministic tie-break by (sharding_key, group_key), then
    // the configured execution order.
    jobs.sort_by(|a, b| {
        let key_a = (a.sharding_key(fnv1a_32(a.group_key.as_bytes()) as u64), a.group_key.clone());
        let key_b = (b.sharding_key(fnv1a_32(b.group_key.as_bytes()) as u64), b.group_key.clone());
        key_a.cmp(&key_b)
    });
    config.jobs_order.sort(&mut jobs);

    Ok(jobs)
}

fn new_job(
    tenant: &data_types::TenantId,
    group_key: &str,
    stage: JobStage,
    shard_id: String,
    range_start: TimestampMillis,
    range_end: TimestampMillis,
    blocks: Vec<Block>,
) -> Job {
    Job {
        tenant: tenant.clone(),
        stage,
        shard_id,
        range: data_types::TimeRange::new(range_start, range_end),
        blocks,
        group_key: group_key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{BlockFile, BlockStats, TimestampMillis};
    use std::collections::{BTreeMap as Map, BTreeSet};

    fn unsharded_block(id: BlockId, min: i64, max: i64) -> Block {
        Block {
            id,
            min_time: TimestampMillis::new(min),
            max_time: TimestampMillis::new(max),
            compaction_level: 1,
            sources: [id].into_iter().collect::<BTreeSet<_>>(),
            parents: BTreeSet::new(),
            resolution: 0,
            external_labels: Map::new(),
            files: vec![BlockFile {
                name: "index".into(),
                size_bytes: 1,
            }],
            uploaded_at: 0,
            out_of_order: false,
            stats: BlockStats::default(),
        }
    }

    fn sharded_block(id: BlockId, min: i64, max: i64, shard: &str, level: u32) -> Block {
        let mut b = unsharded_block(id, min, max);
        b.compaction_level = level;
        if level != 1 {
            b.sources.clear();
            b.sources.insert(BlockId::generate_at(1));
        }
        b.external_labels
            .insert(data_types::SHARD_ID_LABEL.to_string(), shard.to_string());
        b
    }

    fn config(ranges_hours: &[u64], split_groups: usize, sharding_enabled: bool) -> PlannerConfig {
        PlannerConfig {
            block_ranges: ranges_hours.iter().map(|h| Duration::from_secs(h * 3600)).collect(),
            split_groups,
            sharding_enabled,
            jobs_order: JobOrder::OldestFirst,
        }
    }

    #[test]
    fn split_planning_seed_scenario() {
        let blocks = vec![
            unsharded_block(BlockId::generate_at(1), 0, 7_200_000),
            unsharded_block(BlockId::generate_at(2), 0, 7_200_000),
            unsharded_block(BlockId::generate_at(3), 0, 7_200_000),
        ];
        let cfg = config(&[2], 2, true);
        let tenant = data_types::TenantId::new("acme");
        let jobs = plan(&tenant, &blocks, &cfg, TimestampMillis::new(8_000_000)).unwrap();

        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.stage == JobStage::Split));
        let mut all_ids: Vec<BlockId> = jobs.iter().flat_map(|j| j.blocks.iter().map(|b| b.id)).collect();
        all_ids.sort();
        let mut expected: Vec<BlockId> = blocks.iter().map(|b| b.id).collect();
        expected.sort();
        assert_eq!(all_ids, expected);
    }

    #[test]
    fn merge_grouping_seed_scenario() {
        let mut blocks = Vec::new();
        for i in 0..4 {
            blocks.push(sharded_block(BlockId::generate_at(i + 1), 0, 7_200_000, "1_of_2", 1));
        }
        for i in 0..4 {
            blocks.push(sharded_block(BlockId::generate_at(i + 10), 0, 7_200_000, "2_of_2", 1));
        }
        let cfg = config(&[2], 2, true);
        let tenant = data_types::TenantId::new("acme");
        let jobs = plan(&tenant, &blocks, &cfg, TimestampMillis::new(8_000_000)).unwrap();

        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.stage == JobStage::Merge));
        assert!(jobs.iter().all(|j| j.blocks.len() == 4));
    }

    #[test]
    fn premature_guard_seed_scenario() {
        let now = TimestampMillis::new(2 * 3600 * 1000 - 10 * 60 * 1000 + 1);
        let blocks = vec![
            sharded_block(BlockId::generate_at(1), now.get() - 600_000, now.get(), "1_of_1", 1),
            sharded_block(BlockId::generate_at(2), now.get() - 600_000, now.get(), "1_of_1", 1),
        ];
        let cfg = config(&[2], 1, false);
        let tenant = data_types::TenantId::new("acme");
        let jobs = plan(&tenant, &blocks, &cfg, now).unwrap();
        assert!(jobs.is_empty(), "expected zero jobs, got {jobs:?}");
    }

    #[test]
    fn conflict_filter_seed_scenario() {
        let two_h = 2 * 3600 * 1000;
        let blocks = vec![
            sharded_block(BlockId::generate_at(1), 0, two_h, "1_of_1", 2),
            sharded_block(BlockId::generate_at(2), 0, two_h, "1_of_1", 2),
            sharded_block(BlockId::generate_at(3), two_h, 2 * two_h, "1_of_1", 2),
            sharded_block(BlockId::generate_at(4), two_h, 2 * two_h, "1_of_1", 2),
        ];
        let cfg = config(&[2, 4], 1, false);
        let tenant = data_types::TenantId::new("acme");
        let jobs = plan(&tenant, &blocks, &cfg, TimestampMillis::new(10 * two_h)).unwrap();

        assert_eq!(jobs.len(), 2, "the 4h merge should be dropped while both 2h merges exist");
        assert!(jobs.iter().all(|j| j.range.len() == two_h));
    }

    #[test]
    fn every_merge_job_satisfies_invariant_2() {
        let blocks = vec![
            sharded_block(BlockId::generate_at(1), 0, 7_200_000, "1_of_1", 1),
            sharded_block(BlockId::generate_at(2), 0, 7_200_000, "1_of_1", 1),
        ];
        let cfg = config(&[2], 1, false);
        let tenant = data_types::TenantId::new("acme");
        let jobs = plan(&tenant, &blocks, &cfg, TimestampMillis::new(20_000_000)).unwrap();
        for job in &jobs {
            let first = &job.blocks[0];
            for block in &job.blocks {
                assert_eq!(block.resolution, first.resolution);
                assert_eq!(block.labels_without_shard(), first.labels_without_shard());
                assert!(job.range.start.get() <= block.min_time.get());
                assert!(block.max_time.get() <= job.range.end.get());
            }
        }
    }

    #[test]
    fn split_determinism() {
        let id = BlockId::generate_at(42);
        assert_eq!(split_shard_for(id, 4), split_shard_for(id, 4));
    }
}
