//! [`Job`]: an ephemeral unit of compaction work emitted by the planner
//! (§3, §4.5).

use crate::block::Block;
use crate::tenant::TenantId;
use crate::timestamp::TimeRange;

/// Which half of split-and-merge compaction a job performs (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStage {
    /// Reshapes unsharded inputs into `N` sharded outputs.
    Split,
    /// Combines multiple same-shard inputs into one larger block.
    Merge,
}

impl JobStage {
    /// Short tag used in the sharding-key formula (§4.5) and in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            JobStage::Split => "split",
            JobStage::Merge => "merge",
        }
    }
}

/// A planned unit of compaction work. Never persisted — jobs live only for
/// the duration of one planning-and-execution cycle (§3).
#[derive(Debug, Clone)]
pub struct Job {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Split or merge.
    pub stage: JobStage,
    /// Shard assignment, e.g. `"3_of_10"`, or empty if unsharded.
    pub shard_id: String,
    /// The compaction range this job covers.
    pub range: TimeRange,
    /// Input block metadata.
    pub blocks: Vec<Block>,
    /// Opaque, stable-within-tenant grouping key (§4.5 Stage A).
    pub group_key: String,
}

impl Job {
    /// The `"resolution@hash(group_key_without_shard)-stage-shard_id-range_start-range_end"`
    /// key used to pick the job's unique owner in the ring (§4.5 "Sharding
    /// key formula", §4.8).
    pub fn sharding_key(&self, group_key_without_shard_hash: u64) -> String {
        let resolution = self.blocks.first().map(|b| b.resolution).unwrap_or(0);
        format!(
            "{}@{}-{}-{}-{}-{}",
            resolution,
            group_key_without_shard_hash,
            self.stage.tag(),
            self.shard_id,
            self.range.start,
            self.range.end,
        )
    }

    /// Total size in bytes of all input blocks' files, used by the
    /// `largest-first` job ordering (§4.5 Stage E).
    pub fn total_input_bytes(&self) -> u64 {
        self.blocks
            .iter()
            .flat_map(|b| b.files.iter())
            .map(|f| f.size_bytes)
            .sum()
    }

    /// Oldest `min_time` across all input blocks, used by the
    /// `oldest-first`/`newest-first` orderings.
    pub fn oldest_input_time(&self) -> i64 {
        self.blocks
            .iter()
            .map(|b| b.min_time.get())
            .min()
            .unwrap_or(self.range.start.get())
    }
}

/// The three job execution orders recognized by `compaction_jobs_order`
/// (§6 configuration table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrder {
    /// Oldest input data first.
    OldestFirst,
    /// Newest input data first.
    NewestFirst,
    /// Largest total input size first.
    LargestFirst,
}

impl JobOrder {
    /// Sort `jobs` in place according to this order. Stable, so ties
    /// preserve the planner's deterministic Stage E ordering.
    pub fn sort(&self, jobs: &mut [Job]) {
        match self {
            JobOrder::OldestFirst => jobs.sort_by_key(|j| j.oldest_input_time()),
            JobOrder::NewestFirst => jobs.sort_by_key(|j| std::cmp::Reverse(j.oldest_input_time())),
            JobOrder::LargestFirst => {
                jobs.sort_by_key(|j| std::cmp::Reverse(j.total_input_bytes()))
            }
        }
    }
}
