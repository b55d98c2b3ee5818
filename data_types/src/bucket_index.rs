//! The per-tenant [`BucketIndex`] (§3, §6): a summarized, gzip'ed JSON view
//! of a tenant's blocks and deletion marks, maintained by the blocks
//! cleaner and consumed by read-path components.

use crate::block::{Block, BlockFile, BlockId};
use crate::timestamp::TimestampMillis;
use std::collections::BTreeMap;

/// Current on-disk `BucketIndex` schema version. Version 1 is accepted on
/// read but immediately superseded by a full rebuild (§6 "Compatibility").
pub const CURRENT_VERSION: u32 = 2;

/// A block as persisted in the bucket index.
///
/// Deliberately narrower than [`Block`]: `sources` and `parents` are not
/// persisted (§4.7 step 8 relies on this: the job-estimate planner pass runs
/// "with the dedup filter omitted" precisely because ancestry isn't
/// available from the index alone).
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BucketIndexBlock {
    /// Block id.
    pub id: BlockId,
    /// Inclusive start of the time range.
    pub min_time: TimestampMillis,
    /// Exclusive end of the time range.
    pub max_time: TimestampMillis,
    /// Compaction level.
    pub compaction_level: u32,
    /// Downsample resolution in milliseconds.
    pub resolution: i64,
    /// External labels, including `compactor_shard_id` if sharded (§6
    /// "version 2 ... includes compactor_shard_id alongside block labels").
    pub labels: BTreeMap<String, String>,
    /// Constituent files.
    pub files: Vec<BlockFile>,
}

impl From<&Block> for BucketIndexBlock {
    fn from(b: &Block) -> Self {
        Self {
            id: b.id,
            min_time: b.min_time,
            max_time: b.max_time,
            compaction_level: b.compaction_level,
            resolution: b.resolution,
            labels: b.external_labels.clone(),
            files: b.files.clone(),
        }
    }
}

/// A deletion mark as persisted in the bucket index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BucketIndexDeletionMark {
    /// The marked block's id.
    pub block_id: BlockId,
    /// Unix seconds the mark was written.
    pub deletion_time: i64,
}

/// The authoritative (for the read path) per-tenant index of blocks and
/// deletion marks (§3).
///
/// Invariant maintained by [`BucketIndex::reconcile`]: every entry in
/// `block_deletion_marks` references an id either present in `blocks` or
/// not present anywhere (permanently removed) — never a dangling id that
/// still belongs to a *different* surviving block's identity space, which
/// can't happen since ids are globally unique.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BucketIndex {
    /// Schema version.
    pub version: u32,
    /// Blocks currently believed to exist in the tenant's bucket.
    pub blocks: Vec<BucketIndexBlock>,
    /// Deletion marks currently believed to exist.
    pub block_deletion_marks: Vec<BucketIndexDeletionMark>,
    /// Unix seconds this index was last (re)computed.
    pub updated_at: i64,
}

impl BucketIndex {
    /// An empty index, current version, stamped `now`.
    pub fn empty(now_unix_secs: i64) -> Self {
        Self {
            version: CURRENT_VERSION,
            blocks: Vec::new(),
            block_deletion_marks: Vec::new(),
            updated_at: now_unix_secs,
        }
    }

    /// Build a fresh index from a listing of block directories and a
    /// listing of deletion marks. Markers are listed first and blocks
    /// second by the caller (§4.7 step 3: "This ordering prevents the race
    /// in which a block appears without its mark after concurrent
    /// deletion"); this constructor just assembles what it's given.
    pub fn reconcile(
        blocks: Vec<BucketIndexBlock>,
        marks: Vec<BucketIndexDeletionMark>,
        now_unix_secs: i64,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            blocks,
            block_deletion_marks: marks,
            updated_at: now_unix_secs,
        }
    }

    /// Whether the index has no content worth persisting.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.block_deletion_marks.is_empty()
    }

    /// Block ids that have a deletion mark.
    pub fn marked_block_ids(&self) -> std::collections::BTreeSet<BlockId> {
        self.block_deletion_marks.iter().map(|m| m.block_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_has_no_content() {
        let idx = BucketIndex::empty(0);
        assert!(idx.is_empty());
        assert_eq!(idx.version, CURRENT_VERSION);
    }

    #[test]
    fn round_trips_through_json() {
        let id = BlockId::generate_at(1);
        let idx = BucketIndex::reconcile(
            vec![BucketIndexBlock {
                id,
                min_time: TimestampMillis::new(0),
                max_time: TimestampMillis::new(100),
                compaction_level: 1,
                resolution: 0,
                labels: BTreeMap::new(),
                files: vec![],
            }],
            vec![],
            42,
        );
        let json = serde_json::to_string(&idx).unwrap();
        let parsed: BucketIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(idx, parsed);
    }
}
