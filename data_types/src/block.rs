//! [`Block`]: the immutable unit of time-series data produced by ingesters
//! and reshaped by compaction (§3).

use crate::timestamp::TimestampMillis;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use ulid::Ulid;

/// Globally unique, lexicographically time-sortable block identifier.
///
/// Backed by a ULID (128 bits, timestamp-prefixed) rather than the teacher's
/// UUIDv4, because §3 requires `id` to be "lexicographically time-sortable"
/// — a property UUIDv4 does not have. This is the one dependency this
/// workspace adds beyond the teacher's stack; see `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub Ulid);

impl BlockId {
    /// Generate a new block id timestamped at `millis`.
    pub fn generate_at(millis: u64) -> Self {
        Self(Ulid::from_parts(millis, rand::random::<u128>()))
    }

    /// Parse a block id from its canonical ULID string form.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }

    /// The millisecond timestamp embedded in the id, usable as an age proxy
    /// for block directories that lack a parseable `meta.json` (garbage
    /// collector partial-block handling).
    pub fn timestamp_millis(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of series/samples recorded in a block, taken verbatim from
/// `meta.json`'s `stats` object (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BlockStats {
    /// Total number of series.
    pub num_series: u64,
    /// Total number of samples of any kind.
    pub num_samples: u64,
    /// Number of float samples.
    pub num_float_samples: u64,
    /// Number of native-histogram samples.
    pub num_histogram_samples: u64,
}

/// One file belonging to a block (`files` in §3, `thanos.files` in §6).
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BlockFile {
    /// Path relative to the block directory, e.g. `"index"` or
    /// `"chunks/000001"`.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Immutable unit of time-series data identified by [`BlockId`] (§3).
///
/// Invariants upheld by every constructor in this module:
/// - `min_time < max_time` (enforced by [`crate::timestamp::TimeRange::new`]);
/// - `sources` is non-empty;
/// - `id` appears in `sources` iff `compaction_level == 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Globally unique id.
    pub id: BlockId,
    /// Inclusive start of the block's time range, milliseconds.
    pub min_time: TimestampMillis,
    /// Exclusive end of the block's time range, milliseconds.
    pub max_time: TimestampMillis,
    /// Generation of this block; ingester-written blocks are level 1.
    pub compaction_level: u32,
    /// Ancestor ids fully subsumed by this block.
    pub sources: BTreeSet<BlockId>,
    /// Ids of blocks this one directly replaces.
    pub parents: BTreeSet<BlockId>,
    /// Downsample granularity in milliseconds; 0 means raw resolution.
    pub resolution: i64,
    /// External labels, including any shard label (`compactor_shard_id`).
    pub external_labels: BTreeMap<String, String>,
    /// Constituent files and their sizes.
    pub files: Vec<BlockFile>,
    /// Seconds since epoch, derived from the meta object's last-modified
    /// timestamp at sync time (not part of `meta.json` itself).
    pub uploaded_at: i64,
    /// Whether the underlying TSDB compactor flagged out-of-order chunks
    /// when this block was produced (§6 `compaction.outOfOrder`).
    pub out_of_order: bool,
    /// Series/sample statistics.
    pub stats: BlockStats,
}

/// The external label used to carry a block's shard assignment, e.g.
/// `"3_of_10"` (§4.5 Stage B.2, GLOSSARY "Shard").
pub const SHARD_ID_LABEL: &str = "compactor_shard_id";

impl Block {
    /// Shard id this block was assigned to, if any (§4.5).
    pub fn shard_id(&self) -> Option<&str> {
        self.external_labels.get(SHARD_ID_LABEL).map(String::as_str)
    }

    /// `external_labels` with the shard label removed, used as the
    /// comparison key for grouping same-series blocks regardless of shard
    /// (§4.5 Stage A "labels_without_shard_id").
    pub fn labels_without_shard(&self) -> BTreeMap<String, String> {
        let mut labels = self.external_labels.clone();
        labels.remove(SHARD_ID_LABEL);
        labels
    }

    /// Whether this is a level-1 (ingester-written, unmerged) block.
    pub fn is_level_1(&self) -> bool {
        self.compaction_level == 1
    }

    /// Validate the structural invariants from §3 that aren't enforced by
    /// the type alone (called when parsing an externally-sourced `meta.json`,
    /// which is not a trusted input).
    pub fn validate(&self) -> Result<(), BlockValidationError> {
        if self.min_time >= self.max_time {
            return Err(BlockValidationError::BadTimeRange {
                min_time: self.min_time.get(),
                max_time: self.max_time.get(),
            });
        }
        if self.sources.is_empty() {
            return Err(BlockValidationError::EmptySources);
        }
        let self_in_sources = self.sources.contains(&self.id);
        if self.compaction_level == 1 && !self_in_sources {
            return Err(BlockValidationError::Level1NotSelfSourced);
        }
        if self.compaction_level != 1 && self_in_sources {
            return Err(BlockValidationError::NonLevel1SelfSourced);
        }
        Ok(())
    }
}

/// Violations of the `Block` invariants stated in §3.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockValidationError {
    /// `min_time` was not strictly less than `max_time`.
    #[error("min_time ({min_time}) must be less than max_time ({max_time})")]
    BadTimeRange {
        /// The offending `min_time`.
        min_time: i64,
        /// The offending `max_time`.
        max_time: i64,
    },
    /// `sources` was empty.
    #[error("sources must be non-empty")]
    EmptySources,
    /// A level-1 block did not include itself in `sources`.
    #[error("level-1 block must include its own id in sources")]
    Level1NotSelfSourced,
    /// A block above level 1 included itself in `sources`.
    #[error("block above compaction level 1 must not include its own id in sources")]
    NonLevel1SelfSourced,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(level: u32, self_sourced: bool) -> Block {
        let id = BlockId::generate_at(1_000);
        let mut sources = BTreeSet::new();
        if self_sourced {
            sources.insert(id);
        } else {
            sources.insert(BlockId::generate_at(900));
        }
        Block {
            id,
            min_time: TimestampMillis::new(0),
            max_time: TimestampMillis::new(1),
            compaction_level: level,
            sources,
            parents: BTreeSet::new(),
            resolution: 0,
            external_labels: BTreeMap::new(),
            files: vec![],
            uploaded_at: 0,
            out_of_order: false,
            stats: BlockStats::default(),
        }
    }

    #[test]
    fn level_1_must_self_source() {
        assert!(block(1, true).validate().is_ok());
        assert_eq!(
            block(1, false).validate().unwrap_err(),
            BlockValidationError::Level1NotSelfSourced
        );
    }

    #[test]
    fn non_level_1_must_not_self_source() {
        assert!(block(2, false).validate().is_ok());
        assert_eq!(
            block(2, true).validate().unwrap_err(),
            BlockValidationError::NonLevel1SelfSourced
        );
    }

    #[test]
    fn shard_label_round_trips_and_is_stripped() {
        let mut b = block(2, false);
        b.external_labels
            .insert(SHARD_ID_LABEL.to_string(), "3_of_10".to_string());
        b.external_labels
            .insert("__name__".to_string(), "up".to_string());
        assert_eq!(b.shard_id(), Some("3_of_10"));
        assert!(!b.labels_without_shard().contains_key(SHARD_ID_LABEL));
        assert!(b.labels_without_shard().contains_key("__name__"));
    }
}
