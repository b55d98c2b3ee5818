//! Shared data types for the compaction core: blocks, marks, the bucket
//! index, and compaction jobs (§3 of the design).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod block;
mod bucket_index;
mod config;
mod job;
mod marks;
mod tenant;
mod timestamp;

pub use block::{Block, BlockFile, BlockId, BlockStats, BlockValidationError, SHARD_ID_LABEL};
pub use bucket_index::{
    BucketIndex, BucketIndexBlock, BucketIndexDeletionMark, CURRENT_VERSION,
};
pub use config::{CleanerConfig, CompactionConfig};
pub use job::{Job, JobOrder, JobStage};
pub use marks::{DeletionMark, NoCompactMark, TenantDeletionMark};
pub use tenant::TenantId;
pub use timestamp::{TimeRange, TimestampMillis};
