//! The compaction core: meta syncer, planner/grouper, and bucket compactor
//! engine (§4.4, §4.5, §4.6).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

pub mod engine;
mod filters;
pub mod meta_json;
pub mod meta_syncer;
pub mod planner;

pub use engine::{BlockMerger, Engine, EngineConfig, JobOutcome, MergeError, MergeOutput, MetadataMerger};
pub use meta_json::parse_meta_json;
pub use meta_syncer::{MetaSyncer, PartialBlock, SyncParams, SyncResult};
pub use planner::{plan, PlanError, PlannerConfig};
