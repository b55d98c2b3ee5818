//! Object-store facade for the compaction core (§4.2): a narrow
//! `iter`/`get`/`upload`/`delete`/`attributes` trait, a global-marker
//! mirroring wrapper, and a metrics-decorating wrapper.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod error;
mod global_marker;
mod metrics;
mod store;

pub use error::{Error, Result};
pub use global_marker::GlobalMarkerStore;
pub use metrics::MetricsBucketStore;
pub use store::{get_json, list_children, put_json, BucketStore, ObjectAttributes, ObjectStoreBucket};
