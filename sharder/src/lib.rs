//! Consistent-hash ring membership, shuffle-sharding, and the sharding
//! coordinator that turns ring placement into tenant/job/cleanup ownership
//! decisions (§3 "Ring", §4.1, §4.8).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod coordinator;
mod hashing;
mod instance;
mod ring;
mod store;

pub use coordinator::{Coordinator, CoordinatorConfig, TenantFilter};
pub use hashing::fnv1a_32;
pub use instance::{InstanceDescriptor, InstanceState};
pub use ring::{ReplicationSet, Ring, RingError, RingOp, DEFAULT_TOKENS_PER_INSTANCE};
pub use store::{CasConflict, InMemoryRingStore, RingSnapshot, RingStore};
