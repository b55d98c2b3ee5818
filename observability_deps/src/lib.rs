//! Observability ecosystem dependencies, to ensure consistent versions and
//! unified updates across the workspace.
//!
//! Rather than importing `tracing` directly, crates in this workspace
//! should use this crate, as in `use observability_deps::tracing::info;`

pub use tracing;
