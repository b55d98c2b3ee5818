//! Error taxonomy for bucket operations (§7: "Transient storage" and
//! "Not-found" are the two kinds this crate distinguishes; callers decide
//! how to react).

use snafu::Snafu;

/// Errors surfaced by [`crate::BucketStore`] implementations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The requested object does not exist. Distinguished from other
    /// errors so callers can treat it as success (cleaner, §7) or as
    /// "partial" (meta syncer, §4.4 step 2).
    #[snafu(display("object not found: {path}"))]
    NotFound {
        /// The object's path.
        path: String,
    },

    /// Any other object-store failure (timeout, 5xx, connection reset).
    /// Treated as transient and retried with backoff at the call site.
    #[snafu(display("object store operation on {path} failed: {source}"))]
    Storage {
        /// The object's path.
        path: String,
        /// The underlying error.
        source: object_store::Error,
    },

    /// The stored bytes did not parse as the expected JSON shape.
    #[snafu(display("corrupted object at {path}: {source}"))]
    Corrupted {
        /// The object's path.
        path: String,
        /// The underlying parse error.
        source: serde_json::Error,
    },
}

impl Error {
    /// Whether this error represents a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result alias for bucket operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
