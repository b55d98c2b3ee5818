//! Builds a [`DynObjectStore`] from [`ObjectStoreConfig`], mirroring the
//! teacher's `clap_blocks::object_store::make_object_store` (source not
//! present in this workspace's reference pack; reconstructed from its
//! `--object-store`/feature-flag shape, visible in `clap_blocks`'s
//! `Cargo.toml`: `azure`/`gcp`/`aws` features gating `object_store`'s own
//! backend features).

use crate::config::{ObjectStoreConfig, ObjectStoreKind};
use object_store::memory::InMemory;
use object_store::DynObjectStore;
use std::sync::Arc;
use thiserror::Error;

/// Failures constructing the configured object-store backend; fatal at
/// startup (§6 "bucket unreachable ... exit non-zero").
#[derive(Debug, Error)]
pub enum Error {
    /// `--object-store=file` was given without `--data-dir`.
    #[error("--data-dir is required when --object-store=file")]
    MissingDataDir,
    /// The local filesystem backend failed to initialize.
    #[error("failed to initialize local file object store: {0}")]
    LocalFileSystem(#[source] object_store::Error),
    #[cfg(feature = "aws")]
    /// `--object-store=s3` was given without `--bucket`.
    #[error("--bucket is required when --object-store=s3")]
    MissingBucket,
    #[cfg(feature = "aws")]
    /// The S3 backend failed to initialize.
    #[error("failed to initialize S3 object store: {0}")]
    S3(#[source] object_store::Error),
}

/// Construct the object store selected by `config`.
pub fn make_object_store(config: &ObjectStoreConfig) -> Result<Arc<DynObjectStore>, Error> {
    match config.kind {
        ObjectStoreKind::Memory => Ok(Arc::new(InMemory::new())),
        ObjectStoreKind::File => {
            let dir = config.data_dir.as_ref().ok_or(Error::MissingDataDir)?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(dir)
                .map_err(Error::LocalFileSystem)?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "aws")]
        ObjectStoreKind::S3 => {
            let bucket = config.bucket.as_ref().ok_or(Error::MissingBucket)?;
            let store = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(Error::S3)?;
            Ok(Arc::new(store))
        }
    }
}
