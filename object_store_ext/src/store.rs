//! [`BucketStore`]: the object-store facade used throughout the compaction
//! core (§4.2).

use crate::error::{self, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{path::Path as OPath, DynObjectStore};
use snafu::ResultExt;
use std::sync::Arc;

/// Last-modified timestamp and size of an object (§4.2 `attributes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// Unix seconds the object was last written.
    pub last_modified_unix_secs: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Facade over object storage: iterate immediate children of a prefix,
/// fetch/upload/delete individual objects, and read an object's attributes
/// (§4.2). Implementations must make `delete` idempotent and must
/// distinguish "not found" from other failures on `get`/`attributes`.
#[async_trait]
pub trait BucketStore: std::fmt::Debug + Send + Sync + 'static {
    /// Call `callback` once per immediate child name under `prefix`
    /// (directory-style listing, not a full recursive walk).
    async fn iter(&self, prefix: &str, callback: &mut (dyn FnMut(String) + Send)) -> Result<()>;

    /// Fetch an object's full contents.
    async fn get(&self, name: &str) -> Result<Bytes>;

    /// Upload `data`, publishing atomically (§4.2 "atomic publish").
    async fn upload(&self, name: &str, data: Bytes) -> Result<()>;

    /// Delete an object. Deleting a missing object is a success (§4.2
    /// "idempotent").
    async fn delete(&self, name: &str) -> Result<()>;

    /// Fetch an object's attributes without downloading its body.
    async fn attributes(&self, name: &str) -> Result<ObjectAttributes>;
}

/// Fetch and parse an object as JSON, mapping a missing object to
/// [`Error::NotFound`] and a parse failure to [`Error::Corrupted`].
///
/// A free function rather than a default trait method, so [`BucketStore`]
/// stays object-safe (`Arc<dyn BucketStore>` is how every caller holds it).
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn BucketStore,
    name: &str,
) -> Result<T> {
    let bytes = store.get(name).await?;
    serde_json::from_slice(&bytes).context(error::CorruptedSnafu { path: name })
}

/// Serialize `value` as JSON and upload it.
pub async fn put_json<T: serde::Serialize + Sync>(
    store: &dyn BucketStore,
    name: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value).expect("serializing a domain type cannot fail");
    store.upload(name, Bytes::from(bytes)).await
}

/// [`BucketStore`] backed by a real `object_store::ObjectStore`
/// implementation (the teacher's literal dependency).
#[derive(Debug)]
pub struct ObjectStoreBucket {
    inner: Arc<DynObjectStore>,
}

impl ObjectStoreBucket {
    /// Wrap an `object_store` client.
    pub fn new(inner: Arc<DynObjectStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BucketStore for ObjectStoreBucket {
    async fn iter(&self, prefix: &str, callback: &mut (dyn FnMut(String) + Send)) -> Result<()> {
        let path = OPath::from(prefix);
        let listing = self
            .inner
            .list_with_delimiter(Some(&path))
            .await
            .context(error::StorageSnafu { path: prefix })?;
        for child in listing.common_prefixes {
            if let Some(name) = child.parts().last() {
                callback(name.as_ref().to_string());
            }
        }
        for object in listing.objects {
            if let Some(name) = object.location.parts().last() {
                callback(name.as_ref().to_string());
            }
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let path = OPath::from(name);
        let result = self.inner.get(&path).await.map_err(|e| match &e {
            object_store::Error::NotFound { .. } => Error::NotFound {
                path: name.to_string(),
            },
            _ => Error::Storage {
                path: name.to_string(),
                source: e,
            },
        })?;
        result
            .bytes()
            .await
            .context(error::StorageSnafu { path: name })
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<()> {
        let path = OPath::from(name);
        self.inner
            .put(&path, data)
            .await
            .context(error::StorageSnafu { path: name })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = OPath::from(name);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::Storage {
                path: name.to_string(),
                source: e,
            }),
        }
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        let path = OPath::from(name);
        let meta = self.inner.head(&path).await.map_err(|e| match &e {
            object_store::Error::NotFound { .. } => Error::NotFound {
                path: name.to_string(),
            },
            _ => Error::Storage {
                path: name.to_string(),
                source: e,
            },
        })?;
        Ok(ObjectAttributes {
            last_modified_unix_secs: meta.last_modified.timestamp(),
            size: meta.size as u64,
        })
    }
}

/// List every immediate child under `prefix`, collecting names into a
/// `Vec` (a small helper over [`BucketStore::iter`]'s callback shape, used
/// by call sites that want to buffer rather than stream).
pub async fn list_children(store: &dyn BucketStore, prefix: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    store
        .iter(prefix, &mut |name| names.push(name))
        .await?;
    Ok(names)
}
