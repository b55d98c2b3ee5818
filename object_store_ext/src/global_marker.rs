//! The global-marker wrapper: every write to a per-block deletion or
//! no-compaction mark is mirrored into a per-tenant `markers/` directory so
//! a single cheap listing can enumerate all marks in a tenant (§4.2).

use crate::error::Result;
use crate::store::BucketStore;
use async_trait::async_trait;
use bytes::Bytes;
use observability_deps::tracing::debug;

const DELETION_MARK_FILE: &str = "deletion-mark.json";
const NO_COMPACT_MARK_FILE: &str = "no-compact-mark.json";

/// Parsed shape of a per-block mark path, `<tenant>/<block_id>/<file>`.
struct MarkPath<'a> {
    tenant: &'a str,
    block_id: &'a str,
    file: &'a str,
}

fn parse_mark_path(name: &str) -> Option<MarkPath<'_>> {
    let mut parts = name.split('/');
    let tenant = parts.next()?;
    let block_id = parts.next()?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None; // deeper than a block directory — not a mark write
    }
    if file != DELETION_MARK_FILE && file != NO_COMPACT_MARK_FILE {
        return None;
    }
    Some(MarkPath {
        tenant,
        block_id,
        file,
    })
}

fn mirror_path(mark: &MarkPath<'_>) -> String {
    format!(
        "{}/markers/{}-{}",
        mark.tenant, mark.block_id, mark.file
    )
}

/// Wraps an inner [`BucketStore`], mirroring every write to
/// `<tenant>/<block>/deletion-mark.json` or `<tenant>/<block>/no-compact-mark.json`
/// into `<tenant>/markers/<block>-<file>`.
#[derive(Debug)]
pub struct GlobalMarkerStore<S> {
    inner: S,
}

impl<S: BucketStore> GlobalMarkerStore<S> {
    /// Wrap `inner` with global-marker mirroring.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Borrow the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: BucketStore> BucketStore for GlobalMarkerStore<S> {
    async fn iter(&self, prefix: &str, callback: &mut (dyn FnMut(String) + Send)) -> Result<()> {
        self.inner.iter(prefix, callback).await
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        self.inner.get(name).await
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<()> {
        self.inner.upload(name, data.clone()).await?;
        if let Some(mark) = parse_mark_path(name) {
            let mirror = mirror_path(&mark);
            debug!(name, mirror, "mirroring mark write to global markers dir");
            self.inner.upload(&mirror, data).await?;
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await?;
        if let Some(mark) = parse_mark_path(name) {
            let mirror = mirror_path(&mark);
            self.inner.delete(&mirror).await?;
        }
        Ok(())
    }

    async fn attributes(&self, name: &str) -> Result<crate::store::ObjectAttributes> {
        self.inner.attributes(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_deletion_mark_paths() {
        let mark = parse_mark_path("acme/01H8X.../deletion-mark.json").unwrap();
        assert_eq!(mark.tenant, "acme");
        assert_eq!(mark.block_id, "01H8X...");
        assert_eq!(
            mirror_path(&mark),
            "acme/markers/01H8X...-deletion-mark.json"
        );
    }

    #[test]
    fn ignores_unrelated_paths() {
        assert!(parse_mark_path("acme/01H8X.../meta.json").is_none());
        assert!(parse_mark_path("acme/bucket-index.json.gz").is_none());
        assert!(parse_mark_path("acme/01H8X.../chunks/000001").is_none());
    }
}
