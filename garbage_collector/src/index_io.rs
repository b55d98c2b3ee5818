//! Reads and writes the gzip'ed `bucket-index.json.gz` object (§6).

use data_types::BucketIndex;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use object_store_ext::BucketStore;
use std::io::{Read, Write};

const INDEX_FILE: &str = "bucket-index.json.gz";

/// Path of the bucket index for `tenant`.
pub fn index_path(tenant: &str) -> String {
    format!("{tenant}/{INDEX_FILE}")
}

/// Read and decompress the bucket index for `tenant`. Returns `Ok(None)`
/// if absent, and `Err` only for corrupted content (§4.7 step 1:
/// "corrupted index is logged and rebuilt from scratch" — callers should
/// treat `Err` the same way they'd treat `Ok(None)`, after logging).
pub async fn read_index(store: &dyn BucketStore, tenant: &str) -> Result<Option<BucketIndex>, String> {
    let path = index_path(tenant);
    let bytes = match store.get(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut decoder = GzDecoder::new(&bytes[..]);
    let mut json = String::new();
    decoder
        .read_to_string(&mut json)
        .map_err(|e| format!("gzip decode failed: {e}"))?;
    serde_json::from_str(&json).map_err(|e| format!("json decode failed: {e}"))
}

/// Gzip-compress and upload `index` for `tenant`.
pub async fn write_index(store: &dyn BucketStore, tenant: &str, index: &BucketIndex) -> object_store_ext::Result<()> {
    let json = serde_json::to_vec(index).expect("serializing BucketIndex cannot fail");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).expect("writing to an in-memory buffer cannot fail");
    let gzipped = encoder.finish().expect("finishing an in-memory gzip stream cannot fail");
    store.upload(&index_path(tenant), gzipped.into()).await
}

/// Delete the bucket index object for `tenant` (§4.7 step 7: "if no blocks
/// remain ... delete the index").
pub async fn delete_index(store: &dyn BucketStore, tenant: &str) -> object_store_ext::Result<()> {
    store.delete(&index_path(tenant)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store_ext::ObjectStoreBucket;
    use std::sync::Arc;

    fn store() -> ObjectStoreBucket {
        ObjectStoreBucket::new(Arc::new(object_store::memory::InMemory::new()))
    }

    #[tokio::test]
    async fn round_trips_through_gzip() {
        let store = store();
        let index = BucketIndex::empty(1_700_000_000);
        write_index(&store, "acme", &index).await.unwrap();
        let read_back = read_index(&store, "acme").await.unwrap().unwrap();
        assert_eq!(read_back, index);
    }

    #[tokio::test]
    async fn missing_index_is_none() {
        let store = store();
        assert!(read_index(&store, "acme").await.unwrap().is_none());
    }
}
