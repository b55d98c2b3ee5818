//! Parsing of `meta.json` (§6) into [`Block`]. Kept separate from
//! [`data_types::Block`] itself since the wire shape (camelCase, nested
//! `compaction`/`thanos` objects) is an external contract this workspace
//! doesn't control, while `Block` is our own domain type.

use data_types::{Block, BlockFile, BlockId, BlockStats, TimestampMillis};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, serde::Deserialize)]
struct RawMeta {
    #[serde(rename = "ulid")]
    id: BlockId,
    #[serde(rename = "minTime")]
    min_time: i64,
    #[serde(rename = "maxTime")]
    max_time: i64,
    #[serde(default)]
    stats: RawStats,
    compaction: RawCompaction,
    thanos: RawThanos,
}

#[derive(Debug, Default, serde::Deserialize)]
struct RawStats {
    #[serde(rename = "numSeries", default)]
    num_series: u64,
    #[serde(rename = "numSamples", default)]
    num_samples: u64,
    #[serde(rename = "numFloatSamples", default)]
    num_float_samples: u64,
    #[serde(rename = "numHistogramSamples", default)]
    num_histogram_samples: u64,
}

#[derive(Debug, serde::Deserialize)]
struct RawCompaction {
    level: u32,
    #[serde(default)]
    sources: Vec<BlockId>,
    #[serde(default)]
    parents: Vec<RawParent>,
    #[serde(rename = "outOfOrder", default)]
    out_of_order: bool,
}

#[derive(Debug, serde::Deserialize)]
struct RawParent {
    ulid: BlockId,
}

#[derive(Debug, serde::Deserialize)]
struct RawThanos {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    downsample: RawDownsample,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct RawDownsample {
    #[serde(default)]
    resolution: i64,
}

#[derive(Debug, serde::Deserialize)]
struct RawFile {
    rel_path: String,
    size_bytes: u64,
}

/// Parse a `meta.json` payload into a [`Block`], stamping `uploaded_at`
/// from the object's last-modified time (§3: "derived from the last-modified
/// timestamp of the meta object", not carried in the JSON itself).
pub fn parse_meta_json(bytes: &[u8], uploaded_at: i64) -> Result<Block, serde_json::Error> {
    let raw: RawMeta = serde_json::from_slice(bytes)?;
    Ok(Block {
        id: raw.id,
        min_time: TimestampMillis::new(raw.min_time),
        max_time: TimestampMillis::new(raw.max_time),
        compaction_level: raw.compaction.level,
        sources: raw.compaction.sources.into_iter().collect::<BTreeSet<_>>(),
        parents: raw
            .compaction
            .parents
            .into_iter()
            .map(|p| p.ulid)
            .collect::<BTreeSet<_>>(),
        resolution: raw.thanos.downsample.resolution,
        external_labels: raw.thanos.labels,
        files: raw
            .thanos
            .files
            .into_iter()
            .map(|f| BlockFile {
                name: f.rel_path,
                size_bytes: f.size_bytes,
            })
            .collect(),
        uploaded_at,
        out_of_order: raw.compaction.out_of_order,
        stats: BlockStats {
            num_series: raw.stats.num_series,
            num_samples: raw.stats.num_samples,
            num_float_samples: raw.stats.num_float_samples,
            num_histogram_samples: raw.stats.num_histogram_samples,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_meta_json() {
        let id = BlockId::generate_at(1_000);
        let json = format!(
            r#"{{
                "version": 1,
                "ulid": "{id}",
                "minTime": 0,
                "maxTime": 7200000,
                "stats": {{"numSeries": 3, "numSamples": 9, "numFloatSamples": 9, "numHistogramSamples": 0}},
                "compaction": {{"level": 1, "sources": ["{id}"], "parents": [], "outOfOrder": false}},
                "thanos": {{"labels": {{"__name__": "up"}}, "downsample": {{"resolution": 0}},
                            "source": "ingester", "files": [{{"rel_path": "index", "size_bytes": 128}}]}}
            }}"#
        );
        let block = parse_meta_json(json.as_bytes(), 1_700_000_000).unwrap();
        assert_eq!(block.id, id);
        assert_eq!(block.min_time.get(), 0);
        assert_eq!(block.max_time.get(), 7_200_000);
        assert_eq!(block.compaction_level, 1);
        assert!(block.sources.contains(&id));
        assert_eq!(block.stats.num_series, 3);
        assert_eq!(block.files[0].size_bytes, 128);
        assert_eq!(block.uploaded_at, 1_700_000_000);
    }

    #[test]
    fn rejects_corrupted_json() {
        assert!(parse_meta_json(b"not json", 0).is_err());
    }
}
