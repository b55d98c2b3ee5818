//! The meta syncer's filter chain: label remover, shard-aware dedup, and
//! no-compaction-mark filter, applied in that order (§4.4 step 3).

use data_types::Block;
use std::collections::HashSet;

/// Drop any external labels named in `ignored` from every block, in place.
pub fn remove_ignored_labels(blocks: &mut [Block], ignored: &[String]) {
    if ignored.is_empty() {
        return;
    }
    for block in blocks {
        for label in ignored {
            block.external_labels.remove(label);
        }
    }
}

/// Shard-aware dedup: drop any block whose `sources` are a strict subset of
/// another survivor's `sources` at the same resolution — the meta-syncer's
/// half of garbage collection (§4.4 step 4's redundancy rule, applied here
/// so the planner never even sees a block that
/// [`crate::meta_syncer::garbage_collect`] would have marked). Same
/// containment rule as `garbage_collect`'s own `find_redundant`, applied
/// within a single `sync_metas` call rather than across GC cycles.
pub fn dedup_by_sources(blocks: Vec<Block>) -> Vec<Block> {
    let redundant: HashSet<_> = blocks
        .iter()
        .filter(|sub| {
            blocks.iter().any(|superset| {
                superset.id != sub.id
                    && superset.resolution == sub.resolution
                    && sub.sources.is_subset(&superset.sources)
                    && sub.sources != superset.sources
            })
        })
        .map(|b| b.id)
        .collect();
    blocks.into_iter().filter(|b| !redundant.contains(&b.id)).collect()
}

/// Exclude blocks carrying a no-compaction mark.
pub fn exclude_no_compact(blocks: Vec<Block>, marked: &HashSet<data_types::BlockId>) -> Vec<Block> {
    blocks.into_iter().filter(|b| !marked.contains(&b.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{BlockFile, BlockId, BlockStats, TimestampMillis};
    use std::collections::{BTreeMap, BTreeSet};

    fn block(id: BlockId, level: u32, sources: &[BlockId], resolution: i64) -> Block {
        Block {
            id,
            min_time: TimestampMillis::new(0),
            max_time: TimestampMillis::new(1),
            compaction_level: level,
            sources: sources.iter().copied().collect::<BTreeSet<_>>(),
            parents: BTreeSet::new(),
            resolution,
            external_labels: BTreeMap::new(),
            files: vec![BlockFile {
                name: "index".into(),
                size_bytes: 1,
            }],
            uploaded_at: 0,
            out_of_order: false,
            stats: BlockStats::default(),
        }
    }

    #[test]
    fn remove_ignored_labels_strips_named_labels_only() {
        let id = BlockId::generate_at(1);
        let mut b = block(id, 1, &[id], 0);
        b.external_labels.insert("drop_me".into(), "x".into());
        b.external_labels.insert("keep_me".into(), "y".into());
        remove_ignored_labels(std::slice::from_mut(&mut b), &["drop_me".to_string()]);
        assert!(!b.external_labels.contains_key("drop_me"));
        assert!(b.external_labels.contains_key("keep_me"));
    }

    #[test]
    fn dedup_drops_subsumed_block_with_same_resolution() {
        let s0 = BlockId::generate_at(1);
        let s1 = BlockId::generate_at(2);
        let superset_id = BlockId::generate_at(3);
        let sub = block(s0, 1, &[s0], 0);
        let superset = block(superset_id, 2, &[s0, s1], 0);
        let survivors = dedup_by_sources(vec![sub, superset]);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, superset_id);
    }

    #[test]
    fn dedup_keeps_subsumed_block_at_different_resolution() {
        let s0 = BlockId::generate_at(1);
        let s1 = BlockId::generate_at(2);
        let superset_id = BlockId::generate_at(3);
        let sub = block(s0, 1, &[s0], 0);
        let superset = block(superset_id, 2, &[s0, s1], 1000);
        let survivors = dedup_by_sources(vec![sub, superset]);
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn dedup_keeps_blocks_with_equal_source_sets() {
        // Equal (not strictly contained) source sets are a tie: neither
        // subsumes the other, so both survive.
        let s0 = BlockId::generate_at(1);
        let a = BlockId::generate_at(2);
        let b = BlockId::generate_at(3);
        let survivors = dedup_by_sources(vec![block(a, 2, &[s0], 0), block(b, 2, &[s0], 0)]);
        assert_eq!(survivors.len(), 2);
    }
}
