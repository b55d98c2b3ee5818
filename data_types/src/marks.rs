//! Marker objects: `deletion-mark.json`, `no-compact-mark.json`, and the
//! per-tenant `tenant-deletion-mark.json` (§3, §6).

use crate::block::BlockId;

/// On-disk shape of `<tenant>/<block-id>/deletion-mark.json` and its global
/// mirror under `<tenant>/markers/` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DeletionMark {
    /// The marked block's id.
    #[serde(rename = "id")]
    pub block_id: BlockId,
    /// Schema version; always 1.
    pub version: u32,
    /// Human-readable reason, e.g. `"retention"` or `"marked by garbage
    /// collection"`.
    pub details: String,
    /// Unix seconds at which the block becomes eligible for hard deletion
    /// (`deletion_time + deletion_delay`).
    pub deletion_time: i64,
}

impl DeletionMark {
    /// Construct a new mark for `block_id`, stamped `now`.
    pub fn new(block_id: BlockId, now_unix_secs: i64, details: impl Into<String>) -> Self {
        Self {
            block_id,
            version: 1,
            details: details.into(),
            deletion_time: now_unix_secs,
        }
    }

    /// Whether `deletion_delay` has elapsed since `deletion_time` as of
    /// `now_unix_secs` (§8 invariant 5).
    pub fn eligible_for_hard_delete(&self, now_unix_secs: i64, deletion_delay_secs: i64) -> bool {
        now_unix_secs - self.deletion_time >= deletion_delay_secs
    }
}

/// On-disk shape of `<tenant>/<block-id>/no-compact-mark.json` and its
/// global mirror (§3, §6 — schema inferred per `SPEC_FULL.md` §6 since the
/// distilled spec names the marker but not its JSON shape).
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct NoCompactMark {
    /// The marked block's id.
    pub id: BlockId,
    /// Schema version; always 1.
    pub version: u32,
    /// Human-readable reason, e.g. `"unhealthy: out-of-order chunks"`.
    pub reason: String,
}

impl NoCompactMark {
    /// Construct a new mark.
    pub fn new(id: BlockId, reason: impl Into<String>) -> Self {
        Self {
            id,
            version: 1,
            reason: reason.into(),
        }
    }
}

/// On-disk shape of `<tenant>/markers/tenant-deletion-mark.json` (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TenantDeletionMark {
    /// Unix seconds at which the tenant finished write-path teardown and
    /// became eligible for eventual hard deletion of residual state.
    pub finished_time: i64,
}

impl TenantDeletionMark {
    /// Whether `tenant_cleanup_delay` has elapsed since `finished_time`.
    pub fn eligible_for_hard_delete(&self, now_unix_secs: i64, tenant_cleanup_delay_secs: i64) -> bool {
        now_unix_secs - self.finished_time >= tenant_cleanup_delay_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_mark_round_trips_json() {
        let id = BlockId::generate_at(1_000);
        let mark = DeletionMark::new(id, 1_700_000_000, "retention");
        let json = serde_json::to_string(&mark).unwrap();
        let parsed: DeletionMark = serde_json::from_str(&json).unwrap();
        assert_eq!(mark, parsed);
    }

    #[test]
    fn hard_delete_eligibility_respects_delay() {
        let mark = DeletionMark::new(BlockId::generate_at(1), 1_000, "retention");
        assert!(!mark.eligible_for_hard_delete(1_999, 1_000));
        assert!(mark.eligible_for_hard_delete(2_000, 1_000));
    }
}
