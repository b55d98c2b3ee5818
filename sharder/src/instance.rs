//! Ring membership state for a single instance (§3 "Ring").

use std::fmt;

/// Lifecycle state of one ring member (§3 "Ring ... Lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Registered but not yet accepting traffic.
    Pending,
    /// Tokens assigned, waiting to become fully active.
    Joining,
    /// Fully participating in placement decisions.
    Active,
    /// Shutting down; still visible for rollout stability but not for
    /// execution ownership.
    Leaving,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "PENDING",
            InstanceState::Joining => "JOINING",
            InstanceState::Active => "ACTIVE",
            InstanceState::Leaving => "LEAVING",
        };
        write!(f, "{s}")
    }
}

/// One member of the ring: its tokens, lifecycle state, and heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescriptor {
    /// Stable instance identifier (e.g. pod name).
    pub id: String,
    /// Availability zone, used for zone-aware replication (not exercised by
    /// this workspace's single-zone tests, but carried for completeness).
    pub zone: String,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Unix seconds of the last heartbeat.
    pub heartbeat_timestamp: i64,
    /// Unix seconds the instance first registered.
    pub registered_timestamp: i64,
    /// Tokens this instance owns on the ring.
    pub tokens: Vec<u32>,
}

impl InstanceDescriptor {
    /// Whether this instance's last heartbeat is older than `timeout_secs`
    /// as of `now_unix_secs` (§3 "An instance with no heartbeat beyond the
    /// timeout is UNHEALTHY").
    pub fn is_unhealthy(&self, now_unix_secs: i64, timeout_secs: i64) -> bool {
        now_unix_secs - self.heartbeat_timestamp > timeout_secs
    }
}
