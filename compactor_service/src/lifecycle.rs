//! Ring join/heartbeat/leave sequencing (§3 "Lifecycle", §4.9 "on start,
//! join the ring PENDING→JOINING→ACTIVE ... on shutdown signal, transition
//! to LEAVING").

use observability_deps::tracing::info;
use sharder::{InstanceState, Ring};
use std::time::Duration;
use time_provider::TimeProvider as _;
use tokio_util::sync::CancellationToken;

/// Register this instance and drive it through PENDING→JOINING→ACTIVE,
/// waiting for ring stability before declaring ACTIVE so placement decisions
/// made by peers mid-rollout converge (§4.1 "Ring stability", §8 invariant 7).
pub async fn join(
    ring: &Ring,
    instance_id: &str,
    zone: &str,
    tokens_per_instance: usize,
    now_unix_secs: i64,
    stability_min: Duration,
    stability_max_wait: Duration,
    cancel: &CancellationToken,
) {
    ring.register(instance_id, zone, tokens_per_instance, now_unix_secs)
        .expect("CAS conflict on first registration of a fresh instance id is not expected");
    ring.set_state(instance_id, InstanceState::Joining);
    info!(instance_id, "joined ring, waiting for stability before going ACTIVE");

    ring.wait_ring_stability(stability_min, stability_max_wait, cancel).await;
    ring.set_state(instance_id, InstanceState::Active);
    info!(instance_id, "ring membership ACTIVE");
}

/// Transition to LEAVING and deregister (§3 "on shutdown transition to
/// LEAVING").
pub fn leave(ring: &Ring, instance_id: &str) {
    ring.set_state(instance_id, InstanceState::Leaving);
    ring.unregister(instance_id);
    info!(instance_id, "left ring");
}

/// Periodically refresh this instance's heartbeat until `cancel` fires
/// (§3 "heartbeat", "UNHEALTHY" detection relies on this staying current).
pub async fn heartbeat_loop(ring: Ring, instance_id: String, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = time_provider::SystemProvider::new().now().timestamp_secs();
                ring.heartbeat(&instance_id, now);
            }
            _ = cancel.cancelled() => return,
        }
    }
}
