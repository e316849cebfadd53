// [apps/orchestrator/src/services/health_monitor.rs]
//! Marks nodes online/offline from heartbeat recency and force-errors any
//! `Running` VM stranded on a node that just went dark.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_domain::{Event, NodeStatus, TransitionContext, TransitionSource, VmStatus};
use tokio::time::interval;
use tracing::{info, warn};

use crate::state::lifecycle::LifecycleManager;
use crate::state::store::Store;

pub fn spawn_health_monitor(store: Arc<Store>, lifecycle: Arc<LifecycleManager>, tick: Duration, stale_after: Duration) {
    tokio::spawn(async move {
        info!("node health monitor started");
        let mut ticker = interval(tick);
        loop {
            ticker.tick().await;
            run_once(&store, &lifecycle, stale_after);
        }
    });
}

fn run_once(store: &Store, lifecycle: &LifecycleManager, stale_after: Duration) {
    let now = Utc::now();
    let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::seconds(90));

    for mut node in store.list_nodes() {
        let delta = now - node.last_heartbeat_at;
        if delta > stale_after && node.status == NodeStatus::Online {
            node.status = NodeStatus::Offline;
            let node_id = node.node_id.clone();
            store.upsert_node(node);
            store.append_event(Event::warn("health.node_offline", &node_id, format!("heartbeat stale by {delta}")));
            warn!(node_id = %node_id, "node marked offline");

            for vm in store.list_vms(|v| v.node_id.as_deref() == Some(node_id.as_str()) && v.status == VmStatus::Running) {
                let _ = lifecycle.transition(
                    &vm.vm_id,
                    VmStatus::Error,
                    TransitionContext::new(TransitionSource::HealthLost).with_reason("node_offline"),
                );
            }
        }
    }
}
