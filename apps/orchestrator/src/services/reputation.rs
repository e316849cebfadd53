// [apps/orchestrator/src/services/reputation.rs]
//! Recomputes node uptime percentage and success counters on a slow cadence.
//! Also registers as a `TransitionObserver` so `total_vms_hosted` and
//! `successful_completions` update the instant the triggering transition
//! commits, rather than by re-scanning the event log on every tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use orchestrator_domain::VmStatus;
use tokio::time::{interval, sleep};
use tracing::{info, instrument};

use crate::state::lifecycle::TransitionObserver;
use crate::state::store::Store;

/// Heartbeat jitter this small doesn't count against a node's uptime
/// sample, per spec's "ignores offline-based transient jitter smaller than
/// 2 minutes per sample".
const JITTER_TOLERANCE: ChronoDuration = ChronoDuration::minutes(2);
const ROLLING_WINDOW: ChronoDuration = ChronoDuration::days(30);

pub struct ReputationEngine {
    store: Arc<Store>,
    heartbeat_stale: ChronoDuration,
    /// VMs currently known to have passed through `Error` at least once
    /// since they last left `Deleted`. Consulted (and cleared) the moment
    /// a VM reaches `Deleted`, to decide whether it counts as a successful
    /// completion for its node.
    ever_errored: Mutex<HashSet<String>>,
}

impl ReputationEngine {
    pub fn new(store: Arc<Store>, heartbeat_stale: Duration) -> Self {
        Self {
            store,
            heartbeat_stale: ChronoDuration::from_std(heartbeat_stale).unwrap_or(ChronoDuration::seconds(90)),
            ever_errored: Mutex::new(HashSet::new()),
        }
    }

    pub fn spawn(self: Arc<Self>, startup_delay: Duration, tick: Duration) {
        tokio::spawn(async move {
            info!(delay_secs = startup_delay.as_secs(), "reputation engine scheduled to start");
            sleep(startup_delay).await;
            info!("reputation engine started");
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                self.run_once();
            }
        });
    }

    #[instrument(skip(self))]
    fn run_once(&self) {
        let now = chrono::Utc::now();
        for node in self.store.list_nodes() {
            let gaps = self.store.heartbeat_gaps_within(&node.node_id, now, ROLLING_WINDOW);
            if gaps.is_empty() {
                continue;
            }
            let total = gaps.len();
            let down = gaps.iter().filter(|gap| **gap - self.heartbeat_stale > JITTER_TOLERANCE).count();
            let uptime_pct = ((total - down) as f64 / total as f64) * 100.0;
            self.store.mutate_node(&node.node_id, |n| n.reputation.uptime_pct = uptime_pct);
        }
        info!("reputation recompute pass complete");
    }
}

impl TransitionObserver for ReputationEngine {
    fn on_transition(&self, vm_id: &str, _from: VmStatus, to: VmStatus) {
        match to {
            VmStatus::Running => {
                if let Some(node_id) = self.store.get_vm(vm_id).and_then(|v| v.node_id) {
                    self.store.mutate_node(&node_id, |n| n.reputation.total_vms_hosted += 1);
                }
            }
            VmStatus::Error => {
                self.ever_errored.lock().expect("ever_errored lock poisoned").insert(vm_id.to_string());
            }
            VmStatus::Deleted => {
                let never_errored = !self.ever_errored.lock().expect("ever_errored lock poisoned").remove(vm_id);
                if never_errored {
                    if let Some(node_id) = self.store.get_vm(vm_id).and_then(|v| v.node_id) {
                        self.store.mutate_node(&node_id, |n| n.reputation.successful_completions += 1);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::{TransitionContext, TransitionSource};

    use crate::state::lifecycle::LifecycleManager;

    fn harness() -> (Arc<Store>, Arc<LifecycleManager>, Arc<ReputationEngine>) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let engine = Arc::new(ReputationEngine::new(store.clone(), Duration::from_secs(90)));
        lifecycle.register_observer(engine.clone());
        (store, lifecycle, engine)
    }

    #[test]
    fn clean_run_counts_as_successful_completion() {
        let (store, lifecycle, _engine) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 8));
        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Provisioning);
        vm.node_id = Some("n1".to_string());
        store.upsert_vm(vm);

        lifecycle.transition("vm-1", VmStatus::Running, TransitionContext::new(TransitionSource::NodeAckCreateOk)).unwrap();
        lifecycle.transition("vm-1", VmStatus::Deleting, TransitionContext::new(TransitionSource::UserDelete)).unwrap();
        lifecycle.transition("vm-1", VmStatus::Deleted, TransitionContext::new(TransitionSource::NodeAckDeleteOk)).unwrap();

        let node = store.get_node("n1").unwrap();
        assert_eq!(node.reputation.total_vms_hosted, 1);
        assert_eq!(node.reputation.successful_completions, 1);
    }

    #[test]
    fn erroring_before_delete_does_not_count_as_success() {
        let (store, lifecycle, _engine) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 8));
        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Provisioning);
        vm.node_id = Some("n1".to_string());
        store.upsert_vm(vm);

        lifecycle.transition("vm-1", VmStatus::Running, TransitionContext::new(TransitionSource::NodeAckCreateOk)).unwrap();
        lifecycle.transition("vm-1", VmStatus::Error, TransitionContext::new(TransitionSource::HealthLost)).unwrap();
        lifecycle.transition("vm-1", VmStatus::Deleting, TransitionContext::new(TransitionSource::UserDelete)).unwrap();
        lifecycle.transition("vm-1", VmStatus::Deleted, TransitionContext::new(TransitionSource::NodeAckDeleteOk)).unwrap();

        let node = store.get_node("n1").unwrap();
        assert_eq!(node.reputation.successful_completions, 0);
    }

    #[test]
    fn uptime_ignores_jitter_under_two_minutes() {
        let (store, _lifecycle, engine) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 8));
        let now = chrono::Utc::now();
        // A 91s gap against a 90s stale threshold is 1s of jitter, well under tolerance.
        store.record_heartbeat_gap("n1", now, ChronoDuration::seconds(91), ROLLING_WINDOW);
        store.record_heartbeat_gap("n1", now, ChronoDuration::seconds(91), ROLLING_WINDOW);

        engine.run_once();

        assert_eq!(store.get_node("n1").unwrap().reputation.uptime_pct, 100.0);
    }

    #[test]
    fn uptime_counts_samples_well_past_stale_threshold() {
        let (store, _lifecycle, engine) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 8));
        let now = chrono::Utc::now();
        store.record_heartbeat_gap("n1", now, ChronoDuration::seconds(30), ROLLING_WINDOW);
        store.record_heartbeat_gap("n1", now, ChronoDuration::hours(1), ROLLING_WINDOW);

        engine.run_once();

        assert_eq!(store.get_node("n1").unwrap().reputation.uptime_pct, 50.0);
    }
}
