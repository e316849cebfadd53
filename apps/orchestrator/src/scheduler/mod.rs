// [apps/orchestrator/src/scheduler/mod.rs]
//! Places a pending VM onto a node: filters candidates, ranks them
//! deterministically, reserves capacity, and hands off to the command
//! bus. The scheduler is the only component allowed to call
//! `Pending -> Scheduling`.

use std::sync::Arc;

use orchestrator_domain::{CommandType, Event, TransitionContext, TransitionSource, Vm, VmStatus};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::command_bus::CommandBus;
use crate::state::lifecycle::LifecycleManager;
use crate::state::store::Store;

pub struct Scheduler {
    store: Arc<Store>,
    lifecycle: Arc<LifecycleManager>,
    command_bus: Arc<CommandBus>,
    min_uptime_for_scheduling: f64,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, lifecycle: Arc<LifecycleManager>, command_bus: Arc<CommandBus>, min_uptime_for_scheduling: f64) -> Self {
        Self { store, lifecycle, command_bus, min_uptime_for_scheduling }
    }

    /// Candidate nodes for `vm`, ranked best-first. Does not mutate state.
    fn rank_candidates(&self, vm: &Vm) -> Vec<String> {
        let mut candidates: Vec<_> = self
            .store
            .list_nodes()
            .into_iter()
            .filter(|node| node.status == orchestrator_domain::NodeStatus::Online)
            .filter(|node| node.reputation.uptime_pct >= self.min_uptime_for_scheduling)
            .filter(|node| !vm.spec.requires_gpu || node.capacity.gpu.present)
            .filter(|node| vm.spec.pinned_node_id.as_deref().map(|pinned| pinned == node.node_id).unwrap_or(true))
            .filter(|node| vm.spec.region.as_deref().map(|r| node.region.as_deref() == Some(r)).unwrap_or(true))
            .filter(|node| vm.spec.zone.as_deref().map(|z| node.zone.as_deref() == Some(z)).unwrap_or(true))
            .filter(|node| {
                let used = self.store.used_capacity(&node.node_id);
                let capacity = node.capacity.as_resource_quantity();
                vm.spec.as_resource_quantity().fits_within(capacity.saturating_sub(used))
            })
            .collect();

        candidates.sort_by(|a, b| {
            let util = |n: &orchestrator_domain::Node| {
                let used = self.store.used_capacity(&n.node_id);
                let capacity = n.capacity.as_resource_quantity();
                let cpu_ratio = used.cpu_cores as f64 / capacity.cpu_cores.max(1) as f64;
                let mem_ratio = used.memory_mb as f64 / capacity.memory_mb.max(1) as f64;
                cpu_ratio.max(mem_ratio)
            };
            util(a)
                .partial_cmp(&util(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.reputation.uptime_pct.partial_cmp(&a.reputation.uptime_pct).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.reputation.successful_completions.cmp(&a.reputation.successful_completions))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        candidates.into_iter().map(|n| n.node_id).collect()
    }

    /// Drives `vm_id` from `Pending` through `Scheduling` and either
    /// `Provisioning` (command issued) or `Error` (no capacity). Re-runs
    /// candidate ranking once if the first placement attempt loses a race.
    #[instrument(skip(self), fields(vm_id = %vm_id))]
    pub async fn schedule(&self, vm_id: &str) {
        let Some(vm) = self.store.get_vm(vm_id) else { return };
        if vm.status != VmStatus::Pending {
            return;
        }

        if self
            .lifecycle
            .transition(vm_id, VmStatus::Scheduling, TransitionContext::new(TransitionSource::SchedulerPickNode))
            .is_err()
        {
            return;
        }

        // Re-read after the transition above: `vm` was captured while still
        // `Pending`, and placement below clones whatever copy it's handed
        // into the store, so placing a stale `Pending` snapshot would wipe
        // out the `Scheduling` status just written.
        let Some(vm) = self.store.get_vm(vm_id) else { return };

        for attempt in 0..2 {
            let candidates = self.rank_candidates(&vm);
            let Some(node_id) = candidates.into_iter().next() else { break };

            let mut placed = vm.clone();
            if self.store.try_reserve_and_place(&node_id, &mut placed) {
                let command_id = Uuid::new_v4().to_string();
                self.command_bus
                    .issue(command_id, CommandType::CreateVm, vm_id.to_string(), node_id.clone(), serde_json::json!({ "spec": placed.spec }))
                    .await;

                if self
                    .lifecycle
                    .transition(vm_id, VmStatus::Provisioning, TransitionContext::new(TransitionSource::CommandBusCreateSent).with_reason(format!("placed on {node_id}")))
                    .is_ok()
                {
                    info!(vm_id, node_id, "vm placed and create command issued");
                }
                return;
            }

            warn!(vm_id, node_id, attempt, "lost capacity race, retrying once");
        }

        let _ = self.lifecycle.transition(
            vm_id,
            VmStatus::Error,
            TransitionContext::new(TransitionSource::SchedulerNoCapacity).with_reason("no_capacity"),
        );
        self.store.append_event(Event::warn("scheduler.no_capacity", vm_id, "no node satisfied placement constraints"));
        self.command_bus.finalize_pending_delete(vm_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::VmStatus;

    fn harness() -> (Arc<Store>, Arc<LifecycleManager>, Arc<CommandBus>, Scheduler) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let command_bus = Arc::new(CommandBus::new(store.clone(), lifecycle.clone(), std::time::Duration::from_secs(300)));
        let scheduler = Scheduler::new(store.clone(), lifecycle.clone(), command_bus.clone(), 90.0);
        (store, lifecycle, command_bus, scheduler)
    }

    #[tokio::test]
    async fn happy_path_places_and_provisions() {
        let (store, _lifecycle, _bus, scheduler) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 8));
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Pending));

        scheduler.schedule("vm-1").await;

        let vm = store.get_vm("vm-1").unwrap();
        assert_eq!(vm.status, VmStatus::Provisioning);
        assert_eq!(vm.node_id.as_deref(), Some("n1"));
        assert_eq!(store.list_pending_commands().len(), 1);
    }

    #[tokio::test]
    async fn no_capacity_routes_to_error() {
        let (store, _lifecycle, _bus, scheduler) = harness();
        store.upsert_node(crate::test_support::sample_node("n1", 1));
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Pending));

        scheduler.schedule("vm-1").await;

        let vm = store.get_vm("vm-1").unwrap();
        assert_eq!(vm.status, VmStatus::Error);
        assert!(vm.node_id.is_none());
    }

    #[tokio::test]
    async fn ranks_lowest_utilization_first() {
        let (store, _lifecycle, _bus, scheduler) = harness();
        store.upsert_node(crate::test_support::sample_node("n-busy", 4));
        store.upsert_node(crate::test_support::sample_node("n-idle", 4));

        let mut occupying = crate::test_support::sample_vm("vm-occupying", VmStatus::Running);
        occupying.node_id = Some("n-busy".to_string());
        occupying.spec.cpu_cores = 3;
        store.upsert_vm(occupying);

        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Pending));
        scheduler.schedule("vm-1").await;

        let vm = store.get_vm("vm-1").unwrap();
        assert_eq!(vm.node_id.as_deref(), Some("n-idle"));
    }

    #[tokio::test]
    async fn pinned_node_id_overrides_utilization_ranking() {
        let (store, _lifecycle, _bus, scheduler) = harness();
        store.upsert_node(crate::test_support::sample_node("n-idle", 4));
        store.upsert_node(crate::test_support::sample_node("n-pinned", 4));

        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Pending);
        vm.spec.pinned_node_id = Some("n-pinned".to_string());
        store.upsert_vm(vm);

        scheduler.schedule("vm-1").await;

        let vm = store.get_vm("vm-1").unwrap();
        assert_eq!(vm.node_id.as_deref(), Some("n-pinned"));
    }
}
