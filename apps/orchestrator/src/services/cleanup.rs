// [apps/orchestrator/src/services/cleanup.rs]
//! Hourly janitorial sweep: expires timed-out commands, drops stale pending
//! acks for VMs that are no longer around to care about them, and purges
//! VMs that have sat in `Deleted` past the retention window. Event-ring
//! trimming is enforced continuously by `Store::append_event` itself, so
//! this loop only reports the current occupancy for visibility.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_domain::{CommandType, Event, TransitionContext, VmStatus};
use tokio::time::interval;
use tracing::{info, instrument};

use crate::command_bus::CommandBus;
use crate::state::lifecycle::LifecycleManager;
use crate::state::store::Store;

pub fn spawn_cleanup_loop(store: Arc<Store>, lifecycle: Arc<LifecycleManager>, command_bus: Arc<CommandBus>, tick: Duration, deleted_retention: chrono::Duration) {
    tokio::spawn(async move {
        info!("cleanup loop started");
        let mut ticker = interval(tick);
        loop {
            ticker.tick().await;
            run_once(&store, &lifecycle, &command_bus, deleted_retention);
        }
    });
}

#[instrument(skip(store, lifecycle, command_bus))]
fn run_once(store: &Store, lifecycle: &LifecycleManager, command_bus: &CommandBus, deleted_retention: chrono::Duration) {
    let expired = expire_timed_out_commands(store, command_bus);
    let dropped = drop_stale_acks(store);
    let purged = purge_long_deleted_vms(store, lifecycle, deleted_retention);

    info!(expired, dropped, purged, event_count = store.event_count(), "cleanup pass complete");
    if expired > 0 || dropped > 0 || purged > 0 {
        store.append_event(Event::info(
            "cleanup.summary",
            "",
            format!("expired {expired} commands, dropped {dropped} stale acks, purged {purged} deleted vms"),
        ));
    }
}

/// Task 1: the same timeout policy `CommandBus` enforces on its own
/// dedicated sweeper, run again here as an hourly backstop in case the
/// bus's sweeper ever falls behind.
fn expire_timed_out_commands(_store: &Store, command_bus: &CommandBus) -> usize {
    command_bus.sweep_timeouts()
}

/// Task 2: pending commands whose target VM is gone or no longer active
/// are dropped with no Event — they're not an anomaly, just leftovers from
/// a VM that has since been deleted and purged.
fn drop_stale_acks(store: &Store) -> usize {
    let mut dropped = 0;
    for command in store.list_pending_commands() {
        if !command.is_vm_scoped() {
            continue;
        }
        let still_active = store.get_vm(&command.target_resource_id).map(|vm| vm.status.is_active()).unwrap_or(false);
        if !still_active && store.take_pending_command(&command.command_id).is_some() {
            dropped += 1;
        }
    }
    dropped
}

/// Task 4: VMs sitting in `Deleted` past the retention window are removed
/// from Store outright. Any `DeleteVm` command for them would already have
/// been cleared by task 2 on a prior pass, but a VM can only be purged here
/// once `LifecycleManager` itself has driven it to `Deleted` — purge never
/// bypasses the state machine.
fn purge_long_deleted_vms(store: &Store, _lifecycle: &LifecycleManager, deleted_retention: chrono::Duration) -> usize {
    let now = Utc::now();
    let stale: Vec<String> = store
        .list_vms(|v| v.status == VmStatus::Deleted && now - v.updated_at > deleted_retention)
        .into_iter()
        .map(|v| v.vm_id)
        .collect();

    for vm_id in &stale {
        store.remove_vm(vm_id);
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn harness() -> (Arc<Store>, Arc<LifecycleManager>, Arc<CommandBus>) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let command_bus = Arc::new(CommandBus::new(store.clone(), lifecycle.clone(), StdDuration::from_secs(300)));
        (store, lifecycle, command_bus)
    }

    #[test]
    fn purges_vms_deleted_past_retention() {
        let (store, lifecycle, command_bus) = harness();
        let mut vm = crate::test_support::sample_vm("vm-old", VmStatus::Deleted);
        vm.updated_at = Utc::now() - chrono::Duration::days(8);
        store.upsert_vm(vm);
        store.upsert_vm(crate::test_support::sample_vm("vm-recent", VmStatus::Deleted));

        run_once(&store, &lifecycle, &command_bus, chrono::Duration::days(7));

        assert!(store.get_vm("vm-old").is_none());
        assert!(store.get_vm("vm-recent").is_some(), "below retention window, must survive");
    }

    #[test]
    fn drops_pending_command_for_deleted_vm_silently() {
        let (store, lifecycle, command_bus) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Deleted));
        store.put_pending_command(orchestrator_domain::PendingCommand {
            command_id: "cmd-1".to_string(),
            command_type: CommandType::CreateVm,
            target_resource_id: "vm-1".to_string(),
            target_node_id: "n1".to_string(),
            issued_at: Utc::now(),
            payload: serde_json::json!({}),
        });

        run_once(&store, &lifecycle, &command_bus, chrono::Duration::days(7));

        assert!(store.list_pending_commands().is_empty());
    }

    #[test]
    fn finalizes_queued_delete_once_create_ack_expires() {
        let (store, lifecycle, command_bus) = harness();
        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Provisioning);
        vm.node_id = Some("n1".to_string());
        vm.delete_requested = true;
        store.upsert_vm(vm);
        store.put_pending_command(orchestrator_domain::PendingCommand {
            command_id: "cmd-1".to_string(),
            command_type: CommandType::CreateVm,
            target_resource_id: "vm-1".to_string(),
            target_node_id: "n1".to_string(),
            issued_at: Utc::now() - chrono::Duration::seconds(301),
            payload: serde_json::json!({}),
        });

        run_once(&store, &lifecycle, &command_bus, chrono::Duration::days(7));

        // Timeout lands it in Error; the queued delete should chain it onward.
        let vm = store.get_vm("vm-1").unwrap();
        assert!(matches!(vm.status, VmStatus::Deleting | VmStatus::Deleted));
    }
}
