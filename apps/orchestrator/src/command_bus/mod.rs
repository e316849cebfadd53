// [apps/orchestrator/src/command_bus/mod.rs]
//! Reliable-once, time-bounded delivery of commands to nodes. `CommandBus`
//! is the only path from the orchestrator to a node; node callbacks
//! (ack-ok, ack-fail) re-enter through the API handlers and call back in
//! here, while a background sweeper expires anything that ages out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_domain::{CommandOutcome, CommandType, Event, PendingCommand, TransitionContext, TransitionSource, VmStatus};
use tokio::time::interval;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::state::lifecycle::LifecycleManager;
use crate::state::store::Store;

/// Cadence of the bus's own timeout sweeper — independent of, and much
/// tighter than, the hourly `CleanupLoop` backstop call to the same
/// `sweep_timeouts`, so a timed-out command is routed to `Error` within
/// seconds of `COMMAND_TIMEOUT_SECONDS`, not up to an hour late.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub struct CommandBus {
    store: Arc<Store>,
    lifecycle: Arc<LifecycleManager>,
    timeout: Duration,
}

impl CommandBus {
    pub fn new(store: Arc<Store>, lifecycle: Arc<LifecycleManager>, timeout: Duration) -> Self {
        Self { store, lifecycle, timeout }
    }

    /// Spawns the dedicated timer sweeper required by spec §4.4/§5 — its own
    /// scheduling unit, separate from the dispatcher and from every other
    /// background loop, that scans for timed-out commands on a fixed
    /// cadence and routes them through [`Self::sweep_timeouts`].
    pub fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            info!("command bus timeout sweeper started");
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                self.sweep_timeouts();
            }
        });
    }

    /// Records a command as outstanding. The actual push to the node's
    /// transport is out of scope here — issuing into the bus is the
    /// observable act; a real transport adapter would sit behind this call.
    #[instrument(skip(self, payload), fields(command_id = %command_id, node_id = %target_node_id))]
    pub async fn issue(&self, command_id: String, command_type: CommandType, target_resource_id: String, target_node_id: String, payload: serde_json::Value) {
        self.store.put_pending_command(PendingCommand {
            command_id,
            command_type,
            target_resource_id,
            target_node_id,
            issued_at: Utc::now(),
            payload,
        });
    }

    /// A node reported success for `command_id`. Idempotent: re-acking an
    /// id no longer in Store (already acked or never issued) is a no-op.
    #[instrument(skip(self))]
    pub async fn ack_ok(&self, command_id: &str) {
        let Some(command) = self.store.take_pending_command(command_id) else {
            return;
        };
        self.route_terminal(&command, CommandOutcome::Ok);
    }

    /// A node reported failure for `command_id` with `reason`.
    #[instrument(skip(self))]
    pub async fn ack_fail(&self, command_id: &str, reason: String) {
        let Some(command) = self.store.take_pending_command(command_id) else {
            return;
        };
        self.route_terminal(&command, CommandOutcome::Fail { reason });
    }

    /// Scans pending commands and times out anything older than the
    /// configured bound. Called by the cleanup loop and by its own sweep
    /// cadence; safe to call redundantly since expiry is keyed on age.
    #[instrument(skip(self))]
    pub fn sweep_timeouts(&self) -> usize {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::seconds(300));
        let expired: Vec<_> = self
            .store
            .list_pending_commands()
            .into_iter()
            .filter(|c| c.age(now) > timeout)
            .collect();

        for command in &expired {
            if self.store.take_pending_command(&command.command_id).is_some() {
                warn!(command_id = %command.command_id, node_id = %command.target_node_id, "command timed out");
                self.route_terminal(command, CommandOutcome::Timeout);
            }
        }
        expired.len()
    }

    fn route_terminal(&self, command: &PendingCommand, outcome: CommandOutcome) {
        if !command.is_vm_scoped() {
            return;
        }
        let vm_id = &command.target_resource_id;
        let Some(vm) = self.store.get_vm(vm_id) else { return };

        match (&command.command_type, &outcome) {
            (CommandType::CreateVm, CommandOutcome::Ok) => {
                let _ = self.lifecycle.transition(
                    vm_id,
                    VmStatus::Running,
                    TransitionContext::new(orchestrator_domain::TransitionSource::NodeAckCreateOk),
                );
            }
            (CommandType::CreateVm, CommandOutcome::Fail { reason }) => {
                let _ = self.lifecycle.transition(
                    vm_id,
                    VmStatus::Error,
                    TransitionContext::new(orchestrator_domain::TransitionSource::NodeAckFail).with_error(reason.clone()),
                );
            }
            (CommandType::CreateVm, CommandOutcome::Timeout) if matches!(vm.status, VmStatus::Provisioning) => {
                let _ = self
                    .lifecycle
                    .transition(vm_id, VmStatus::Error, TransitionContext::timeout("create_vm", "create command timed out"));
            }
            (CommandType::StopVm, CommandOutcome::Ok) => {
                let _ = self
                    .lifecycle
                    .transition(vm_id, VmStatus::Stopped, TransitionContext::new(orchestrator_domain::TransitionSource::NodeAckStopOk));
            }
            (CommandType::StopVm, CommandOutcome::Timeout) if matches!(vm.status, VmStatus::Stopping) => {
                let _ = self
                    .lifecycle
                    .transition(vm_id, VmStatus::Error, TransitionContext::timeout("stop_vm", "stop command timed out"));
            }
            (CommandType::DeleteVm, CommandOutcome::Ok) => {
                let _ = self
                    .lifecycle
                    .transition(vm_id, VmStatus::Deleted, TransitionContext::new(orchestrator_domain::TransitionSource::NodeAckDeleteOk));
            }
            (CommandType::DeleteVm, CommandOutcome::Timeout) if matches!(vm.status, VmStatus::Deleting) => {
                let _ = self
                    .lifecycle
                    .transition(vm_id, VmStatus::Error, TransitionContext::timeout("delete_vm", "delete command timed out"));
            }
            _ => {
                info!(vm_id, command_type = ?command.command_type, "terminal command event did not map to a lifecycle transition");
            }
        }

        self.finalize_pending_delete(vm_id);
    }

    /// Handles `DELETE /api/vms/{id}`. A VM with a direct edge to `Deleting`
    /// (`Running`, `Stopped`, `Error`) transitions immediately and, if it
    /// ever reached a node, gets a `DeleteVm` command; otherwise it jumps
    /// straight to `Deleted`. Anything mid-flight (`Pending`, `Scheduling`,
    /// `Provisioning`, `Stopping`, `Migrating`, or already `Deleting`) has
    /// no direct edge, so this only flags `delete_requested` — whichever
    /// transition the in-flight operation settles into next will call
    /// [`Self::finalize_pending_delete`] and pick this up from there.
    #[instrument(skip(self))]
    pub fn initiate_delete(&self, vm_id: &str) -> Result<(), orchestrator_domain::InvalidTransition> {
        let Some(vm) = self.store.get_vm(vm_id) else { return Ok(()) };

        if !matches!(vm.status, VmStatus::Running | VmStatus::Stopped | VmStatus::Error) {
            self.store.mark_delete_requested(vm_id);
            return Ok(());
        }

        self.lifecycle.transition(vm_id, VmStatus::Deleting, TransitionContext::new(TransitionSource::UserDelete))?;

        match &vm.node_id {
            Some(node_id) => {
                let command_id = Uuid::new_v4().to_string();
                self.store.put_pending_command(PendingCommand {
                    command_id,
                    command_type: CommandType::DeleteVm,
                    target_resource_id: vm_id.to_string(),
                    target_node_id: node_id.clone(),
                    issued_at: Utc::now(),
                    payload: serde_json::json!({}),
                });
            }
            None => {
                let _ = self.lifecycle.transition(vm_id, VmStatus::Deleted, TransitionContext::new(TransitionSource::DeleteNoop).with_reason("vm never reached a node"));
            }
        }
        Ok(())
    }

    /// If `vm_id` was asked to delete while mid-flight (no direct edge to
    /// `Deleting` existed at the time), and it has now settled into
    /// `Running`, `Stopped`, or `Error`, chains it the rest of the way:
    /// issues `DeleteVm` and moves to `Deleting` if it ever reached a node,
    /// or jumps straight to `Deleted` if it never did. Cheap no-op otherwise.
    #[instrument(skip(self))]
    pub fn finalize_pending_delete(&self, vm_id: &str) {
        let Some(vm) = self.store.get_vm(vm_id) else { return };
        if !vm.delete_requested {
            return;
        }
        if !matches!(vm.status, VmStatus::Running | VmStatus::Stopped | VmStatus::Error) {
            return;
        }

        self.store.clear_delete_requested(vm_id);
        if self.lifecycle.transition(vm_id, VmStatus::Deleting, TransitionContext::new(TransitionSource::UserDelete).with_reason("queued delete settling")).is_err() {
            return;
        }

        match &vm.node_id {
            Some(node_id) => {
                let command_id = Uuid::new_v4().to_string();
                self.store.put_pending_command(PendingCommand {
                    command_id,
                    command_type: CommandType::DeleteVm,
                    target_resource_id: vm_id.to_string(),
                    target_node_id: node_id.clone(),
                    issued_at: Utc::now(),
                    payload: serde_json::json!({}),
                });
            }
            None => {
                let _ = self.lifecycle.transition(vm_id, VmStatus::Deleted, TransitionContext::new(TransitionSource::DeleteNoop).with_reason("vm never reached a node"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::VmStatus;
    use std::time::Duration;

    fn harness() -> (Arc<Store>, Arc<LifecycleManager>, CommandBus) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let bus = CommandBus::new(store.clone(), lifecycle.clone(), Duration::from_secs(300));
        (store, lifecycle, bus)
    }

    #[tokio::test]
    async fn ack_ok_drives_create_to_running() {
        let (store, _lifecycle, bus) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Provisioning));
        bus.issue("cmd-1".to_string(), CommandType::CreateVm, "vm-1".to_string(), "n1".to_string(), serde_json::json!({})).await;

        bus.ack_ok("cmd-1").await;

        assert_eq!(store.get_vm("vm-1").unwrap().status, VmStatus::Running);
        assert!(store.list_pending_commands().is_empty());
    }

    #[tokio::test]
    async fn re_acking_same_id_is_noop() {
        let (store, _lifecycle, bus) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Provisioning));
        bus.issue("cmd-1".to_string(), CommandType::CreateVm, "vm-1".to_string(), "n1".to_string(), serde_json::json!({})).await;

        bus.ack_ok("cmd-1").await;
        bus.ack_ok("cmd-1").await;

        assert_eq!(store.get_vm("vm-1").unwrap().status, VmStatus::Running);
    }

    #[tokio::test]
    async fn timeout_routes_provisioning_to_error() {
        let (store, _lifecycle, bus) = harness_with_zero_timeout();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Provisioning));
        bus.issue("cmd-1".to_string(), CommandType::CreateVm, "vm-1".to_string(), "n1".to_string(), serde_json::json!({})).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = bus.sweep_timeouts();

        assert_eq!(expired, 1);
        assert_eq!(store.get_vm("vm-1").unwrap().status, VmStatus::Error);
        assert!(store.list_pending_commands().is_empty());
    }

    fn harness_with_zero_timeout() -> (Arc<Store>, Arc<LifecycleManager>, CommandBus) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let bus = CommandBus::new(store.clone(), lifecycle.clone(), Duration::from_millis(1));
        (store, lifecycle, bus)
    }

    #[test]
    fn initiate_delete_on_running_vm_issues_delete_command() {
        let (store, _lifecycle, bus) = harness();
        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Running);
        vm.node_id = Some("n1".to_string());
        store.upsert_vm(vm);

        bus.initiate_delete("vm-1").unwrap();

        assert_eq!(store.get_vm("vm-1").unwrap().status, VmStatus::Deleting);
        let pending = store.list_pending_commands();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command_type, CommandType::DeleteVm);
    }

    #[test]
    fn initiate_delete_on_pending_vm_only_flags_request() {
        let (store, _lifecycle, bus) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Pending));

        bus.initiate_delete("vm-1").unwrap();

        let vm = store.get_vm("vm-1").unwrap();
        assert_eq!(vm.status, VmStatus::Pending);
        assert!(vm.delete_requested);
    }
}
