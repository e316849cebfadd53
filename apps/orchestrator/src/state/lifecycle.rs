// [apps/orchestrator/src/state/lifecycle.rs]
//! The sole mutator of VM status. Every other component changes a VM's
//! lifecycle state by calling [`LifecycleManager::transition`] — nothing
//! else is allowed to write `Vm::status` directly.

use std::sync::Arc;

use chrono::Utc;
use orchestrator_domain::{Event, EventSeverity, InvalidTransition, LivenessState, TransitionContext, VmStatus};
use tracing::{instrument, warn};

use super::store::Store;

/// `(from, to)` pairs the state machine in spec §4.2 permits.
const TRANSITIONS: &[(VmStatus, VmStatus)] = &[
    (VmStatus::Pending, VmStatus::Scheduling),
    (VmStatus::Scheduling, VmStatus::Provisioning),
    (VmStatus::Scheduling, VmStatus::Error),
    (VmStatus::Provisioning, VmStatus::Running),
    (VmStatus::Provisioning, VmStatus::Error),
    (VmStatus::Running, VmStatus::Stopping),
    (VmStatus::Running, VmStatus::Deleting),
    (VmStatus::Running, VmStatus::Error),
    (VmStatus::Running, VmStatus::Migrating),
    (VmStatus::Migrating, VmStatus::Running),
    (VmStatus::Migrating, VmStatus::Error),
    (VmStatus::Stopping, VmStatus::Stopped),
    (VmStatus::Stopping, VmStatus::Error),
    (VmStatus::Stopped, VmStatus::Pending),
    (VmStatus::Stopped, VmStatus::Deleting),
    (VmStatus::Deleting, VmStatus::Deleted),
    (VmStatus::Deleting, VmStatus::Error),
    (VmStatus::Error, VmStatus::Deleting),
];

fn is_allowed(from: VmStatus, to: VmStatus) -> bool {
    TRANSITIONS.iter().any(|&(f, t)| f == from && t == to)
}

/// Called after a transition commits, while the VM lock is already released.
/// Used to seed a fresh `LivenessState` the moment a VM enters `Running`.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, vm_id: &str, from: VmStatus, to: VmStatus);
}

pub struct LifecycleManager {
    store: Arc<Store>,
    observers: std::sync::RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, observers: std::sync::RwLock::new(Vec::new()) }
    }

    pub fn register_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers.write().expect("observers lock poisoned").push(observer);
    }

    /// The only legal way to change `vm.status`. Re-reads the VM under lock,
    /// validates against the transition table, applies side-effects (entering
    /// `Running` stamps `started_at`; entering a terminal-for-this-attempt
    /// state leaves billing untouched unless `ctx` says otherwise), appends
    /// an `Event`, and finally notifies observers outside the lock.
    #[instrument(skip(self, ctx), fields(vm_id = %vm_id, to = ?to))]
    pub fn transition(&self, vm_id: &str, to: VmStatus, ctx: TransitionContext) -> Result<(), InvalidTransition> {
        let Some(mut vm) = self.store.get_vm(vm_id) else {
            warn!(vm_id, "transition requested for unknown vm");
            return Ok(());
        };
        let from = vm.status;

        if !is_allowed(from, to) {
            self.store.append_event(Event::error(
                "lifecycle.invalid_transition",
                vm_id,
                format!("rejected {from:?} -> {to:?} ({})", ctx.source),
            ));
            return Err(InvalidTransition { current: from, requested: to, source: ctx.source });
        }

        vm.status = to;
        vm.updated_at = Utc::now();
        if to == VmStatus::Running && vm.billing.started_at.is_none() {
            vm.billing.started_at = Some(vm.updated_at);
        }
        self.store.upsert_vm(vm);

        let severity = if to == VmStatus::Error { EventSeverity::Error } else { EventSeverity::Info };
        let mut message = format!("{from:?} -> {to:?} ({})", ctx.source);
        if let Some(reason) = &ctx.reason {
            message.push_str(&format!(": {reason}"));
        }
        if let Some(error) = &ctx.error {
            message.push_str(&format!(" [{error}]"));
        }
        self.store.append_event(Event::new("lifecycle.transition", vm_id, message, severity));

        if to == VmStatus::Running {
            self.store.upsert_liveness(vm_id, LivenessState::default());
        }
        if to == VmStatus::Deleted {
            self.store.remove_liveness(vm_id);
        }

        let observers = self.observers.read().expect("observers lock poisoned").clone();
        for observer in observers.iter() {
            observer.on_transition(vm_id, from, to);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::TransitionSource;

    fn manager_with_vm(status: VmStatus) -> (LifecycleManager, String) {
        let store = Arc::new(Store::new(1000));
        let vm = crate::test_support::sample_vm("vm-1", status);
        let vm_id = vm.vm_id.clone();
        store.upsert_vm(vm);
        (LifecycleManager::new(store), vm_id)
    }

    #[test]
    fn allows_pending_to_scheduling() {
        let (manager, vm_id) = manager_with_vm(VmStatus::Pending);
        manager
            .transition(&vm_id, VmStatus::Scheduling, TransitionContext::new(TransitionSource::SchedulerPickNode))
            .unwrap();
        assert_eq!(manager.store.get_vm(&vm_id).unwrap().status, VmStatus::Scheduling);
    }

    #[test]
    fn rejects_skipping_states() {
        let (manager, vm_id) = manager_with_vm(VmStatus::Pending);
        let err = manager
            .transition(&vm_id, VmStatus::Running, TransitionContext::new(TransitionSource::NodeAckCreateOk))
            .unwrap_err();
        assert_eq!(err.current, VmStatus::Pending);
        assert_eq!(err.requested, VmStatus::Running);
    }

    #[test]
    fn entering_running_stamps_started_at() {
        let (manager, vm_id) = manager_with_vm(VmStatus::Provisioning);
        manager
            .transition(&vm_id, VmStatus::Running, TransitionContext::new(TransitionSource::NodeAckCreateOk))
            .unwrap();
        let vm = manager.store.get_vm(&vm_id).unwrap();
        assert!(vm.billing.started_at.is_some());
        assert!(manager.store.get_liveness(&vm_id).is_some());
    }

    #[test]
    fn deleted_is_terminal_for_liveness() {
        let (manager, vm_id) = manager_with_vm(VmStatus::Deleting);
        manager
            .transition(&vm_id, VmStatus::Deleted, TransitionContext::new(TransitionSource::NodeAckDeleteOk))
            .unwrap();
        assert!(manager.store.get_liveness(&vm_id).is_none());
    }
}
