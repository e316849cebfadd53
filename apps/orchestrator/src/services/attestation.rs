// [apps/orchestrator/src/services/attestation.rs]
//! Periodically challenges running VMs for liveness, tracks consecutive
//! successes/failures, and pauses/resumes billing accrual on a per-VM
//! basis. A manual trigger bypasses the cadence and reports synchronously.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_domain::{CommandType, Event, LivenessState, PendingCommand, TransitionContext, TransitionSource, Vm, VmStatus};
use tokio::time::interval;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::command_bus::CommandBus;
use crate::state::lifecycle::LifecycleManager;
use crate::state::store::Store;

/// Outcome of a single attestation challenge.
#[derive(Debug, Clone, Copy)]
pub enum AttestationOutcome {
    Success { response_ms: f64 },
    Failure,
}

/// The collaborator that actually talks to a node's attestation agent.
/// Out of scope for this kernel (spec §1) — the periodic cadence instead
/// round-trips through `CommandBus`/the node-ack API, but the synchronous
/// manual-verify path needs something to call immediately, so real
/// deployments inject a transport here. `NullAttestationTransport` is the
/// always-succeeds stand-in used when none is configured.
pub trait AttestationTransport: Send + Sync {
    fn challenge(&self, vm: &Vm) -> AttestationOutcome;
}

pub struct NullAttestationTransport;

impl AttestationTransport for NullAttestationTransport {
    fn challenge(&self, _vm: &Vm) -> AttestationOutcome {
        AttestationOutcome::Success { response_ms: 0.0 }
    }
}

pub struct AttestationScheduler {
    store: Arc<Store>,
    lifecycle: Arc<LifecycleManager>,
    command_bus: Arc<CommandBus>,
    transport: Arc<dyn AttestationTransport>,
    pause_threshold: u32,
    fatal_threshold: u32,
    response_window: chrono::Duration,
}

impl AttestationScheduler {
    pub fn new(
        store: Arc<Store>,
        lifecycle: Arc<LifecycleManager>,
        command_bus: Arc<CommandBus>,
        pause_threshold: u32,
        fatal_threshold: u32,
    ) -> Self {
        Self::with_transport(store, lifecycle, command_bus, pause_threshold, fatal_threshold, Arc::new(NullAttestationTransport))
    }

    pub fn with_transport(
        store: Arc<Store>,
        lifecycle: Arc<LifecycleManager>,
        command_bus: Arc<CommandBus>,
        pause_threshold: u32,
        fatal_threshold: u32,
        transport: Arc<dyn AttestationTransport>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            command_bus,
            transport,
            pause_threshold,
            fatal_threshold,
            response_window: chrono::Duration::seconds(30),
        }
    }

    pub fn spawn(self: Arc<Self>, tick: Duration) {
        tokio::spawn(async move {
            info!("attestation scheduler started");
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                self.run_once();
            }
        });
    }

    #[instrument(skip(self))]
    fn run_once(&self) {
        self.expire_stale_challenges();
        self.issue_challenges();
    }

    /// Any outstanding `Attest` command older than the expected-response
    /// window without a node reply is a liveness failure, not a generic
    /// command-bus timeout — the VM stays wherever it is, only its
    /// liveness bookkeeping moves.
    fn expire_stale_challenges(&self) {
        let now = Utc::now();
        let stale: Vec<_> = self
            .store
            .list_pending_commands()
            .into_iter()
            .filter(|c| c.command_type == CommandType::Attest && c.age(now) > self.response_window)
            .collect();

        for command in stale {
            if self.store.take_pending_command(&command.command_id).is_some() {
                warn!(vm_id = %command.target_resource_id, "attestation challenge went unanswered");
                self.record_outcome(&command.target_resource_id, AttestationOutcome::Failure);
            }
        }
    }

    fn issue_challenges(&self) {
        let outstanding: std::collections::HashSet<String> = self
            .store
            .list_pending_commands()
            .into_iter()
            .filter(|c| c.command_type == CommandType::Attest)
            .map(|c| c.target_resource_id)
            .collect();

        for vm in self.store.list_vms(|v| v.status == VmStatus::Running) {
            if outstanding.contains(&vm.vm_id) {
                continue;
            }
            let Some(node_id) = vm.node_id.clone() else { continue };
            let command_id = Uuid::new_v4().to_string();
            let nonce = Uuid::new_v4().to_string();
            self.store.put_pending_command(PendingCommand {
                command_id,
                command_type: CommandType::Attest,
                target_resource_id: vm.vm_id.clone(),
                target_node_id: node_id,
                issued_at: Utc::now(),
                payload: serde_json::json!({ "nonce": nonce }),
            });
        }
    }

    /// Handles `POST /api/nodes/{id}/attestation/{cmd_id}/response`. Looks
    /// up the outstanding challenge by `command_id`, checks the nonce
    /// round-tripped correctly, and applies the outcome. Idempotent: a
    /// second response for the same `command_id` finds nothing pending.
    #[instrument(skip(self, signature_valid))]
    pub fn handle_node_response(&self, command_id: &str, nonce: &str, signature_valid: bool, response_ms: f64) -> Option<LivenessState> {
        let command = self.store.take_pending_command(command_id)?;
        if command.command_type != CommandType::Attest {
            return None;
        }
        let nonce_matches = command.payload.get("nonce").and_then(|v| v.as_str()) == Some(nonce);
        let outcome = if signature_valid && nonce_matches {
            AttestationOutcome::Success { response_ms }
        } else {
            AttestationOutcome::Failure
        };
        Some(self.record_outcome(&command.target_resource_id, outcome))
    }

    /// Bypasses the cadence: challenges the node directly through the
    /// configured transport and applies the outcome inline, for
    /// `POST /api/attestation/vms/{id}/verify`.
    #[instrument(skip(self))]
    pub fn verify_now(&self, vm_id: &str) -> Option<LivenessState> {
        let vm = self.store.get_vm(vm_id)?;
        let outcome = self.transport.challenge(&vm);
        Some(self.record_outcome(vm_id, outcome))
    }

    /// Applies one challenge outcome to `vm_id`'s liveness state.
    #[instrument(skip(self, outcome), fields(vm_id = %vm_id))]
    pub fn record_outcome(&self, vm_id: &str, outcome: AttestationOutcome) -> LivenessState {
        let mut liveness = self.store.get_liveness(vm_id).unwrap_or_default();
        liveness.total_challenges += 1;

        match outcome {
            AttestationOutcome::Success { response_ms } => {
                liveness.consecutive_failures = 0;
                liveness.consecutive_successes += 1;
                liveness.success_count += 1;
                liveness.last_successful_attestation = Some(Utc::now());
                liveness.avg_response_ms = LivenessState::ema(liveness.avg_response_ms, response_ms, 0.2);

                if liveness.billing_paused {
                    liveness.billing_paused = false;
                    liveness.pause_reason = None;
                    liveness.paused_at = None;
                    self.store.append_event(Event::info("attestation.billing_resumed", vm_id, "attestation recovered, billing resumed"));
                }
            }
            AttestationOutcome::Failure => {
                liveness.consecutive_successes = 0;
                liveness.consecutive_failures += 1;
                liveness.fail_count += 1;

                if liveness.consecutive_failures >= self.pause_threshold && !liveness.billing_paused {
                    liveness.billing_paused = true;
                    liveness.pause_reason = Some("attestation_failure".to_string());
                    liveness.paused_at = Some(Utc::now());
                    self.store.append_event(Event::warn("attestation.billing_paused", vm_id, "consecutive attestation failures reached pause threshold"));
                    warn!(vm_id, "billing paused after attestation failures");
                }

                if liveness.consecutive_failures >= self.fatal_threshold {
                    self.store.upsert_liveness(vm_id, liveness.clone());
                    let _ = self.lifecycle.transition(
                        vm_id,
                        VmStatus::Error,
                        TransitionContext::new(TransitionSource::AttestationFailedFatal).with_reason("attestation failures exceeded fatal threshold"),
                    );
                    self.command_bus.finalize_pending_delete(vm_id);
                    return liveness;
                }
            }
        }

        self.store.upsert_liveness(vm_id, liveness.clone());
        liveness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn harness() -> (Arc<Store>, AttestationScheduler) {
        let store = Arc::new(Store::new(1000));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let command_bus = Arc::new(CommandBus::new(store.clone(), lifecycle.clone(), StdDuration::from_secs(300)));
        let scheduler = AttestationScheduler::new(store.clone(), lifecycle, command_bus, 3, 10);
        (store, scheduler)
    }

    #[test]
    fn pauses_billing_at_exactly_the_threshold() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));

        for _ in 0..2 {
            let liveness = scheduler.record_outcome("vm-1", AttestationOutcome::Failure);
            assert!(!liveness.billing_paused);
        }
        let liveness = scheduler.record_outcome("vm-1", AttestationOutcome::Failure);
        assert!(liveness.billing_paused);
        assert_eq!(liveness.pause_reason.as_deref(), Some("attestation_failure"));
    }

    #[test]
    fn success_clears_pause_and_resets_failures() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));
        for _ in 0..3 {
            scheduler.record_outcome("vm-1", AttestationOutcome::Failure);
        }
        let liveness = scheduler.record_outcome("vm-1", AttestationOutcome::Success { response_ms: 42.0 });
        assert!(!liveness.billing_paused);
        assert_eq!(liveness.consecutive_failures, 0);
    }

    #[test]
    fn ten_consecutive_failures_drive_vm_to_error() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));
        for _ in 0..10 {
            scheduler.record_outcome("vm-1", AttestationOutcome::Failure);
        }
        assert_eq!(store.get_vm("vm-1").unwrap().status, VmStatus::Error);
    }

    #[test]
    fn node_response_with_wrong_nonce_counts_as_failure() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));
        store.put_pending_command(PendingCommand {
            command_id: "cmd-1".to_string(),
            command_type: CommandType::Attest,
            target_resource_id: "vm-1".to_string(),
            target_node_id: "n1".to_string(),
            issued_at: Utc::now(),
            payload: serde_json::json!({ "nonce": "expected" }),
        });

        let liveness = scheduler.handle_node_response("cmd-1", "wrong-nonce", true, 10.0).unwrap();
        assert_eq!(liveness.consecutive_failures, 1);
    }

    #[test]
    fn node_response_matching_nonce_counts_as_success() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));
        store.put_pending_command(PendingCommand {
            command_id: "cmd-1".to_string(),
            command_type: CommandType::Attest,
            target_resource_id: "vm-1".to_string(),
            target_node_id: "n1".to_string(),
            issued_at: Utc::now(),
            payload: serde_json::json!({ "nonce": "expected" }),
        });

        let liveness = scheduler.handle_node_response("cmd-1", "expected", true, 12.0).unwrap();
        assert_eq!(liveness.consecutive_successes, 1);
        assert!(store.list_pending_commands().is_empty());
    }

    #[test]
    fn manual_verify_uses_transport_and_updates_liveness() {
        let (store, scheduler) = harness();
        store.upsert_vm(crate::test_support::sample_vm("vm-1", VmStatus::Running));
        let liveness = scheduler.verify_now("vm-1").unwrap();
        assert_eq!(liveness.consecutive_successes, 1);
    }
}
