// [apps/orchestrator/src/state/store.rs]
//! Process-wide authoritative state: nodes, VMs, pending command acks,
//! attestation liveness, and the event history. Every other component
//! holds only ids and reaches the actual entities through this API —
//! nothing outside `Store` is allowed to hold a mutable reference into
//! the maps below.
//!
//! Locking: `nodes` and `vms` are independent `RwLock`s. Operations that
//! need both (capacity reservation) always take `nodes` before `vms`,
//! so the two background loops and every handler agree on one global
//! order and can never deadlock against each other.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use orchestrator_domain::{Event, LivenessState, Node, NodeStatus, PendingCommand, ResourceQuantity, Vm};

/// An immutable, point-in-time copy of the authoritative state, sufficient
/// to restore after a process restart.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub nodes: Vec<Node>,
    pub vms: Vec<Vm>,
}

/// One observed gap between consecutive heartbeats from a node, kept only
/// long enough to feed the reputation engine's 30-day rolling uptime window.
/// Not part of the domain model proper — this is Store-internal bookkeeping
/// nothing outside `ReputationEngine` needs to see.
#[derive(Debug, Clone, Copy)]
struct HeartbeatGapSample {
    at: DateTime<Utc>,
    gap: chrono::Duration,
}

const MAX_SAMPLES_PER_NODE: usize = 50_000;

pub struct Store {
    nodes: RwLock<HashMap<String, Node>>,
    vms: RwLock<HashMap<String, Vm>>,
    pending_commands: RwLock<HashMap<String, PendingCommand>>,
    liveness: RwLock<HashMap<String, LivenessState>>,
    events: RwLock<VecDeque<Event>>,
    event_capacity: usize,
    heartbeat_samples: RwLock<HashMap<String, VecDeque<HeartbeatGapSample>>>,
}

impl Store {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            vms: RwLock::new(HashMap::new()),
            pending_commands: RwLock::new(HashMap::new()),
            liveness: RwLock::new(HashMap::new()),
            events: RwLock::new(VecDeque::with_capacity(event_capacity.min(4096))),
            event_capacity,
            heartbeat_samples: RwLock::new(HashMap::new()),
        }
    }

    // --- VMs ---

    pub fn get_vm(&self, vm_id: &str) -> Option<Vm> {
        self.vms.read().expect("vms lock poisoned").get(vm_id).cloned()
    }

    pub fn list_vms(&self, filter: impl Fn(&Vm) -> bool) -> Vec<Vm> {
        self.vms.read().expect("vms lock poisoned").values().filter(|v| filter(v)).cloned().collect()
    }

    pub fn upsert_vm(&self, vm: Vm) {
        self.vms.write().expect("vms lock poisoned").insert(vm.vm_id.clone(), vm);
    }

    pub fn remove_vm(&self, vm_id: &str) -> Option<Vm> {
        self.vms.write().expect("vms lock poisoned").remove(vm_id)
    }

    /// All VMs not in a terminal state — excludes `Deleted` and `Error`.
    pub fn get_active_vms(&self) -> Vec<Vm> {
        self.vms.read().expect("vms lock poisoned").values().filter(|v| v.status.is_active()).cloned().collect()
    }

    // --- Nodes ---

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().expect("nodes lock poisoned").get(node_id).cloned()
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.nodes.read().expect("nodes lock poisoned").values().cloned().collect()
    }

    pub fn upsert_node(&self, node: Node) {
        self.nodes.write().expect("nodes lock poisoned").insert(node.node_id.clone(), node);
    }

    /// Resources on `node_id` held by every VM that still reserves capacity.
    pub fn used_capacity(&self, node_id: &str) -> ResourceQuantity {
        let vms = self.vms.read().expect("vms lock poisoned");
        vms.values()
            .filter(|v| v.node_id.as_deref() == Some(node_id) && v.status.reserves_capacity())
            .fold(ResourceQuantity::ZERO, |acc, v| ResourceQuantity {
                cpu_cores: acc.cpu_cores + v.spec.cpu_cores,
                memory_mb: acc.memory_mb + v.spec.memory_mb,
                disk_gb: acc.disk_gb + v.spec.disk_gb,
            })
    }

    /// Atomically checks that `node_id` still has room for `vm`'s spec and,
    /// if so, stamps `vm.node_id` and inserts it. Acquires `nodes` then
    /// `vms`, the fixed global order every cross-entity Store operation uses.
    ///
    /// Returns `true` on success; `false` means the caller should treat this
    /// as a lost race and re-run candidate selection once before giving up.
    pub fn try_reserve_and_place(&self, node_id: &str, vm: &mut Vm) -> bool {
        let nodes = self.nodes.read().expect("nodes lock poisoned");
        let Some(node) = nodes.get(node_id) else { return false };
        if node.status != NodeStatus::Online {
            return false;
        }
        let capacity = node.capacity.as_resource_quantity();
        drop(nodes);

        let mut vms = self.vms.write().expect("vms lock poisoned");
        let used = vms
            .values()
            .filter(|v| v.node_id.as_deref() == Some(node_id) && v.status.reserves_capacity())
            .fold(ResourceQuantity::ZERO, |acc, v| ResourceQuantity {
                cpu_cores: acc.cpu_cores + v.spec.cpu_cores,
                memory_mb: acc.memory_mb + v.spec.memory_mb,
                disk_gb: acc.disk_gb + v.spec.disk_gb,
            });
        let remaining = capacity.saturating_sub(used);
        if !vm.spec.as_resource_quantity().fits_within(remaining) {
            return false;
        }

        // If the store already holds this VM, mutate its `node_id` in place
        // rather than overwriting the entry with the caller's clone — the
        // caller's copy may have been read before a concurrent status
        // transition committed, and blindly re-inserting it would revert
        // that transition.
        if let Some(existing) = vms.get_mut(&vm.vm_id) {
            existing.node_id = Some(node_id.to_string());
            *vm = existing.clone();
        } else {
            vm.node_id = Some(node_id.to_string());
            vms.insert(vm.vm_id.clone(), vm.clone());
        }
        true
    }

    /// Flags `vm_id` for deletion once its in-flight operation settles.
    /// No-op if the VM is unknown.
    pub fn mark_delete_requested(&self, vm_id: &str) {
        let mut vms = self.vms.write().expect("vms lock poisoned");
        if let Some(vm) = vms.get_mut(vm_id) {
            vm.delete_requested = true;
        }
    }

    pub fn clear_delete_requested(&self, vm_id: &str) {
        let mut vms = self.vms.write().expect("vms lock poisoned");
        if let Some(vm) = vms.get_mut(vm_id) {
            vm.delete_requested = false;
        }
    }

    /// Applies `f` to `node_id`'s entry in place, if present. The only
    /// write path for reputation counters, which never travel through
    /// `LifecycleManager` since they don't touch VM status.
    pub fn mutate_node(&self, node_id: &str, f: impl FnOnce(&mut Node)) {
        let mut nodes = self.nodes.write().expect("nodes lock poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            f(node);
        }
    }

    // --- Heartbeat gap samples (reputation engine's rolling window) ---

    /// Records the gap between this heartbeat and the previous one, pruning
    /// samples older than `max_age` from the front of the deque as it goes.
    pub fn record_heartbeat_gap(&self, node_id: &str, at: DateTime<Utc>, gap: chrono::Duration, max_age: chrono::Duration) {
        let mut samples = self.heartbeat_samples.write().expect("heartbeat samples lock poisoned");
        let deque = samples.entry(node_id.to_string()).or_default();
        deque.push_back(HeartbeatGapSample { at, gap });
        while deque.front().map(|s| at - s.at > max_age).unwrap_or(false) {
            deque.pop_front();
        }
        while deque.len() > MAX_SAMPLES_PER_NODE {
            deque.pop_front();
        }
    }

    /// Gaps observed for `node_id` within `max_age` of `now`, oldest first.
    pub fn heartbeat_gaps_within(&self, node_id: &str, now: DateTime<Utc>, max_age: chrono::Duration) -> Vec<chrono::Duration> {
        let samples = self.heartbeat_samples.read().expect("heartbeat samples lock poisoned");
        samples
            .get(node_id)
            .map(|deque| deque.iter().filter(|s| now - s.at <= max_age).map(|s| s.gap).collect())
            .unwrap_or_default()
    }

    // --- Pending commands ---

    pub fn put_pending_command(&self, command: PendingCommand) {
        self.pending_commands.write().expect("pending commands lock poisoned").insert(command.command_id.clone(), command);
    }

    pub fn take_pending_command(&self, command_id: &str) -> Option<PendingCommand> {
        self.pending_commands.write().expect("pending commands lock poisoned").remove(command_id)
    }

    pub fn list_pending_commands(&self) -> Vec<PendingCommand> {
        self.pending_commands.read().expect("pending commands lock poisoned").values().cloned().collect()
    }

    // --- Liveness ---

    pub fn get_liveness(&self, vm_id: &str) -> Option<LivenessState> {
        self.liveness.read().expect("liveness lock poisoned").get(vm_id).cloned()
    }

    pub fn upsert_liveness(&self, vm_id: &str, state: LivenessState) {
        self.liveness.write().expect("liveness lock poisoned").insert(vm_id.to_string(), state);
    }

    pub fn remove_liveness(&self, vm_id: &str) {
        self.liveness.write().expect("liveness lock poisoned").remove(vm_id);
    }

    // --- Events ---

    pub fn append_event(&self, event: Event) {
        let mut events = self.events.write().expect("events lock poisoned");
        if events.len() >= self.event_capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn list_events(&self, limit: usize) -> Vec<Event> {
        let events = self.events.read().expect("events lock poisoned");
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().expect("events lock poisoned").len()
    }

    // --- Snapshot ---

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            nodes: self.nodes.read().expect("nodes lock poisoned").values().cloned().collect(),
            vms: self.vms.read().expect("vms lock poisoned").values().cloned().collect(),
        }
    }
}
