// [apps/orchestrator/src/state/mod.rs]
//! Composition of the authoritative `Store` with every component that
//! operates on it. `AppState` is what request handlers and background
//! loops are built from; it is cheap to clone since every field is an `Arc`
//! (or, for `config`, a small `Copy` struct).

pub mod lifecycle;
pub mod store;

use std::sync::Arc;

use crate::command_bus::CommandBus;
use crate::config::OrchestratorConfig;
use crate::scheduler::Scheduler;
use crate::services::{AttestationScheduler, ReputationEngine};

use self::lifecycle::LifecycleManager;
use self::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub lifecycle: Arc<LifecycleManager>,
    pub command_bus: Arc<CommandBus>,
    pub scheduler: Arc<Scheduler>,
    pub attestation: Arc<AttestationScheduler>,
    pub reputation: Arc<ReputationEngine>,
    pub config: OrchestratorConfig,
}

impl AppState {
    /// Wires every component in dependency order and registers the
    /// reputation engine as a transition observer so its counters update
    /// the moment a transition commits.
    pub fn new(config: OrchestratorConfig) -> Self {
        let store = Arc::new(Store::new(config.event_ring_capacity));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let command_bus = Arc::new(CommandBus::new(store.clone(), lifecycle.clone(), config.command_timeout));
        let scheduler = Arc::new(Scheduler::new(store.clone(), lifecycle.clone(), command_bus.clone(), config.min_uptime_for_scheduling));
        let attestation = Arc::new(AttestationScheduler::new(
            store.clone(),
            lifecycle.clone(),
            command_bus.clone(),
            config.attestation_pause_threshold,
            config.attestation_fatal_threshold,
        ));
        let reputation = Arc::new(ReputationEngine::new(store.clone(), config.heartbeat_stale));
        lifecycle.register_observer(reputation.clone());

        Self { store, lifecycle, command_bus, scheduler, attestation, reputation, config }
    }

    /// Spawns every background reconciliation loop on the current runtime.
    /// Call exactly once, after the router is ready to accept traffic.
    pub fn spawn_background_loops(&self) {
        self.command_bus.clone().spawn_sweeper();
        crate::services::spawn_health_monitor(self.store.clone(), self.lifecycle.clone(), self.config.health_tick, self.config.heartbeat_stale);
        self.attestation.clone().spawn(self.config.attestation_tick);
        self.reputation.clone().spawn(self.config.reputation_startup_delay, self.config.reputation_tick);
        crate::services::spawn_cleanup_loop(
            self.store.clone(),
            self.lifecycle.clone(),
            self.command_bus.clone(),
            self.config.cleanup_tick,
            self.config.deleted_retention,
        );
    }
}
