// [apps/orchestrator/src/services/mod.rs]
//! Background reconciliation loops: health, attestation, reputation, and
//! cleanup. Each is spawned once at boot with its own long-lived set of
//! collaborators and runs on a fixed cadence until the process shuts down.

pub mod attestation;
pub mod cleanup;
pub mod health_monitor;
pub mod reputation;

pub use attestation::AttestationScheduler;
pub use cleanup::spawn_cleanup_loop;
pub use health_monitor::spawn_health_monitor;
pub use reputation::ReputationEngine;
