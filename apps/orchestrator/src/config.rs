// [apps/orchestrator/src/config.rs]
//! Environment-derived configuration for every background loop and the
//! command bus. Every field has a documented default so the binary runs
//! out of the box; set the corresponding env var to override.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub heartbeat_stale: Duration,
    pub health_tick: Duration,
    pub command_timeout: Duration,
    pub attestation_tick: Duration,
    pub attestation_pause_threshold: u32,
    pub attestation_fatal_threshold: u32,
    pub reputation_tick: Duration,
    pub reputation_startup_delay: Duration,
    pub cleanup_tick: Duration,
    pub deleted_retention: chrono::Duration,
    pub min_uptime_for_scheduling: f64,
    pub event_ring_capacity: usize,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            heartbeat_stale: Duration::from_secs(env_u64("HEARTBEAT_STALE_SECONDS", 90)),
            health_tick: Duration::from_secs(env_u64("HEALTH_TICK_SECONDS", 30)),
            command_timeout: Duration::from_secs(env_u64("COMMAND_TIMEOUT_SECONDS", 300)),
            attestation_tick: Duration::from_secs(env_u64("ATTESTATION_TICK_SECONDS", 60)),
            attestation_pause_threshold: env_u64("ATTESTATION_PAUSE_THRESHOLD", 3) as u32,
            attestation_fatal_threshold: env_u64("ATTESTATION_FATAL_THRESHOLD", 10) as u32,
            reputation_tick: Duration::from_secs(env_u64("REPUTATION_TICK_SECONDS", 3600)),
            reputation_startup_delay: Duration::from_secs(env_u64("REPUTATION_STARTUP_DELAY_SECONDS", 300)),
            cleanup_tick: Duration::from_secs(env_u64("CLEANUP_TICK_SECONDS", 3600)),
            deleted_retention: chrono::Duration::days(env_u64("DELETED_RETENTION_DAYS", 7) as i64),
            min_uptime_for_scheduling: env_f64("MIN_UPTIME_FOR_SCHEDULING", 90.0),
            event_ring_capacity: env_u64("EVENT_RING_CAPACITY", 10_000) as usize,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
