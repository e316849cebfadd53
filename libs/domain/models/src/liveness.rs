//! Per-VM attestation liveness bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessState {
    pub last_successful_attestation: Option<DateTime<Utc>>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_challenges: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub billing_paused: bool,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub avg_response_ms: f64,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            last_successful_attestation: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_challenges: 0,
            success_count: 0,
            fail_count: 0,
            billing_paused: false,
            pause_reason: None,
            paused_at: None,
            avg_response_ms: 0.0,
        }
    }
}

impl LivenessState {
    /// Exponential moving average with smoothing factor `alpha`.
    pub fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
        if previous == 0.0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * previous
        }
    }
}
