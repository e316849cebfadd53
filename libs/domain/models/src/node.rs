//! Node entity: a remote compute host that executes VMs on the orchestrator's behalf.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared GPU configuration of a node, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    pub present: bool,
    pub model: Option<String>,
    pub count: Option<u32>,
    pub vram_mb: Option<u64>,
}

/// Declared resource capacity of a node along every schedulable dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl ResourceQuantity {
    pub const ZERO: Self = Self { cpu_cores: 0, memory_mb: 0, disk_gb: 0 };

    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
        }
    }

    pub fn fits_within(self, capacity: Self) -> bool {
        self.cpu_cores <= capacity.cpu_cores
            && self.memory_mb <= capacity.memory_mb
            && self.disk_gb <= capacity.disk_gb
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub gpu: GpuSpec,
}

impl NodeCapacity {
    pub fn as_resource_quantity(&self) -> ResourceQuantity {
        ResourceQuantity { cpu_cores: self.cpu_cores, memory_mb: self.memory_mb, disk_gb: self.disk_gb }
    }
}

/// Optional custom pricing schedule; when absent the platform default applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingSchedule {
    pub per_cpu_core_hour: f64,
    pub per_memory_gb_hour: f64,
    pub per_disk_gb_hour: f64,
    pub per_gpu_hour: f64,
}

impl Default for PricingSchedule {
    fn default() -> Self {
        Self {
            per_cpu_core_hour: 0.01,
            per_memory_gb_hour: 0.002,
            per_disk_gb_hour: 0.0001,
            per_gpu_hour: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Offline,
}

/// Reputation scoring carried by a node, recomputed by the reputation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeReputation {
    pub uptime_pct: f64,
    pub total_vms_hosted: u64,
    pub successful_completions: u64,
}

impl Default for NodeReputation {
    fn default() -> Self {
        Self { uptime_pct: 100.0, total_vms_hosted: 0, successful_completions: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub wallet_address: String,
    pub capacity: NodeCapacity,
    pub pricing: Option<PricingSchedule>,
    pub status: NodeStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub public_ip: Option<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub tags: HashSet<String>,
    pub reputation: NodeReputation,
    pub registered_at: DateTime<Utc>,
}

impl Node {
    pub fn pricing_or_default(&self) -> PricingSchedule {
        self.pricing.unwrap_or_default()
    }
}
