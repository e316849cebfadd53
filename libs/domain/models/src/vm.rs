//! VM entity: a unit of compute scheduled onto exactly one node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::ResourceQuantity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmType {
    #[default]
    General,
    Relay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub image_id: String,
    pub requires_gpu: bool,
    /// Caller-supplied placement constraints, checked by the scheduler's
    /// candidate filter alongside resource fit. All optional.
    #[serde(default)]
    pub pinned_node_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

impl VmSpec {
    pub fn as_resource_quantity(&self) -> ResourceQuantity {
        ResourceQuantity { cpu_cores: self.cpu_cores, memory_mb: self.memory_mb, disk_gb: self.disk_gb }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub private_ip: Option<String>,
    pub hostname: Option<String>,
    pub ssh_jump_host: Option<String>,
    pub ssh_jump_port: Option<u16>,
    pub node_agent_host: Option<String>,
    pub node_agent_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmBilling {
    pub hourly_rate: f64,
    pub total_billed: f64,
    pub total_runtime_seconds: u64,
    pub last_billing_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
}

impl VmBilling {
    pub fn new(hourly_rate: f64) -> Self {
        Self {
            hourly_rate,
            total_billed: 0.0,
            total_runtime_seconds: 0,
            last_billing_at: None,
            started_at: None,
            paused: false,
            pause_reason: None,
            paused_at: None,
        }
    }
}

/// The eleven lifecycle states a VM can occupy. See `lifecycle::TRANSITIONS`
/// for the set of moves the state machine permits between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmStatus {
    Pending,
    Scheduling,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Error,
    Deleting,
    Deleted,
}

impl VmStatus {
    /// VMs in these statuses hold a live capacity reservation on their node.
    pub fn reserves_capacity(self) -> bool {
        matches!(self, Self::Provisioning | Self::Running | Self::Stopping | Self::Migrating)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Deleted | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub vm_id: String,
    pub owner_id: String,
    pub name: String,
    pub vm_type: VmType,
    pub spec: VmSpec,
    pub node_id: Option<String>,
    pub network_config: Option<NetworkConfig>,
    pub billing: VmBilling,
    pub encrypted_password: Option<String>,
    pub status: VmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when a delete is requested while the VM is mid-flight (Pending,
    /// Scheduling, Provisioning, Stopping, Migrating, or already Deleting) —
    /// none of those states has a direct edge to `Deleting` in the state
    /// machine. `CommandBus`/`Scheduler` check this flag once the in-flight
    /// operation settles and chain into `Deleting` from whatever terminal
    /// state it lands on.
    pub delete_requested: bool,
}

impl Vm {
    /// `status = Running ⇒ node_id ≠ null ∧ started_at ≠ null`.
    pub fn satisfies_running_invariant(&self) -> bool {
        if self.status != VmStatus::Running {
            return true;
        }
        self.node_id.is_some() && self.billing.started_at.is_some()
    }
}
