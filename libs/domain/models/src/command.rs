//! The orchestrator-to-node command protocol: a pending command awaiting a terminal ack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    CreateVm,
    StartVm,
    StopVm,
    DeleteVm,
    Attest,
}

/// A command issued to a node, still awaiting ack-ok, ack-fail, or timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command_id: String,
    pub command_type: CommandType,
    /// A `vm_id` for VM-scoped commands, empty for node-scoped ones.
    pub target_resource_id: String,
    pub target_node_id: String,
    pub issued_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl PendingCommand {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.issued_at
    }

    pub fn is_vm_scoped(&self) -> bool {
        !self.target_resource_id.is_empty()
    }
}

/// The outcome of a terminal command event, delivered to the issuer's `on_terminal` callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandOutcome {
    Ok,
    Fail { reason: String },
    Timeout,
}
