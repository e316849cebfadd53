// [apps/orchestrator/src/test_support.rs]
//! Fixture builders shared by unit tests across this crate. Not compiled
//! into release builds.

use chrono::Utc;
use orchestrator_domain::{GpuSpec, Node, NodeCapacity, NodeReputation, NodeStatus, Vm, VmBilling, VmSpec, VmStatus, VmType};

pub fn sample_node(node_id: &str, cpu_cores: u32) -> Node {
    Node {
        node_id: node_id.to_string(),
        wallet_address: "0xnode".to_string(),
        capacity: NodeCapacity { cpu_cores, memory_mb: 32_768, disk_gb: 500, gpu: GpuSpec::default() },
        pricing: None,
        status: NodeStatus::Online,
        last_heartbeat_at: Utc::now(),
        public_ip: None,
        region: Some("us-east".to_string()),
        zone: None,
        tags: Default::default(),
        reputation: NodeReputation::default(),
        registered_at: Utc::now(),
    }
}

pub fn sample_vm(vm_id: &str, status: VmStatus) -> Vm {
    Vm {
        vm_id: vm_id.to_string(),
        owner_id: "owner-1".to_string(),
        name: "fixture-vm".to_string(),
        vm_type: VmType::General,
        spec: VmSpec {
            cpu_cores: 2,
            memory_mb: 2048,
            disk_gb: 20,
            image_id: "img-1".to_string(),
            requires_gpu: false,
            pinned_node_id: None,
            region: None,
            zone: None,
        },
        node_id: None,
        network_config: None,
        billing: VmBilling::new(0.05),
        encrypted_password: None,
        status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        delete_requested: false,
    }
}
