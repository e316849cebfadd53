// [apps/orchestrator/src/handlers/system.rs]
//! `GET /api/system/stats`

use axum::extract::State;
use orchestrator_domain::{NodeStatus, VmStatus};
use serde::Serialize;

use crate::errors::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub node_count: usize,
    pub nodes_online: usize,
    pub vm_count: usize,
    pub vms_running: usize,
    pub available_cpu: u64,
    pub available_memory_mb: u64,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResponse<SystemStats> {
    let nodes = state.store.list_nodes();
    let vms = state.store.list_vms(|_| true);

    let nodes_online = nodes.iter().filter(|n| n.status == NodeStatus::Online).count();
    let vms_running = vms.iter().filter(|v| v.status == VmStatus::Running).count();

    let mut available_cpu = 0u64;
    let mut available_memory_mb = 0u64;
    for node in nodes.iter().filter(|n| n.status == NodeStatus::Online) {
        let used = state.store.used_capacity(&node.node_id);
        available_cpu += (node.capacity.cpu_cores as u64).saturating_sub(used.cpu_cores as u64);
        available_memory_mb += node.capacity.memory_mb.saturating_sub(used.memory_mb);
    }

    ApiResponse::ok(SystemStats {
        node_count: nodes.len(),
        nodes_online,
        vm_count: vms.len(),
        vms_running,
        available_cpu,
        available_memory_mb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use orchestrator_domain::VmStatus;

    use crate::config::OrchestratorConfig;

    #[tokio::test]
    async fn counts_only_online_node_capacity() {
        let state = AppState::new(OrchestratorConfig::default());
        state.store.upsert_node(crate::test_support::sample_node("n-online", 8));
        let mut offline = crate::test_support::sample_node("n-offline", 8);
        offline.status = NodeStatus::Offline;
        state.store.upsert_node(offline);

        let mut running_vm = crate::test_support::sample_vm("vm-1", VmStatus::Running);
        running_vm.node_id = Some("n-online".to_string());
        state.store.upsert_vm(running_vm);

        let response = get_stats(State(state)).await;
        assert_eq!(response.1.node_count, 2);
        assert_eq!(response.1.nodes_online, 1);
        assert_eq!(response.1.vms_running, 1);
        assert_eq!(response.1.available_cpu, 6);
    }
}
