// [apps/orchestrator/src/handlers/nodes.rs]
//! Node registration plus the node-side callbacks: heartbeat, command ack,
//! and attestation response. The callback endpoints require the caller to
//! have authenticated as a node (see `middleware::CallerIdentity`).

use axum::extract::{Extension, Path, State};
use axum::Json;
use chrono::Utc;
use orchestrator_domain::{GpuSpec, Node, NodeCapacity, NodeReputation, NodeStatus, PricingSchedule};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{ApiError, ApiResponse, ApiResult};
use crate::middleware::CallerIdentity;
use crate::state::AppState;

pub async fn list_nodes(State(state): State<AppState>) -> ApiResponse<Vec<Node>> {
    ApiResponse::ok(state.store.list_nodes())
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    #[serde(default)]
    pub node_id: Option<String>,
    pub wallet_address: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    #[serde(default)]
    pub gpu: GpuSpec,
    #[serde(default)]
    pub pricing: Option<PricingSchedule>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

pub async fn register_node(State(state): State<AppState>, Json(body): Json<RegisterNodeRequest>) -> ApiResponse<Node> {
    let node_id = body.node_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let node = Node {
        node_id,
        wallet_address: body.wallet_address,
        capacity: NodeCapacity { cpu_cores: body.cpu_cores, memory_mb: body.memory_mb, disk_gb: body.disk_gb, gpu: body.gpu },
        pricing: body.pricing,
        status: NodeStatus::Online,
        last_heartbeat_at: Utc::now(),
        public_ip: body.public_ip,
        region: body.region,
        zone: body.zone,
        tags: Default::default(),
        reputation: NodeReputation::default(),
        registered_at: Utc::now(),
    };
    state.store.upsert_node(node.clone());
    ApiResponse::created(node)
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub running_vm_ids: Vec<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

/// Refreshes `last_heartbeat_at`, feeds the reputation engine's rolling
/// uptime window, and brings an `Offline` node back `Online` — the recovery
/// half of the health monitor's cadence-driven downgrade.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(node_id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> ApiResult<ApiResponse<()>> {
    if !caller.is_node() {
        return Err(ApiError::Forbidden);
    }
    let mut node = state.store.get_node(&node_id).ok_or_else(|| ApiError::NodeNotFound(node_id.clone()))?;

    let now = Utc::now();
    let gap = now - node.last_heartbeat_at;
    state.store.record_heartbeat_gap(&node_id, now, gap, chrono::Duration::days(30));

    let was_offline = node.status == NodeStatus::Offline;
    node.last_heartbeat_at = now;
    node.status = NodeStatus::Online;
    if let Some(ip) = body.public_ip {
        node.public_ip = Some(ip);
    }
    state.store.upsert_node(node);

    if was_offline {
        state.store.append_event(orchestrator_domain::Event::info("health.node_online", &node_id, "heartbeat resumed"));
    }

    let _ = body.running_vm_ids;
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    Ok,
    Fail,
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub outcome: AckOutcome,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn ack_command(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((_node_id, command_id)): Path<(String, String)>,
    Json(body): Json<AckRequest>,
) -> ApiResult<ApiResponse<()>> {
    if !caller.is_node() {
        return Err(ApiError::Forbidden);
    }
    match body.outcome {
        AckOutcome::Ok => state.command_bus.ack_ok(&command_id).await,
        AckOutcome::Fail => state.command_bus.ack_fail(&command_id, body.reason.unwrap_or_default()).await,
    }
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Deserialize)]
pub struct AttestationResponseRequest {
    pub nonce: String,
    pub response_ms: f64,
}

pub async fn attestation_response(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((_node_id, command_id)): Path<(String, String)>,
    Json(body): Json<AttestationResponseRequest>,
) -> ApiResult<ApiResponse<()>> {
    if !caller.is_node() {
        return Err(ApiError::Forbidden);
    }
    // The transport itself is node-authenticated (see `middleware::auth_guard`);
    // cryptographic signing of the challenge payload is the node agent's
    // concern, out of scope here (spec §1).
    state.attestation.handle_node_response(&command_id, &body.nonce, true, body.response_ms);
    Ok(ApiResponse::ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;

    #[tokio::test]
    async fn heartbeat_brings_offline_node_back_online() {
        let state = AppState::new(OrchestratorConfig::default());
        let mut node = crate::test_support::sample_node("n1", 8);
        node.status = NodeStatus::Offline;
        state.store.upsert_node(node);

        heartbeat(
            State(state.clone()),
            Extension(CallerIdentity::Node),
            Path("n1".to_string()),
            Json(HeartbeatRequest { running_vm_ids: vec![], public_ip: None }),
        )
        .await
        .unwrap();

        assert_eq!(state.store.get_node("n1").unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn heartbeat_rejects_non_node_caller() {
        let state = AppState::new(OrchestratorConfig::default());
        state.store.upsert_node(crate::test_support::sample_node("n1", 8));

        let err = heartbeat(
            State(state),
            Extension(CallerIdentity::Owner("owner-1".to_string())),
            Path("n1".to_string()),
            Json(HeartbeatRequest { running_vm_ids: vec![], public_ip: None }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Forbidden));
    }
}
