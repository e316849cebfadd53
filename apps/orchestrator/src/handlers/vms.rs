// [apps/orchestrator/src/handlers/vms.rs]
//! VM create/list/action/delete plus the password side-channel endpoints.

use axum::extract::{Extension, Path, State};
use axum::Json;
use orchestrator_domain::{
    CommandType, TransitionContext, TransitionSource, Vm, VmBilling, VmSpec, VmStatus, VmType,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ApiError, ApiResponse, ApiResult};
use crate::middleware::CallerIdentity;
use crate::state::AppState;

const GENERATED_PASSWORD_LEN: usize = 24;

fn generate_password() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(GENERATED_PASSWORD_LEN).map(char::from).collect()
}

/// A caller-facing projection of `Vm` that never carries `encrypted_password`.
#[derive(Debug, Serialize)]
pub struct VmView {
    pub vm_id: String,
    pub name: String,
    pub vm_type: VmType,
    pub spec: VmSpec,
    pub node_id: Option<String>,
    pub network_config: Option<orchestrator_domain::NetworkConfig>,
    pub billing: VmBilling,
    pub status: VmStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Vm> for VmView {
    fn from(vm: Vm) -> Self {
        Self {
            vm_id: vm.vm_id,
            name: vm.name,
            vm_type: vm.vm_type,
            spec: vm.spec,
            node_id: vm.node_id,
            network_config: vm.network_config,
            billing: vm.billing,
            status: vm.status,
            created_at: vm.created_at,
            updated_at: vm.updated_at,
        }
    }
}

fn require_owner(vm: &Vm, caller: &CallerIdentity) -> ApiResult<()> {
    match caller.owner_id() {
        Some(owner_id) if owner_id == vm.owner_id => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}

pub async fn list_vms(State(state): State<AppState>, Extension(caller): Extension<CallerIdentity>) -> ApiResult<ApiResponse<Vec<VmView>>> {
    let owner_id = caller.owner_id().ok_or(ApiError::Forbidden)?.to_string();
    let vms = state.store.list_vms(|vm| vm.owner_id == owner_id).into_iter().map(VmView::from).collect();
    Ok(ApiResponse::ok(vms))
}

#[derive(Debug, Deserialize)]
pub struct CreateVmRequest {
    pub name: String,
    #[serde(default)]
    pub vm_type: VmType,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub image_id: String,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default)]
    pub pinned_node_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CreateVmResponse {
    pub vm_id: String,
    pub generated_password: String,
}

/// Creates a VM in `Pending` and kicks off scheduling on a detached task —
/// the request returns as soon as the VM is durably recorded, it does not
/// wait for placement to finish.
pub async fn create_vm(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<CreateVmRequest>,
) -> ApiResult<ApiResponse<CreateVmResponse>> {
    let owner_id = caller.owner_id().ok_or(ApiError::Forbidden)?.to_string();

    let vm_id = Uuid::new_v4().to_string();
    let generated_password = generate_password();
    let now = chrono::Utc::now();

    let vm = Vm {
        vm_id: vm_id.clone(),
        owner_id,
        name: body.name,
        vm_type: body.vm_type,
        spec: VmSpec {
            cpu_cores: body.cpu_cores,
            memory_mb: body.memory_mb,
            disk_gb: body.disk_gb,
            image_id: body.image_id,
            requires_gpu: body.requires_gpu,
            pinned_node_id: body.pinned_node_id,
            region: body.region,
            zone: body.zone,
        },
        node_id: None,
        network_config: None,
        billing: VmBilling::new(body.hourly_rate.unwrap_or(0.05)),
        encrypted_password: None,
        status: VmStatus::Pending,
        created_at: now,
        updated_at: now,
        delete_requested: false,
    };
    state.store.upsert_vm(vm);

    let scheduler = state.scheduler.clone();
    let spawn_vm_id = vm_id.clone();
    tokio::spawn(async move { scheduler.schedule(&spawn_vm_id).await });

    Ok(ApiResponse::created(CreateVmResponse { vm_id, generated_password }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VmAction {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct VmActionRequest {
    pub action: VmAction,
}

pub async fn vm_action(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
    Json(body): Json<VmActionRequest>,
) -> ApiResult<ApiResponse<()>> {
    let vm = state.store.get_vm(&vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.clone()))?;
    require_owner(&vm, &caller)?;

    match body.action {
        VmAction::Stop => {
            if vm.status != VmStatus::Running {
                return Err(ApiError::VmNotRunning(vm_id));
            }
            state.lifecycle.transition(&vm_id, VmStatus::Stopping, TransitionContext::new(TransitionSource::UserStop))?;
            let node_id = vm.node_id.clone().ok_or_else(|| ApiError::VmNotRunning(vm_id.clone()))?;
            state
                .command_bus
                .issue(Uuid::new_v4().to_string(), CommandType::StopVm, vm_id.clone(), node_id, serde_json::json!({}))
                .await;
        }
        VmAction::Start => {
            if vm.status != VmStatus::Stopped {
                return Err(ApiError::InvalidTransition(orchestrator_domain::InvalidTransition {
                    current: vm.status,
                    requested: VmStatus::Pending,
                    source: TransitionSource::UserStart,
                }));
            }
            state.lifecycle.transition(&vm_id, VmStatus::Pending, TransitionContext::new(TransitionSource::UserStart))?;
            let scheduler = state.scheduler.clone();
            let spawn_vm_id = vm_id.clone();
            tokio::spawn(async move { scheduler.schedule(&spawn_vm_id).await });
        }
    }

    Ok(ApiResponse::ok(()))
}

pub async fn delete_vm(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let vm = state.store.get_vm(&vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.clone()))?;
    require_owner(&vm, &caller)?;
    state.command_bus.initiate_delete(&vm_id)?;
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Deserialize)]
pub struct SecurePasswordRequest {
    pub encrypted_password: String,
}

/// Stores whatever ciphertext the caller supplies, verbatim. The core never
/// decrypts or validates it — encryption/decryption is the client's concern
/// (spec §1).
pub async fn set_secure_password(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
    Json(body): Json<SecurePasswordRequest>,
) -> ApiResult<ApiResponse<()>> {
    let mut vm = state.store.get_vm(&vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.clone()))?;
    require_owner(&vm, &caller)?;
    vm.encrypted_password = Some(body.encrypted_password);
    state.store.upsert_vm(vm);
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Serialize)]
pub struct EncryptedPasswordResponse {
    pub encrypted_password: Option<String>,
}

pub async fn get_encrypted_password(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
) -> ApiResult<ApiResponse<EncryptedPasswordResponse>> {
    let vm = state.store.get_vm(&vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.clone()))?;
    require_owner(&vm, &caller)?;
    Ok(ApiResponse::ok(EncryptedPasswordResponse { encrypted_password: vm.encrypted_password }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;

    fn make_vm(state: &AppState, owner_id: &str, status: VmStatus) -> String {
        let mut vm = crate::test_support::sample_vm("vm-1", status);
        vm.owner_id = owner_id.to_string();
        let vm_id = vm.vm_id.clone();
        state.store.upsert_vm(vm);
        vm_id
    }

    #[tokio::test]
    async fn create_vm_returns_generated_password_and_schedules() {
        let state = AppState::new(OrchestratorConfig::default());
        state.store.upsert_node(crate::test_support::sample_node("n1", 8));

        let response = create_vm(
            State(state.clone()),
            Extension(CallerIdentity::Owner("owner-1".to_string())),
            Json(CreateVmRequest {
                name: "box".to_string(),
                vm_type: VmType::General,
                cpu_cores: 2,
                memory_mb: 1024,
                disk_gb: 10,
                image_id: "img-1".to_string(),
                requires_gpu: false,
                pinned_node_id: None,
                region: None,
                zone: None,
                hourly_rate: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.1.generated_password.len(), GENERATED_PASSWORD_LEN);
        assert!(state.store.get_vm(&response.1.vm_id).is_some());
    }

    #[tokio::test]
    async fn list_vms_only_returns_callers_own() {
        let state = AppState::new(OrchestratorConfig::default());
        make_vm(&state, "owner-a", VmStatus::Running);
        let mut other = crate::test_support::sample_vm("vm-2", VmStatus::Running);
        other.owner_id = "owner-b".to_string();
        state.store.upsert_vm(other);

        let response = list_vms(State(state), Extension(CallerIdentity::Owner("owner-a".to_string()))).await.unwrap();
        assert_eq!(response.1.len(), 1);
    }

    #[tokio::test]
    async fn non_owner_cannot_delete() {
        let state = AppState::new(OrchestratorConfig::default());
        let vm_id = make_vm(&state, "owner-a", VmStatus::Running);

        let err = delete_vm(State(state), Extension(CallerIdentity::Owner("owner-b".to_string())), Path(vm_id)).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn stopping_a_non_running_vm_is_rejected() {
        let state = AppState::new(OrchestratorConfig::default());
        let vm_id = make_vm(&state, "owner-a", VmStatus::Pending);

        let err = vm_action(
            State(state),
            Extension(CallerIdentity::Owner("owner-a".to_string())),
            Path(vm_id),
            Json(VmActionRequest { action: VmAction::Stop }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::VmNotRunning(_)));
    }

    #[tokio::test]
    async fn secure_password_roundtrips() {
        let state = AppState::new(OrchestratorConfig::default());
        let vm_id = make_vm(&state, "owner-a", VmStatus::Running);
        let caller = CallerIdentity::Owner("owner-a".to_string());

        set_secure_password(
            State(state.clone()),
            Extension(caller.clone()),
            Path(vm_id.clone()),
            Json(SecurePasswordRequest { encrypted_password: "cipher-blob".to_string() }),
        )
        .await
        .unwrap();

        let response = get_encrypted_password(State(state), Extension(caller), Path(vm_id)).await.unwrap();
        assert_eq!(response.1.encrypted_password.as_deref(), Some("cipher-blob"));
    }
}
