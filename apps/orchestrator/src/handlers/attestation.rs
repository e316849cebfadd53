// [apps/orchestrator/src/handlers/attestation.rs]
//! Read-only liveness status plus the manual verification trigger.

use axum::extract::{Extension, Path, State};
use orchestrator_domain::LivenessState;

use crate::errors::{ApiError, ApiResponse, ApiResult};
use crate::middleware::CallerIdentity;
use crate::state::AppState;

fn require_owner(state: &AppState, vm_id: &str, caller: &CallerIdentity) -> ApiResult<()> {
    let vm = state.store.get_vm(vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.to_string()))?;
    match caller.owner_id() {
        Some(owner_id) if owner_id == vm.owner_id => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}

pub async fn get_status(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
) -> ApiResult<ApiResponse<LivenessState>> {
    require_owner(&state, &vm_id, &caller)?;
    Ok(ApiResponse::ok(state.store.get_liveness(&vm_id).unwrap_or_default()))
}

pub async fn verify_now(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(vm_id): Path<String>,
) -> ApiResult<ApiResponse<LivenessState>> {
    require_owner(&state, &vm_id, &caller)?;
    let liveness = state.attestation.verify_now(&vm_id).ok_or_else(|| ApiError::VmNotFound(vm_id.clone()))?;
    Ok(ApiResponse::ok(liveness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use orchestrator_domain::VmStatus;

    #[tokio::test]
    async fn status_for_unknown_vm_is_not_found() {
        let state = AppState::new(OrchestratorConfig::default());
        let err = get_status(State(state), Extension(CallerIdentity::Owner("owner-1".to_string())), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::VmNotFound(_)));
    }

    #[tokio::test]
    async fn verify_now_updates_liveness_for_owner() {
        let state = AppState::new(OrchestratorConfig::default());
        let mut vm = crate::test_support::sample_vm("vm-1", VmStatus::Running);
        vm.owner_id = "owner-1".to_string();
        state.store.upsert_vm(vm);

        let response = verify_now(State(state), Extension(CallerIdentity::Owner("owner-1".to_string())), Path("vm-1".to_string()))
            .await
            .unwrap();
        assert_eq!(response.1.consecutive_successes, 1);
    }
}
