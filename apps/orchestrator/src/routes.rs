// [apps/orchestrator/src/routes.rs]
//! The full HTTP surface: owner-facing REST endpoints under `/api`, plus
//! the node-side callbacks that share the same bearer-token transport but
//! authenticate as a distinct principal (see `middleware::CallerIdentity`).

use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{attestation, nodes, system, vms};
use crate::middleware::auth_guard;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/system/stats", get(system::get_stats))
        .route("/nodes", get(nodes::list_nodes).post(nodes::register_node))
        .route("/nodes/:node_id/heartbeat", post(nodes::heartbeat))
        .route("/nodes/:node_id/commands/:command_id/ack", post(nodes::ack_command))
        .route("/nodes/:node_id/attestation/:command_id/response", post(nodes::attestation_response))
        .route("/vms", get(vms::list_vms).post(vms::create_vm))
        .route("/vms/:vm_id/action", post(vms::vm_action))
        .route("/vms/:vm_id", delete(vms::delete_vm))
        .route("/vms/:vm_id/secure-password", post(vms::set_secure_password))
        .route("/vms/:vm_id/encrypted-password", get(vms::get_encrypted_password))
        .route("/attestation/vms/:vm_id/status", get(attestation::get_status))
        .route("/attestation/vms/:vm_id/verify", post(attestation::verify_now))
        .layer(middleware::from_fn(auth_guard));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}
