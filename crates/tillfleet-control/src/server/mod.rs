//! HTTP API for the control plane.

pub mod error;
pub mod extract;
pub mod routes_actions;
pub mod routes_agent;
pub mod routes_auth;
pub mod routes_claims;
pub mod routes_fleet;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use tillfleet_core::health::HealthThresholds;

use crate::auth::JwtManager;
use crate::claim::ClaimService;
use crate::storage::ControlDatabase;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: ControlDatabase,
    pub jwt: Arc<JwtManager>,
    pub thresholds: HealthThresholds,
    pub claims: Arc<ClaimService>,
}

/// Build the control plane router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Operator session
        .route("/auth/login", post(routes_auth::login))
        // Fleet reads
        .route("/resellers", get(routes_fleet::list_resellers))
        .route("/tenants", get(routes_fleet::list_tenants))
        .route("/stores", get(routes_fleet::list_stores))
        .route("/stores/{id}", get(routes_fleet::get_store))
        .route(
            "/stores/{id}/impersonation-link",
            post(routes_fleet::issue_impersonation_link),
        )
        .route("/nodes", get(routes_fleet::list_nodes))
        .route(
            "/nodes/{id}",
            get(routes_fleet::get_node).delete(routes_fleet::delete_node),
        )
        .route("/nodes/{id}/rotate-token", post(routes_fleet::rotate_token))
        // Claim pairing
        .route("/claims/redeem", post(routes_claims::redeem))
        // Remote actions (operator side)
        .route(
            "/actions",
            post(routes_actions::create).get(routes_actions::list),
        )
        .route("/actions/{id}/retry", post(routes_actions::retry))
        .route("/actions/{id}/cancel", post(routes_actions::cancel))
        // Agent callbacks
        .route("/agent/heartbeat", post(routes_agent::heartbeat))
        .route("/agent/actions", get(routes_agent::action_feed))
        .route("/agent/actions/{id}/report", post(routes_agent::report))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
