//! Read-only admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: build version and active snapshot summary
//! - `GET /admin/routes`: routes in evaluation order
//! - `GET /admin/clusters`: clusters with live destination health
//!
//! All endpoints require `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::snapshot::SnapshotStore;

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<SnapshotStore>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(store: Arc<SnapshotStore>, api_key: &str) -> Self {
        Self {
            store,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/clusters", get(get_clusters))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
