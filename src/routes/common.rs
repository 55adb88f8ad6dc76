//! Operational routes: liveness, store readiness, version and the mounted resource catalogue.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct Probe {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<&'static str>,
}

async fn health() -> Json<Probe> {
    Json(Probe { status: "ok", store: None })
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Probe>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(Probe { status: "ok", store: Some("ok") })),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Probe { status: "degraded", store: Some("unavailable") }),
            )
        }
    }
}

async fn version() -> Json<Value> {
    Json(json!({ "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

/// Every configured resource with its entity, mount and key path.
async fn resources(State(state): State<AppState>) -> Json<Value> {
    let listed: Vec<Value> = state
        .model
        .resources
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "entity": r.entity,
                "mount": r.mount,
                "key_path": r.key_path.as_deref().unwrap_or(crate::controller::keypath::DEFAULT_KEY_PATH),
                "searchable_fields": r.searchable_fields,
            })
        })
        .collect();
    Json(json!({ "data": listed }))
}

/// GET /health and GET /version; needs no state.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// Adds GET /ready (pings the store) and GET /resources.
pub fn common_routes_with_ready(state: AppState) -> Router {
    common_routes().merge(
        Router::new()
            .route("/ready", get(ready))
            .route("/resources", get(resources))
            .with_state(state),
    )
}
