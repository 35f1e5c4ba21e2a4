//! HTTP surface of the verge edge.
//!
//! The edge router serves signed and public content under a configurable
//! base path, receives purge events from the invalidation coordinator, and
//! exposes cache statistics. A separate admin router fronts the coordinator
//! itself for deployments where origin and edge are colocated.

use crate::cache::CacheStore;
use crate::config::ServerConfig;
use crate::delivery::{Delivery, DeliveryPipeline, DeliveryRequest};
use crate::error::{Result, VergeError};
use crate::invalidation::InvalidationCoordinator;
use crate::observability;
use crate::signing::UrlSigner;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the edge router.
#[derive(Clone)]
pub struct EdgeState {
    pub pipeline: Arc<DeliveryPipeline>,
    pub cache: Arc<CacheStore>,
}

/// Query parameters carried by signed URLs.
#[derive(Debug, Deserialize)]
pub struct DeliveryParams {
    pub expires: Option<u64>,
    pub signature: Option<String>,
}

/// Response body for purge endpoints.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub success: bool,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
}

/// Build the edge router.
pub fn edge_router(state: EdgeState, base_path: &str) -> Router {
    let content_route = format!("{}/:resource", base_path.trim_end_matches('/'));

    Router::new()
        .route(&content_route, get(serve_content).with_state(state.clone()))
        .route("/purge/:resource", post(purge_resource).with_state(state.clone()))
        .route("/purge-all", post(purge_all).with_state(state.clone()))
        .route("/cache-stats", get(cache_stats).with_state(state))
        .route("/health", get(health))
}

/// `GET {base_path}/:resource` - the delivery entry point.
async fn serve_content(
    State(state): State<EdgeState>,
    Path(resource): Path<String>,
    Query(params): Query<DeliveryParams>,
    headers: HeaderMap,
) -> Response {
    let req = DeliveryRequest {
        resource_id: resource,
        expires: params.expires,
        signature: params.signature,
        if_none_match: header_str(&headers, "if-none-match"),
        if_modified_since: header_str(&headers, "if-modified-since"),
        range: header_str(&headers, "range"),
        accept_encoding: header_str(&headers, "accept-encoding"),
    };

    match state.pipeline.handle(req).await {
        Ok(delivery) => {
            observability::record_delivery(delivery.status, delivery.cache_hit);
            into_response(delivery)
        }
        Err(e) => {
            observability::record_delivery(e.to_status(), false);
            error_response(e)
        }
    }
}

/// `POST /purge/:resource` - apply a purge event on this edge.
///
/// The body is an optional JSON `PurgeEvent`; a bare POST without a body (or
/// with an unparseable one) still purges, it just cannot carry the new
/// version forward.
async fn purge_resource(
    State(state): State<EdgeState>,
    Path(resource): Path<String>,
    body: Bytes,
) -> Response {
    let event: Option<crate::types::PurgeEvent> = serde_json::from_slice(&body).ok();
    let new_version = event.map(|e| e.new_version);

    let removed = state.pipeline.apply_purge(&resource, new_version).await;
    observability::record_purge();
    info!(resource = %resource, removed, "Edge purge applied");

    Json(PurgeResponse {
        success: true,
        file_id: resource,
        new_version,
    })
    .into_response()
}

/// `POST /purge-all` - drop every cached entry.
async fn purge_all(State(state): State<EdgeState>) -> Response {
    state.pipeline.purge_all().await;
    info!("Edge cache cleared");
    Json(json!({ "success": true })).into_response()
}

/// `GET /cache-stats` - current cache statistics snapshot.
async fn cache_stats(State(state): State<EdgeState>) -> Response {
    Json(state.cache.stats().await).into_response()
}

/// `GET /health` - liveness probe.
async fn health() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

/// Shared state for the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub coordinator: Arc<InvalidationCoordinator>,
    pub signer: Arc<UrlSigner>,
}

/// Build the origin-side admin router.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/purge/:resource", post(admin_purge).with_state(state.clone()))
        .route("/admin/sign/:resource", post(admin_sign).with_state(state))
        .route("/health", get(health))
}

/// `POST /admin/purge/:resource` - bump the version and fan out to edges.
async fn admin_purge(
    State(state): State<AdminState>,
    Path(resource): Path<String>,
) -> Response {
    match state.coordinator.purge(&resource).await {
        Ok(event) => {
            observability::record_purge();
            Json(PurgeResponse {
                success: true,
                file_id: event.resource,
                new_version: Some(event.new_version),
            })
            .into_response()
        }
        Err(e) => {
            warn!(resource = %resource, error = %e, "Purge failed");
            error_response(e)
        }
    }
}

/// `POST /admin/sign/:resource` - mint a signed URL with the default TTL.
async fn admin_sign(State(state): State<AdminState>, Path(resource): Path<String>) -> Response {
    Json(state.signer.sign(&resource, None)).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Convert a pipeline [`Delivery`] into an axum response.
fn into_response(delivery: Delivery) -> Response {
    let mut builder = Response::builder().status(delivery.status);
    for (name, value) in &delivery.headers {
        builder = builder.header(*name, value);
    }
    builder
        .body(Body::from(delivery.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Error responses are structured JSON with client-safe messages only.
fn error_response(e: VergeError) -> Response {
    let status =
        StatusCode::from_u16(e.to_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": e.client_message() }))).into_response()
}

/// Bind and serve the edge router until the process is shut down.
pub async fn run_edge_server(config: &ServerConfig, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| VergeError::Config(format!("cannot bind {}: {}", config.bind_addr, e)))?;

    info!(addr = %config.bind_addr, "Edge server listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| VergeError::Internal(format!("server error: {}", e)))?;
    Ok(())
}

/// Bind and serve the admin router.
pub async fn run_admin_server(addr: std::net::SocketAddr, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| VergeError::Config(format!("cannot bind {}: {}", addr, e)))?;

    info!(addr = %addr, "Admin server listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| VergeError::Internal(format!("server error: {}", e)))?;
    Ok(())
}
