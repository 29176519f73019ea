use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path as RoutePath, Query, State};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower::ServiceExt;

use crate::common::types::{DirectoryEntry, PublicRoomFilter, PublicRoomsChunk, WireRequest, WireResponse};
use crate::storage::DirectoryStore;

pub const PUBLIC_ROOMS_PATH: &str = "/_matrix/federation/v1/publicRooms";
const VERSION_PATH: &str = "/_matrix/federation/v1/version";
const SERVER_KEY_PATH: &str = "/_matrix/key/v2/server";

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub server_name: String,
    pub key_id: String,
    /// Protobuf-encoded public signing key.
    pub public_key: Vec<u8>,
    pub directory: Arc<DirectoryStore>,
    pub started_at: Instant,
}

/// Build the router instance served by both the plain listener and the
/// overlay listener. One explicit value, no process-global registration.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(VERSION_PATH, get(version))
        .route(SERVER_KEY_PATH, get(server_keys))
        .route(PUBLIC_ROOMS_PATH, get(list_public_rooms).post(publish_public_room))
        .route(
            &format!("{PUBLIC_ROOMS_PATH}/{{room_id}}"),
            get(lookup_public_room).delete(remove_public_room),
        )
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "server": {
            "name": "dendrite-p2p",
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}

async fn server_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut verify_keys = serde_json::Map::new();
    verify_keys.insert(
        state.key_id.clone(),
        serde_json::json!({ "key": hex::encode(&state.public_key) }),
    );
    Json(serde_json::json!({
        "server_name": state.server_name,
        "verify_keys": verify_keys,
    }))
}

#[derive(Debug, Deserialize)]
struct PublicRoomsParams {
    search_term: Option<String>,
    limit: Option<u32>,
}

async fn list_public_rooms(
    State(state): State<AppState>,
    Query(params): Query<PublicRoomsParams>,
) -> Result<Json<PublicRoomsChunk>, StatusCode> {
    let filter = PublicRoomFilter {
        search_term: params.search_term,
        limit: params.limit,
    };
    let chunk = state.directory.query(&filter).map_err(|err| {
        log::warn!("Public rooms query failed: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let total = state.directory.count().unwrap_or(chunk.len());
    Ok(Json(PublicRoomsChunk {
        chunk,
        total_room_count_estimate: total,
    }))
}

async fn publish_public_room(
    State(state): State<AppState>,
    Json(entry): Json<DirectoryEntry>,
) -> Result<StatusCode, StatusCode> {
    state.directory.upsert(entry).await.map_err(|err| {
        log::warn!("Public room publish failed: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(StatusCode::OK)
}

async fn lookup_public_room(
    State(state): State<AppState>,
    RoutePath(room_id): RoutePath<String>,
) -> Result<Json<DirectoryEntry>, StatusCode> {
    match state.directory.lookup(&room_id).await {
        Ok(Some(entry)) => Ok(Json(entry)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            log::warn!("Public room lookup failed: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn remove_public_room(
    State(state): State<AppState>,
    RoutePath(room_id): RoutePath<String>,
) -> Result<StatusCode, StatusCode> {
    state.directory.delete(&room_id).await.map_err(|err| {
        log::warn!("Public room removal failed: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(StatusCode::OK)
}

async fn metrics(State(state): State<AppState>) -> String {
    let uptime = state.started_at.elapsed().as_secs();
    let rooms = state.directory.count().unwrap_or(0);
    format!(
        "# TYPE dendrite_p2p_uptime_seconds counter\n\
         dendrite_p2p_uptime_seconds {uptime}\n\
         # TYPE dendrite_p2p_directory_rooms gauge\n\
         dendrite_p2p_directory_rooms {rooms}\n"
    )
}

/// Serve a federation request received over the overlay with the same
/// router the plain listener uses.
pub async fn dispatch(router: &Router, request: &WireRequest) -> WireResponse {
    let method = match Method::from_bytes(request.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return WireResponse {
                status: StatusCode::BAD_REQUEST.as_u16(),
                body: Vec::new(),
            };
        }
    };

    let http_request = Request::builder()
        .method(method)
        .uri(&request.path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(request.body.clone()));
    let http_request = match http_request {
        Ok(http_request) => http_request,
        Err(_) => {
            return WireResponse {
                status: StatusCode::BAD_REQUEST.as_u16(),
                body: Vec::new(),
            };
        }
    };

    let response = match router.clone().oneshot(http_request).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    };

    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .unwrap_or_default();

    WireResponse {
        status: parts.status.as_u16(),
        body: body.to_vec(),
    }
}
