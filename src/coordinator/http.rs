//! HTTP API
//!
//! Public routes serve clients (`/kv`, `/cluster`, `/backups`, `/admin`).
//! Internal routes (`/internal/:node/...`) expose the stores hosted by this
//! process to peer nodes; their bodies are bincode-encoded.

use crate::common::Error;
use crate::coordinator::client::{HttpTransport, OCTET_STREAM};
use crate::coordinator::cluster::{Cluster, DEFAULT_CLIENT_ID};
use crate::coordinator::replication::Consistency;
use crate::coordinator::transport::{LocalTransport, Transport};
use crate::node::Entry;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Upper bound for request bodies (a full store snapshot on the internal API)
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub const VERSION_HEADER: &str = "x-ringkv-version";

#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<Cluster>,
    /// Stores hosted by this process
    pub local: Arc<LocalTransport>,
    /// Set when peers are reached over HTTP
    pub peers: Option<Arc<HttpTransport>>,
}

/// Error response: `{"error": kind, "message": text}`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        }
        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/kv/:key", put(put_key).get(get_key).delete(delete_key))
        .route("/cluster/nodes", get(list_nodes))
        .route("/cluster/nodes/:id", post(add_node).delete(remove_node))
        .route("/backups", post(create_backup).get(list_backups))
        .route("/backups/:id/restore", post(restore_backup))
        .route("/admin/sync", post(admin_sync))
        .route("/admin/verify", get(admin_verify))
        .route("/admin/oplog", get(admin_oplog))
        .route(
            "/internal/:node/entries",
            get(internal_entries).put(internal_replace),
        )
        .route(
            "/internal/:node/entries/:key",
            get(internal_get).put(internal_put).delete(internal_delete),
        )
        .route("/internal/:node/versions", get(internal_versions))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node_id": state.cluster.node_id(),
        "nodes": state.cluster.nodes().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Key-value
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct KvQuery {
    #[serde(default)]
    pub consistency: Option<Consistency>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl KvQuery {
    fn consistency(&self) -> Consistency {
        self.consistency.unwrap_or_default()
    }

    fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub key: String,
    pub version: u64,
    pub timestamp: f64,
}

impl From<Entry> for WriteResponse {
    fn from(entry: Entry) -> Self {
        Self {
            key: entry.key,
            version: entry.version,
            timestamp: entry.timestamp,
        }
    }
}

async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvQuery>,
    body: Bytes,
) -> ApiResult<Json<WriteResponse>> {
    let entry = state
        .cluster
        .coordinator()
        .put(&key, body.to_vec(), query.consistency(), query.client_id())
        .await?;
    Ok(Json(entry.into()))
}

async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvQuery>,
) -> ApiResult<Response> {
    let entry = state
        .cluster
        .coordinator()
        .get(&key, query.consistency(), query.client_id())
        .await?;
    let version = entry.version.to_string();
    let value = entry.value.ok_or(Error::KeyNotFound(key))?;
    Ok((
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (header::HeaderName::from_static(VERSION_HEADER), version),
        ],
        value,
    )
        .into_response())
}

async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvQuery>,
) -> ApiResult<Json<WriteResponse>> {
    let entry = state
        .cluster
        .coordinator()
        .delete(&key, query.consistency(), query.client_id())
        .await?;
    Ok(Json(entry.into()))
}

// ============================================================================
// Membership
// ============================================================================

async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "node_id": state.cluster.node_id(),
        "nodes": state.cluster.nodes(),
        "replication_factor": state.cluster.config().replication_factor,
    }))
}

/// Optional body for joining a remote node
#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub addr: String,
}

async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<AddNodeRequest>>,
) -> ApiResult<impl IntoResponse> {
    if let Some(Json(req)) = body {
        let peers = state.peers.as_ref().ok_or_else(|| {
            Error::InvalidConfig("this node cannot reach remote nodes".into())
        })?;
        peers.add_peer(&id, &req.addr);
    }
    let report = state.cluster.add_node(&id).await?;
    Ok(Json(json!({ "node_id": id, "report": report })))
}

async fn remove_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.cluster.remove_node(&id).await?;
    Ok(Json(json!({ "node_id": id, "report": report })))
}

// ============================================================================
// Backups
// ============================================================================

async fn create_backup(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let backup_id = state.cluster.create_backup().await?;
    Ok((StatusCode::CREATED, Json(json!({ "backup_id": backup_id }))))
}

async fn list_backups(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cluster.list_backups())
}

async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.cluster.restore_backup(&id).await?;
    Ok(Json(json!({ "status": "restored", "backup_id": id })))
}

// ============================================================================
// Admin
// ============================================================================

async fn admin_sync(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.cluster.sync_once().await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

async fn admin_verify(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.cluster.verify().await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

#[derive(Debug, Deserialize)]
pub struct OplogQuery {
    #[serde(default = "default_oplog_limit")]
    pub limit: usize,
    pub key: Option<String>,
}

fn default_oplog_limit() -> usize {
    100
}

async fn admin_oplog(
    State(state): State<AppState>,
    Query(query): Query<OplogQuery>,
) -> impl IntoResponse {
    let records = match &query.key {
        Some(key) => {
            let mut records = state.cluster.oplog().for_key(key);
            let skip = records.len().saturating_sub(query.limit);
            records.drain(..skip);
            records
        }
        None => state.cluster.oplog().recent(query.limit),
    };
    Json(records)
}

// ============================================================================
// Internal replica API
// ============================================================================

fn bincode_response<T: Serialize>(value: &T) -> ApiResult<Response> {
    let bytes = bincode::serialize(value).map_err(Error::from)?;
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], bytes).into_response())
}

async fn internal_entries(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<Response> {
    let entries = state.local.entries(&node).await?;
    bincode_response(&entries)
}

async fn internal_replace(
    State(state): State<AppState>,
    Path(node): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let entries: Vec<Entry> = bincode::deserialize(&body).map_err(Error::from)?;
    state.local.replace_entries(&node, entries).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn internal_get(
    State(state): State<AppState>,
    Path((node, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let entry = state.local.get_entry(&node, &key).await?;
    bincode_response(&entry)
}

async fn internal_put(
    State(state): State<AppState>,
    Path((node, key)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let entry: Entry = bincode::deserialize(&body).map_err(Error::from)?;
    if entry.key != key {
        return Err(Error::InvalidKey(format!(
            "entry for {} sent to {}",
            entry.key, key
        ))
        .into());
    }
    state.local.put_entry(&node, entry).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn internal_delete(
    State(state): State<AppState>,
    Path((node, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let existed = state.local.delete_entry(&node, &key).await?;
    bincode_response(&existed)
}

async fn internal_versions(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<Response> {
    let vv = state.local.version_vector(&node).await?;
    bincode_response(&vv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ClusterConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<LocalTransport>) {
        let local = Arc::new(LocalTransport::new());
        let config = ClusterConfig {
            replication_factor: 3,
            virtual_nodes_per_node: 50,
            ..Default::default()
        };
        let cluster = Cluster::builder("a")
            .cluster_config(config)
            .transport(local.clone())
            .build()
            .unwrap();
        cluster
            .bootstrap(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        let state = AppState {
            cluster: Arc::new(cluster),
            local: local.clone(),
            peers: None,
        };
        (create_router(state), local)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Vec<u8>) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (app, _) = app();
        let response = send(&app, "PUT", "/kv/greeting", b"hello".to_vec()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let written: WriteResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(written.version, 1);

        let response = send(&app, "GET", "/kv/greeting?consistency=eventual", vec![]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[VERSION_HEADER], "1");
        assert_eq!(body_bytes(response).await, b"hello");

        let response = send(&app, "DELETE", "/kv/greeting", vec![]).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/kv/greeting", vec![]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "key_not_found");
    }

    #[tokio::test]
    async fn test_quorum_failure_is_503() {
        let (app, local) = app();
        local.set_reachable("b", false);
        local.set_reachable("c", false);
        let response = send(&app, "PUT", "/kv/a", b"1".to_vec()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "quorum_not_reached");
    }

    #[tokio::test]
    async fn test_invalid_consistency_is_rejected() {
        let (app, _) = app();
        let response = send(&app, "GET", "/kv/a?consistency=sometimes", vec![]).await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_backup_roundtrip() {
        let (app, _) = app();
        send(&app, "PUT", "/kv/k", b"v1".to_vec()).await;
        let response = send(&app, "POST", "/backups", vec![]).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let id = body["backup_id"].as_str().unwrap().to_string();

        send(&app, "PUT", "/kv/k", b"v2".to_vec()).await;
        let response = send(&app, "POST", &format!("/backups/{}/restore", id), vec![]).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/kv/k", vec![]).await;
        assert_eq!(body_bytes(response).await, b"v1");

        let response = send(&app, "POST", "/backups/missing/restore", vec![]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_membership_routes() {
        let (app, _) = app();
        let response = send(&app, "POST", "/cluster/nodes/d", vec![]).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/cluster/nodes", vec![]).await;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["nodes"], json!(["a", "b", "c", "d"]));

        let response = send(&app, "DELETE", "/cluster/nodes/zzz", vec![]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_internal_entry_roundtrip() {
        let (app, local) = app();
        let entry = Entry::new("a/b", b"v".to_vec(), 5.0, 3);
        let response = send(
            &app,
            "PUT",
            "/internal/b/entries/a%2Fb",
            bincode::serialize(&entry).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(local.get_entry("b", "a/b").await.unwrap(), Some(entry.clone()));

        let response = send(&app, "GET", "/internal/b/entries/a%2Fb", vec![]).await;
        let fetched: Option<Entry> = bincode::deserialize(&body_bytes(response).await).unwrap();
        assert_eq!(fetched, Some(entry));

        let response = send(&app, "GET", "/internal/ghost/entries", vec![]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oplog_route() {
        let (app, _) = app();
        send(&app, "PUT", "/kv/x?client_id=alice", b"1".to_vec()).await;
        send(&app, "GET", "/kv/x", vec![]).await;

        let response = send(&app, "GET", "/admin/oplog?key=x&limit=1", vec![]).await;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["op_type"], "read");
    }
}
