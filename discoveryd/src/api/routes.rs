use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::protocol::API_PREFIX;
use shared::types::{Name, ServiceRecord, ServiceStatus};
use crate::cache::hash;
use crate::config::{NodeConfig, SigningKind};
use crate::error::SessionError;
use crate::registry::SessionRegistry;
use crate::session::{RoleKind, SessionHandle, SessionState};
use crate::sync::SyncProtocol;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<NodeConfig>,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub node: Name,
    pub sync_protocol: SyncProtocol,
    pub sync_interval_ms: u64,
    pub signing: SigningKind,
    pub sessions: usize,
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub id: usize,
    pub role: RoleKind,
    pub group: Name,
    pub node: Name,
    pub protocol: SyncProtocol,
    pub state: SessionState,
    pub digest: String,
}

#[derive(Serialize)]
pub struct ServiceView {
    pub key: String,
    pub group: Name,
    pub status: ServiceStatus,
    #[serde(flatten)]
    pub record: ServiceRecord,
}

#[derive(Serialize)]
pub struct SessionServices {
    pub published: Vec<ServiceView>,
    pub received: Vec<ServiceView>,
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    pub group: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/config", get(get_config))
        .route("/sessions", get(get_sessions))
        .route("/sessions/:id/services", get(get_session_services))
        .route("/services", get(get_services))
        .route("/services/hash", get(get_hash));
    Router::new().nest(API_PREFIX, v1).with_state(state)
}

fn views(group: &Name, records: BTreeMap<String, ServiceRecord>) -> Vec<ServiceView> {
    let now = Utc::now();
    records
        .into_iter()
        .map(|(key, record)| ServiceView {
            key,
            group: group.clone(),
            status: record.status_at(now),
            record,
        })
        .collect()
}

fn unavailable(e: SessionError) -> StatusCode {
    tracing::debug!("Session query failed: {}", e);
    StatusCode::SERVICE_UNAVAILABLE
}

/// Received records of every running session, merged by key.
async fn all_received(
    handles: &[SessionHandle],
    group: Option<&Name>,
) -> Vec<(Name, BTreeMap<String, ServiceRecord>)> {
    let mut out = Vec::new();
    for handle in handles {
        let info = handle.info();
        if group.is_some_and(|g| *g != info.group) {
            continue;
        }
        // Stopped sessions have nothing to report.
        if let Ok(received) = handle.received_service_details().await {
            out.push((info.group.clone(), received));
        }
    }
    out
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        node: state.config.name.clone(),
        sync_protocol: state.config.sync_protocol,
        sync_interval_ms: state.config.sync_interval_ms,
        signing: state.config.signing,
        sessions: state.registry.handles().len(),
    })
}

async fn get_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state
        .registry
        .handles()
        .iter()
        .enumerate()
        .map(|(id, handle)| {
            let info = handle.info();
            SessionSummary {
                id,
                role: info.role,
                group: info.group.clone(),
                node: info.node.clone(),
                protocol: info.protocol,
                state: handle.state(),
                digest: handle.digest(),
            }
        })
        .collect();
    Json(sessions)
}

async fn get_session_services(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<Json<SessionServices>, StatusCode> {
    let handle = state
        .registry
        .handles()
        .into_iter()
        .nth(id)
        .ok_or(StatusCode::NOT_FOUND)?;
    let group = handle.info().group.clone();
    let published = handle.published_service_details().await.map_err(unavailable)?;
    let received = handle.received_service_details().await.map_err(unavailable)?;
    Ok(Json(SessionServices {
        published: views(&group, published),
        received: views(&group, received),
    }))
}

async fn get_services(
    State(state): State<AppState>,
    Query(params): Query<ServiceQuery>,
) -> Json<Vec<ServiceView>> {
    let group = params.group.map(Name::from);
    let handles = state.registry.handles();
    let services = all_received(&handles, group.as_ref())
        .await
        .into_iter()
        .flat_map(|(group, received)| views(&group, received))
        .collect();
    Json(services)
}

async fn get_hash(State(state): State<AppState>) -> String {
    let handles = state.registry.handles();
    let merged: BTreeMap<String, ServiceRecord> = all_received(&handles, None)
        .await
        .into_iter()
        .flat_map(|(_, received)| received)
        .collect();
    hash::compute_hash(&merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use shared::types::DiscoveryReply;
    use crate::face::{Face, MemoryNetwork};
    use crate::session::{DiscoveryCallback, DiscoverySession, Role, SessionConfig};

    fn ignore() -> DiscoveryCallback {
        Arc::new(|_: &ServiceRecord, _: &DiscoveryReply| {})
    }

    /// A producer of `/printer1` and a consumer that has received it.
    async fn test_state() -> AppState {
        let face: Arc<dyn Face> = Arc::new(MemoryNetwork::new());
        let registry = Arc::new(SessionRegistry::new(CancellationToken::new()));
        let record = ServiceRecord::new(
            "/printer1",
            "/node-A",
            3600,
            BTreeMap::from([("make".to_string(), "HP".to_string())]),
        );
        registry.add(DiscoverySession::new(
            Role::Producer { services: vec![record] },
            SessionConfig::new("/printer", "/node-A"),
            face.clone(),
            ignore(),
        ));
        registry.add(DiscoverySession::new(
            Role::Consumer { continuous: true },
            SessionConfig::new("/printer", "/node-B"),
            face,
            ignore(),
        ));
        registry.start_all().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut config: NodeConfig = toml::from_str("").unwrap();
        config.name = Name::parse("/node-A");
        AppState {
            registry,
            config: Arc::new(config),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_config() {
        let app = router(test_state().await);
        let (status, body) = get_json(app, "/v1/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node"], "/node-A");
        assert_eq!(body["sync_protocol"], "state-vector");
        assert_eq!(body["signing"], "digest-sha256");
        assert_eq!(body["sessions"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions() {
        let app = router(test_state().await);
        let (status, body) = get_json(app, "/v1/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["role"], "producer");
        assert_eq!(body[1]["role"], "consumer");
        assert_eq!(body[1]["state"], "running");
        assert_eq!(body[1]["node"], "/node-B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_services() {
        let state = test_state().await;
        let (status, body) = get_json(router(state.clone()), "/v1/sessions/0/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["published"][0]["key"], "/printer1");

        let (_, body) = get_json(router(state.clone()), "/v1/sessions/1/services").await;
        let received = &body["received"][0];
        assert_eq!(received["key"], "/node-A/printer1");
        assert_eq!(received["status"], "ACTIVE");
        assert_eq!(received["metadata"]["make"], "HP");

        let (status, _) = get_json(router(state), "/v1/sessions/7/services").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_group_filter() {
        let state = test_state().await;
        let (_, body) = get_json(router(state.clone()), "/v1/services").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["group"], "/printer");

        let (_, body) = get_json(router(state), "/v1/services?group=/scanner").await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash() {
        let state = test_state().await;
        let app = router(state.clone());
        let response = app
            .oneshot(Request::builder().uri("/v1/services/hash").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(body.len(), 64);
        assert_eq!(body, state.registry.handles()[1].digest());
    }
}
