//! HTTP API server: event ingestion, session management, preferences

use super::ws::ws_handler;
use crate::error::{OfficeError, ValidationError};
use crate::events::validate;
use crate::session::{SessionState, SessionStore, SessionSummary, SubmitOutcome};
use crate::storage::PreferenceStore;
use crate::types::SessionId;
use crate::whiteboard::{project, UnknownMode, ViewMode};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server address
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 8000).into(),
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) preferences: Arc<dyn PreferenceStore>,
    pub(crate) instance_id: String,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    sessions: Arc<SessionStore>,
    preferences: Arc<dyn PreferenceStore>,
    instance_id: String,
}

impl ApiServer {
    /// Create new API server
    pub fn new(
        config: ApiServerConfig,
        sessions: Arc<SessionStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let instance_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            config,
            sessions,
            preferences,
            instance_id,
        }
    }

    /// Get instance ID
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Build the router with all routes and middleware
    pub fn router(&self) -> Router {
        build_router(AppState {
            sessions: self.sessions.clone(),
            preferences: self.preferences.clone(),
            instance_id: self.instance_id.clone(),
        })
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn serve(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        };
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// stop every session actor (flushing unsaved snapshots)
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            "API server [{}] listening on http://{}",
            self.instance_id, addr
        );

        // Ending every subscription lets open WebSockets close with the server
        let hub = self.sessions.hub().clone();
        let shutdown = async move {
            shutdown.await;
            hub.close_all().await;
        };

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("API server [{}] shutting down", self.instance_id);
        self.sessions.shutdown().await;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        // Ingestion
        .route("/events", post(ingest_handler))
        // Sessions
        .route("/sessions", get(list_sessions_handler).delete(delete_all_handler))
        .route(
            "/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/:id/views/:mode", get(view_handler))
        // Subscriptions
        .route("/ws/:session_id", get(ws_handler))
        // Preferences
        .route("/preferences", get(list_preferences_handler))
        .route(
            "/preferences/:key",
            get(get_preference_handler)
                .put(put_preference_handler)
                .delete(delete_preference_handler),
        )
        // Health check
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Error body: `{"error": <code>, "message": <text>}`
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<OfficeError> for ApiError {
    fn from(err: OfficeError) -> Self {
        match err {
            OfficeError::Validation(e) => ApiError::bad_request(e.code(), e.to_string()),
            OfficeError::SessionNotFound(id) => Self {
                status: StatusCode::NOT_FOUND,
                code: "session_not_found",
                message: format!("session {} not found", id),
            },
            other => {
                error!("Request failed: {}", other);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal_error",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    outcome: &'static str,
    /// Sequences applied by this request, in order
    sequences: Vec<u64>,
    /// Events now waiting in the reorder window
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_events: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<SubmitOutcome> for IngestResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let mut response = Self {
            status: "accepted",
            outcome: "applied",
            sequences: Vec::new(),
            pending_events: None,
            reason: None,
        };
        match outcome {
            SubmitOutcome::Applied(sequences) => response.sequences = sequences,
            SubmitOutcome::Buffered(pending) => {
                response.outcome = "buffered";
                response.pending_events = Some(pending);
            }
            SubmitOutcome::Discarded(violation) => {
                response.outcome = "discarded";
                response.reason = Some(violation.to_string());
            }
        }
        response
    }
}

/// `POST /events`
///
/// The body is parsed here rather than through `Json` so that malformed
/// payloads get the same error shape as every other validation failure.
async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
    let event = validate(&raw).inspect_err(|e| {
        debug!("Rejected event payload: {}", e);
    })?;

    debug!(
        "Ingesting {} for session {}",
        event.event_type(),
        event.session_id
    );
    let outcome = state.sessions.submit(event).await?;
    if let SubmitOutcome::Discarded(violation) = &outcome {
        warn!("Discarded out-of-window event: {}", violation);
    }
    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

#[derive(Debug, Serialize)]
struct SessionList {
    sessions: Vec<SessionSummary>,
}

async fn list_sessions_handler(State(state): State<AppState>) -> ApiResult<Json<SessionList>> {
    let sessions = state.sessions.list().await?;
    Ok(Json(SessionList { sessions }))
}

#[derive(Debug, Serialize)]
struct SessionDetail<'a> {
    session_id: &'a SessionId,
    last_sequence: u64,
    degraded: bool,
    pending_events: usize,
    state: &'a SessionState,
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let session_id = SessionId::new(id);
    let snapshot = state
        .sessions
        .snapshot(&session_id)
        .await?
        .ok_or_else(|| OfficeError::SessionNotFound(session_id.to_string()))?;

    let detail = SessionDetail {
        session_id: &snapshot.state.session_id,
        last_sequence: snapshot.state.last_sequence,
        degraded: snapshot.degraded,
        pending_events: snapshot.pending_events,
        state: &snapshot.state,
    };
    Ok(Json(detail).into_response())
}

async fn view_handler(
    State(state): State<AppState>,
    Path((id, mode)): Path<(String, String)>,
) -> ApiResult<Response> {
    let mode: ViewMode = mode
        .parse()
        .map_err(|e: UnknownMode| ApiError::bad_request("unknown_mode", e.to_string()))?;
    let session_id = SessionId::new(id);
    let snapshot = state
        .sessions
        .snapshot(&session_id)
        .await?
        .ok_or_else(|| OfficeError::SessionNotFound(session_id.to_string()))?;
    Ok(Json(project(&snapshot.state, mode)).into_response())
}

async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_id = SessionId::new(id);
    if state.sessions.delete(&session_id).await? {
        info!("Deleted session {}", session_id);
        Ok(Json(serde_json::json!({ "deleted": session_id })))
    } else {
        Err(OfficeError::SessionNotFound(session_id.to_string()).into())
    }
}

async fn delete_all_handler(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.sessions.delete_all().await?;
    info!("Purged {} sessions", deleted);
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn list_preferences_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(state.preferences.list_preferences().await?))
}

#[derive(Debug, Serialize, Deserialize)]
struct PreferenceBody {
    value: String,
}

async fn get_preference_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<PreferenceBody>> {
    match state.preferences.get_preference(&key).await? {
        Some(value) => Ok(Json(PreferenceBody { value })),
        None => Err(ApiError::not_found(format!("preference {} not set", key))),
    }
}

async fn put_preference_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<PreferenceBody>,
) -> ApiResult<Json<PreferenceBody>> {
    state.preferences.put_preference(&key, &body.value).await?;
    Ok(Json(body))
}

async fn delete_preference_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    if state.preferences.delete_preference(&key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("preference {} not set", key)))
    }
}

/// Health check handler
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    instance_id: String,
    sessions: usize,
    subscribers: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.clone(),
        sessions: state.sessions.session_count().await,
        subscribers: state.sessions.hub().total_subscribers().await,
    })
}
