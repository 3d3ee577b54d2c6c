//! HTTP surface of the router.
//!
//! | route                       | handler                                |
//! |-----------------------------|----------------------------------------|
//! | `POST /query`               | classify and dispatch                  |
//! | `POST /query/{server_name}` | dispatch to a named server             |
//! | `GET /health`               | router liveness                        |
//! | `GET /system/health`        | [`SystemHealth`] across every tier     |
//! | `GET /stats`                | [`SystemStats`] across every tier      |
//! | `POST /ingest`              | rebuild tiers 1 → 2 → 3                |
//! | `POST /summarize_l1`        | rebuild tier 2 from the tier-1 summary |
//! | `POST /summarize_l2`        | rebuild tier 3 from the tier-2 summary |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_retrieval::RebuildRequest;
use strata_tier_pipeline::PipelineReport;
use strata_vector_index::TierLevel;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, FallbackReason, RouteRequest, RoutedAnswer};
use crate::error::RouterError;
use crate::health::SystemHealth;
use crate::rebuild::{IngestOutcome, IngestRequest};
use crate::stats::SystemStats;

/// Shared state of the router's handlers.
#[derive(Clone)]
pub struct RouterState {
    pub dispatcher: Arc<Dispatcher>,
    /// Cancelled on shutdown; each request runs under a child token.
    pub shutdown: CancellationToken,
}

/// Error body of the router. The routing fields are present only for
/// `all_tiers_unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_reason: Option<FallbackReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_error: Option<String>,
}

/// Body of the router's own `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterLiveness {
    pub status: String,
    pub servers: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Build the axum router.
pub fn router(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/query/{server_name}", post(query_server))
        .route("/health", get(liveness))
        .route("/system/health", get(system_health))
        .route("/stats", get(system_stats))
        .route("/ingest", post(ingest))
        .route("/summarize_l1", post(summarize_l1))
        .route("/summarize_l2", post(summarize_l2))
        .with_state(RouterState {
            dispatcher,
            shutdown,
        })
}

/// Serve the router on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "router listening");
    }
    let signal = shutdown.clone();
    axum::serve(listener, router(dispatcher, shutdown))
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await?;
    info!("router stopped");
    Ok(())
}

async fn query(
    State(state): State<RouterState>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<RoutedAnswer>, RouterError> {
    // Dropping the handler, e.g. on client disconnect, cancels the attempt.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.dispatcher.route(&request, &cancel).await?))
}

async fn query_server(
    State(state): State<RouterState>,
    Path(server_name): Path<String>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<RoutedAnswer>, RouterError> {
    state.dispatcher.resolve_server(&server_name)?;
    let request = request.with_target(server_name);
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    Ok(Json(state.dispatcher.route(&request, &cancel).await?))
}

async fn liveness(State(state): State<RouterState>) -> Json<RouterLiveness> {
    Json(RouterLiveness {
        status: "ok".to_string(),
        servers: state
            .dispatcher
            .clients()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        checked_at: Utc::now(),
    })
}

async fn system_health(State(state): State<RouterState>) -> Json<SystemHealth> {
    Json(state.dispatcher.system_health().await)
}

async fn system_stats(State(state): State<RouterState>) -> Json<SystemStats> {
    Json(state.dispatcher.system_stats().await)
}

async fn ingest(
    State(state): State<RouterState>,
    body: Bytes,
) -> Result<Json<IngestOutcome>, RouterError> {
    let request: IngestRequest = optional_body(&body)?;
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    let outcome = state
        .dispatcher
        .ingest_all(request.force_rebuild, &cancel)
        .await?;
    Ok(Json(outcome))
}

async fn summarize_l1(
    State(state): State<RouterState>,
    body: Bytes,
) -> Result<Json<PipelineReport>, RouterError> {
    summarize(&state, TierLevel::L2, &body).await
}

async fn summarize_l2(
    State(state): State<RouterState>,
    body: Bytes,
) -> Result<Json<PipelineReport>, RouterError> {
    summarize(&state, TierLevel::L3, &body).await
}

async fn summarize(
    state: &RouterState,
    tier: TierLevel,
    body: &[u8],
) -> Result<Json<PipelineReport>, RouterError> {
    let request: RebuildRequest = optional_body(body)?;
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    let report = state.dispatcher.rebuild_tier(tier, &request, &cancel).await?;
    Ok(Json(report))
}

/// Parse a JSON body that may be absent.
fn optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, RouterError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| RouterError::InvalidRequest(format!("invalid body: {e}")))
}

fn status_for(err: &RouterError) -> StatusCode {
    match err {
        RouterError::UnknownServer(_) => StatusCode::NOT_FOUND,
        RouterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RouterError::Tier { status, .. } => status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        RouterError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
        RouterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RouterError::AllTiersUnavailable { .. } | RouterError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RouterError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = self.kind(), "request failed: {self}");
        } else {
            warn!(kind = self.kind(), "request rejected: {self}");
        }
        let mut body = RouterErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            primary_server: None,
            primary_reason: None,
            primary_error: None,
            fallback_server: None,
            fallback_error: None,
        };
        if let RouterError::AllTiersUnavailable {
            primary,
            primary_reason,
            primary_error,
            fallback,
            fallback_error,
        } = self
        {
            body.primary_server = Some(primary);
            body.primary_reason = Some(primary_reason);
            body.primary_error = Some(primary_error);
            body.fallback_server = fallback;
            body.fallback_error = fallback_error;
        }
        (status, Json(body)).into_response()
    }
}
