//! HTTP surface of a tier service.
//!
//! | route                    | handler                          |
//! |--------------------------|----------------------------------|
//! | `POST /query`            | answer a JSON [`QueryRequest`]   |
//! | `GET/POST /query/{q}`    | answer a question from the path  |
//! | `GET /health`            | [`TierHealth`]                   |
//! | `GET /stats`             | [`TierStats`]                    |
//! | `POST /ingest`           | tier 1 only                      |
//! | `POST /summarize_l1`     | tier 2 only                      |
//! | `POST /summarize_l2`     | tier 3 only                      |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use strata_tier_pipeline::{PipelineError, PipelineReport};
use strata_vector_index::IndexError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::TierService;
use crate::error::TierError;
use crate::protocol::{
    ErrorBody, QueryAnswer, QueryRequest, RebuildRequest, TierHealth, TierStats, rebuild_path,
};

/// Build the axum router for `service`.
pub fn router(service: Arc<TierService>) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/query/{question}", get(query_path).post(query_path))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route(rebuild_path(service.tier()), post(rebuild))
        .with_state(service)
}

/// Serve `service` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    service: Arc<TierService>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let tier = service.tier();
    if let Ok(addr) = listener.local_addr() {
        info!(tier = %tier, %addr, "tier service listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!(tier = %tier, "tier service stopped");
    Ok(())
}

async fn query(
    State(service): State<Arc<TierService>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>, TierError> {
    let answer = service
        .answer(&request.question, request.top_k, request.max_output_tokens)
        .await?;
    Ok(Json(answer))
}

async fn query_path(
    State(service): State<Arc<TierService>>,
    Path(question): Path<String>,
) -> Result<Json<QueryAnswer>, TierError> {
    Ok(Json(service.answer(&question, None, None).await?))
}

async fn health(State(service): State<Arc<TierService>>) -> Json<TierHealth> {
    Json(service.health().await)
}

async fn stats(State(service): State<Arc<TierService>>) -> Json<TierStats> {
    Json(service.stats().await)
}

/// The body is optional; an empty one rebuilds at the configured ratio.
async fn rebuild(
    State(service): State<Arc<TierService>>,
    body: Bytes,
) -> Result<Json<PipelineReport>, TierError> {
    let request: RebuildRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RebuildRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| TierError::InvalidRequest(format!("invalid body: {e}")))?
    };
    Ok(Json(service.rebuild(request.target_ratio).await?))
}

fn status_for(err: &TierError) -> StatusCode {
    match err {
        TierError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TierError::Unavailable { .. } | TierError::Index(IndexError::EmptyIndex) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TierError::Embedding(_) | TierError::Completion(_) => StatusCode::BAD_GATEWAY,
        TierError::Pipeline(PipelineError::UpstreamService { .. }) => StatusCode::BAD_GATEWAY,
        TierError::Pipeline(PipelineError::MissingSourceSummary { .. }) => StatusCode::CONFLICT,
        TierError::Pipeline(PipelineError::NothingIngested { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        TierError::Pipeline(PipelineError::UnsupportedOperation { .. }) => StatusCode::NOT_FOUND,
        TierError::Index(_) | TierError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for TierError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = self.kind(), "request failed: {self}");
        } else {
            warn!(kind = self.kind(), "request rejected: {self}");
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
