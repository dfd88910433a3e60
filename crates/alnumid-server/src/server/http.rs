//! HTTP surface of the service.
//!
//! `POST /generate` validates and charges the request synchronously, then
//! spawns the run and answers `202 Accepted` right away. Progress and final
//! file locations are polled through `GET /runs/{id}`.

use crate::server::{
    runs::{RunRegistry, RunStatus},
    telemetry::{
        decrement_runs_inflight, increment_ids_generated, increment_rejections,
        increment_requests, increment_runs_inflight, record_run_duration,
    },
};
use alnumid::{
    BatchSink, CatalogEntry, Engine, Error, GenerationRequest, LinkResolver, TokenEncoder,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

pub struct AppState<E, R, B> {
    pub engine: Arc<Engine<E, R, B>>,
    pub runs: Arc<RunRegistry>,
}

impl<E, R, B> Clone for AppState<E, R, B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            runs: self.runs.clone(),
        }
    }
}

pub fn router<E, R, B>(state: AppState<E, R, B>) -> Router
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    Router::new()
        .route("/generate", post(generate::<E, R, B>))
        .route("/runs/{id}", get(run_status::<E, R, B>))
        .route("/quota", get(quota::<E, R, B>))
        .route("/categories", get(categories::<E, R, B>))
        .route("/categories/{code}/colors", get(colors::<E, R, B>))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Maps engine errors onto status codes.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub run_id: u64,
    pub requested_ids: u64,
    pub remaining_quota: u64,
}

async fn generate<E, R, B>(
    State(state): State<AppState<E, R, B>>,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<Accepted>), ApiError>
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    increment_requests();
    let admitted = state.engine.admit(&request).inspect_err(|e| {
        if e.is_rejection() {
            increment_rejections();
            warn!(error = %e, "generation request rejected");
        }
    })?;

    let run_id = state.runs.begin(admitted.charged);
    let accepted = Accepted {
        run_id,
        requested_ids: admitted.charged,
        remaining_quota: admitted.remaining,
    };
    info!(run_id, requested_ids = admitted.charged, "run started");

    let AppState { engine, runs } = state;
    let count = admitted.count;
    increment_runs_inflight();
    let started = Instant::now();
    let task = tokio::spawn(async move { engine.run(admitted).await });

    // Supervises the run so a panicking task still leaves a final status.
    tokio::spawn(async move {
        match task.await {
            Ok(report) => {
                let persisted = report
                    .outcomes
                    .iter()
                    .filter(|o| o.result.is_ok())
                    .count() as u64;
                increment_ids_generated(persisted * count);
                runs.finish(run_id, &report);
            }
            Err(e) => {
                error!(run_id, error = %e, "run task ended without a report");
                runs.fail(run_id, e.to_string());
            }
        }
        record_run_duration(started.elapsed().as_secs_f64() * 1_000.0);
        decrement_runs_inflight();
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn run_status<E, R, B>(
    State(state): State<AppState<E, R, B>>,
    Path(id): Path<u64>,
) -> Result<Json<RunStatus>, StatusCode>
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    state.runs.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
pub struct QuotaView {
    pub max: u64,
    pub remaining: u64,
}

async fn quota<E, R, B>(
    State(state): State<AppState<E, R, B>>,
) -> Result<Json<QuotaView>, ApiError>
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    let context = state.engine.context();
    Ok(Json(QuotaView {
        max: context.quota_policy().max_ids,
        remaining: context.remaining()?,
    }))
}

async fn categories<E, R, B>(State(state): State<AppState<E, R, B>>) -> Json<Vec<CatalogEntry>>
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    Json(state.engine.catalog().categories())
}

async fn colors<E, R, B>(
    State(state): State<AppState<E, R, B>>,
    Path(code): Path<String>,
) -> Result<Json<Vec<CatalogEntry>>, StatusCode>
where
    E: TokenEncoder + 'static,
    R: LinkResolver + 'static,
    B: BatchSink + 'static,
{
    state
        .engine
        .catalog()
        .colors(&code)
        .map(|c| Json(c.to_vec()))
        .ok_or(StatusCode::NOT_FOUND)
}
