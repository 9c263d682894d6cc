//! HTTP surface: research runs, run progress, race prediction.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

use cr_agents::{AgentState, RacePrediction, RacePredictor, RaceRequest, ResearchGraph, RunId};
use cr_core::{Error, ModelSelector};

#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<ResearchGraph>,
    pub race: Arc<RacePredictor>,
    pub selector: Arc<dyn ModelSelector>,
    pub default_model: String,
    /// Applied to `/predict`; research runs carry their own deadline.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub question: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub answer: String,
    pub run_id: RunId,
}

#[derive(Debug)]
pub enum AppError {
    Pipeline(Error),
    NotFound(String),
    BadRequest(String),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Pipeline(err)
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::SchemaViolation(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            AppError::Pipeline(err) => (status_for(&err), err.kind(), err.to_string()),
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail),
            AppError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "bad_request", detail),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), kind, detail = %detail, "Request failed");
        } else {
            warn!(status = status.as_u16(), kind, detail = %detail, "Request rejected");
        }
        (status, Json(json!({ "detail": detail, "kind": kind }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/runs/{run_id}", get(run_status))
        .route("/predict", post(predict))
        .route("/healthcheck", get(healthcheck))
        .with_state(state)
}

pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(Error::validation("question must not be empty").into());
    }
    let model = req.model.unwrap_or_else(|| state.default_model.clone());
    let run = AgentState::new(req.question, model);
    let run_id = run.run_id;

    let span = info_span!("run", run_id = %run_id);
    let finished = state.graph.run(run).instrument(span).await?;
    let answer = finished
        .answer
        .unwrap_or_else(cr_agents::Answer::no_information)
        .render();

    Ok(Json(SearchResponse { answer, run_id }))
}

/// Latest checkpoint of a run, including each step's progress log.
pub async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<AgentState>, AppError> {
    let run_id: RunId = run_id
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid run id: {e}")))?;
    match state.graph.load(&run_id).await? {
        Some(saved) => Ok(Json(saved)),
        None => Err(AppError::NotFound(format!("run {run_id} not found"))),
    }
}

pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<RaceRequest>,
) -> Result<Json<RacePrediction>, AppError> {
    let model = state.selector.select(&state.default_model)?;
    let span = info_span!("predict", race_name = %req.race_name);
    let work = state.race.predict(&model, &req).instrument(span);

    let prediction = match state.deadline {
        Some(deadline) => tokio::time::timeout(deadline, work).await.map_err(|_| {
            Error::timeout(format!("prediction exceeded its {}s deadline", deadline.as_secs()))
        })??,
        None => work.await?,
    };
    Ok(Json(prediction))
}

pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "message": "hello world" }))
}

/// Serve until ctrl-c.
pub async fn serve(host: &str, port: u16, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}
