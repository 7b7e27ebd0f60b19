use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use quarry_core::{Analyst, AnalystError, CancellationToken, Settings};
use quarry_exec::{ExecutionError, SqliteExecutor};
use quarry_store::{IndexError, StoreRegistry};
use quarry_types::{PlanMode, PlanSession, SessionState, TrainingInput, TrainingRecord};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    analyst: Arc<Analyst>,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Deserialize)]
struct ReportRequest {
    request: String,
    #[serde(default)]
    mode: PlanMode,
}

#[derive(Debug, Serialize)]
struct TrainResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    id: String,
    removed: bool,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared: usize,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let addr: SocketAddr = std::env::var("QUARRY_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7000".into())
        .parse()?;
    let db = std::env::var("QUARRY_DB").unwrap_or_else(|_| "./quarry.db".into());

    let settings = Settings::from_env()?;
    let registry = StoreRegistry::new(&settings.store_dir);
    let executor = SqliteExecutor::open(&db).await?;
    let analyst = Analyst::connect(settings, &registry, Arc::new(executor)).await?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        analyst: Arc::new(analyst),
        shutdown: shutdown.clone(),
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                shutdown.cancel();
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %db, "quarry HTTP server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/ask", post(ask))
        .route("/v1/report", post(report))
        .route(
            "/v1/training",
            get(list_training)
                .post(add_training)
                .delete(clear_training),
        )
        .route("/v1/training/:id", delete(remove_training))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<quarry_core::AskResult>, ApiError> {
    let answer = state.analyst.ask(&req.question).await.map_err(api_error)?;
    Ok(Json(answer))
}

/// Runs the planner to completion. A failed session is still returned in
/// full, with a 502 so callers can tell it apart.
async fn report(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> (StatusCode, Json<PlanSession>) {
    let cancel = state.shutdown.child_token();
    let session = state
        .analyst
        .plan_report(&req.request, req.mode, &cancel)
        .await;
    let status = match session.state {
        SessionState::Failed => StatusCode::BAD_GATEWAY,
        SessionState::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(session))
}

async fn list_training(State(state): State<AppState>) -> Json<Vec<TrainingRecord>> {
    Json(state.analyst.index().get_all().await)
}

async fn add_training(
    State(state): State<AppState>,
    Json(input): Json<TrainingInput>,
) -> Result<(StatusCode, Json<TrainResponse>), ApiError> {
    let id = state.analyst.train(input).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(TrainResponse { id })))
}

/// Deleting an unknown id succeeds with `removed: false`.
async fn remove_training(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let removed = state
        .analyst
        .index()
        .remove(&id)
        .await
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(RemoveResponse { id, removed }))
}

async fn clear_training(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = state
        .analyst
        .index()
        .clear()
        .await
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(ClearResponse { cleared }))
}

fn api_error(err: AnalystError) -> ApiError {
    let status = match &err {
        AnalystError::Knowledge(IndexError::InvalidTraining) => StatusCode::BAD_REQUEST,
        AnalystError::Execution(ExecutionError::Sqlite(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalystError::Execution(ExecutionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        AnalystError::Generation(_) | AnalystError::Embedding(_) => StatusCode::BAD_GATEWAY,
        AnalystError::Knowledge(IndexError::Embedding(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
