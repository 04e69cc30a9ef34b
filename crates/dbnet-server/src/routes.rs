//! HTTP routes

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dbnet_core::{CancellationToken, Dataset, DbnetError, ExecStatus, Result, Waited};
use dbnet_jobs::{JobRequest, JobSnapshot};
use dbnet_store::{QueryRecord, QueryStatus};
use serde_json::{Value, json};
use std::time::Instant;

use crate::error::{ApiError, ApiResult};
use crate::files::{FileRequest, file_operation};
use crate::request::{DbtRequest, JobIdRequest, MetaRequest, SessionRequest, SqlRequest};
use crate::state::AppState;
use crate::{ServerConfig, api, ws};

/// Marks a request as re-entering the wait on a submission already running
pub const CONTINUE_HEADER: &str = "DbNet-Continue";

/// Build the router with every route of the UI API
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(metadata_routes())
        .merge(query_routes())
        .merge(job_routes())
        .route("/load-session", get(load_session))
        .route("/save-session", post(save_session))
        .route("/file-operation", post(post_file_operation))
        .route("/ws", get(ws::upgrade))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve on the configured address until `shutdown` fires
pub async fn serve(state: AppState, config: &ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.addr()?).await?;
    tracing::info!(addr = %listener.local_addr()?, "dbnet server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("dbnet server stopped");
    Ok(())
}

/// Connections, schema metadata, analysis SQL and history
fn metadata_routes() -> Router<AppState> {
    Router::new()
        .route("/get-connections", get(get_connections))
        .route("/get-databases", get(get_databases))
        .route("/get-schemata", get(get_schemata))
        .route("/get-schemas", get(get_schemas))
        .route("/get-tables", get(get_tables))
        .route("/get-columns", get(get_columns))
        .route("/get-analysis-sql", get(get_analysis_sql))
        .route("/get-history", get(get_history))
}

fn query_routes() -> Router<AppState> {
    Router::new()
        .route("/submit-sql", post(submit_sql))
        .route("/get-sql-rows", get(get_sql_rows))
        .route("/cancel-sql", post(cancel_sql))
        .route("/get-cached-result", get(get_cached_result))
        .route("/submit-dbt", post(submit_dbt))
}

fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/extract-load", post(extract_load))
        .route("/get-job", get(get_job))
        .route("/cancel-job", post(cancel_job))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    tracing::debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

fn is_continuation(headers: &HeaderMap) -> bool {
    headers
        .get(CONTINUE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("false"))
}

/// 202 while the continuation ticker keeps firing; a failed execution is
/// answered with its record and a server error status
fn query_response(waited: Waited<QueryRecord>) -> ApiResult<Response> {
    let pending = waited.is_pending();
    let record = waited.into_inner();
    if record.status == QueryStatus::Errorred {
        let body = serde_json::to_value(&record).map_err(DbnetError::from)?;
        return Err(ApiError::with_record(
            StatusCode::INTERNAL_SERVER_ERROR,
            record.err,
            body,
        ));
    }
    Ok(accepted_if(pending, Json(record)))
}

fn job_response(waited: Waited<JobSnapshot>) -> ApiResult<Response> {
    let pending = waited.is_pending();
    let snapshot = waited.into_inner();
    if snapshot.status == ExecStatus::Error {
        let body = serde_json::to_value(&snapshot).map_err(DbnetError::from)?;
        return Err(ApiError::with_record(
            StatusCode::INTERNAL_SERVER_ERROR,
            snapshot.error,
            body,
        ));
    }
    Ok(accepted_if(pending, Json(snapshot)))
}

fn accepted_if(pending: bool, body: impl IntoResponse) -> Response {
    if pending {
        (StatusCode::ACCEPTED, body).into_response()
    } else {
        body.into_response()
    }
}

async fn get_connections(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(api::connections(&state)?))
}

async fn get_databases(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(api::databases(&state, &req).await?))
}

async fn get_schemata(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(api::schemata(&state, &req).await?))
}

async fn get_schemas(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(api::schemas(&state, &req).await?))
}

async fn get_tables(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(api::tables(&state, &req).await?))
}

async fn get_columns(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(api::columns(&state, &req).await?))
}

async fn get_analysis_sql(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Value>> {
    Ok(Json(api::analysis_sql(&state, &req).await?))
}

async fn get_history(
    State(state): State<AppState>,
    Query(req): Query<MetaRequest>,
) -> ApiResult<Json<Value>> {
    Ok(Json(api::history(&state, &req)?))
}

async fn submit_sql(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SqlRequest>,
) -> ApiResult<Response> {
    query_response(api::submit_sql(&state, req, is_continuation(&headers)).await?)
}

async fn get_sql_rows(
    State(state): State<AppState>,
    Query(req): Query<SqlRequest>,
) -> ApiResult<Response> {
    query_response(api::sql_rows(&state, req).await?)
}

async fn cancel_sql(
    State(state): State<AppState>,
    Json(req): Json<SqlRequest>,
) -> ApiResult<Json<QueryRecord>> {
    Ok(Json(api::cancel_sql(&state, &req).await?))
}

async fn get_cached_result(
    State(state): State<AppState>,
    Query(req): Query<SqlRequest>,
) -> ApiResult<Json<QueryRecord>> {
    Ok(Json(api::cached_result(&state, &req)?))
}

async fn submit_dbt(
    State(state): State<AppState>,
    Json(req): Json<DbtRequest>,
) -> ApiResult<Json<Value>> {
    Ok(Json(api::submit_dbt(&state, req).await?))
}

async fn extract_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JobRequest>,
) -> ApiResult<Response> {
    job_response(api::extract_load(&state, req, is_continuation(&headers)).await?)
}

async fn get_job(
    State(state): State<AppState>,
    Query(req): Query<JobIdRequest>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(api::job_status(&state, &req.id)?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Json(req): Json<JobIdRequest>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(api::cancel_job(&state, &req.id)?))
}

async fn load_session(
    State(state): State<AppState>,
    Query(req): Query<SessionRequest>,
) -> ApiResult<Json<Value>> {
    Ok(Json(api::load_session(&state, &req)?.data))
}

async fn save_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<Json<Value>> {
    api::save_session(&state, &req)?;
    Ok(Json(json!({})))
}

async fn post_file_operation(Json(req): Json<FileRequest>) -> ApiResult<Json<Value>> {
    Ok(Json(file_operation(req).await?))
}
