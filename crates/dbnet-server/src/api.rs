//! Broker operations shared by the HTTP routes and the websocket dispatcher

use dbnet_core::{Dataset, DbnetError, DbtKey, Result, Waited};
use dbnet_jobs::{JobRequest, JobSnapshot};
use dbnet_store::{QueryRecord, SessionRecord};
use serde_json::{Value, json};

use crate::request::{DbtRequest, MetaRequest, SessionRequest, SqlRequest};
use crate::state::AppState;

/// Re-read the connection sources, then list the names
pub(crate) fn connections(state: &AppState) -> Result<Value> {
    state.registry.reload()?;
    Ok(json!({ "conns": state.registry.list() }))
}

pub(crate) async fn databases(state: &AppState, req: &MetaRequest) -> Result<Dataset> {
    state.schema.get_databases(&req.conn).await
}

pub(crate) async fn schemata(state: &AppState, req: &MetaRequest) -> Result<Dataset> {
    state
        .schema
        .get_schemata(&req.conn, &req.database, req.refresh())
        .await
}

pub(crate) async fn schemas(state: &AppState, req: &MetaRequest) -> Result<Dataset> {
    state.schema.get_schemas(&req.conn, &req.database).await
}

pub(crate) async fn tables(state: &AppState, req: &MetaRequest) -> Result<Dataset> {
    state
        .schema
        .get_tables(&req.conn, &req.database, &req.schema, req.refresh())
        .await
}

pub(crate) async fn columns(state: &AppState, req: &MetaRequest) -> Result<Dataset> {
    state
        .schema
        .get_columns(&req.conn, &req.database, &req.schema, &req.table, req.refresh())
        .await
}

/// `procedure` names the analysis template
pub(crate) async fn analysis_sql(state: &AppState, req: &MetaRequest) -> Result<Value> {
    let data = req.data_map()?;
    let sql = state
        .queries
        .analysis_sql(&req.conn, &req.database, &req.procedure, &data)
        .await?;
    Ok(json!({ "sql": sql }))
}

pub(crate) fn history(state: &AppState, req: &MetaRequest) -> Result<Value> {
    let history = state.queries.history(&req.conn, &req.procedure, &req.name)?;
    Ok(json!({ "history": history }))
}

pub(crate) async fn submit_sql(
    state: &AppState,
    req: SqlRequest,
    continuation: bool,
) -> Result<Waited<QueryRecord>> {
    state.queries.submit(req.into_record(), continuation).await
}

/// Next page; a query the broker no longer knows is submitted again
pub(crate) async fn sql_rows(state: &AppState, req: SqlRequest) -> Result<Waited<QueryRecord>> {
    match state.queries.fetch_page(&req.id, req.wait).await {
        Err(e) if e.is_not_found() && !req.text.trim().is_empty() => {
            tracing::debug!(query_id = %req.id, "query not live, resubmitting");
            state.queries.submit(req.into_record(), false).await
        }
        other => other,
    }
}

pub(crate) async fn cancel_sql(state: &AppState, req: &SqlRequest) -> Result<QueryRecord> {
    state.queries.cancel(&req.id).await
}

pub(crate) fn cached_result(state: &AppState, req: &SqlRequest) -> Result<QueryRecord> {
    state.queries.cached_result(&req.id)
}

pub(crate) fn load_session(state: &AppState, req: &SessionRequest) -> Result<SessionRecord> {
    Ok(state.sessions.load(&req.conn, &req.name)?)
}

pub(crate) fn save_session(state: &AppState, req: &SessionRequest) -> Result<()> {
    if req.name.is_empty() {
        return Err(DbnetError::Config("session name is required".into()));
    }
    Ok(state.sessions.save(&req.conn, &req.name, &req.data)?)
}

pub(crate) async fn extract_load(
    state: &AppState,
    req: JobRequest,
    continuation: bool,
) -> Result<Waited<JobSnapshot>> {
    state.jobs.submit(req, continuation).await
}

pub(crate) fn cancel_job(state: &AppState, id: &str) -> Result<JobSnapshot> {
    state.jobs.cancel(id)
}

pub(crate) fn job_status(state: &AppState, id: &str) -> Result<JobSnapshot> {
    state.jobs.status(id)
}

/// Forward a JSON-RPC request to the dbt helper of the project, or signal
/// it to reload with `procedure: refresh`
pub(crate) async fn submit_dbt(state: &AppState, req: DbtRequest) -> Result<Value> {
    let broker = state
        .dbt
        .as_ref()
        .ok_or_else(|| DbnetError::Config("dbt support is not enabled".into()))?;

    let mut key = DbtKey {
        project_dir: req.proj_dir.clone().into(),
        profile: req.profile.clone(),
        target: req.target.clone(),
    };
    if !req.conn.is_empty() {
        let config = state.registry.config(&req.conn, "")?;
        if key.profile.is_empty() {
            key.profile = config.get_string("profile").unwrap_or_default();
        }
        if key.target.is_empty() {
            key.target = config.get_string("target").unwrap_or_default();
        }
    }

    if req.procedure == "refresh" {
        broker.refresh(&key)?;
        return Ok(json!({}));
    }

    let request = req
        .request
        .ok_or_else(|| DbnetError::Config("missing dbt request".into()))?;
    let response = broker.submit(&key, request).await?;
    Ok(serde_json::to_value(response)?)
}
