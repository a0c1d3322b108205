use crate::models::{PendingExecution, PendingVote, PluginType, ProposalRecord};
use crate::pipeline::{ProposalsPipeline, ReconcileError};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: ProposalsPipeline,
}

#[derive(Debug, Deserialize)]
pub struct PluginParams {
    #[serde(default = "default_plugin")]
    pub plugin: PluginType,
}

fn default_plugin() -> PluginType {
    PluginType::TokenVoting
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBody {
    pub executed_at: Option<i64>,
}

pub fn router(pipeline: ProposalsPipeline) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/daos/{dao}/proposals", get(list_proposals))
        .route("/daos/{dao}/proposals/{id}", get(get_proposal))
        .route("/daos/{dao}/proposals/{id}/pending", post(put_pending_proposal))
        .route("/daos/{dao}/proposals/{id}/pending-vote", post(put_pending_vote))
        .route(
            "/daos/{dao}/proposals/{id}/pending-execution",
            post(put_pending_execution),
        )
        .with_state(AppState { pipeline })
}

fn error_status(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::Fetch(_) => StatusCode::BAD_GATEWAY,
        ReconcileError::Cancelled => StatusCode::CONFLICT,
    }
}

async fn list_proposals(
    State(state): State<AppState>,
    Path(dao): Path<String>,
    Query(params): Query<PluginParams>,
) -> Response {
    match state.pipeline.reconcile(&dao, params.plugin).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => {
            warn!(dao = %dao, error = %e, "Serving last known proposal list");
            let view = state.pipeline.view(&dao, params.plugin);
            (error_status(&e), Json(view)).into_response()
        }
    }
}

async fn get_proposal(
    State(state): State<AppState>,
    Path((dao, id)): Path<(String, String)>,
    Query(params): Query<PluginParams>,
) -> Response {
    match state
        .pipeline
        .reconcile_proposal(&dao, params.plugin, &id)
        .await
    {
        Ok(view) if view.data.is_none() => (StatusCode::NOT_FOUND, Json(view)).into_response(),
        Ok(view) => Json(view).into_response(),
        Err(e) => {
            warn!(dao = %dao, proposal_id = %id, error = %e, "Serving last known proposal");
            let view = state.pipeline.proposal_view(&dao, params.plugin, &id);
            (error_status(&e), Json(view)).into_response()
        }
    }
}

async fn put_pending_proposal(
    State(state): State<AppState>,
    Path((dao, id)): Path<(String, String)>,
    Json(record): Json<ProposalRecord>,
) -> StatusCode {
    if record.id != id || !record.belongs_to(&dao) {
        warn!(dao = %dao, proposal_id = %id, record_id = %record.id, "Pending proposal does not match its path");
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    info!(dao = %dao, proposal_id = %id, "Recording pending proposal");
    state.pipeline.cache().put(&dao, &id, record);
    StatusCode::ACCEPTED
}

async fn put_pending_vote(
    State(state): State<AppState>,
    Path((dao, id)): Path<(String, String)>,
    Json(vote): Json<PendingVote>,
) -> StatusCode {
    info!(dao = %dao, proposal_id = %id, voter = %vote.voter, "Recording pending vote");
    state.pipeline.cache().put_vote(&dao, &id, vote);
    StatusCode::ACCEPTED
}

async fn put_pending_execution(
    State(state): State<AppState>,
    Path((dao, id)): Path<(String, String)>,
    Json(body): Json<ExecutionBody>,
) -> StatusCode {
    let executed_at = body
        .executed_at
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    info!(dao = %dao, proposal_id = %id, executed_at, "Recording pending execution");
    state
        .pipeline
        .cache()
        .put_execution(&dao, &id, PendingExecution { executed_at });
    StatusCode::ACCEPTED
}
