//! Read-only introspection surface over persisted state (SPEC_FULL.md §F.1).
//!
//! Grounded on the reference API crate's route-module shape: a per-module
//! `AppState`, a `routes(state) -> Router` function, handlers returning
//! `Result<Json<T>, StatusCode>`. There is no write path here and none is
//! planned — mutating state always goes through `Emm`, never HTTP.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use exec_model::{HandlerRun, Session, WorkflowRecord};
use exec_store::{run_tx, Store, StoreError};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/workflows/:id", get(get_workflow))
        .route("/sessions/:id", get(get_session))
        .route("/handler-runs/:id", get(get_handler_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Process is up", body = HealthResponse)),
    tag = "admin"
)]
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::HandlerRunNotFound(_)
        | StoreError::MutationNotFound(_)
        | StoreError::WorkflowNotFound(_)
        | StoreError::SessionNotFound(_)
        | StoreError::EventNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[utoipa::path(
    get,
    path = "/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow record", body = WorkflowRecord),
        (status = 404, description = "No such workflow")
    ),
    tag = "admin"
)]
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    let workflow = run_tx(&*state.store, |tx| Box::pin(async move { tx.get_workflow(id).await }))
        .await
        .map_err(|e| {
            tracing::error!(workflow_id = %id, error = %e, "failed to read workflow");
            store_error_status(&e)
        })?;
    Ok(Json(workflow))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session record", body = Session),
        (status = 404, description = "No such session")
    ),
    tag = "admin"
)]
async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Session>, StatusCode> {
    let session = run_tx(&*state.store, |tx| Box::pin(async move { tx.get_session(id).await }))
        .await
        .map_err(|e| {
            tracing::error!(session_id = %id, error = %e, "failed to read session");
            store_error_status(&e)
        })?;
    Ok(Json(session))
}

#[utoipa::path(
    get,
    path = "/handler-runs/{id}",
    params(("id" = Uuid, Path, description = "Handler run id")),
    responses(
        (status = 200, description = "Handler run record", body = HandlerRun),
        (status = 404, description = "No such handler run")
    ),
    tag = "admin"
)]
async fn get_handler_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<HandlerRun>, StatusCode> {
    let run = run_tx(&*state.store, |tx| Box::pin(async move { tx.get_handler_run(id).await }))
        .await
        .map_err(|e| {
            tracing::error!(run_id = %id, error = %e, "failed to read handler run");
            store_error_status(&e)
        })?;
    Ok(Json(run))
}
