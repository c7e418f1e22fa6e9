use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use jobserver_server::actor::ActorHandle;
use tokio::sync::oneshot;

use crate::dispatch::{RUN_JOB_PATH, STATUS_PATH, STOP_JOB_PATH};
use crate::driver::actor::DriverTaskEngine;
use crate::driver::event::DriverEvent;
use crate::model::{DriverResponse, DriverStatusResponse, JobPayload, StopJobRequest};

type EngineHandle = ActorHandle<DriverTaskEngine>;

/// The HTTP surface of a driver process.
pub fn driver_routes(handle: ActorHandle<DriverTaskEngine>) -> Router {
    Router::new()
        .route(RUN_JOB_PATH, post(run_job))
        .route(STOP_JOB_PATH, post(stop_job))
        .route(STATUS_PATH, get(status))
        .with_state(handle)
}

async fn ask<T>(
    handle: &EngineHandle,
    event: impl FnOnce(oneshot::Sender<T>) -> DriverEvent,
) -> Result<T, (StatusCode, String)> {
    let (tx, rx) = oneshot::channel();
    handle
        .send(event(tx))
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    rx.await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

async fn run_job(
    State(handle): State<EngineHandle>,
    Json(payload): Json<JobPayload>,
) -> Result<Json<DriverResponse>, (StatusCode, String)> {
    let response = ask(&handle, |result| DriverEvent::RunJob { payload, result }).await?;
    Ok(Json(response))
}

async fn stop_job(
    State(handle): State<EngineHandle>,
    Json(request): Json<StopJobRequest>,
) -> Result<Json<DriverResponse>, (StatusCode, String)> {
    let response = ask(&handle, |result| DriverEvent::StopJob {
        instance_code: request.instance_code,
        result,
    })
    .await?;
    Ok(Json(response))
}

async fn status(
    State(handle): State<EngineHandle>,
) -> Result<Json<DriverStatusResponse>, (StatusCode, String)> {
    let response = ask(&handle, |result| DriverEvent::Status { result }).await?;
    Ok(Json(response))
}
