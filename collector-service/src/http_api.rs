use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use consumption_core::{Fluid, NormalizedReading};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::sinks::SensorBoard;

#[derive(Clone)]
struct ApiState {
    board: SensorBoard,
    fetch_tx: mpsc::Sender<()>,
}

/// Read side for the sensor layer plus the manual fetch trigger.
pub fn router(board: SensorBoard, fetch_tx: mpsc::Sender<()>) -> Router {
    Router::new()
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/:fluid", get(get_sensor))
        .route("/api/fetch", post(request_fetch))
        .with_state(ApiState { board, fetch_tx })
}

/// Binds `bind_addr` and serves the API in the background.
pub async fn spawn(
    bind_addr: &str,
    board: SensorBoard,
    fetch_tx: mpsc::Sender<()>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid api bind address '{bind_addr}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind api listener on {addr}"))?;

    let app = router(board, fetch_tx);
    tracing::info!(%addr, "sensor API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!(error = %e, "sensor API server error");
        }
    });

    Ok(())
}

async fn list_sensors(State(state): State<ApiState>) -> Json<Vec<NormalizedReading>> {
    Json(state.board.all().await)
}

async fn get_sensor(
    State(state): State<ApiState>,
    Path(fluid): Path<String>,
) -> Result<Json<NormalizedReading>, StatusCode> {
    let fluid: Fluid = fluid.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    state
        .board
        .get(fluid)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn request_fetch(State(state): State<ApiState>) -> StatusCode {
    match state.fetch_tx.try_send(()) {
        Ok(()) => {
            tracing::info!("manual fetch requested");
            metrics::counter!("manual_fetch_requests_total").increment(1);
            StatusCode::ACCEPTED
        }
        // A manual poll is already queued.
        Err(TrySendError::Full(())) => StatusCode::ACCEPTED,
        Err(TrySendError::Closed(())) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
