use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::{
    feeds::{self, FeedHub},
    sensor::{CommandError, SensorBoard, SensorOutput},
};

/// Sensor read and reset endpoints.
///
/// - `GET /sensors`: latest output of every sensor
/// - `GET /sensors/:key`: one sensor
/// - `POST /sensors/:key/reset`: manual reset, same effect as a boundary
pub fn sensor_router(board: SensorBoard) -> Router {
    Router::new()
        .route("/sensors", get(list_sensors))
        .route("/sensors/:key", get(get_sensor))
        .route("/sensors/:key/reset", post(reset_sensor))
        .with_state(board)
}

/// Full HTTP surface: feed ingestion plus sensor endpoints.
pub fn router(hub: Arc<FeedHub>, board: SensorBoard, auth_bearer_token: Option<String>) -> Router {
    feeds::http::router(hub, auth_bearer_token).merge(sensor_router(board))
}

async fn list_sensors(State(board): State<SensorBoard>) -> Json<Vec<SensorOutput>> {
    Json(board.outputs())
}

async fn get_sensor(
    State(board): State<SensorBoard>,
    Path(key): Path<String>,
) -> Result<Json<SensorOutput>, StatusCode> {
    board.get(&key).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn reset_sensor(
    State(board): State<SensorBoard>,
    Path(key): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    match board.reset(&key).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            let status = match e {
                CommandError::UnknownSensor(_) => StatusCode::NOT_FOUND,
                CommandError::NotResettable(_) => StatusCode::CONFLICT,
                CommandError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            Err((status, e.to_string()))
        }
    }
}
