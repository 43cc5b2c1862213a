use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use tracing::info;
use uuid::Uuid;

use crate::backend::RideBackend;
use crate::error::AppError;
use crate::models::scheduled::ScheduledRide;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduled", get(list_open))
        .route("/scheduled/:id/claim", post(claim))
}

async fn list_open(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScheduledRide>>, AppError> {
    Ok(Json(state.backend.open_scheduled_rides().await?))
}

async fn claim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledRide>, AppError> {
    let driver_id = state.session.driver_id().await;
    let claimed = state.backend.claim_scheduled_ride(id, driver_id).await?;

    info!(scheduled_id = %id, "claimed scheduled ride");
    Ok(Json(claimed))
}
