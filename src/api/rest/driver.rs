use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::backend::RideBackend;
use crate::engine::history::{earnings_summary, EarningsSummary};
use crate::engine::session::FeeSettlement;
use crate::error::AppError;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::payout::{PayoutDetails, PayoutForm};
use crate::models::ride::Ride;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver/online", post(go_online))
        .route("/driver/offline", post(go_offline))
        .route("/driver/profile", get(profile))
        .route("/driver/payout", get(payout_details).put(save_payout_details))
        .route("/driver/fees/settle", post(settle_fees))
        .route("/history", get(history))
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub availability: DriverAvailability,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub summary: EarningsSummary,
    pub rides: Vec<Ride>,
}

async fn go_online(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let availability = state.session.go_online().await?;
    Ok(Json(AvailabilityResponse { availability }))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let availability = state.session.go_offline().await?;
    Ok(Json(AvailabilityResponse { availability }))
}

async fn profile(State(state): State<Arc<AppState>>) -> Result<Json<DriverProfile>, AppError> {
    Ok(Json(state.session.profile().await?))
}

async fn payout_details(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PayoutDetails>, AppError> {
    state
        .session
        .payout_details()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no payout details on file".to_string()))
}

async fn save_payout_details(
    State(state): State<Arc<AppState>>,
    Json(form): Json<PayoutForm>,
) -> Result<Json<PayoutDetails>, AppError> {
    Ok(Json(state.session.save_payout_details(form).await?))
}

async fn settle_fees(State(state): State<Arc<AppState>>) -> Result<Json<FeeSettlement>, AppError> {
    Ok(Json(state.session.settle_fees().await?))
}

async fn history(State(state): State<Arc<AppState>>) -> Result<Json<HistoryResponse>, AppError> {
    let driver_id = state.session.driver_id().await;
    let rides = state.backend.ride_history(driver_id).await?;

    Ok(Json(HistoryResponse {
        summary: earnings_summary(&rides),
        rides,
    }))
}
