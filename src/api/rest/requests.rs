use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::fare;
use crate::error::AppError;
use crate::models::location::Place;
use crate::models::ride::Ride;
use crate::state::AppState;

use super::fares::{check_places, record};

/// Rider-side entry point: prices a trip and publishes it as a new request.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/requests", post(create_request))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub rider_id: Uuid,
    pub origin: Place,
    pub destination: Place,
    #[serde(default)]
    pub stops: Vec<Place>,
    pub vehicle_type: String,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    check_places(&payload.origin, &payload.destination, &payload.stops)?;

    let quoted = fare::quote(
        state.router.as_ref(),
        state.backend.as_ref(),
        state.clock.as_ref(),
        &payload.origin,
        &payload.destination,
        &payload.stops,
    )
    .await;
    let estimate = record(&state, quoted)?;

    let ride = Ride::new_request(
        payload.rider_id,
        &payload.origin,
        &payload.destination,
        &payload.stops,
        estimate.price,
        payload.vehicle_type,
    );
    state.backend.create_request(ride.clone());

    info!(
        ride_id = %ride.id,
        rider_id = %ride.rider_id,
        price = ride.estimated_price,
        tariff = %estimate.applied_tariff.name,
        "ride requested"
    );
    Ok((StatusCode::CREATED, Json(ride)))
}
