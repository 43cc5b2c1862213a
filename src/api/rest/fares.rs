use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::backend::TariffSource;
use crate::engine::fare::{self, FareEstimate};
use crate::error::{AppError, FareError};
use crate::models::location::{GeoPoint, Place};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fares/estimate", post(estimate))
        .route("/fares/quote", post(quote))
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub origin: Place,
    pub destination: Place,
    #[serde(default)]
    pub stops: Vec<Place>,
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<FareEstimate>, AppError> {
    let result = match state.backend.load_tariffs().await {
        Ok(tariffs) => fare::estimate(
            payload.distance_km,
            payload.duration_minutes,
            &tariffs,
            state.clock.now_local(),
        ),
        Err(err) => Err(FareError::TariffsUnavailable(err.to_string())),
    };

    record(&state, result).map(Json)
}

async fn quote(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<FareEstimate>, AppError> {
    check_places(&payload.origin, &payload.destination, &payload.stops)?;

    let result = fare::quote(
        state.router.as_ref(),
        state.backend.as_ref(),
        state.clock.as_ref(),
        &payload.origin,
        &payload.destination,
        &payload.stops,
    )
    .await;

    record(&state, result).map(Json)
}

pub(super) fn check_places(origin: &Place, destination: &Place, stops: &[Place]) -> Result<(), AppError> {
    for place in std::iter::once(origin)
        .chain(std::iter::once(destination))
        .chain(stops.iter())
    {
        GeoPoint::checked(place.point.lat, place.point.lng)
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
    }
    Ok(())
}

pub(super) fn record(state: &AppState, result: Result<FareEstimate, FareError>) -> Result<FareEstimate, AppError> {
    match result {
        Ok(estimate) => {
            state.metrics.record_estimate("ok");
            Ok(estimate)
        }
        Err(err) => {
            state.metrics.record_estimate("error");
            Err(err.into())
        }
    }
}
