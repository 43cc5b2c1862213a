use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::navigation::{NavigationTarget, TargetKind};
use crate::engine::session::SessionSnapshot;
use crate::error::AppError;
use crate::models::chat::ChatMessage;
use crate::models::location::Place;
use crate::models::ride::Ride;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ride", get(current_ride))
        .route("/ride/accept", post(accept))
        .route("/ride/decline", post(decline))
        .route("/ride/start", post(start))
        .route("/ride/arrive", post(arrive))
        .route("/ride/complete", post(complete))
        .route("/ride/cancel", post(cancel))
        .route("/ride/target", get(target))
        .route("/ride/rating", post(rating))
        .route("/ride/chat", get(chat_history).post(send_message))
}

#[derive(Deserialize)]
pub struct OfferRequest {
    pub ride_id: Uuid,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub content: String,
}

/// `stars: null` skips rating.
#[derive(Deserialize)]
pub struct RatingRequest {
    pub stars: Option<u8>,
}

#[derive(Serialize)]
pub struct TargetResponse {
    #[serde(flatten)]
    pub kind: TargetKind,
    pub place: Place,
    pub directions_url: String,
}

impl From<NavigationTarget> for TargetResponse {
    fn from(target: NavigationTarget) -> Self {
        Self {
            directions_url: target.directions_url(),
            kind: target.kind,
            place: target.place,
        }
    }
}

async fn current_ride(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OfferRequest>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.session.accept(payload.ride_id).await?))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OfferRequest>,
) -> Result<StatusCode, AppError> {
    state.session.decline(payload.ride_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start(State(state): State<Arc<AppState>>) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.session.start().await?))
}

async fn arrive(State(state): State<Arc<AppState>>) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.session.arrive_at_stop().await?))
}

async fn complete(State(state): State<Arc<AppState>>) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.session.complete().await?))
}

async fn cancel(State(state): State<Arc<AppState>>) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.session.cancel().await?))
}

async fn target(State(state): State<Arc<AppState>>) -> Result<Json<TargetResponse>, AppError> {
    let target = state.session.next_target().await?;
    Ok(Json(target.into()))
}

async fn rating(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RatingRequest>,
) -> Result<StatusCode, AppError> {
    match payload.stars {
        Some(stars) => {
            state.session.submit_rating(stars).await?;
        }
        None => state.session.skip_rating().await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    Ok(Json(state.session.chat_history().await?))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let message = state.session.send_message(&payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
