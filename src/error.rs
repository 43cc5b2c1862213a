use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ride::{RideStatus, TransitionKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location is not valid json: {0}")]
    Unparseable(String),

    #[error("location is missing {0}")]
    MissingCoordinate(&'static str),

    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("ride {ride_id} is {actual:?}, expected {expected:?}")]
    Conflict {
        ride_id: Uuid,
        expected: RideStatus,
        actual: RideStatus,
    },

    #[error("{0} already claimed")]
    AlreadyClaimed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FareError {
    #[error("no tariffs configured")]
    NoTariffs,

    #[error("invalid route metrics: distance={distance_km} km, duration={duration_minutes} min")]
    InvalidRouteMetrics {
        distance_km: f64,
        duration_minutes: f64,
    },

    #[error("route unavailable: {0}")]
    RouteUnavailable(String),

    #[error("tariffs unavailable: {0}")]
    TariffsUnavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    #[error("message is empty")]
    Empty,

    #[error("message has {length} characters, limit is {max}")]
    TooLong { length: usize, max: usize },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayoutError {
    #[error("account holder name is required")]
    MissingHolderName,

    #[error("cpf must have 11 digits")]
    InvalidCpf,

    #[error("pix key is required")]
    MissingPixKey,

    #[error("card number must have 12 to 19 digits")]
    InvalidCardNumber,

    #[error("card expiry {0:?} is not MM/YY")]
    InvalidExpiry(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RideError {
    #[error("cannot {transition} a ride that is {status:?}")]
    IllegalTransition {
        transition: TransitionKind,
        status: RideStatus,
    },

    #[error("cannot complete: stop {current} of {total} not reached yet")]
    StopsRemaining { current: u32, total: u32 },

    #[error("no stop left to arrive at: index {current}, {total} stops")]
    NoStopsRemaining { current: u32, total: u32 },

    #[error("no active ride")]
    NoActiveRide,

    #[error("ride {0} is already active")]
    RideAlreadyActive(Uuid),

    #[error("a transition is already pending for ride {0}")]
    TransitionPending(Uuid),

    #[error("no offer for ride {0}")]
    NoSuchOffer(Uuid),

    #[error("no ride offer to accept")]
    NoOffer,

    #[error("ride {0} is no longer available")]
    NoLongerAvailable(Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transition for ride {0} was superseded")]
    Superseded(Uuid),

    #[error("no navigation target while ride is {0:?}")]
    NoTarget(RideStatus),

    #[error("navigation target unavailable: {0}")]
    TargetUnavailable(#[from] LocationError),

    #[error("driver cannot go online: {0}")]
    AvailabilityBlocked(String),

    #[error("invalid rating {0}, expected 1 to 5")]
    InvalidRating(u8),

    #[error("no ride awaiting rating")]
    NoRatingPending,

    #[error("backend returned an invalid ride: {0}")]
    InvalidSnapshot(String),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RideError {
    /// Caller bugs: the action should not have been offered in this state.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RideError::IllegalTransition { .. }
                | RideError::StopsRemaining { .. }
                | RideError::NoStopsRemaining { .. }
                | RideError::NoActiveRide
                | RideError::RideAlreadyActive(_)
                | RideError::TransitionPending(_)
                | RideError::NoSuchOffer(_)
                | RideError::NoOffer
                | RideError::NoTarget(_)
                | RideError::AvailabilityBlocked(_)
                | RideError::InvalidRating(_)
                | RideError::NoRatingPending
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RideError::NoLongerAvailable(_) | RideError::Conflict(_) | RideError::Superseded(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RideError> for AppError {
    fn from(err: RideError) -> Self {
        match &err {
            RideError::NoActiveRide | RideError::NoOffer | RideError::NoSuchOffer(_) => {
                AppError::NotFound(err.to_string())
            }
            RideError::InvalidRating(_) | RideError::Chat(_) => {
                AppError::BadRequest(err.to_string())
            }
            RideError::TargetUnavailable(_) | RideError::InvalidSnapshot(_) => {
                AppError::Unprocessable(err.to_string())
            }
            RideError::Backend(BackendError::Unavailable(_)) => {
                AppError::Unavailable(err.to_string())
            }
            RideError::Backend(BackendError::NotFound(_)) => AppError::NotFound(err.to_string()),
            RideError::Backend(_) => AppError::Internal(err.to_string()),
            _ => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<FareError> for AppError {
    fn from(err: FareError) -> Self {
        match &err {
            FareError::InvalidRouteMetrics { .. } => AppError::BadRequest(err.to_string()),
            FareError::NoTariffs
            | FareError::RouteUnavailable(_)
            | FareError::TariffsUnavailable(_) => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::NotFound(_) => AppError::NotFound(err.to_string()),
            BackendError::Conflict { .. } | BackendError::AlreadyClaimed(_) => {
                AppError::Conflict(err.to_string())
            }
            BackendError::Unavailable(_) => AppError::Unavailable(err.to_string()),
            BackendError::Rejected(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
