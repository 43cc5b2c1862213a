//! Interfaces to everything outside the driver's device: the hosted data
//! store with its change feeds, routing, tariffs and the wall clock.

pub mod clock;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use uuid::Uuid;

use crate::engine::lifecycle::TransitionRequest;
use crate::error::{BackendError, FareError};
use crate::models::chat::ChatMessage;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::location::GeoPoint;
use crate::models::payout::PayoutDetails;
use crate::models::ride::Ride;
use crate::models::scheduled::ScheduledRide;
use crate::models::tariff::Tariff;

pub use clock::{Clock, FixedClock, SystemClock};

pub type RideStream = Pin<Box<dyn Stream<Item = Ride> + Send>>;

pub type ChatStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    pub vehicle_type: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, ride: &Ride) -> bool {
        self.vehicle_type
            .as_deref()
            .is_none_or(|vehicle_type| vehicle_type == ride.vehicle_type)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteMetrics {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

#[async_trait]
pub trait RideBackend: Send + Sync {
    /// Conditional write: commits only while the stored status still equals
    /// `request.expected_status`, otherwise reports a conflict.
    async fn submit_transition(&self, request: &TransitionRequest) -> Result<Ride, BackendError>;

    /// Current stored state of a ride.
    async fn fetch_ride(&self, ride_id: Uuid) -> Result<Ride, BackendError>;

    /// Live snapshots of one ride. When the feed falls behind it yields the
    /// latest stored snapshot instead of silently skipping.
    async fn subscribe_to_ride_changes(&self, ride_id: Uuid) -> Result<RideStream, BackendError>;

    async fn subscribe_to_new_ride_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<RideStream, BackendError>;

    async fn update_availability(
        &self,
        driver_id: Uuid,
        availability: DriverAvailability,
    ) -> Result<(), BackendError>;

    async fn fetch_driver_profile(&self, driver_id: Uuid) -> Result<DriverProfile, BackendError>;

    async fn submit_rating(&self, ride_id: Uuid, stars: u8) -> Result<(), BackendError>;

    async fn ride_history(&self, driver_id: Uuid) -> Result<Vec<Ride>, BackendError>;

    async fn open_scheduled_rides(&self) -> Result<Vec<ScheduledRide>, BackendError>;

    /// Conditional write guarded by "no driver assigned yet".
    async fn claim_scheduled_ride(
        &self,
        scheduled_id: Uuid,
        driver_id: Uuid,
    ) -> Result<ScheduledRide, BackendError>;

    async fn send_message(&self, message: &ChatMessage) -> Result<ChatMessage, BackendError>;

    /// Oldest first.
    async fn ride_messages(&self, ride_id: Uuid) -> Result<Vec<ChatMessage>, BackendError>;

    async fn subscribe_to_chat(&self, ride_id: Uuid) -> Result<ChatStream, BackendError>;

    /// Upsert keyed by driver.
    async fn save_payout_details(&self, details: &PayoutDetails) -> Result<(), BackendError>;

    async fn fetch_payout_details(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<PayoutDetails>, BackendError>;

    /// Clears outstanding platform fees and returns the updated profile.
    async fn settle_fees(&self, driver_id: Uuid) -> Result<DriverProfile, BackendError>;
}

#[async_trait]
pub trait TariffSource: Send + Sync {
    async fn load_tariffs(&self) -> Result<Vec<Tariff>, BackendError>;
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn compute_route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
        stops: &[GeoPoint],
    ) -> Result<RouteMetrics, FareError>;
}
