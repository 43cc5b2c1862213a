use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::StoredLocation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledRideStatus {
    Scheduled,
    Accepted,
}

/// A ride booked ahead of time, open until a driver claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRide {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub origin: StoredLocation,
    pub destination: StoredLocation,
    pub vehicle_type: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduledRideStatus,
    pub driver_id: Option<Uuid>,
}
