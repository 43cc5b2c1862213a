use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::{Place, StoredLocation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    AcceptedPickup,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Position along the lifecycle; terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            RideStatus::Requested => 0,
            RideStatus::AcceptedPickup => 1,
            RideStatus::InProgress => 2,
            RideStatus::Completed | RideStatus::Cancelled => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Accept,
    Start,
    ArriveAtStop,
    Complete,
    Cancel,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Accept => "accept",
            TransitionKind::Start => "start",
            TransitionKind::ArriveAtStop => "arrive_at_stop",
            TransitionKind::Complete => "complete",
            TransitionKind::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideStop {
    /// 1-based visiting order.
    pub sequence: u32,
    pub location: StoredLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub origin: StoredLocation,
    pub destination: StoredLocation,
    pub stops: Vec<RideStop>,
    pub current_stop_index: u32,
    pub estimated_price: f64,
    pub final_price: Option<f64>,
    pub vehicle_type: String,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field updates carried by a transition write.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RideChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RideStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stop_index: Option<u32>,
}

impl RideChanges {
    pub fn apply_to(&self, ride: &mut Ride) {
        if let Some(status) = self.status {
            ride.status = status;
        }
        if let Some(driver_id) = self.driver_id {
            ride.driver_id = Some(driver_id);
        }
        if let Some(index) = self.current_stop_index {
            ride.current_stop_index = index;
        }
    }
}

impl Ride {
    /// A fresh rider request. Stops are numbered in the order given.
    pub fn new_request(
        rider_id: Uuid,
        origin: &Place,
        destination: &Place,
        stops: &[Place],
        estimated_price: f64,
        vehicle_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            status: RideStatus::Requested,
            origin: StoredLocation::from_place(origin),
            destination: StoredLocation::from_place(destination),
            stops: stops
                .iter()
                .zip(1..)
                .map(|(place, sequence)| RideStop {
                    sequence,
                    location: StoredLocation::from_json(StoredLocation::from_place(place).json),
                })
                .collect(),
            current_stop_index: 0,
            estimated_price,
            final_price: None,
            vehicle_type: vehicle_type.into(),
            rating: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.len() as u32
    }

    pub fn stop_at(&self, sequence: u32) -> Option<&RideStop> {
        self.stops.iter().find(|stop| stop.sequence == sequence)
    }

    pub fn all_stops_visited(&self) -> bool {
        self.current_stop_index > self.stop_count()
    }

    /// True when `self` would move the ride backwards relative to `current`.
    pub fn is_behind(&self, current: &Ride) -> bool {
        self.status.rank() < current.status.rank()
            || self.current_stop_index < current.current_stop_index
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        let completed = self.status == RideStatus::Completed;
        if completed != self.final_price.is_some() {
            return Err(format!(
                "ride {} is {:?} but final_price is {:?}",
                self.id, self.status, self.final_price
            ));
        }

        let requested = self.status == RideStatus::Requested;
        if requested == self.driver_id.is_some() {
            return Err(format!(
                "ride {} is {:?} but driver_id is {:?}",
                self.id, self.status, self.driver_id
            ));
        }

        Ok(())
    }
}
