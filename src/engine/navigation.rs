use serde::Serialize;

use crate::error::RideError;
use crate::models::location::Place;
use crate::models::ride::{Ride, RideStatus};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "sequence", rename_all = "snake_case")]
pub enum TargetKind {
    Pickup,
    Stop(u32),
    Destination,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NavigationTarget {
    pub kind: TargetKind,
    pub place: Place,
}

impl NavigationTarget {
    /// Turn-by-turn link for an external maps app.
    pub fn directions_url(&self) -> String {
        format!(
            "https://www.google.com/maps/dir/?api=1&destination={},{}",
            self.place.point.lat, self.place.point.lng
        )
    }
}

/// Where the driver should head next. Never panics: rides with nothing to
/// drive to and unreadable coordinates both come back as errors.
pub fn next_target(ride: &Ride) -> Result<NavigationTarget, RideError> {
    match ride.status {
        RideStatus::AcceptedPickup => Ok(NavigationTarget {
            kind: TargetKind::Pickup,
            place: ride.origin.resolve()?,
        }),
        RideStatus::InProgress => match ride.stop_at(ride.current_stop_index) {
            Some(stop) => Ok(NavigationTarget {
                kind: TargetKind::Stop(stop.sequence),
                place: stop.location.resolve()?,
            }),
            None => Ok(NavigationTarget {
                kind: TargetKind::Destination,
                place: ride.destination.resolve()?,
            }),
        },
        status => Err(RideError::NoTarget(status)),
    }
}
