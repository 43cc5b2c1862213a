use serde::Serialize;

use crate::models::ride::{Ride, RideStatus};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EarningsSummary {
    pub completed: usize,
    pub cancelled: usize,
    pub total_earnings: f64,
}

/// Rides whose settlement has not landed yet count at their estimate.
pub fn earnings_summary(rides: &[Ride]) -> EarningsSummary {
    rides
        .iter()
        .fold(EarningsSummary::default(), |mut summary, ride| {
            match ride.status {
                RideStatus::Completed => {
                    summary.completed += 1;
                    summary.total_earnings += ride.final_price.unwrap_or(ride.estimated_price);
                }
                RideStatus::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            summary
        })
}
