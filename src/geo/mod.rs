use async_trait::async_trait;

use crate::backend::{RouteMetrics, RouteProvider};
use crate::error::FareError;
use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Length of origin → stops → destination, leg by leg.
pub fn path_km(origin: &GeoPoint, destination: &GeoPoint, stops: &[GeoPoint]) -> f64 {
    let waypoints: Vec<&GeoPoint> = std::iter::once(origin)
        .chain(stops.iter())
        .chain(std::iter::once(destination))
        .collect();

    waypoints
        .windows(2)
        .map(|leg| haversine_km(leg[0], leg[1]))
        .sum()
}

/// Routing fallback that assumes straight legs at a constant speed.
pub struct StraightLineRouter {
    average_speed_kmh: f64,
}

impl StraightLineRouter {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self { average_speed_kmh }
    }
}

#[async_trait]
impl RouteProvider for StraightLineRouter {
    async fn compute_route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
        stops: &[GeoPoint],
    ) -> Result<RouteMetrics, FareError> {
        if !(self.average_speed_kmh.is_finite() && self.average_speed_kmh > 0.0) {
            return Err(FareError::RouteUnavailable(format!(
                "average speed must be positive, got {}",
                self.average_speed_kmh
            )));
        }

        let distance_km = path_km(origin, destination, stops);

        Ok(RouteMetrics {
            distance_km,
            duration_minutes: distance_km / self.average_speed_kmh * 60.0,
        })
    }
}
