use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Clock, RouteProvider, TariffSource};
use crate::error::FareError;
use crate::models::location::Place;
use crate::models::tariff::Tariff;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FareEstimate {
    pub price: f64,
    pub applied_tariff: Tariff,
    pub distance_km: f64,
    pub duration_minutes: f64,
}

/// First tariff whose window contains `now`, else the first configured one.
pub fn select_tariff(tariffs: &[Tariff], now: NaiveTime) -> Result<&Tariff, FareError> {
    let fallback = tariffs.first().ok_or(FareError::NoTariffs)?;

    Ok(tariffs
        .iter()
        .find(|tariff| tariff.is_active_at(now))
        .unwrap_or(fallback))
}

pub fn estimate(
    distance_km: f64,
    duration_minutes: f64,
    tariffs: &[Tariff],
    now: NaiveTime,
) -> Result<FareEstimate, FareError> {
    let valid = |value: f64| value.is_finite() && value >= 0.0;
    if !valid(distance_km) || !valid(duration_minutes) {
        return Err(FareError::InvalidRouteMetrics {
            distance_km,
            duration_minutes,
        });
    }

    let tariff = select_tariff(tariffs, now)?;
    let raw = distance_km * tariff.per_kilometer + duration_minutes * tariff.per_minute;

    Ok(FareEstimate {
        price: raw.max(tariff.minimum_fare),
        applied_tariff: tariff.clone(),
        distance_km,
        duration_minutes,
    })
}

/// Prices a trip end to end: route, tariffs and clock are all looked up
/// fresh, and any of them failing fails the quote.
pub async fn quote(
    router: &dyn RouteProvider,
    tariffs: &dyn TariffSource,
    clock: &dyn Clock,
    origin: &Place,
    destination: &Place,
    stops: &[Place],
) -> Result<FareEstimate, FareError> {
    let stop_points: Vec<_> = stops.iter().map(|stop| stop.point).collect();

    let route = router
        .compute_route(&origin.point, &destination.point, &stop_points)
        .await
        .inspect_err(|err| warn!(error = %err, "route lookup failed"))?;

    let tariffs = tariffs
        .load_tariffs()
        .await
        .map_err(|err| FareError::TariffsUnavailable(err.to_string()))?;

    let now = clock.now_local();
    let fare = estimate(route.distance_km, route.duration_minutes, &tariffs, now)?;

    debug!(
        tariff = %fare.applied_tariff.name,
        distance_km = fare.distance_km,
        price = fare.price,
        "fare quoted"
    );

    Ok(fare)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{NaiveTime, Utc};

    use super::{estimate, quote, select_tariff};
    use crate::backend::{FixedClock, RouteMetrics, RouteProvider, TariffSource};
    use crate::error::{BackendError, FareError};
    use crate::models::location::{GeoPoint, Place};
    use crate::models::tariff::Tariff;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn tariff(name: &str, start: NaiveTime, end: NaiveTime, min: f64) -> Tariff {
        Tariff {
            name: name.to_string(),
            start_time: start,
            end_time: end,
            minimum_fare: min,
            per_kilometer: 2.0,
            per_minute: 0.5,
        }
    }

    fn day_and_night() -> Vec<Tariff> {
        vec![
            tariff("night", at(22, 0), at(5, 0), 20.0),
            tariff("day", at(5, 0), at(22, 0), 15.0),
        ]
    }

    #[test]
    fn overnight_tariff_selected_late_evening() {
        let tariffs = day_and_night();

        assert_eq!(select_tariff(&tariffs, at(23, 30)).unwrap().name, "night");
        assert_eq!(select_tariff(&tariffs, at(12, 0)).unwrap().name, "day");
    }

    #[test]
    fn first_match_wins_on_overlap() {
        let tariffs = vec![
            tariff("rush", at(7, 0), at(9, 0), 25.0),
            tariff("all-day", at(0, 0), at(23, 59), 10.0),
        ];

        assert_eq!(select_tariff(&tariffs, at(8, 0)).unwrap().name, "rush");
        assert_eq!(select_tariff(&tariffs, at(10, 0)).unwrap().name, "all-day");
    }

    #[test]
    fn falls_back_to_first_tariff_when_nothing_matches() {
        let tariffs = vec![
            tariff("morning", at(6, 0), at(10, 0), 12.0),
            tariff("evening", at(17, 0), at(20, 0), 14.0),
        ];

        assert_eq!(select_tariff(&tariffs, at(13, 0)).unwrap().name, "morning");
    }

    #[test]
    fn empty_tariff_set_is_an_error() {
        assert_eq!(select_tariff(&[], at(12, 0)), Err(FareError::NoTariffs));
        assert_eq!(estimate(1.0, 1.0, &[], at(12, 0)), Err(FareError::NoTariffs));
    }

    #[test]
    fn raw_price_used_when_above_minimum() {
        let tariffs = vec![tariff("flat", at(0, 0), at(0, 0), 15.0)];

        let fare = estimate(10.0, 20.0, &tariffs, at(12, 0)).unwrap();

        assert!((fare.price - 30.0).abs() < 1e-9);
    }

    #[test]
    fn minimum_fare_applies_to_short_trips() {
        let tariffs = day_and_night();

        let fare = estimate(1.0, 2.0, &tariffs, at(23, 0)).unwrap();

        assert_eq!(fare.applied_tariff.name, "night");
        assert_eq!(fare.price, 20.0);
    }

    #[test]
    fn price_never_below_applied_minimum() {
        let tariffs = day_and_night();

        for hour in 0..24 {
            for (km, min) in [(0.0, 0.0), (0.5, 1.0), (3.0, 9.0), (40.0, 55.0)] {
                let fare = estimate(km, min, &tariffs, at(hour, 15)).unwrap();
                assert!(fare.price >= fare.applied_tariff.minimum_fare);
            }
        }
    }

    #[test]
    fn identical_inputs_give_identical_estimates() {
        let tariffs = day_and_night();

        let first = estimate(7.3, 18.2, &tariffs, at(21, 59)).unwrap();
        let second = estimate(7.3, 18.2, &tariffs, at(21, 59)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn negative_or_nan_metrics_are_rejected() {
        let tariffs = day_and_night();

        assert!(matches!(
            estimate(-1.0, 5.0, &tariffs, at(12, 0)),
            Err(FareError::InvalidRouteMetrics { .. })
        ));
        assert!(matches!(
            estimate(1.0, f64::NAN, &tariffs, at(12, 0)),
            Err(FareError::InvalidRouteMetrics { .. })
        ));
    }

    struct FixedRouter(Result<RouteMetrics, FareError>);

    #[async_trait]
    impl RouteProvider for FixedRouter {
        async fn compute_route(
            &self,
            _origin: &GeoPoint,
            _destination: &GeoPoint,
            _stops: &[GeoPoint],
        ) -> Result<RouteMetrics, FareError> {
            self.0.clone()
        }
    }

    struct FixedTariffs(Result<Vec<Tariff>, BackendError>);

    #[async_trait]
    impl TariffSource for FixedTariffs {
        async fn load_tariffs(&self) -> Result<Vec<Tariff>, BackendError> {
            self.0.clone()
        }
    }

    fn place(lat: f64, lng: f64) -> Place {
        Place {
            point: GeoPoint { lat, lng },
            address: String::new(),
        }
    }

    fn clock(local: NaiveTime) -> FixedClock {
        FixedClock {
            utc: Utc::now(),
            local,
        }
    }

    #[tokio::test]
    async fn quote_combines_route_tariffs_and_clock() {
        let router = FixedRouter(Ok(RouteMetrics {
            distance_km: 10.0,
            duration_minutes: 20.0,
        }));
        let tariffs = FixedTariffs(Ok(day_and_night()));

        let fare = quote(
            &router,
            &tariffs,
            &clock(at(12, 0)),
            &place(0.0, 0.0),
            &place(0.1, 0.1),
            &[],
        )
        .await
        .unwrap();

        assert_eq!(fare.applied_tariff.name, "day");
        assert!((fare.price - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quote_surfaces_route_failure() {
        let router = FixedRouter(Err(FareError::RouteUnavailable("no route".to_string())));
        let tariffs = FixedTariffs(Ok(day_and_night()));

        let result = quote(
            &router,
            &tariffs,
            &clock(at(12, 0)),
            &place(0.0, 0.0),
            &place(0.1, 0.1),
            &[],
        )
        .await;

        assert_eq!(
            result,
            Err(FareError::RouteUnavailable("no route".to_string()))
        );
    }

    #[tokio::test]
    async fn quote_surfaces_tariff_source_failure() {
        let router = FixedRouter(Ok(RouteMetrics {
            distance_km: 1.0,
            duration_minutes: 1.0,
        }));
        let tariffs = FixedTariffs(Err(BackendError::Unavailable("offline".to_string())));

        let result = quote(
            &router,
            &tariffs,
            &clock(at(12, 0)),
            &place(0.0, 0.0),
            &place(0.1, 0.1),
            &[],
        )
        .await;

        assert!(matches!(result, Err(FareError::TariffsUnavailable(_))));
    }
}
