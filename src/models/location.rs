use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LocationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn checked(lat: f64, lng: f64) -> Result<Self, LocationError> {
        let in_range = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);

        if in_range {
            Ok(Self { lat, lng })
        } else {
            Err(LocationError::OutOfRange { lat, lng })
        }
    }
}

/// A resolved point with its human-readable label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub point: GeoPoint,
    #[serde(default)]
    pub address: String,
}

/// A location as the backend stores it: a JSON text column
/// (`{"lat":..,"lng":..,"address":..}`) plus optional explicit coordinate
/// columns. Nothing is validated until [`StoredLocation::resolve`] runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub json: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Deserialize)]
struct RawPlace {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
    #[serde(default)]
    address: Option<String>,
}

impl StoredLocation {
    pub fn from_place(place: &Place) -> Self {
        let json = json!({
            "lat": place.point.lat,
            "lng": place.point.lng,
            "address": place.address,
        });

        Self {
            json: json.to_string(),
            latitude: Some(place.point.lat),
            longitude: Some(place.point.lng),
        }
    }

    /// Only the JSON column, as stops are stored.
    pub fn from_json(json: impl Into<String>) -> Self {
        Self {
            json: json.into(),
            latitude: None,
            longitude: None,
        }
    }

    pub fn resolve(&self) -> Result<Place, LocationError> {
        let parsed = serde_json::from_str::<RawPlace>(&self.json);

        // Explicit columns win; the JSON column then only contributes the label.
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            let point = GeoPoint::checked(lat, lng)?;
            let address = parsed.ok().and_then(|raw| raw.address).unwrap_or_default();
            return Ok(Place { point, address });
        }

        let raw = parsed.map_err(|err| LocationError::Unparseable(err.to_string()))?;
        let lat = raw.lat.ok_or(LocationError::MissingCoordinate("lat"))?;
        let lng = raw.lng.ok_or(LocationError::MissingCoordinate("lng"))?;

        Ok(Place {
            point: GeoPoint::checked(lat, lng)?,
            address: raw.address.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{GeoPoint, Place, StoredLocation};
    use crate::error::LocationError;

    #[test]
    fn resolves_json_column() {
        let stored = StoredLocation::from_json(r#"{"lat":-23.55,"lng":-46.63,"address":"Av. Paulista"}"#);
        let place = stored.resolve().unwrap();

        assert_eq!(place.point, GeoPoint { lat: -23.55, lng: -46.63 });
        assert_eq!(place.address, "Av. Paulista");
    }

    #[test]
    fn explicit_columns_take_precedence() {
        let stored = StoredLocation {
            json: r#"{"lat":1.0,"lng":1.0,"address":"Old label"}"#.to_string(),
            latitude: Some(-22.9),
            longitude: Some(-43.2),
        };
        let place = stored.resolve().unwrap();

        assert_eq!(place.point, GeoPoint { lat: -22.9, lng: -43.2 });
        assert_eq!(place.address, "Old label");
    }

    #[test]
    fn explicit_columns_survive_garbage_json() {
        let stored = StoredLocation {
            json: "not json".to_string(),
            latitude: Some(10.0),
            longitude: Some(20.0),
        };

        assert_eq!(stored.resolve().unwrap().address, "");
    }

    #[test]
    fn garbage_json_without_columns_is_unparseable() {
        let stored = StoredLocation::from_json("{lat: oops");

        assert!(matches!(stored.resolve(), Err(LocationError::Unparseable(_))));
    }

    #[test]
    fn missing_longitude_is_reported() {
        let stored = StoredLocation::from_json(r#"{"lat":10.0}"#);

        assert_eq!(stored.resolve(), Err(LocationError::MissingCoordinate("lng")));
    }

    #[test]
    fn out_of_range_and_non_finite_coordinates_are_rejected() {
        let stored = StoredLocation::from_json(r#"{"lat":91.0,"lng":0.0}"#);
        assert!(matches!(stored.resolve(), Err(LocationError::OutOfRange { .. })));

        let stored = StoredLocation {
            json: String::new(),
            latitude: Some(f64::NAN),
            longitude: Some(0.0),
        };
        assert!(matches!(stored.resolve(), Err(LocationError::OutOfRange { .. })));
    }

    #[test]
    fn from_place_resolves_back_to_the_same_place() {
        let place = Place {
            point: GeoPoint { lat: 48.8566, lng: 2.3522 },
            address: "Paris".to_string(),
        };

        assert_eq!(StoredLocation::from_place(&place).resolve().unwrap(), place);
    }
}
