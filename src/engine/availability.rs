use serde::{Deserialize, Serialize};

use crate::error::RideError;
use crate::models::driver::DriverProfile;

/// Conditions a driver must meet before going online.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityPolicy {
    /// Outstanding platform fees above this block going online. `None`
    /// disables fee blocking.
    pub max_fees_owed: Option<f64>,
}

impl AvailabilityPolicy {
    pub fn check_online(&self, profile: &DriverProfile) -> Result<(), RideError> {
        if !profile.has_vehicle() {
            return Err(RideError::AvailabilityBlocked(
                "vehicle details are missing".to_string(),
            ));
        }

        if let Some(limit) = self.max_fees_owed {
            if profile.fees_owed > limit {
                return Err(RideError::AvailabilityBlocked(format!(
                    "outstanding fees {:.2} exceed {:.2}",
                    profile.fees_owed, limit
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::AvailabilityPolicy;
    use crate::error::RideError;
    use crate::models::driver::DriverProfile;

    fn profile(vehicle: Option<&str>, fees_owed: f64) -> DriverProfile {
        DriverProfile {
            id: Uuid::new_v4(),
            full_name: "Bruno Lima".to_string(),
            vehicle_model: vehicle.map(str::to_string),
            license_plate: Some("ABC1D23".to_string()),
            balance: 120.0,
            fees_owed,
            average_rating: Some(4.9),
        }
    }

    #[test]
    fn blank_vehicle_counts_as_missing() {
        let policy = AvailabilityPolicy::default();

        assert!(matches!(
            policy.check_online(&profile(Some("  "), 0.0)),
            Err(RideError::AvailabilityBlocked(_))
        ));
        assert!(policy.check_online(&profile(Some("HB20"), 0.0)).is_ok());
    }

    #[test]
    fn fee_blocking_is_opt_in() {
        let lenient = AvailabilityPolicy::default();
        let strict = AvailabilityPolicy {
            max_fees_owed: Some(100.0),
        };
        let indebted = profile(Some("HB20"), 150.0);

        assert!(lenient.check_online(&indebted).is_ok());
        assert!(strict.check_online(&indebted).is_err());
        assert!(strict.check_online(&profile(Some("HB20"), 100.0)).is_ok());
    }
}
