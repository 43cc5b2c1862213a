use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverAvailability {
    Offline,
    Online,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub full_name: String,
    pub vehicle_model: Option<String>,
    pub license_plate: Option<String>,
    pub balance: f64,
    pub fees_owed: f64,
    pub average_rating: Option<f64>,
}

impl DriverProfile {
    pub fn has_vehicle(&self) -> bool {
        self.vehicle_model
            .as_deref()
            .is_some_and(|model| !model.trim().is_empty())
    }
}
