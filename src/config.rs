use std::env;
use std::time::Duration;

use uuid::Uuid;

use crate::engine::availability::AvailabilityPolicy;
use crate::engine::session::SessionSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub driver_id: Uuid,
    /// Offset of the zone tariff windows are written in.
    pub utc_offset_minutes: i32,
    pub offer_timeout_secs: u64,
    pub average_speed_kmh: f64,
    pub max_fees_owed: Option<f64>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            driver_id: parse_or_default("DRIVER_ID", Uuid::new_v4())?,
            utc_offset_minutes: parse_or_default("UTC_OFFSET_MINUTES", -180)?,
            offer_timeout_secs: parse_or_default("OFFER_TIMEOUT_SECS", 30)?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", 30.0)?,
            max_fees_owed: parse_optional("MAX_FEES_OWED")?,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            offer_timeout: Duration::from_secs(self.offer_timeout_secs),
            policy: AvailabilityPolicy {
                max_fees_owed: self.max_fees_owed,
            },
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
