use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A pricing rule active during a local time-of-day window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tariff {
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub minimum_fare: f64,
    pub per_kilometer: f64,
    pub per_minute: f64,
}

impl Tariff {
    /// Window is `[start, end)`; `start > end` wraps past midnight.
    pub fn is_active_at(&self, now: NaiveTime) -> bool {
        if self.start_time > self.end_time {
            now >= self.start_time || now < self.end_time
        } else {
            now >= self.start_time && now < self.end_time
        }
    }
}
