use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Wall-clock time in the zone tariffs are written for.
    fn now_local(&self) -> NaiveTime;
}

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(utc_offset_minutes * 60).map(|offset| Self { offset })
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> NaiveTime {
        Utc::now().with_timezone(&self.offset).time()
    }
}

/// Always reports the same instant.
pub struct FixedClock {
    pub utc: DateTime<Utc>,
    pub local: NaiveTime,
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.utc
    }

    fn now_local(&self) -> NaiveTime {
        self.local
    }
}
