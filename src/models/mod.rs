pub mod chat;
pub mod driver;
pub mod location;
pub mod payout;
pub mod ride;
pub mod scheduled;
pub mod tariff;
