pub mod availability;
pub mod fare;
pub mod history;
pub mod lifecycle;
pub mod navigation;
pub mod session;
