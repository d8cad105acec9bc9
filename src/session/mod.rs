// src/session/mod.rs
mod controller;
mod events;

pub use controller::AttendanceController;
pub use events::SessionNotification;
