// Core attendance module - events, squads and member state.

pub mod attendance_models;
pub mod attendance_service;

pub use attendance_models::*;
pub use attendance_service::*;
