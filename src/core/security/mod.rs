// Core security module - anti-raid and anti-spam business logic plus the
// mitigation actions both detectors trigger.

pub mod mitigation_service;
pub mod raid_detector;
pub mod rate_window;
pub mod security_models;
pub mod spam_detector;

pub use mitigation_service::*;
pub use raid_detector::*;
pub use rate_window::*;
pub use security_models::*;
pub use spam_detector::*;
