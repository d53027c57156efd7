// Core giveaway module - scheduler, winner draw, and lifecycle operations.

pub mod giveaway_models;
pub mod giveaway_service;

pub use giveaway_models::*;
pub use giveaway_service::*;
