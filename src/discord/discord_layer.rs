// Discord layer - commands, event handlers and the gateway adapter.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "gateway.rs"]
pub mod gateway;

#[path = "security/events.rs"]
pub mod security_events;

// Re-export command types for convenience
pub use commands::security::{Data, Error};
