// Giveaway domain models.
//
// Pure domain types; the Discord layer owns embeds and reactions.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GiveawayError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Gateway error: {0}")]
    Gateway(String),
}

/// A persisted giveaway. `active` flips to false exactly once, as the last
/// step of the end sequence; there are no further transitions.
#[derive(Debug, Clone)]
pub struct Giveaway {
    pub id: i64,
    pub guild_id: u64,
    pub channel_id: u64,
    /// The announcement message participants react to.
    pub message_id: u64,
    pub prize: String,
    pub end_time: DateTime<Utc>,
    pub winner_count: u32,
    pub active: bool,
}

/// Fields for a giveaway about to be persisted.
#[derive(Debug, Clone)]
pub struct NewGiveaway {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub prize: String,
    pub end_time: DateTime<Utc>,
    pub winner_count: u32,
}

/// Result of attempting to end a giveaway.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// The giveaway was ended by this call. Zero winners means no eligible
    /// participants.
    Ended { winners: Vec<u64> },
    /// Someone else got there first (or the giveaway never existed).
    AlreadyEnded,
    /// The announcement message is gone; the giveaway stays active and the
    /// next tick retries.
    MessageMissing,
}
