// Security domain models - data structures shared by the raid and spam
// detectors and the mitigation layer.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway events into these shapes.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A required guild resource (role, channel) is missing or cannot be
    /// created. Background detectors skip the action; admin commands surface
    /// the message to the invoker.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// What kind of audit event is being recorded.
///
/// Security mitigations and giveaway lifecycle actions share the same
/// append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    RaidDetected,
    RaidKick,
    SpamMute,
    MassMention,
    InviteLink,
    ServerLockdown,
    ServerUnlock,
    GiveawayEnded,
    GiveawayRerolled,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::RaidDetected => "RAID_DETECTED",
            SecurityEventKind::RaidKick => "RAID_KICK",
            SecurityEventKind::SpamMute => "SPAM_MUTE",
            SecurityEventKind::MassMention => "MASS_MENTION",
            SecurityEventKind::InviteLink => "INVITE_LINK",
            SecurityEventKind::ServerLockdown => "SERVER_LOCKDOWN",
            SecurityEventKind::ServerUnlock => "SERVER_UNLOCK",
            SecurityEventKind::GiveawayEnded => "GIVEAWAY_ENDED",
            SecurityEventKind::GiveawayRerolled => "GIVEAWAY_REROLLED",
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only audit record. Never mutated or deleted once persisted.
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub guild_id: u64,
    pub kind: SecurityEventKind,
    /// The member the event is about, when it concerns a single member.
    pub subject_id: Option<u64>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        guild_id: u64,
        kind: SecurityEventKind,
        subject_id: Option<u64>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            kind,
            subject_id,
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// GATEWAY EVENT SHAPES
// ============================================================================

/// A member-join event as consumed by the raid detector.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub subject_id: u64,
    pub guild_id: u64,
    pub timestamp: DateTime<Utc>,
    pub is_bot: bool,
}

/// A message-create event as consumed by the spam detector.
///
/// Consumed immediately; not retained beyond the counters it feeds.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub subject_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub mention_count: u32,
    /// Whether the author holds guild-management permission. Authors with it
    /// are allowed to post invite links.
    pub author_can_manage_guild: bool,
}

// ============================================================================
// DETECTOR VERDICTS
// ============================================================================

/// Outcome of evaluating a single message. Heuristics are evaluated in order
/// and the first match wins.
#[derive(Debug, Clone, PartialEq)]
pub enum SpamVerdict {
    /// Message passed all checks.
    Clean,
    /// Token bucket exhausted - delete the message. `escalate` is set when the
    /// subject's flagged history crossed the mute threshold and the subject is
    /// not already muted.
    RateLimited { flagged_count: u32, escalate: bool },
    /// More mentions than the configured ceiling - delete and log.
    MassMention { mention_count: u32 },
    /// Invite link posted by an author without guild-management permission.
    InviteLink,
}

/// Fired by the raid detector when a join surge crosses the threshold.
///
/// Fired once per surge; the detector re-arms only after the join count in the
/// window drops below the threshold again.
#[derive(Debug, Clone)]
pub struct RaidAlert {
    pub guild_id: u64,
    /// Joins counted inside the detection window at trigger time.
    pub joins_in_window: u32,
    /// Recent non-bot joiners eligible for the kick fan-out. Whitelist
    /// filtering is the caller's concern.
    pub candidates: Vec<u64>,
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Detector thresholds, read once at startup.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Joins inside the detection window that trigger a raid alert.
    pub raid_join_threshold: u32,
    /// Width of the trailing join window in seconds.
    pub raid_detection_window_secs: u64,
    /// Ring buffer capacity for recent joins per guild.
    pub join_history_size: usize,
    /// Token bucket capacity (messages per window).
    pub max_messages_per_window: u32,
    /// Token bucket window in seconds (refill is continuous).
    pub rate_limit_window_secs: u64,
    /// How many flagged messages are retained per subject.
    pub flagged_history_size: usize,
    /// Flagged messages in the retained history that escalate to a mute.
    pub mute_after_flags: u32,
    /// Mute cool-down in seconds before the scheduled unmute fires.
    pub mute_duration_secs: u64,
    /// Mentions allowed in a single message.
    pub max_mentions: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            raid_join_threshold: 10,
            raid_detection_window_secs: 10,
            join_history_size: 100,
            max_messages_per_window: 5, // 5 messages...
            rate_limit_window_secs: 5,  // ...in 5 seconds
            flagged_history_size: 10,
            mute_after_flags: 3,
            mute_duration_secs: 600, // 10 minute mute
            max_mentions: 5,
        }
    }
}

/// Runtime-mutable security toggles, shared between the event handlers and the
/// admin commands that flip them.
pub struct SecurityOverrides {
    anti_spam_enabled: AtomicBool,
    anti_raid_enabled: AtomicBool,
    whitelist: DashSet<u64>,
    ignored_channels: DashSet<u64>,
}

impl SecurityOverrides {
    pub fn new(anti_spam_enabled: bool, anti_raid_enabled: bool) -> Self {
        Self {
            anti_spam_enabled: AtomicBool::new(anti_spam_enabled),
            anti_raid_enabled: AtomicBool::new(anti_raid_enabled),
            whitelist: DashSet::new(),
            ignored_channels: DashSet::new(),
        }
    }

    pub fn anti_spam_enabled(&self) -> bool {
        self.anti_spam_enabled.load(Ordering::Relaxed)
    }

    pub fn set_anti_spam_enabled(&self, enabled: bool) {
        self.anti_spam_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn anti_raid_enabled(&self) -> bool {
        self.anti_raid_enabled.load(Ordering::Relaxed)
    }

    pub fn set_anti_raid_enabled(&self, enabled: bool) {
        self.anti_raid_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_whitelisted(&self, subject_id: u64) -> bool {
        self.whitelist.contains(&subject_id)
    }

    /// Toggle a subject on the whitelist. Returns `true` if the subject was
    /// added, `false` if it was removed.
    pub fn toggle_whitelist(&self, subject_id: u64) -> bool {
        if self.whitelist.remove(&subject_id).is_some() {
            false
        } else {
            self.whitelist.insert(subject_id);
            true
        }
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_ignored_channel(&self, channel_id: u64) -> bool {
        self.ignored_channels.contains(&channel_id)
    }

    /// Toggle a channel on the ignore list. Returns `true` if it was added.
    pub fn toggle_ignored_channel(&self, channel_id: u64) -> bool {
        if self.ignored_channels.remove(&channel_id).is_some() {
            false
        } else {
            self.ignored_channels.insert(channel_id);
            true
        }
    }

    pub fn ignored_channel_len(&self) -> usize {
        self.ignored_channels.len()
    }
}

// ============================================================================
// BATCH OUTCOMES
// ============================================================================

/// Aggregate outcome of a best-effort fan-out over many items (channels to
/// lock, members to kick). A failed item never aborts the rest of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_formats_as_audit_tag() {
        assert_eq!(SecurityEventKind::RaidDetected.to_string(), "RAID_DETECTED");
        assert_eq!(SecurityEventKind::ServerUnlock.to_string(), "SERVER_UNLOCK");
        assert_eq!(
            SecurityEventKind::GiveawayEnded.to_string(),
            "GIVEAWAY_ENDED"
        );
    }

    #[test]
    fn whitelist_toggle_round_trips() {
        let overrides = SecurityOverrides::new(true, true);

        assert!(!overrides.is_whitelisted(42));
        assert!(overrides.toggle_whitelist(42));
        assert!(overrides.is_whitelisted(42));
        assert_eq!(overrides.whitelist_len(), 1);

        assert!(!overrides.toggle_whitelist(42));
        assert!(!overrides.is_whitelisted(42));
        assert_eq!(overrides.whitelist_len(), 0);
    }

    #[test]
    fn flags_flip_independently() {
        let overrides = SecurityOverrides::new(true, true);

        overrides.set_anti_spam_enabled(false);
        assert!(!overrides.anti_spam_enabled());
        assert!(overrides.anti_raid_enabled());
    }
}
