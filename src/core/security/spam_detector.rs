// Anti-spam evaluation - a token bucket per (subject, guild) plus content
// heuristics, evaluated in order with first match winning.
//
// NO Discord dependencies here - the Discord layer translates the verdict
// into deletes and mutes.

use super::rate_window::RateWindow;
use super::security_models::{MessageEvent, SecurityConfig, SpamVerdict};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Marker that identifies a Discord invite link in message content.
const INVITE_MARKER: &str = "discord.gg/";

/// Continuously-refilling token bucket.
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn new(capacity: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_consume(&mut self, capacity: f64, refill_per_sec: f64, now: DateTime<Utc>) -> bool {
        let elapsed_ms = (now - self.last_refill).num_milliseconds().max(0);
        self.tokens = (self.tokens + elapsed_ms as f64 / 1000.0 * refill_per_sec).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-message spam evaluation.
///
/// Checks run in a fixed order: rate limiting first, then mention ceiling,
/// then invite links. Whichever matches first decides the verdict; later
/// heuristics are not evaluated. Bypass rules (bots, whitelisted subjects,
/// ignored channels) are applied by the caller before the message gets here.
pub struct SpamDetector {
    config: SecurityConfig,
    /// (subject, guild) -> token bucket.
    buckets: DashMap<(u64, u64), TokenBucket>,
    /// Bounded history of flagged messages per subject, driving escalation.
    flagged: RateWindow,
}

impl SpamDetector {
    pub fn new(config: SecurityConfig) -> Self {
        let flagged = RateWindow::new(config.flagged_history_size);
        Self {
            config,
            buckets: DashMap::new(),
            flagged,
        }
    }

    /// Evaluate one message. `already_muted` suppresses escalation so a muted
    /// subject is not muted twice.
    pub fn check_message(&self, msg: &MessageEvent, already_muted: bool) -> SpamVerdict {
        let capacity = self.config.max_messages_per_window as f64;
        let refill_per_sec = capacity / self.config.rate_limit_window_secs as f64;

        let allowed = self
            .buckets
            .entry((msg.subject_id, msg.guild_id))
            .or_insert_with(|| TokenBucket::new(capacity, msg.timestamp))
            .try_consume(capacity, refill_per_sec, msg.timestamp);

        if !allowed {
            let window = Duration::seconds(self.config.rate_limit_window_secs as i64);
            self.flagged.record(msg.subject_id, msg.timestamp, window);
            let flagged_count = self.flagged.count(msg.subject_id) as u32;
            let escalate = flagged_count >= self.config.mute_after_flags && !already_muted;

            return SpamVerdict::RateLimited {
                flagged_count,
                escalate,
            };
        }

        if msg.mention_count > self.config.max_mentions {
            return SpamVerdict::MassMention {
                mention_count: msg.mention_count,
            };
        }

        if msg.content.to_lowercase().contains(INVITE_MARKER) && !msg.author_can_manage_guild {
            return SpamVerdict::InviteLink;
        }

        SpamVerdict::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SecurityConfig {
        SecurityConfig::default()
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn message(subject_id: u64, ms: i64) -> MessageEvent {
        MessageEvent {
            subject_id,
            guild_id: 1,
            channel_id: 5,
            timestamp: at_ms(ms),
            content: "hello there".to_string(),
            mention_count: 0,
            author_can_manage_guild: false,
        }
    }

    #[test]
    fn sixth_message_in_burst_is_rate_limited() {
        let detector = SpamDetector::new(test_config());

        // A burst of 5 messages inside 2 seconds passes, the 6th is flagged
        for i in 0..5 {
            let verdict = detector.check_message(&message(1, i * 50), false);
            assert_eq!(verdict, SpamVerdict::Clean, "message {} should pass", i);
        }

        let verdict = detector.check_message(&message(1, 300), false);
        assert_eq!(
            verdict,
            SpamVerdict::RateLimited {
                flagged_count: 1,
                escalate: false
            }
        );
    }

    #[test]
    fn bucket_refills_over_time() {
        let detector = SpamDetector::new(test_config());

        for i in 0..5 {
            detector.check_message(&message(1, i * 100), false);
        }
        assert!(matches!(
            detector.check_message(&message(1, 600), false),
            SpamVerdict::RateLimited { .. }
        ));

        // 5s window / 5 tokens = 1 token per second; 3 seconds later two
        // messages fit again
        assert_eq!(detector.check_message(&message(1, 3600), false), SpamVerdict::Clean);
        assert_eq!(detector.check_message(&message(1, 3700), false), SpamVerdict::Clean);
    }

    #[test]
    fn third_flag_escalates_to_mute() {
        let detector = SpamDetector::new(test_config());

        // Exhaust the bucket
        for i in 0..5 {
            detector.check_message(&message(1, i * 10), false);
        }

        let first = detector.check_message(&message(1, 100), false);
        let second = detector.check_message(&message(1, 150), false);
        let third = detector.check_message(&message(1, 200), false);

        assert_eq!(
            first,
            SpamVerdict::RateLimited {
                flagged_count: 1,
                escalate: false
            }
        );
        assert_eq!(
            second,
            SpamVerdict::RateLimited {
                flagged_count: 2,
                escalate: false
            }
        );
        assert_eq!(
            third,
            SpamVerdict::RateLimited {
                flagged_count: 3,
                escalate: true
            }
        );
    }

    #[test]
    fn already_muted_subject_is_not_escalated() {
        let detector = SpamDetector::new(test_config());

        for i in 0..5 {
            detector.check_message(&message(1, i * 10), false);
        }
        for i in 0..2 {
            detector.check_message(&message(1, 100 + i * 10), false);
        }

        let verdict = detector.check_message(&message(1, 130), true);
        assert_eq!(
            verdict,
            SpamVerdict::RateLimited {
                flagged_count: 3,
                escalate: false
            }
        );
    }

    #[test]
    fn mass_mention_wins_over_invite_check() {
        let detector = SpamDetector::new(test_config());

        let mut msg = message(1, 0);
        msg.mention_count = 6;
        msg.content = "join my server discord.gg/abc".to_string();

        // First match wins: the invite link is never considered
        assert_eq!(
            detector.check_message(&msg, false),
            SpamVerdict::MassMention { mention_count: 6 }
        );
    }

    #[test]
    fn mentions_at_ceiling_are_allowed() {
        let detector = SpamDetector::new(test_config());

        let mut msg = message(1, 0);
        msg.mention_count = 5;

        assert_eq!(detector.check_message(&msg, false), SpamVerdict::Clean);
    }

    #[test]
    fn invite_link_without_permission_is_flagged() {
        let detector = SpamDetector::new(test_config());

        let mut msg = message(1, 0);
        msg.content = "Join here: DISCORD.GG/raidparty".to_string();

        assert_eq!(detector.check_message(&msg, false), SpamVerdict::InviteLink);
    }

    #[test]
    fn invite_link_with_manage_guild_is_allowed() {
        let detector = SpamDetector::new(test_config());

        let mut msg = message(1, 0);
        msg.content = "official invite discord.gg/ourserver".to_string();
        msg.author_can_manage_guild = true;

        assert_eq!(detector.check_message(&msg, false), SpamVerdict::Clean);
    }

    #[test]
    fn subjects_have_independent_buckets() {
        let detector = SpamDetector::new(test_config());

        for i in 0..6 {
            detector.check_message(&message(1, i * 10), false);
        }

        // A different subject in the same guild is unaffected
        assert_eq!(detector.check_message(&message(2, 100), false), SpamVerdict::Clean);
    }
}
