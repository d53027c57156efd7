// Raid detection - watches member joins and raises an alert when too many
// land inside the detection window.
//
// The detector only decides; kicking and locking down are the mitigation
// layer's job. State is owned by the instance so tests can drive it with
// synthetic clocks.

use super::rate_window::RateWindow;
use super::security_models::{JoinEvent, RaidAlert, SecurityConfig};
use chrono::Duration;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;

struct JoinRecord {
    subject_id: u64,
    is_bot: bool,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Join-surge detector.
///
/// Alerts are edge-triggered: once a guild's join count crosses the threshold
/// the detector fires exactly once and stays quiet until the count falls back
/// below the threshold, so an ongoing surge does not re-kick an already
/// locked-down guild on every join.
pub struct RaidDetector {
    config: SecurityConfig,
    /// Join counts per guild inside the detection window.
    join_window: RateWindow,
    /// Ring buffer of recent joiners per guild, used to collect kick
    /// candidates when an alert fires.
    recent_joins: DashMap<u64, VecDeque<JoinRecord>>,
    /// Guilds currently at or above the threshold (alert already fired).
    surging: DashSet<u64>,
}

impl RaidDetector {
    pub fn new(config: SecurityConfig) -> Self {
        let join_window = RateWindow::new(config.join_history_size);
        Self {
            config,
            join_window,
            recent_joins: DashMap::new(),
            surging: DashSet::new(),
        }
    }

    /// Record a member join. Returns an alert when this join pushes the
    /// guild's count in the trailing window to the threshold for the first
    /// time in the current surge.
    pub fn record_join(&self, join: &JoinEvent) -> Option<RaidAlert> {
        let window = Duration::seconds(self.config.raid_detection_window_secs as i64);
        let in_window = self
            .join_window
            .record(join.guild_id, join.timestamp, window) as u32;

        {
            let mut ring = self.recent_joins.entry(join.guild_id).or_default();
            ring.push_back(JoinRecord {
                subject_id: join.subject_id,
                is_bot: join.is_bot,
                timestamp: join.timestamp,
            });
            while ring.len() > self.config.join_history_size {
                ring.pop_front();
            }
        }

        if in_window < self.config.raid_join_threshold {
            // Surge subsided - re-arm the trigger for this guild.
            self.surging.remove(&join.guild_id);
            return None;
        }

        if !self.surging.insert(join.guild_id) {
            // Already fired for this surge.
            return None;
        }

        let cutoff = join.timestamp - window;
        let candidates = self
            .recent_joins
            .get(&join.guild_id)
            .map(|ring| {
                ring.iter()
                    .filter(|j| j.timestamp >= cutoff && !j.is_bot)
                    .map(|j| j.subject_id)
                    .collect()
            })
            .unwrap_or_default();

        Some(RaidAlert {
            guild_id: join.guild_id,
            joins_in_window: in_window,
            candidates,
        })
    }
}
