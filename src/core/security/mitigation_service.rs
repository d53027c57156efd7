// Mitigation actions - lockdown, mute/unmute, kick fan-out.
//
// External effects go through the SecurityGateway port so tests can run
// against in-memory fakes. Every batch operation is best-effort: a failure on
// one item is logged and the rest of the batch continues.

use super::security_models::{
    BatchReport, RaidAlert, SecurityError, SecurityEvent, SecurityEventKind,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Channel-permission updates in flight at once during a lockdown sweep.
/// Keeps a big guild from hammering the API while still finishing well within
/// a scheduler tick.
const LOCKDOWN_CONCURRENCY: usize = 4;

/// Kick reason recorded against raid-flagged members.
pub const RAID_KICK_REASON: &str = "Raid detection - Automatic action";

// ============================================================================
// PORTS
// ============================================================================

/// Gateway operations the mitigation layer needs from the chat platform.
#[async_trait]
pub trait SecurityGateway: Send + Sync + 'static {
    /// Ids of all text channels in the guild.
    async fn text_channels(&self, guild_id: u64) -> Result<Vec<u64>, SecurityError>;

    /// Allow or deny the default role's send-messages permission on a channel.
    async fn set_send_permission(
        &self,
        guild_id: u64,
        channel_id: u64,
        allow: bool,
    ) -> Result<(), SecurityError>;

    async fn kick_member(
        &self,
        guild_id: u64,
        subject_id: u64,
        reason: &str,
    ) -> Result<(), SecurityError>;

    /// Locate the guild's mute role, creating it if absent. Returns its id.
    async fn ensure_mute_role(&self, guild_id: u64) -> Result<u64, SecurityError>;

    async fn add_role(
        &self,
        guild_id: u64,
        subject_id: u64,
        role_id: u64,
    ) -> Result<(), SecurityError>;

    async fn remove_role(
        &self,
        guild_id: u64,
        subject_id: u64,
        role_id: u64,
    ) -> Result<(), SecurityError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait SecurityEventStore: Send + Sync + 'static {
    async fn append(&self, event: SecurityEvent) -> Result<(), SecurityError>;
}

// ============================================================================
// SERVICE
// ============================================================================

struct MuteEntry {
    guild_id: u64,
    role_id: u64,
    /// Pending delayed-unmute task. Aborted when an explicit unmute lands
    /// first, so a stale timer can never undo a manual unmute.
    timer: JoinHandle<()>,
}

/// Executes mitigations and tracks in-process mute state.
///
/// The mute set mirrors the mute role's membership as far as this process's
/// own calls go; it is not reconciled against external role edits.
pub struct MitigationService<G: SecurityGateway, E: SecurityEventStore> {
    gateway: G,
    events: E,
    muted: DashMap<u64, MuteEntry>,
    mute_duration: Duration,
}

impl<G: SecurityGateway, E: SecurityEventStore> MitigationService<G, E> {
    pub fn new(gateway: G, events: E, mute_duration: Duration) -> Self {
        Self {
            gateway,
            events,
            muted: DashMap::new(),
            mute_duration,
        }
    }

    /// Persist an audit event.
    pub async fn record_event(&self, event: SecurityEvent) -> Result<(), SecurityError> {
        self.events.append(event).await
    }

    pub fn is_muted(&self, subject_id: u64) -> bool {
        self.muted.contains_key(&subject_id)
    }

    /// Full raid response: audit, guild-wide lockdown, kick fan-out.
    /// `candidates` is the whitelist-filtered kick list.
    pub async fn handle_raid(
        &self,
        alert: &RaidAlert,
        candidates: &[u64],
    ) -> Result<BatchReport, SecurityError> {
        self.events
            .append(SecurityEvent::new(
                alert.guild_id,
                SecurityEventKind::RaidDetected,
                None,
                format!("Detected {} joins in quick succession", alert.joins_in_window),
            ))
            .await?;

        self.lockdown(alert.guild_id, true).await?;

        Ok(self.kick_raiders(alert.guild_id, candidates).await)
    }

    /// Lock or unlock every text channel in the guild. Each channel's update
    /// is independent; failures are counted, logged, and skipped. One
    /// aggregate audit event records the intended state plus the counts.
    pub async fn lockdown(
        &self,
        guild_id: u64,
        locked: bool,
    ) -> Result<BatchReport, SecurityError> {
        let channels = self.gateway.text_channels(guild_id).await?;

        let results: Vec<(u64, Result<(), SecurityError>)> =
            stream::iter(channels.into_iter().map(|channel_id| {
                let gateway = &self.gateway;
                async move {
                    (
                        channel_id,
                        gateway
                            .set_send_permission(guild_id, channel_id, !locked)
                            .await,
                    )
                }
            }))
            .buffer_unordered(LOCKDOWN_CONCURRENCY)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (channel_id, result) in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        guild_id,
                        channel_id,
                        "Failed to update channel send permission: {}",
                        e
                    );
                }
            }
        }

        let (kind, action) = if locked {
            (SecurityEventKind::ServerLockdown, "lockdown")
        } else {
            (SecurityEventKind::ServerUnlock, "unlock")
        };
        self.events
            .append(SecurityEvent::new(
                guild_id,
                kind,
                None,
                format!(
                    "Server {}: {} channels updated, {} failed",
                    action, report.succeeded, report.failed
                ),
            ))
            .await?;

        Ok(report)
    }

    /// Kick every candidate, logging and skipping failures. A successful kick
    /// gets its own audit record; a failed one never aborts the rest.
    pub async fn kick_raiders(&self, guild_id: u64, candidates: &[u64]) -> BatchReport {
        let mut report = BatchReport::default();

        for &subject_id in candidates {
            match self
                .gateway
                .kick_member(guild_id, subject_id, RAID_KICK_REASON)
                .await
            {
                Ok(()) => {
                    report.succeeded += 1;
                    if let Err(e) = self
                        .events
                        .append(SecurityEvent::new(
                            guild_id,
                            SecurityEventKind::RaidKick,
                            Some(subject_id),
                            "Member kicked due to raid detection",
                        ))
                        .await
                    {
                        tracing::warn!(guild_id, subject_id, "Failed to record raid kick: {}", e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        guild_id,
                        subject_id,
                        "Failed to kick potential raider: {}",
                        e
                    );
                }
            }
        }

        report
    }

    /// Mute a subject and schedule the delayed unmute. Idempotent: returns
    /// `Ok(false)` without touching the gateway if the subject is already
    /// muted.
    pub async fn mute(
        self: &Arc<Self>,
        guild_id: u64,
        subject_id: u64,
    ) -> Result<bool, SecurityError> {
        if self.muted.contains_key(&subject_id) {
            return Ok(false);
        }

        let role_id = self.gateway.ensure_mute_role(guild_id).await?;
        self.gateway.add_role(guild_id, subject_id, role_id).await?;

        let service = Arc::downgrade(self);
        let delay = self.mute_duration;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(service) = service.upgrade() {
                match service.unmute(subject_id).await {
                    Ok(true) => tracing::info!(subject_id, "Mute cool-down elapsed, unmuted"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(subject_id, "Scheduled unmute failed: {}", e),
                }
            }
        });

        self.muted.insert(
            subject_id,
            MuteEntry {
                guild_id,
                role_id,
                timer,
            },
        );

        self.events
            .append(SecurityEvent::new(
                guild_id,
                SecurityEventKind::SpamMute,
                Some(subject_id),
                format!("<@{}> was muted for spam", subject_id),
            ))
            .await?;

        Ok(true)
    }

    /// Remove the mute role and cancel the pending timer. Idempotent: returns
    /// `Ok(false)` if the subject is not muted.
    pub async fn unmute(&self, subject_id: u64) -> Result<bool, SecurityError> {
        let Some((_, entry)) = self.muted.remove(&subject_id) else {
            return Ok(false);
        };

        entry.timer.abort();
        self.gateway
            .remove_role(entry.guild_id, subject_id, entry.role_id)
            .await?;

        Ok(true)
    }
}
