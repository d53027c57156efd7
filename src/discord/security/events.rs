// Gateway event handlers for the security system.
//
// These convert serenity events into the domain shapes the detectors consume
// and apply whatever the verdict asks for.

use crate::core::security::{JoinEvent, MessageEvent, SecurityEvent, SecurityEventKind, SpamVerdict};
use crate::discord::Data;
use anyhow::Result;
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Handle a member join for raid detection. Runs on every GuildMemberAddition.
pub async fn handle_member_join(data: &Data, member: &serenity::Member) -> Result<()> {
    if !data.overrides.anti_raid_enabled() {
        return Ok(());
    }

    let join = JoinEvent {
        subject_id: member.user.id.get(),
        guild_id: member.guild_id.get(),
        timestamp: Utc::now(),
        is_bot: member.user.bot,
    };

    let Some(alert) = data.raid_detector.record_join(&join) else {
        return Ok(());
    };

    tracing::warn!(
        guild_id = join.guild_id,
        joins = alert.joins_in_window,
        "Raid detected, locking down server"
    );

    let candidates: Vec<u64> = alert
        .candidates
        .iter()
        .copied()
        .filter(|id| !data.overrides.is_whitelisted(*id))
        .collect();

    let report = data.mitigation.handle_raid(&alert, &candidates).await?;
    tracing::info!(
        guild_id = join.guild_id,
        kicked = report.succeeded,
        failed = report.failed,
        "Raid response completed"
    );

    Ok(())
}

/// Handle a message for spam detection. Runs on every Message event.
pub async fn handle_message(
    ctx: &serenity::Context,
    data: &Data,
    msg: &serenity::Message,
) -> Result<()> {
    // DMs and bot messages are never checked
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };
    if msg.author.bot || !data.overrides.anti_spam_enabled() {
        return Ok(());
    }

    let subject_id = msg.author.id.get();
    if data.overrides.is_whitelisted(subject_id)
        || data.overrides.is_ignored_channel(msg.channel_id.get())
    {
        return Ok(());
    }

    let author_can_manage_guild = ctx
        .cache
        .guild(guild_id)
        .map(|guild| {
            guild
                .members
                .get(&msg.author.id)
                .map(|m| guild.member_permissions(m).manage_guild())
                .unwrap_or(false)
        })
        .unwrap_or(false);

    let event = MessageEvent {
        subject_id,
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        timestamp: Utc::now(),
        content: msg.content.clone(),
        mention_count: (msg.mentions.len() + msg.mention_roles.len()) as u32,
        author_can_manage_guild,
    };

    let verdict = data
        .spam_detector
        .check_message(&event, data.mitigation.is_muted(subject_id));

    match verdict {
        SpamVerdict::Clean => {}
        SpamVerdict::RateLimited {
            flagged_count,
            escalate,
        } => {
            delete_message(ctx, msg, "rate-limited").await;
            if escalate {
                match data.mitigation.mute(guild_id.get(), subject_id).await {
                    Ok(true) => tracing::info!(
                        guild_id = guild_id.get(),
                        subject_id,
                        flagged_count,
                        "Muted member for repeated spam"
                    ),
                    Ok(false) => {}
                    Err(e) => tracing::error!(
                        guild_id = guild_id.get(),
                        subject_id,
                        "Skipping mute: {}",
                        e
                    ),
                }
            }
        }
        SpamVerdict::MassMention { mention_count } => {
            delete_message(ctx, msg, "mass-mention").await;
            record(
                data,
                SecurityEvent::new(
                    guild_id.get(),
                    SecurityEventKind::MassMention,
                    Some(subject_id),
                    format!(
                        "<@{}> mentioned {} users/roles in one message",
                        subject_id, mention_count
                    ),
                ),
            )
            .await;
        }
        SpamVerdict::InviteLink => {
            delete_message(ctx, msg, "invite-link").await;
            record(
                data,
                SecurityEvent::new(
                    guild_id.get(),
                    SecurityEventKind::InviteLink,
                    Some(subject_id),
                    format!("<@{}> posted an invite link", subject_id),
                ),
            )
            .await;
        }
    }

    Ok(())
}

async fn delete_message(ctx: &serenity::Context, msg: &serenity::Message, label: &str) {
    if let Err(e) = msg.delete(&ctx.http).await {
        tracing::warn!(
            channel_id = msg.channel_id.get(),
            "Failed to delete {} message: {}",
            label,
            e
        );
    }
}

async fn record(data: &Data, event: SecurityEvent) {
    if let Err(e) = data.mitigation.record_event(event).await {
        tracing::warn!("Failed to record security event: {}", e);
    }
}
