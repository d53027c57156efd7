// Admin commands for the security system.
//
// Everything under /security requires ADMINISTRATOR; the detectors themselves
// run from the event handlers regardless of who is online.

use crate::core::giveaways::GiveawayService;
use crate::core::security::{MitigationService, RaidDetector, SecurityOverrides, SpamDetector};
use crate::discord::gateway::SerenityGateway;
use crate::infra::giveaways::SqliteGiveawayStore;
use crate::infra::security::SqliteSecurityEventStore;
use poise::serenity_prelude as serenity;

/// Manage the anti-spam and anti-raid systems.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("status", "antispam", "antiraid", "whitelist", "ignore", "lockdown")
)]
pub async fn security(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current security configuration.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let overrides = &ctx.data().overrides;

    let flag = |enabled: bool| if enabled { "✅ Enabled" } else { "❌ Disabled" };
    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Security Status")
        .field("Anti-Spam", flag(overrides.anti_spam_enabled()), true)
        .field("Anti-Raid", flag(overrides.anti_raid_enabled()), true)
        .field(
            "Whitelisted Users",
            overrides.whitelist_len().to_string(),
            true,
        )
        .field(
            "Ignored Channels",
            overrides.ignored_channel_len().to_string(),
            true,
        )
        .color(serenity::Color::BLURPLE);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable or disable the anti-spam system.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antispam(
    ctx: Context<'_>,
    #[description = "Enable or disable"] enabled: bool,
) -> Result<(), Error> {
    ctx.data().overrides.set_anti_spam_enabled(enabled);
    ctx.say(format!(
        "Anti-spam system is now **{}**.",
        if enabled { "enabled" } else { "disabled" }
    ))
    .await?;
    Ok(())
}

/// Enable or disable the anti-raid system.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antiraid(
    ctx: Context<'_>,
    #[description = "Enable or disable"] enabled: bool,
) -> Result<(), Error> {
    ctx.data().overrides.set_anti_raid_enabled(enabled);
    ctx.say(format!(
        "Anti-raid system is now **{}**.",
        if enabled { "enabled" } else { "disabled" }
    ))
    .await?;
    Ok(())
}

/// Exempt a user from spam checks and raid kicks (run again to remove).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn whitelist(
    ctx: Context<'_>,
    #[description = "User to toggle on the whitelist"] user: serenity::User,
) -> Result<(), Error> {
    let added = ctx.data().overrides.toggle_whitelist(user.id.get());
    if added {
        ctx.say(format!("{} is now exempt from security checks.", user.name))
            .await?;
    } else {
        ctx.say(format!(
            "{} is no longer exempt from security checks.",
            user.name
        ))
        .await?;
    }
    Ok(())
}

/// Exempt a channel from spam checks (run again to remove).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn ignore(
    ctx: Context<'_>,
    #[description = "Channel to toggle (defaults to this channel)"] channel: Option<
        serenity::Channel,
    >,
) -> Result<(), Error> {
    let channel_id = channel
        .map(|c| c.id().get())
        .unwrap_or_else(|| ctx.channel_id().get());

    let added = ctx.data().overrides.toggle_ignored_channel(channel_id);
    if added {
        ctx.say(format!("<#{}> is now ignored by the spam checks.", channel_id))
            .await?;
    } else {
        ctx.say(format!(
            "<#{}> is no longer ignored by the spam checks.",
            channel_id
        ))
        .await?;
    }
    Ok(())
}

/// Lock or unlock every text channel in the server.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn lockdown(
    ctx: Context<'_>,
    #[description = "true to lock, false to unlock"] locked: bool,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // Sweeping every channel can take a few seconds on large servers
    ctx.defer().await?;

    match ctx.data().mitigation.lockdown(guild_id, locked).await {
        Ok(report) => {
            ctx.say(format!(
                "Server has been **{}**. {} channels updated, {} failed.",
                if locked { "locked" } else { "unlocked" },
                report.succeeded,
                report.failed
            ))
            .await?;
        }
        Err(e) => {
            ctx.say(format!("Lockdown failed: {}", e)).await?;
        }
    }
    Ok(())
}

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
/// This is where we store our services and configuration.
use std::sync::Arc;

pub struct Data {
    pub raid_detector: Arc<RaidDetector>,
    pub spam_detector: Arc<SpamDetector>,
    pub mitigation: Arc<MitigationService<SerenityGateway, SqliteSecurityEventStore>>,
    pub giveaways:
        Arc<GiveawayService<SqliteGiveawayStore, SerenityGateway, SqliteSecurityEventStore>>,
    pub overrides: Arc<SecurityOverrides>,
}
