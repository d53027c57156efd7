// Discord commands for running giveaways.
//
// /giveaway create posts the entry message and registers the giveaway; the
// background sweep in GiveawayService ends it on schedule. end and reroll are
// the manual overrides.

use crate::core::giveaways::{EndOutcome, NewGiveaway, ENTRY_EMOJI};
use crate::discord::commands::security::{Context, Error};
use poise::serenity_prelude as serenity;

/// Run giveaways in this server.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES",
    subcommands("create", "end", "reroll", "list")
)]
pub async fn giveaway(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Start a new giveaway in this channel.
///
/// **Example:** `/giveaway create prize:"Discord Nitro" duration:"1d" winners:2`
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn create(
    ctx: Context<'_>,
    #[description = "What the winners receive"] prize: String,
    #[description = "How long it runs (e.g. '30m', '2h', '1d', '1w')"] duration: String,
    #[description = "Number of winners"]
    #[min = 1]
    winners: u32,
) -> Result<(), Error> {
    let Some(duration) = parse_duration(&duration) else {
        ctx.say(
            "Invalid duration format. Use formats like:\n\
            - `30s` for seconds\n\
            - `5m` for minutes\n\
            - `2h` for hours\n\
            - `1d` for days\n\
            - `1w` for weeks",
        )
        .await?;
        return Ok(());
    };

    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let end_time = chrono::Utc::now() + chrono::Duration::from_std(duration)?;

    let embed = serenity::CreateEmbed::new()
        .title("🎉 Giveaway")
        .description(format!(
            "React with {} to enter!\n\nPrize: **{}**\nWinners: **{}**\nEnds: <t:{}:R>",
            ENTRY_EMOJI,
            prize,
            winners,
            end_time.timestamp()
        ))
        .color(serenity::Color::BLUE);

    let reply = ctx.send(poise::CreateReply::default().embed(embed)).await?;
    let message = reply.message().await?;
    message
        .react(
            ctx.serenity_context(),
            serenity::ReactionType::Unicode(ENTRY_EMOJI.to_string()),
        )
        .await?;

    ctx.data()
        .giveaways
        .create(NewGiveaway {
            guild_id,
            channel_id: ctx.channel_id().get(),
            message_id: message.id.get(),
            prize,
            end_time,
            winner_count: winners,
        })
        .await?;

    Ok(())
}

/// End a giveaway early and draw its winners now.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn end(
    ctx: Context<'_>,
    #[description = "Message ID of the giveaway"] message_id: String,
) -> Result<(), Error> {
    let Ok(message_id) = message_id.parse::<u64>() else {
        ctx.say("That doesn't look like a message ID.").await?;
        return Ok(());
    };

    let Some(giveaway) = ctx.data().giveaways.find_by_message(message_id).await? else {
        ctx.say("No giveaway found for that message.").await?;
        return Ok(());
    };

    match ctx.data().giveaways.end_giveaway(giveaway.id).await? {
        EndOutcome::Ended { winners } => {
            ctx.say(format!(
                "Giveaway ended! {} winner{} drawn.",
                winners.len(),
                if winners.len() == 1 { "" } else { "s" }
            ))
            .await?;
        }
        EndOutcome::AlreadyEnded => {
            ctx.say("That giveaway has already ended.").await?;
        }
        EndOutcome::MessageMissing => {
            ctx.say("The giveaway message can't be found right now; it stays active and will be retried.")
                .await?;
        }
    }

    Ok(())
}

/// Draw a replacement winner for an ended giveaway.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn reroll(
    ctx: Context<'_>,
    #[description = "Message ID of the giveaway"] message_id: String,
) -> Result<(), Error> {
    let Ok(message_id) = message_id.parse::<u64>() else {
        ctx.say("That doesn't look like a message ID.").await?;
        return Ok(());
    };

    let Some(giveaway) = ctx.data().giveaways.find_by_message(message_id).await? else {
        ctx.say("No giveaway found for that message.").await?;
        return Ok(());
    };

    match ctx.data().giveaways.reroll(&giveaway).await? {
        Some(winner) => {
            ctx.say(format!(
                "🎉 New winner: <@{}>! Congratulations, you won **{}**!",
                winner, giveaway.prize
            ))
            .await?;
        }
        None => {
            ctx.say("No valid participants found!").await?;
        }
    }

    Ok(())
}

/// List the giveaways that are still running.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let giveaways = ctx.data().giveaways.list_active().await?;

    if giveaways.is_empty() {
        ctx.say("No active giveaways!").await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("🎉 Active Giveaways")
        .color(serenity::Color::BLUE);

    for giveaway in giveaways {
        embed = embed.field(
            giveaway.prize.clone(),
            format!(
                "Channel: <#{}>\nWinners: {}\nEnds: <t:{}:R>\nMessage ID: {}",
                giveaway.channel_id,
                giveaway.winner_count,
                giveaway.end_time.timestamp(),
                giveaway.message_id
            ),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Parse compact durations like "30s", "5m", "2h", "1d", "1w".
fn parse_duration(input: &str) -> Option<std::time::Duration> {
    let input = input.trim().to_lowercase();
    if !input.is_ascii() || input.len() < 2 {
        return None;
    }

    let (num_str, unit) = input.split_at(input.len() - 1);
    let number: u64 = num_str.trim().parse().ok()?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return None,
    };

    let secs = number.checked_mul(multiplier)?;
    if secs == 0 {
        return None;
    }
    Some(std::time::Duration::from_secs(secs))
}
