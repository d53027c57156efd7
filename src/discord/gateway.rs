// Serenity-backed implementation of the core gateway ports.
//
// This is the only place where mitigation and giveaway logic touch the
// Discord HTTP API; everything above it works against the traits.

use crate::core::giveaways::{Giveaway, GiveawayError, GiveawayGateway, ENTRY_EMOJI};
use crate::core::security::{SecurityError, SecurityGateway};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Name of the role assigned to muted members, created lazily when missing.
pub const MUTE_ROLE_NAME: &str = "Muted";

/// Reaction-user pages are fetched in batches of this size.
const REACTION_PAGE_SIZE: u8 = 100;

#[derive(Clone)]
pub struct SerenityGateway {
    http: Arc<serenity::Http>,
}

impl SerenityGateway {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SecurityGateway for SerenityGateway {
    async fn text_channels(&self, guild_id: u64) -> Result<Vec<u64>, SecurityError> {
        let channels = serenity::GuildId::new(guild_id)
            .channels(&self.http)
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))?;

        Ok(channels
            .values()
            .filter(|c| c.kind == serenity::ChannelType::Text)
            .map(|c| c.id.get())
            .collect())
    }

    async fn set_send_permission(
        &self,
        guild_id: u64,
        channel_id: u64,
        allow: bool,
    ) -> Result<(), SecurityError> {
        let overwrite = serenity::PermissionOverwrite {
            allow: if allow {
                serenity::Permissions::SEND_MESSAGES
            } else {
                serenity::Permissions::empty()
            },
            deny: if allow {
                serenity::Permissions::empty()
            } else {
                serenity::Permissions::SEND_MESSAGES
            },
            // @everyone role ID is the same as the guild ID
            kind: serenity::PermissionOverwriteType::Role(serenity::RoleId::from(guild_id)),
        };

        serenity::ChannelId::new(channel_id)
            .create_permission(&self.http, overwrite)
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))
    }

    async fn kick_member(
        &self,
        guild_id: u64,
        subject_id: u64,
        reason: &str,
    ) -> Result<(), SecurityError> {
        self.http
            .kick_member(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(subject_id),
                Some(reason),
            )
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))
    }

    async fn ensure_mute_role(&self, guild_id: u64) -> Result<u64, SecurityError> {
        let guild = serenity::GuildId::new(guild_id);
        let roles = self
            .http
            .get_guild_roles(guild)
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))?;

        if let Some(role) = roles.iter().find(|r| r.name == MUTE_ROLE_NAME) {
            return Ok(role.id.get());
        }

        let role = guild
            .create_role(
                &self.http,
                serenity::EditRole::new()
                    .name(MUTE_ROLE_NAME)
                    .permissions(serenity::Permissions::empty()),
            )
            .await
            .map_err(|e| {
                SecurityError::Configuration(format!(
                    "Cannot create {} role: {}",
                    MUTE_ROLE_NAME, e
                ))
            })?;

        Ok(role.id.get())
    }

    async fn add_role(
        &self,
        guild_id: u64,
        subject_id: u64,
        role_id: u64,
    ) -> Result<(), SecurityError> {
        self.http
            .add_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(subject_id),
                serenity::RoleId::new(role_id),
                Some("Muted for spam"),
            )
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        subject_id: u64,
        role_id: u64,
    ) -> Result<(), SecurityError> {
        self.http
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(subject_id),
                serenity::RoleId::new(role_id),
                Some("Mute lifted"),
            )
            .await
            .map_err(|e| SecurityError::Gateway(e.to_string()))
    }
}

#[async_trait]
impl GiveawayGateway for SerenityGateway {
    async fn message_exists(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<bool, GiveawayError> {
        match serenity::ChannelId::new(channel_id)
            .message(&self.http, serenity::MessageId::new(message_id))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(channel_id, message_id, "Giveaway message lookup failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn entrants(&self, channel_id: u64, message_id: u64) -> Result<Vec<u64>, GiveawayError> {
        let channel = serenity::ChannelId::new(channel_id);
        let message = serenity::MessageId::new(message_id);
        let reaction = serenity::ReactionType::Unicode(ENTRY_EMOJI.to_string());

        let mut entrants = Vec::new();
        let mut after: Option<serenity::UserId> = None;
        loop {
            let page = channel
                .reaction_users(
                    &self.http,
                    message,
                    reaction.clone(),
                    Some(REACTION_PAGE_SIZE),
                    after,
                )
                .await
                .map_err(|e| GiveawayError::Gateway(e.to_string()))?;

            let full_page = page.len() == REACTION_PAGE_SIZE as usize;
            after = page.last().map(|u| u.id);
            entrants.extend(page.into_iter().filter(|u| !u.bot).map(|u| u.id.get()));

            if !full_page {
                break;
            }
        }

        Ok(entrants)
    }

    async fn publish_outcome(
        &self,
        giveaway: &Giveaway,
        winners: &[u64],
    ) -> Result<(), GiveawayError> {
        let channel = serenity::ChannelId::new(giveaway.channel_id);
        let mentions = winners
            .iter()
            .map(|w| format!("<@{}>", w))
            .collect::<Vec<_>>()
            .join(", ");

        let (color, description) = if winners.is_empty() {
            (
                serenity::Color::RED,
                format!(
                    "Giveaway ended\nNo valid participants!\n\nPrize: {}",
                    giveaway.prize
                ),
            )
        } else {
            (
                serenity::Color::DARK_GREEN,
                format!("🎉 Winners: {}\n\nPrize: {}", mentions, giveaway.prize),
            )
        };

        let embed = serenity::CreateEmbed::new()
            .title("🎉 Giveaway")
            .description(description)
            .color(color);

        channel
            .edit_message(
                &self.http,
                serenity::MessageId::new(giveaway.message_id),
                serenity::EditMessage::new().embed(embed),
            )
            .await
            .map_err(|e| GiveawayError::Gateway(e.to_string()))?;

        if !winners.is_empty() {
            channel
                .send_message(
                    &self.http,
                    serenity::CreateMessage::new().content(format!(
                        "🎉 Congratulations {}! You won: **{}**",
                        mentions, giveaway.prize
                    )),
                )
                .await
                .map_err(|e| GiveawayError::Gateway(e.to_string()))?;
        }

        Ok(())
    }
}
