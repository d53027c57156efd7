// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events, gateway)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::giveaways::GiveawayService;
use crate::core::security::{
    MitigationService, RaidDetector, SecurityConfig, SecurityOverrides, SpamDetector,
};
use crate::discord::gateway::SerenityGateway;
use crate::discord::security_events;
use crate::discord::{Data, Error};
use crate::infra::giveaways::SqliteGiveawayStore;
use crate::infra::security::SqliteSecurityEventStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// This is where the security detectors get fed.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = security_events::handle_message(ctx, data, new_message).await {
                tracing::error!("Error running spam checks on message: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = security_events::handle_member_join(data, new_member).await {
                tracing::error!("Error running raid checks on member join: {}", e);
            }
        }
        _ => {}
    }

    Ok(())
}

/// Read an env var, falling back to `default` when unset or unparsable.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let db_path = format!("{}/warden.db", data_dir);

    // Detector thresholds can be tuned per deployment; everything falls back
    // to the built-in defaults.
    let defaults = SecurityConfig::default();
    let config = SecurityConfig {
        raid_join_threshold: env_parse("WARDEN_RAID_JOIN_THRESHOLD", defaults.raid_join_threshold),
        raid_detection_window_secs: env_parse(
            "WARDEN_RAID_WINDOW_SECS",
            defaults.raid_detection_window_secs,
        ),
        max_mentions: env_parse("WARDEN_MAX_MENTIONS", defaults.max_mentions),
        mute_duration_secs: env_parse("WARDEN_MUTE_DURATION_SECS", defaults.mute_duration_secs),
        ..defaults
    };
    let anti_spam_enabled = env_parse("WARDEN_ANTI_SPAM_ENABLED", true);
    let anti_raid_enabled = env_parse("WARDEN_ANTI_RAID_ENABLED", true);
    let mute_duration = std::time::Duration::from_secs(config.mute_duration_secs);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", db_path))
        .await
        .expect("Failed to connect to database");

    let event_store = SqliteSecurityEventStore::new(pool.clone());
    event_store
        .migrate()
        .await
        .expect("Failed to migrate security events table");

    let giveaway_store = SqliteGiveawayStore::new(pool.clone());
    giveaway_store
        .migrate()
        .await
        .expect("Failed to migrate giveaways table");

    // Detectors are pure in-memory state and don't need the gateway
    let raid_detector = Arc::new(RaidDetector::new(config.clone()));
    let spam_detector = Arc::new(SpamDetector::new(config));
    let overrides = Arc::new(SecurityOverrides::new(anti_spam_enabled, anti_raid_enabled));

    // Tells the giveaway sweep to stop on shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Configure the poise framework with our commands and settings.

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::security::security(),
                discord::commands::giveaways::giveaway(),
            ],
            // Event handler for messages and member joins
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered, bot is ready");

                // The gateway adapter needs the HTTP client, which only exists
                // once the framework is up. Everything that performs Discord
                // side effects is built here.
                let gateway = SerenityGateway::new(ctx.http.clone());

                let mitigation = Arc::new(MitigationService::new(
                    gateway.clone(),
                    event_store,
                    mute_duration,
                ));
                let giveaways = Arc::new(GiveawayService::new(
                    giveaway_store,
                    gateway,
                    SqliteSecurityEventStore::new(pool.clone()),
                ));

                // Background giveaway sweep, ends overdue giveaways on a fixed
                // interval until shutdown is signalled.
                tokio::spawn(Arc::clone(&giveaways).run(shutdown_rx));

                Ok(Data {
                    raid_detector,
                    spam_detector,
                    mitigation,
                    giveaways,
                    overrides,
                })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    // Ctrl-C stops the shards and the giveaway sweep
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(true);
        shard_manager.shutdown_all().await;
    });

    client.start().await.expect("Error running bot");
}
