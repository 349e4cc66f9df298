// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events, platform)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and background tasks

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::voting::{scheduler, VoteConfig, VotingService};
use crate::discord::voting::platform::SerenityPlatform;
use crate::discord::voting::reactions;
use crate::discord::{Data, Error};
use crate::infra::voting::SqliteVoteStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Event handler for non-command Discord events.
/// Reaction traffic is what drives the vote tallies.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            if let Err(e) = reactions::handle_reaction_add(ctx, data, add_reaction).await {
                tracing::error!("Error handling reaction add: {}", e);
            }
        }
        serenity::FullEvent::ReactionRemove { removed_reaction } => {
            if let Err(e) = reactions::handle_reaction_remove(ctx, data, removed_reaction).await {
                tracing::error!("Error handling reaction remove: {}", e);
            }
        }
        _ => {}
    }

    Ok(())
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Built from defaults, overridable per deployment via environment.
fn load_config() -> VoteConfig {
    let mut config = VoteConfig::default();
    config.vote_duration = env_duration_secs("VOTE_DURATION_SECS", config.vote_duration);
    config.cooldown_window = env_duration_secs("VOTE_COOLDOWN_SECS", config.cooldown_window);
    config.sweep_interval = env_duration_secs("VOTE_SWEEP_INTERVAL_SECS", config.sweep_interval);
    if let Ok(role) = std::env::var("VOTE_REQUIRED_ROLE") {
        config.required_role = role;
    }
    if let Ok(channel) = std::env::var("VOTE_MODERATION_CHANNEL") {
        config.moderation_channel = channel;
    }
    config
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
    let votes_db_path = format!("{}/votes.db", data_dir);

    let config = load_config();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create the SQLite-backed vote store. The platform half of the service
    // needs the gateway's HTTP handle, so final wiring happens in setup below.

    let vote_store = SqliteVoteStore::new(&votes_db_path)
        .await
        .expect("Failed to initialize SQLite vote store");

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::votes::vote_timeout(),
                discord::commands::votes::cancel_vote(),
            ],
            // Event handler for reactions and other events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                println!("🤖 Bot is starting up...");

                // Register slash commands globally (can take up to an hour to
                // propagate). Use register_in_guild for faster development.
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                println!("✅ Commands registered!");

                let platform = SerenityPlatform::new(ctx.http.clone());
                let sweep_interval = config.sweep_interval;
                let votes = Arc::new(VotingService::new(vote_store, platform, config));

                // Re-arm one-shot completion timers lost to the restart...
                match scheduler::resume_pending(&votes).await {
                    Ok(count) if count > 0 => {
                        tracing::info!(count, "resumed pending vote timers")
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to resume pending votes"),
                }

                // ...and start the reconciliation sweep that backstops them.
                scheduler::spawn_sweep(Arc::clone(&votes), sweep_interval);

                println!("🚀 Bot is ready!");
                Ok(Data { votes })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
