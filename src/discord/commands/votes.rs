// Discord commands for the voting system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::voting::{scheduler, VoteError, VotingService};
use crate::discord::voting::platform::SerenityPlatform;
use crate::infra::voting::SqliteVoteStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state passed to every command and event handler.
pub struct Data {
    pub votes: Arc<VotingService<SqliteVoteStore, SerenityPlatform>>,
}

/// Start a community timeout vote against a user.
#[poise::command(slash_command, guild_only, rename = "votetimeout")]
pub async fn vote_timeout(
    ctx: Context<'_>,
    #[description = "User the vote is against"] user: serenity::User,
    #[description = "Reason for the vote"] reason: String,
) -> Result<(), Error> {
    // Defer immediately - posting the ballot takes several API calls.
    ctx.defer_ephemeral().await?;

    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();

    if user.bot {
        ctx.say("❌ Bots cannot be put to a vote.").await?;
        return Ok(());
    }

    let votes = &ctx.data().votes;
    match votes
        .start_vote(guild_id, ctx.author().id.get(), user.id.get(), &reason)
        .await
    {
        Ok(vote) => {
            // The low-latency completion path; the sweep covers restarts.
            scheduler::schedule_completion(
                Arc::clone(votes),
                vote.id.clone(),
                votes.config().vote_duration,
            );
            ctx.say(format!(
                "✅ Vote started against **{}** in #{}. ID: `{}`",
                user.name,
                votes.config().moderation_channel,
                vote.id
            ))
            .await?;
        }
        Err(err) if is_user_facing(&err) => {
            ctx.say(format!("❌ {}", err)).await?;
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

/// Cancel an active vote. Administrators only.
#[poise::command(
    slash_command,
    guild_only,
    rename = "cancelvote",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn cancel_vote(
    ctx: Context<'_>,
    #[description = "Id of the vote to cancel"] vote_id: String,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;

    match ctx
        .data()
        .votes
        .cancel_vote(&vote_id, ctx.author().id.get())
        .await
    {
        Ok(()) => {
            ctx.say(format!("✅ Vote `{}` cancelled.", vote_id)).await?;
        }
        Err(err) if is_user_facing(&err) => {
            ctx.say(format!("❌ {}", err)).await?;
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

/// Precondition violations go back to the caller as a plain rejection;
/// anything else bubbles up as a real error.
fn is_user_facing(err: &VoteError) -> bool {
    matches!(
        err,
        VoteError::RoleRequired(_)
            | VoteError::TargetIsAdmin
            | VoteError::CooldownActive { .. }
            | VoteError::DuplicateActiveVote
            | VoteError::ChannelNotFound(_)
            | VoteError::VoteNotFound
            | VoteError::AlreadyCompleted
    )
}
