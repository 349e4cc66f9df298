// Gateway reaction events translated into core voting calls.
//
// Mirrors the pattern of the command layer: extract primitives, call the
// core, let the core decide what the reaction means.

use crate::core::voting::ReactionKind;
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

pub const APPROVE_EMOJI: &str = "👍";
pub const REJECT_EMOJI: &str = "👎";
pub const ABSTAIN_EMOJI: &str = "⬜";

pub fn emoji_for(kind: ReactionKind) -> &'static str {
    match kind {
        ReactionKind::Approve => APPROVE_EMOJI,
        ReactionKind::Reject => REJECT_EMOJI,
        ReactionKind::Abstain => ABSTAIN_EMOJI,
    }
}

fn kind_of(reaction: &serenity::Reaction) -> Option<ReactionKind> {
    match &reaction.emoji {
        serenity::ReactionType::Unicode(name) => match name.as_str() {
            APPROVE_EMOJI => Some(ReactionKind::Approve),
            REJECT_EMOJI => Some(ReactionKind::Reject),
            ABSTAIN_EMOJI => Some(ReactionKind::Abstain),
            _ => None,
        },
        _ => None,
    }
}

pub async fn handle_reaction_add(
    ctx: &serenity::Context,
    data: &Data,
    reaction: &serenity::Reaction,
) -> Result<(), Error> {
    let Some(user_id) = reaction.user_id else {
        return Ok(());
    };
    // Ignore the bot's own affordance reactions and other bots.
    if user_id == ctx.cache.current_user().id {
        return Ok(());
    }
    if let Some(member) = &reaction.member {
        if member.user.bot {
            return Ok(());
        }
    }
    let Some(guild_id) = reaction.guild_id else {
        return Ok(());
    };

    let Some(kind) = kind_of(reaction) else {
        // Ballots only carry the three voting emojis; anything else is
        // stripped so the tally message stays readable.
        if data
            .votes
            .is_ballot_message(reaction.message_id.get())
            .await?
        {
            if let Err(err) = reaction.delete(&ctx.http).await {
                tracing::warn!(error = %err, "failed to strip foreign reaction from ballot");
            }
        }
        return Ok(());
    };

    data.votes
        .record_reaction_add(reaction.message_id.get(), guild_id.get(), user_id.get(), kind)
        .await?;
    Ok(())
}

pub async fn handle_reaction_remove(
    ctx: &serenity::Context,
    data: &Data,
    reaction: &serenity::Reaction,
) -> Result<(), Error> {
    let Some(user_id) = reaction.user_id else {
        return Ok(());
    };
    if user_id == ctx.cache.current_user().id {
        return Ok(());
    }
    let Some(kind) = kind_of(reaction) else {
        return Ok(());
    };

    data.votes
        .record_reaction_remove(reaction.message_id.get(), user_id.get(), kind)
        .await?;
    Ok(())
}
