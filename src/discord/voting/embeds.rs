// Embed rendering for ballot and verdict messages.
//
// The core hands over typed view structs; everything Discord-visual about a
// vote lives here.

use crate::core::voting::{human_duration, BallotView, VerdictOutcome, VerdictView};
use poise::serenity_prelude as serenity;

pub fn ballot_embed(view: &BallotView) -> serenity::CreateEmbed {
    let tier_line = view
        .tier_label
        .clone()
        .unwrap_or_else(|| "None yet".to_string());

    serenity::CreateEmbed::new()
        .title("⚖️ Community Timeout Vote")
        .description(format!(
            "**User:** <@{}>\n\
             **Reason:** {}\n\
             **Started by:** <@{}>\n\n\
             **In favor:** 👍 {}\n\
             **Against:** 👎 {}\n\
             **Net votes:** {}\n\n\
             **Current sanction:** {}\n\
             **Time remaining:** {} minute(s)\n\n\
             **Vote id:** `{}`",
            view.target_id,
            view.reason,
            view.initiator_id,
            view.up,
            view.down,
            view.net,
            tier_line,
            view.minutes_remaining,
            view.vote_id
        ))
        .color(if view.tier_label.is_some() {
            0xFF4444
        } else {
            0xFFAA00
        })
        .footer(serenity::CreateEmbedFooter::new(
            "React with 👍 to approve or 👎 to reject. ⬜ abstains - and abstaining is punished.",
        ))
}

pub fn verdict_embed(view: &VerdictView) -> serenity::CreateEmbed {
    let votes_line = format!(
        "**Final votes:** 👍 {} | 👎 {} ({} net)",
        view.up, view.down, view.net
    );

    match &view.outcome {
        VerdictOutcome::SanctionApplied { label, duration } => serenity::CreateEmbed::new()
            .title("✅ Timeout Applied")
            .description(format!(
                "**User:** <@{}>\n\
                 **Reason:** {}\n\
                 {}\n\
                 **Sanction:** {} ({})\n\
                 **Applied by:** Community vote",
                view.target_id,
                view.reason,
                votes_line,
                label,
                human_duration(*duration)
            ))
            .color(0x00FF00),

        VerdictOutcome::SanctionFailed { label } => serenity::CreateEmbed::new()
            .title("❌ Failed to Apply Timeout")
            .description(format!(
                "**User:** <@{}>\n\
                 **Reason:** {}\n\
                 {}\n\
                 **Sanction:** {}\n\
                 **Error:** The timeout could not be applied - moderators, please follow up.",
                view.target_id, view.reason, votes_line, label
            ))
            .color(0xFF0000),

        VerdictOutcome::Rejected => serenity::CreateEmbed::new()
            .title("❌ Vote Rejected")
            .description(format!(
                "**User:** <@{}>\n\
                 **Reason:** {}\n\
                 {}\n\
                 **Result:** The required net votes were not reached",
                view.target_id, view.reason, votes_line
            ))
            .color(0x808080),

        VerdictOutcome::Cancelled { cancelled_by } => serenity::CreateEmbed::new()
            .title("🛑 Vote Cancelled by Administrator")
            .description(format!(
                "**User:** <@{}>\n\
                 **Reason:** {}\n\
                 **Cancelled by:** <@{}>",
                view.target_id, view.reason, cancelled_by
            ))
            .color(0x808080),
    }
}
