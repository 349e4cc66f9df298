// Serenity-backed implementation of the core's ModerationPlatform port.
//
// The core sees primitive ids and view structs; this adapter owns every
// serenity call for the voting feature.

use super::embeds;
use super::reactions::emoji_for;
use crate::core::voting::{
    BallotView, MemberProfile, ModerationPlatform, PlatformError, ReactionKind, VerdictView,
};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Discord rejects member timeouts longer than 28 days.
const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }

    fn reaction(kind: ReactionKind) -> serenity::ReactionType {
        serenity::ReactionType::Unicode(emoji_for(kind).to_string())
    }
}

#[async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn fetch_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<MemberProfile, PlatformError> {
        let guild = serenity::GuildId::new(guild_id);
        let member = guild
            .member(&self.http, serenity::UserId::new(user_id))
            .await
            .map_err(|_| PlatformError::MemberNotFound(user_id))?;

        let roles = guild
            .roles(&self.http)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        let partial = guild
            .to_partial_guild(&self.http)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;

        let is_administrator = partial.owner_id == member.user.id
            || member
                .roles
                .iter()
                .filter_map(|id| roles.get(id))
                .any(|role| role.permissions.administrator());
        let role_names = member
            .roles
            .iter()
            .filter_map(|id| roles.get(id))
            .map(|role| role.name.clone())
            .collect();

        Ok(MemberProfile {
            user_id,
            is_administrator,
            // Nitro boost status, same signal the booster weight uses.
            is_booster: member.premium_since.is_some(),
            roles: role_names,
        })
    }

    async fn find_text_channel(&self, guild_id: u64, name: &str) -> Result<u64, PlatformError> {
        let channels = serenity::GuildId::new(guild_id)
            .channels(&self.http)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;

        channels
            .values()
            .find(|channel| channel.kind == serenity::ChannelType::Text && channel.name == name)
            .map(|channel| channel.id.get())
            .ok_or_else(|| PlatformError::ChannelNotFound(name.to_string()))
    }

    async fn post_ballot(&self, channel_id: u64, view: &BallotView) -> Result<u64, PlatformError> {
        let message = serenity::ChannelId::new(channel_id)
            .send_message(
                &self.http,
                serenity::CreateMessage::new().embed(embeds::ballot_embed(view)),
            )
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(message.id.get())
    }

    async fn edit_ballot(
        &self,
        channel_id: u64,
        message_id: u64,
        view: &BallotView,
    ) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .edit_message(
                &self.http,
                serenity::MessageId::new(message_id),
                serenity::EditMessage::new().embed(embeds::ballot_embed(view)),
            )
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }

    async fn post_verdict(
        &self,
        channel_id: u64,
        message_id: u64,
        view: &VerdictView,
    ) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .edit_message(
                &self.http,
                serenity::MessageId::new(message_id),
                serenity::EditMessage::new().embed(embeds::verdict_embed(view)),
            )
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }

    async fn add_ballot_reactions(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<(), PlatformError> {
        let channel = serenity::ChannelId::new(channel_id);
        let message = serenity::MessageId::new(message_id);
        for kind in [
            ReactionKind::Approve,
            ReactionKind::Reject,
            ReactionKind::Abstain,
        ] {
            channel
                .create_reaction(&self.http, message, Self::reaction(kind))
                .await
                .map_err(|e| PlatformError::Api(e.to_string()))?;
        }
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .delete_reaction(
                &self.http,
                serenity::MessageId::new(message_id),
                Some(serenity::UserId::new(user_id)),
                Self::reaction(kind),
            )
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let duration = duration.min(MAX_TIMEOUT);
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + duration.as_secs() as i64,
        )
        .map_err(|e| PlatformError::Api(e.to_string()))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }

    async fn send_notice(&self, channel_id: u64, content: &str) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .say(&self.http, content)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), PlatformError> {
        let channel = serenity::UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        channel
            .id
            .say(&self.http, content)
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(())
    }
}
