// Voting service - core business logic for community timeout votes.
//
// This service owns the vote lifecycle:
// - Creation (role/cooldown/duplicate checks, ballot posting)
// - Reaction-driven tallying (last-reaction-wins, weighted)
// - Idempotent completion (atomic claim, sanction tiers, initiator penalty)
// - The abstain punishment
//
// NO Discord dependencies here - just pure domain logic behind two ports:
// VoteStore for durable state and ModerationPlatform for platform effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use super::cooldown::CooldownGuard;
use super::vote_models::{
    abstain_penalty, generate_vote_id, human_duration, resolve_tier, BallotView, FinalTally,
    MemberProfile, ReactionKind, SanctionTier, TallySnapshot, VerdictOutcome, VerdictView, Vote,
    VoteConfig, VoteReaction,
};

/// Reasons are bounded at intake; anything longer is cut off.
const MAX_REASON_CHARS: usize = 500;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("only members with the '{0}' role can start votes")]
    RoleRequired(String),

    #[error("administrators cannot be targeted by a vote")]
    TargetIsAdmin,

    #[error("you must wait {remaining_minutes} more minute(s) before starting another vote")]
    CooldownActive { remaining_minutes: i64 },

    #[error("there is already an active vote against this user")]
    DuplicateActiveVote,

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("vote not found")]
    VoteNotFound,

    #[error("this vote has already completed")]
    AlreadyCompleted,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("member {0} not found")]
    MemberNotFound(u64),

    #[error("platform API error: {0}")]
    Api(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable storage for votes, reactions, cooldowns and abstain counters.
///
/// The rows behind this trait are the single source of truth; `Vote` values
/// handed out by it are disposable snapshots. Completion must be claimed
/// through `claim_completion`, whose conditional update is what makes the
/// lifecycle safe under concurrent timers, sweeps and cancellations.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn create_vote(&self, vote: &Vote) -> Result<(), VoteError>;

    async fn get_vote(&self, vote_id: &str) -> Result<Option<Vote>, VoteError>;

    /// Look a vote up by its ballot message. This is the persisted index
    /// reaction events resolve through.
    async fn get_vote_by_message(&self, message_id: u64) -> Result<Option<Vote>, VoteError>;

    async fn list_active_votes(&self) -> Result<Vec<Vote>, VoteError>;

    async fn has_active_vote_against(&self, target_id: u64) -> Result<bool, VoteError>;

    /// Atomically flip `completed` from false to true, recording the final
    /// tallies. Returns false when another caller already claimed it.
    async fn claim_completion(&self, vote_id: &str, tally: &FinalTally) -> Result<bool, VoteError>;

    /// Insert or replace the (vote, user, kind) reaction row.
    async fn upsert_reaction(
        &self,
        vote_id: &str,
        user_id: u64,
        kind: ReactionKind,
        weight: u32,
    ) -> Result<(), VoteError>;

    async fn delete_reaction(
        &self,
        vote_id: &str,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), VoteError>;

    async fn get_reactions(&self, vote_id: &str) -> Result<Vec<VoteReaction>, VoteError>;

    /// Increment a user's lifetime abstain counter and return the new value.
    /// The counter survives across votes and is never reset.
    async fn bump_abstain_count(&self, user_id: u64) -> Result<u32, VoteError>;

    async fn get_cooldown(&self, user_id: u64) -> Result<Option<DateTime<Utc>>, VoteError>;

    async fn set_cooldown(&self, user_id: u64, last: DateTime<Utc>) -> Result<(), VoteError>;
}

// ============================================================================
// PLATFORM TRAIT (PORT)
// ============================================================================

/// Everything the vote lifecycle needs from the chat platform.
///
/// The Discord layer implements this over serenity; tests implement it with
/// recording mocks.
#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    async fn fetch_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<MemberProfile, PlatformError>;

    async fn find_text_channel(&self, guild_id: u64, name: &str) -> Result<u64, PlatformError>;

    /// Post a fresh ballot message; returns its message id.
    async fn post_ballot(&self, channel_id: u64, view: &BallotView) -> Result<u64, PlatformError>;

    async fn edit_ballot(
        &self,
        channel_id: u64,
        message_id: u64,
        view: &BallotView,
    ) -> Result<(), PlatformError>;

    /// Replace the ballot with its terminal rendering.
    async fn post_verdict(
        &self,
        channel_id: u64,
        message_id: u64,
        view: &VerdictView,
    ) -> Result<(), PlatformError>;

    /// Add the three voting reaction affordances to a ballot message.
    async fn add_ballot_reactions(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<(), PlatformError>;

    async fn remove_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), PlatformError>;

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn send_notice(&self, channel_id: u64, content: &str) -> Result<(), PlatformError>;

    /// Direct-message a user. Callers treat failures as non-fatal since DMs
    /// may be disabled.
    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), PlatformError>;
}

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub completed: usize,
    pub refreshed: usize,
    pub failed: usize,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The vote lifecycle engine, generic over storage and platform ports.
pub struct VotingService<S: VoteStore, P: ModerationPlatform> {
    store: S,
    platform: P,
    config: VoteConfig,
    cooldowns: CooldownGuard,
}

impl<S: VoteStore, P: ModerationPlatform> VotingService<S, P> {
    pub fn new(store: S, platform: P, config: VoteConfig) -> Self {
        let cooldowns = CooldownGuard::new(config.cooldown_window);
        Self {
            store,
            platform,
            config,
            cooldowns,
        }
    }

    pub fn config(&self) -> &VoteConfig {
        &self.config
    }

    /// Start a timeout vote against `target_id`.
    ///
    /// Precondition order: initiator role, target immunity, cooldown,
    /// duplicate active vote, channel resolution. The duplicate check goes
    /// to the store rather than any local state so concurrent initiations
    /// across handlers cannot both pass.
    pub async fn start_vote(
        &self,
        guild_id: u64,
        initiator_id: u64,
        target_id: u64,
        reason: &str,
    ) -> Result<Vote, VoteError> {
        let initiator = self
            .platform
            .fetch_member(guild_id, initiator_id)
            .await
            .map_err(|err| VoteError::Platform(err.to_string()))?;
        if !initiator.has_role(&self.config.required_role) {
            return Err(VoteError::RoleRequired(self.config.required_role.clone()));
        }

        let target = self
            .platform
            .fetch_member(guild_id, target_id)
            .await
            .map_err(|err| VoteError::Platform(err.to_string()))?;
        if target.is_administrator {
            return Err(VoteError::TargetIsAdmin);
        }

        let now = Utc::now();
        let cooldown = self.cooldowns.check(&self.store, initiator_id, now).await?;
        if cooldown.on_cooldown {
            return Err(VoteError::CooldownActive {
                remaining_minutes: cooldown.remaining_minutes,
            });
        }

        if self.store.has_active_vote_against(target_id).await? {
            return Err(VoteError::DuplicateActiveVote);
        }

        let channel_id = self
            .platform
            .find_text_channel(guild_id, &self.config.moderation_channel)
            .await
            .map_err(|_| VoteError::ChannelNotFound(self.config.moderation_channel.clone()))?;

        let reason: String = reason.chars().take(MAX_REASON_CHARS).collect();
        let mut vote = Vote {
            id: generate_vote_id(),
            guild_id,
            channel_id,
            message_id: 0,
            target_id,
            initiator_id,
            reason,
            start_time: now,
            completed: false,
            end_time: None,
            verdict: None,
        };

        let view = self.ballot_view(&vote, TallySnapshot::default(), now);
        let message_id = self
            .platform
            .post_ballot(channel_id, &view)
            .await
            .map_err(|err| VoteError::Platform(err.to_string()))?;
        vote.message_id = message_id;

        self.store.create_vote(&vote).await?;

        if let Err(err) = self.platform.add_ballot_reactions(channel_id, message_id).await {
            tracing::warn!(vote_id = %vote.id, error = %err, "failed to add ballot reactions");
        }

        self.cooldowns.record(&self.store, initiator_id, now).await?;

        let dm = format!(
            "⚠️ A community timeout vote has been started against you.\n\
             **Reason:** {}\n\
             **Started by:** <@{}>\n\n\
             The vote runs for {}.",
            vote.reason,
            initiator_id,
            human_duration(self.config.vote_duration)
        );
        if let Err(err) = self.platform.dm_user(target_id, &dm).await {
            tracing::debug!(target_id, error = %err, "could not DM vote start notice");
        }

        tracing::info!(
            vote_id = %vote.id,
            target_id,
            initiator_id,
            "community vote started"
        );

        Ok(vote)
    }

    /// Apply a reaction-add event to the vote owning `message_id`.
    ///
    /// Unknown messages are ignored. Abstain is punished and stripped even
    /// on completed votes; approve/reject on a completed vote is stripped
    /// without being tallied.
    pub async fn record_reaction_add(
        &self,
        message_id: u64,
        guild_id: u64,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), VoteError> {
        let Some(vote) = self.store.get_vote_by_message(message_id).await? else {
            return Ok(());
        };

        if kind == ReactionKind::Abstain {
            return self.punish_abstain(&vote, guild_id, user_id).await;
        }

        if vote.completed {
            self.strip_reaction(&vote, user_id, kind).await;
            return Ok(());
        }

        let weight = self.vote_weight(guild_id, user_id).await;
        self.store
            .upsert_reaction(&vote.id, user_id, kind, weight)
            .await?;
        // Last reaction wins: the user's other buckets are cleared.
        for other in kind.others() {
            self.store.delete_reaction(&vote.id, user_id, other).await?;
        }

        self.refresh_ballot(&vote).await
    }

    /// Apply a reaction-remove event. Only meaningful for approve/reject on
    /// an active vote; abstain removals are the bot stripping its own mark.
    pub async fn record_reaction_remove(
        &self,
        message_id: u64,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), VoteError> {
        if kind == ReactionKind::Abstain {
            return Ok(());
        }

        let Some(vote) = self.store.get_vote_by_message(message_id).await? else {
            return Ok(());
        };
        if vote.completed {
            return Ok(());
        }

        self.store.delete_reaction(&vote.id, user_id, kind).await?;
        self.store
            .delete_reaction(&vote.id, user_id, ReactionKind::Abstain)
            .await?;

        self.refresh_ballot(&vote).await
    }

    /// Finish a vote: tally, claim, sanction, render, notify.
    ///
    /// Safe to call concurrently and redundantly - the one-shot timer, the
    /// reconciliation sweep and a racing cancellation all funnel through the
    /// store's atomic claim, so the sanction is applied exactly once.
    pub async fn complete_vote(&self, vote_id: &str) -> Result<(), VoteError> {
        let vote = self
            .store
            .get_vote(vote_id)
            .await?
            .ok_or(VoteError::VoteNotFound)?;
        if vote.completed {
            return Ok(());
        }

        let reactions = self.store.get_reactions(vote_id).await?;
        let tally = TallySnapshot::from_reactions(&reactions);
        let tier = resolve_tier(&self.config.thresholds, tally.net()).cloned();

        let final_tally = FinalTally {
            up: tally.up,
            down: tally.down,
            net: tally.net(),
            sanction_applied: tier.is_some(),
            cancelled: false,
        };

        if !self.store.claim_completion(vote_id, &final_tally).await? {
            // Lost the race to another completer. Not an error.
            tracing::debug!(vote_id, "completion already claimed elsewhere");
            return Ok(());
        }

        self.finalize(&vote, tally, tier).await;
        Ok(())
    }

    /// Administrative cancellation. The caller enforces who may cancel; this
    /// only enforces that the vote is still open.
    pub async fn cancel_vote(&self, vote_id: &str, cancelled_by: u64) -> Result<(), VoteError> {
        let vote = self
            .store
            .get_vote(vote_id)
            .await?
            .ok_or(VoteError::VoteNotFound)?;
        if vote.completed {
            return Err(VoteError::AlreadyCompleted);
        }

        let reactions = self.store.get_reactions(vote_id).await?;
        let tally = TallySnapshot::from_reactions(&reactions);
        let final_tally = FinalTally {
            up: tally.up,
            down: tally.down,
            net: tally.net(),
            sanction_applied: false,
            cancelled: true,
        };

        // A cancellation races the expiry timer for the claim; losing it
        // means the vote finished normally in the meantime.
        if !self.store.claim_completion(vote_id, &final_tally).await? {
            return Err(VoteError::AlreadyCompleted);
        }

        tracing::info!(vote_id, cancelled_by, "vote cancelled");

        let view = VerdictView {
            vote_id: vote.id.clone(),
            target_id: vote.target_id,
            reason: vote.reason.clone(),
            up: tally.up,
            down: tally.down,
            net: tally.net(),
            outcome: VerdictOutcome::Cancelled { cancelled_by },
        };
        if let Err(err) = self
            .platform
            .post_verdict(vote.channel_id, vote.message_id, &view)
            .await
        {
            tracing::warn!(vote_id, error = %err, "failed to render cancellation");
        }

        let dm = "✅ The community timeout vote against you was cancelled by an administrator.";
        if let Err(err) = self.platform.dm_user(vote.target_id, dm).await {
            tracing::debug!(target_id = vote.target_id, error = %err, "could not DM cancellation");
        }

        Ok(())
    }

    pub async fn all_active_votes(&self) -> Result<Vec<Vote>, VoteError> {
        self.store.list_active_votes().await
    }

    /// Whether a message id belongs to any vote, active or finished.
    pub async fn is_ballot_message(&self, message_id: u64) -> Result<bool, VoteError> {
        Ok(self.store.get_vote_by_message(message_id).await?.is_some())
    }

    /// One reconciliation pass: complete every vote past its deadline and
    /// refresh the displayed time remaining on the rest.
    pub async fn sweep_once(&self) -> Result<SweepStats, VoteError> {
        let votes = self.store.list_active_votes().await?;
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for vote in votes {
            if self.is_due(&vote, now) {
                match self.complete_vote(&vote.id).await {
                    Ok(()) => stats.completed += 1,
                    Err(err) => {
                        stats.failed += 1;
                        tracing::warn!(vote_id = %vote.id, error = %err, "sweep completion failed");
                    }
                }
            } else {
                match self.refresh_ballot(&vote).await {
                    Ok(()) => stats.refreshed += 1,
                    Err(err) => {
                        stats.failed += 1;
                        tracing::warn!(vote_id = %vote.id, error = %err, "sweep refresh failed");
                    }
                }
            }
        }

        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Boosters count double. Role state changes between votes, so this is
    /// evaluated fresh on every reaction and fails open to weight 1.
    async fn vote_weight(&self, guild_id: u64, user_id: u64) -> u32 {
        match self.platform.fetch_member(guild_id, user_id).await {
            Ok(member) if member.is_booster => 2,
            Ok(_) => 1,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "member lookup failed, using weight 1");
                1
            }
        }
    }

    fn is_due(&self, vote: &Vote, now: DateTime<Utc>) -> bool {
        let elapsed_ms = now.signed_duration_since(vote.start_time).num_milliseconds();
        elapsed_ms >= self.config.vote_duration.as_millis() as i64
    }

    fn minutes_remaining(&self, vote: &Vote, now: DateTime<Utc>) -> i64 {
        let elapsed_ms = now.signed_duration_since(vote.start_time).num_milliseconds();
        let remaining_ms = (self.config.vote_duration.as_millis() as i64 - elapsed_ms).max(0);
        (remaining_ms + 59_999) / 60_000
    }

    fn ballot_view(&self, vote: &Vote, tally: TallySnapshot, now: DateTime<Utc>) -> BallotView {
        BallotView {
            vote_id: vote.id.clone(),
            target_id: vote.target_id,
            initiator_id: vote.initiator_id,
            reason: vote.reason.clone(),
            up: tally.up,
            down: tally.down,
            net: tally.net(),
            tier_label: resolve_tier(&self.config.thresholds, tally.net())
                .map(|tier| tier.label.clone()),
            minutes_remaining: self.minutes_remaining(vote, now),
        }
    }

    /// Re-render the ballot from the store's current reaction rows. The
    /// message is re-fetched by the platform on edit; nothing is cached
    /// across await points.
    async fn refresh_ballot(&self, vote: &Vote) -> Result<(), VoteError> {
        let reactions = self.store.get_reactions(&vote.id).await?;
        let tally = TallySnapshot::from_reactions(&reactions);
        let view = self.ballot_view(vote, tally, Utc::now());

        if let Err(err) = self
            .platform
            .edit_ballot(vote.channel_id, vote.message_id, &view)
            .await
        {
            tracing::warn!(vote_id = %vote.id, error = %err, "failed to update ballot message");
        }
        Ok(())
    }

    async fn strip_reaction(&self, vote: &Vote, user_id: u64, kind: ReactionKind) {
        if let Err(err) = self
            .platform
            .remove_reaction(vote.channel_id, vote.message_id, user_id, kind)
            .await
        {
            tracing::warn!(user_id, kind = %kind, error = %err, "failed to strip reaction");
        }
    }

    /// The abstain punishment: bump the lifetime counter, time the reacting
    /// user out on an escalating scale (admins exempt, counter still moves),
    /// post a moderation-channel notice, and strip the reaction no matter
    /// what happened.
    async fn punish_abstain(
        &self,
        vote: &Vote,
        guild_id: u64,
        user_id: u64,
    ) -> Result<(), VoteError> {
        let outcome: Result<(), VoteError> = async {
            let count = self.store.bump_abstain_count(user_id).await?;
            // The bucket row mirrors the lifetime count; it is cleared if the
            // user later takes a side, the counter is not.
            self.store
                .upsert_reaction(&vote.id, user_id, ReactionKind::Abstain, count)
                .await?;

            let penalty = abstain_penalty(self.config.abstain_base_penalty, count);

            let member = match self.platform.fetch_member(guild_id, user_id).await {
                Ok(member) => member,
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "abstainer lookup failed, skipping timeout");
                    return Ok(());
                }
            };
            if member.is_administrator {
                tracing::info!(user_id, count, "administrator abstained; counter bumped, no timeout");
                return Ok(());
            }

            let reason = format!(
                "Abstained on a community vote ({} lifetime abstention(s))",
                count
            );
            match self
                .platform
                .timeout_member(guild_id, user_id, penalty, &reason)
                .await
            {
                Ok(()) => {
                    let notice = format!(
                        "<@{}> received a {} timeout for abstaining ({} lifetime abstention(s))",
                        user_id,
                        human_duration(penalty),
                        count
                    );
                    if let Err(err) = self.platform.send_notice(vote.channel_id, &notice).await {
                        tracing::warn!(user_id, error = %err, "failed to post abstain notice");
                    }
                }
                Err(err) => {
                    tracing::error!(user_id, error = %err, "failed to apply abstain timeout");
                }
            }
            Ok(())
        }
        .await;

        // Stripped regardless of outcome so the ballot never shows abstain
        // as a standing vote.
        self.strip_reaction(vote, user_id, ReactionKind::Abstain).await;

        outcome
    }

    /// Post-claim finalization: sanction or initiator penalty, terminal
    /// rendering, target DM. Platform failures here are logged and reflected
    /// in the verdict, never retried.
    async fn finalize(&self, vote: &Vote, tally: TallySnapshot, tier: Option<SanctionTier>) {
        let outcome = match &tier {
            Some(tier) => {
                let reason = format!("Community vote: {}", vote.reason);
                match self
                    .platform
                    .timeout_member(vote.guild_id, vote.target_id, tier.duration, &reason)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            vote_id = %vote.id,
                            target_id = vote.target_id,
                            tier = %tier.label,
                            net = tally.net(),
                            "sanction applied"
                        );
                        VerdictOutcome::SanctionApplied {
                            label: tier.label.clone(),
                            duration: tier.duration,
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            vote_id = %vote.id,
                            target_id = vote.target_id,
                            error = %err,
                            "failed to apply sanction"
                        );
                        VerdictOutcome::SanctionFailed {
                            label: tier.label.clone(),
                        }
                    }
                }
            }
            None => {
                self.punish_initiator(vote).await;
                VerdictOutcome::Rejected
            }
        };

        let view = VerdictView {
            vote_id: vote.id.clone(),
            target_id: vote.target_id,
            reason: vote.reason.clone(),
            up: tally.up,
            down: tally.down,
            net: tally.net(),
            outcome,
        };
        if let Err(err) = self
            .platform
            .post_verdict(vote.channel_id, vote.message_id, &view)
            .await
        {
            tracing::warn!(vote_id = %vote.id, error = %err, "failed to render verdict");
        }

        let dm = match &view.outcome {
            VerdictOutcome::SanctionApplied { duration, .. } => format!(
                "⚠️ A timeout of **{}** has been applied to you by community vote.\n\
                 **Reason:** {}\n\
                 **Votes:** 👍 {} | 👎 {} ({} net)",
                human_duration(*duration),
                vote.reason,
                tally.up,
                tally.down,
                tally.net()
            ),
            VerdictOutcome::SanctionFailed { label } => format!(
                "⚠️ The community voted to sanction you (**{}**), but the timeout \
                 could not be applied.",
                label
            ),
            _ => format!(
                "✅ The community timeout vote against you was rejected.\n\
                 **Votes:** 👍 {} | 👎 {} ({} net)",
                tally.up,
                tally.down,
                tally.net()
            ),
        };
        if let Err(err) = self.platform.dm_user(vote.target_id, &dm).await {
            tracing::debug!(target_id = vote.target_id, error = %err, "could not DM verdict");
        }
    }

    /// A rejected vote costs the initiator a short timeout, unless they are
    /// an administrator.
    async fn punish_initiator(&self, vote: &Vote) {
        let member = match self.platform.fetch_member(vote.guild_id, vote.initiator_id).await {
            Ok(member) => member,
            Err(err) => {
                tracing::warn!(
                    initiator_id = vote.initiator_id,
                    error = %err,
                    "initiator lookup failed, skipping penalty"
                );
                return;
            }
        };
        if member.is_administrator {
            return;
        }

        if let Err(err) = self
            .platform
            .timeout_member(
                vote.guild_id,
                vote.initiator_id,
                self.config.rejection_penalty,
                "Community vote rejected - penalty for a failed initiation",
            )
            .await
        {
            tracing::warn!(
                initiator_id = vote.initiator_id,
                error = %err,
                "failed to apply initiator penalty"
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
