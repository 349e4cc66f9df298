// Voting domain models - data structures for the community timeout vote system.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer renders them into embeds and messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The three ballot reactions a voter can cast.
///
/// Abstain is special: it is never tallied toward the result. Casting it
/// punishes the voter instead (see the abstain handling in the service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReactionKind {
    Approve,
    Reject,
    Abstain,
}

impl ReactionKind {
    /// Stable string form used by the store layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Approve => "approve",
            ReactionKind::Reject => "reject",
            ReactionKind::Abstain => "abstain",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(ReactionKind::Approve),
            "reject" => Some(ReactionKind::Reject),
            "abstain" => Some(ReactionKind::Abstain),
            _ => None,
        }
    }

    /// The other two kinds. A user holds at most one kind at a time, so
    /// casting one clears these for that user.
    pub fn others(&self) -> [ReactionKind; 2] {
        match self {
            ReactionKind::Approve => [ReactionKind::Reject, ReactionKind::Abstain],
            ReactionKind::Reject => [ReactionKind::Approve, ReactionKind::Abstain],
            ReactionKind::Abstain => [ReactionKind::Approve, ReactionKind::Reject],
        }
    }
}

impl std::fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A community timeout vote.
///
/// The store row is the durable source of truth; values of this type are
/// disposable snapshots and must never be cached across await points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Opaque unique id, generated at creation.
    pub id: String,
    pub guild_id: u64,
    /// Channel holding the ballot message.
    pub channel_id: u64,
    /// The ballot message reactions are cast on.
    pub message_id: u64,
    /// The user the vote is against.
    pub target_id: u64,
    /// The user who started the vote.
    pub initiator_id: u64,
    pub reason: String,
    pub start_time: DateTime<Utc>,
    pub completed: bool,
    pub end_time: Option<DateTime<Utc>>,
    /// Final result snapshot, recorded when completion is claimed.
    pub verdict: Option<FinalTally>,
}

/// One user's current reaction on a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReaction {
    pub user_id: u64,
    pub kind: ReactionKind,
    pub weight: u32,
}

/// Weighted approve/reject totals for a vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub up: i64,
    pub down: i64,
}

impl TallySnapshot {
    /// Sum weights per bucket. Abstain rows are never counted.
    pub fn from_reactions(reactions: &[VoteReaction]) -> Self {
        let mut tally = TallySnapshot::default();
        for reaction in reactions {
            match reaction.kind {
                ReactionKind::Approve => tally.up += reaction.weight as i64,
                ReactionKind::Reject => tally.down += reaction.weight as i64,
                ReactionKind::Abstain => {}
            }
        }
        tally
    }

    pub fn net(&self) -> i64 {
        self.up - self.down
    }
}

/// Result snapshot persisted when a vote's completion is claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalTally {
    pub up: i64,
    pub down: i64,
    pub net: i64,
    /// Whether a sanction tier was resolved for the target.
    pub sanction_applied: bool,
    /// True when the vote ended by administrative cancellation.
    pub cancelled: bool,
}

/// A (minimum net votes -> timeout) rule. Thresholds are kept ascending by
/// `min_net`; the highest satisfied one wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionTier {
    pub min_net: i64,
    pub duration: Duration,
    pub label: String,
}

impl SanctionTier {
    pub fn new(min_net: i64, duration: Duration, label: impl Into<String>) -> Self {
        Self {
            min_net,
            duration,
            label: label.into(),
        }
    }
}

/// Pick the highest tier whose minimum is satisfied by `net`, or `None`
/// when the vote falls below the lowest tier.
pub fn resolve_tier(thresholds: &[SanctionTier], net: i64) -> Option<&SanctionTier> {
    thresholds.iter().filter(|tier| net >= tier.min_net).last()
}

/// Escalating abstain penalty: `base * 10^(count - 1)`.
/// 1st abstain = base, 2nd = 10x, 3rd = 100x, and so on. Saturates instead
/// of overflowing for absurd counts.
pub fn abstain_penalty(base: Duration, count: u32) -> Duration {
    let factor = 10u64.saturating_pow(count.saturating_sub(1));
    Duration::from_millis((base.as_millis() as u64).saturating_mul(factor))
}

/// Human form of a duration for notices and DMs ("45 minute(s)", "2 hour(s)").
pub fn human_duration(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{} hour(s)", hours)
    } else {
        format!("{} minute(s)", minutes)
    }
}

/// Generate an opaque, collision-free vote id.
pub fn generate_vote_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("vote_{}", suffix)
}

/// Configuration for the voting system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteConfig {
    /// How long a vote stays open.
    pub vote_duration: Duration,
    /// Minimum wait between vote initiations per user.
    pub cooldown_window: Duration,
    /// Role required to start a vote.
    pub required_role: String,
    /// Name of the channel ballots are posted in.
    pub moderation_channel: String,
    /// Base abstain penalty; escalates tenfold per lifetime abstention.
    pub abstain_base_penalty: Duration,
    /// Timeout applied to the initiator when the community rejects the vote.
    pub rejection_penalty: Duration,
    /// Ascending sanction tiers.
    pub thresholds: Vec<SanctionTier>,
    /// Reconciliation sweep interval.
    pub sweep_interval: Duration,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            vote_duration: Duration::from_secs(5 * 60),
            cooldown_window: Duration::from_secs(15 * 60),
            required_role: "One Of Us".to_string(),
            moderation_channel: "moderation".to_string(),
            abstain_base_penalty: Duration::from_secs(60),
            rejection_penalty: Duration::from_secs(5 * 60),
            thresholds: vec![
                SanctionTier::new(5, Duration::from_secs(5 * 60), "Light Warning (5 min)"),
                SanctionTier::new(8, Duration::from_secs(30 * 60), "Light Sanction (30 min)"),
                SanctionTier::new(
                    12,
                    Duration::from_secs(2 * 60 * 60),
                    "Moderate Violation (2 hours)",
                ),
                SanctionTier::new(
                    15,
                    Duration::from_secs(8 * 60 * 60),
                    "Serious Misconduct (8 hours)",
                ),
                SanctionTier::new(
                    21,
                    Duration::from_secs(12 * 60 * 60),
                    "Severe Misconduct (12 hours)",
                ),
                SanctionTier::new(
                    25,
                    Duration::from_secs(24 * 60 * 60),
                    "Severe Misconduct (24 hours)",
                ),
            ],
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// What a member looks like to the voting core. Produced by the platform
/// port so the core never touches Discord types.
#[derive(Debug, Clone)]
pub struct MemberProfile {
    pub user_id: u64,
    pub is_administrator: bool,
    /// Boosters get double vote weight.
    pub is_booster: bool,
    pub roles: Vec<String>,
}

impl MemberProfile {
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role == name)
    }
}

/// Everything the renderer needs to draw a live ballot message.
#[derive(Debug, Clone)]
pub struct BallotView {
    pub vote_id: String,
    pub target_id: u64,
    pub initiator_id: u64,
    pub reason: String,
    pub up: i64,
    pub down: i64,
    pub net: i64,
    /// Label of the tier currently satisfied, if any.
    pub tier_label: Option<String>,
    pub minutes_remaining: i64,
}

/// Terminal rendering of a finished vote.
#[derive(Debug, Clone)]
pub struct VerdictView {
    pub vote_id: String,
    pub target_id: u64,
    pub reason: String,
    pub up: i64,
    pub down: i64,
    pub net: i64,
    pub outcome: VerdictOutcome,
}

#[derive(Debug, Clone)]
pub enum VerdictOutcome {
    /// The target was timed out for the resolved tier.
    SanctionApplied { label: String, duration: Duration },
    /// A tier was resolved but the platform call failed; moderators are
    /// expected to follow up manually.
    SanctionFailed { label: String },
    /// The community rejected the vote.
    Rejected,
    /// An administrator cancelled the vote.
    Cancelled { cancelled_by: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Vec<SanctionTier> {
        VoteConfig::default().thresholds
    }

    #[test]
    fn tier_below_lowest_resolves_to_none() {
        assert!(resolve_tier(&thresholds(), 4).is_none());
        assert!(resolve_tier(&thresholds(), 0).is_none());
        assert!(resolve_tier(&thresholds(), -3).is_none());
    }

    #[test]
    fn tier_between_steps_resolves_to_lower_step() {
        let tiers = thresholds();
        let tier = resolve_tier(&tiers, 7).unwrap();
        assert_eq!(tier.min_net, 5);

        let tier = resolve_tier(&tiers, 14).unwrap();
        assert_eq!(tier.min_net, 12);
    }

    #[test]
    fn tier_at_and_above_top_resolves_to_highest() {
        let tiers = thresholds();
        let tier = resolve_tier(&tiers, 25).unwrap();
        assert_eq!(tier.min_net, 25);

        let tier = resolve_tier(&tiers, 99).unwrap();
        assert_eq!(tier.min_net, 25);
    }

    #[test]
    fn abstain_penalty_escalates_tenfold() {
        let base = Duration::from_secs(60);
        assert_eq!(abstain_penalty(base, 1), Duration::from_secs(60));
        assert_eq!(abstain_penalty(base, 2), Duration::from_secs(600));
        assert_eq!(abstain_penalty(base, 3), Duration::from_secs(6000));
    }

    #[test]
    fn abstain_penalty_saturates_instead_of_overflowing() {
        let base = Duration::from_secs(60);
        // Absurd counts must not panic.
        let penalty = abstain_penalty(base, 40);
        assert!(penalty >= abstain_penalty(base, 3));
    }

    #[test]
    fn tally_ignores_abstain_rows() {
        let reactions = vec![
            VoteReaction {
                user_id: 1,
                kind: ReactionKind::Approve,
                weight: 2,
            },
            VoteReaction {
                user_id: 2,
                kind: ReactionKind::Reject,
                weight: 1,
            },
            VoteReaction {
                user_id: 3,
                kind: ReactionKind::Abstain,
                weight: 7,
            },
        ];
        let tally = TallySnapshot::from_reactions(&reactions);
        assert_eq!(tally.up, 2);
        assert_eq!(tally.down, 1);
        assert_eq!(tally.net(), 1);
    }

    #[test]
    fn vote_ids_are_prefixed_and_distinct() {
        let a = generate_vote_id();
        let b = generate_vote_id();
        assert!(a.starts_with("vote_"));
        assert_eq!(a.len(), "vote_".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn human_duration_picks_largest_unit() {
        assert_eq!(human_duration(Duration::from_secs(60)), "1 minute(s)");
        assert_eq!(human_duration(Duration::from_secs(45 * 60)), "45 minute(s)");
        assert_eq!(human_duration(Duration::from_secs(2 * 60 * 60)), "2 hour(s)");
    }

    #[test]
    fn reaction_kind_round_trips_through_store_form() {
        for kind in [
            ReactionKind::Approve,
            ReactionKind::Reject,
            ReactionKind::Abstain,
        ] {
            assert_eq!(ReactionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ReactionKind::from_str("up"), None);
    }
}
