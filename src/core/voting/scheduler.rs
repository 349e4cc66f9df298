// Completion scheduling - the two mechanisms that end a vote on time.
//
// A one-shot timer per vote gives low-latency completion; a periodic
// reconciliation sweep is the durability backstop. One-shot timers die with
// the process, so the sweep re-derives due votes from the store and also
// keeps the displayed "time remaining" on open ballots accurate.
//
// Either path may fire first for the same vote; the store's atomic
// completion claim makes the extra call a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use super::vote_service::{ModerationPlatform, VoteError, VoteStore, VotingService};

/// Register the one-shot completion timer for a vote.
pub fn schedule_completion<S, P>(
    service: Arc<VotingService<S, P>>,
    vote_id: String,
    delay: Duration,
) where
    S: VoteStore + 'static,
    P: ModerationPlatform + 'static,
{
    tokio::spawn(async move {
        sleep(delay).await;
        match service.complete_vote(&vote_id).await {
            Ok(()) => tracing::debug!(vote_id = %vote_id, "one-shot completion finished"),
            Err(VoteError::VoteNotFound) => {
                tracing::debug!(vote_id = %vote_id, "one-shot fired for unknown vote")
            }
            Err(err) => {
                // The sweep will retry on its next tick.
                tracing::warn!(vote_id = %vote_id, error = %err, "one-shot completion failed")
            }
        }
    });
}

/// Spawn the periodic reconciliation sweep.
pub fn spawn_sweep<S, P>(service: Arc<VotingService<S, P>>, interval: Duration)
where
    S: VoteStore + 'static,
    P: ModerationPlatform + 'static,
{
    tokio::spawn(async move {
        loop {
            match service.sweep_once().await {
                Ok(stats) if stats.completed > 0 || stats.failed > 0 => {
                    tracing::info!(
                        completed = stats.completed,
                        refreshed = stats.refreshed,
                        failed = stats.failed,
                        "vote sweep finished"
                    );
                }
                Ok(_) => {}
                // A failed tick must not kill the loop; retry next tick.
                Err(err) => tracing::warn!(error = %err, "vote sweep failed"),
            }

            sleep(interval).await;
        }
    });
}

/// Re-register one-shot timers for votes that were active when the process
/// last stopped. Returns how many were scheduled.
pub async fn resume_pending<S, P>(service: &Arc<VotingService<S, P>>) -> Result<usize, VoteError>
where
    S: VoteStore + 'static,
    P: ModerationPlatform + 'static,
{
    let votes = service.all_active_votes().await?;
    let now = Utc::now();
    let duration_ms = service.config().vote_duration.as_millis() as i64;

    for vote in &votes {
        let elapsed_ms = now.signed_duration_since(vote.start_time).num_milliseconds();
        let remaining_ms = (duration_ms - elapsed_ms).max(0) as u64;
        schedule_completion(
            Arc::clone(service),
            vote.id.clone(),
            Duration::from_millis(remaining_ms),
        );
    }

    Ok(votes.len())
}
