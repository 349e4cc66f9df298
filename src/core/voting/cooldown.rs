// Per-user rate limit on vote initiation.
//
// No in-memory state: the last-initiation timestamp lives in the store and
// is re-read on every check, so the limit survives process restarts.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::vote_service::{VoteError, VoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub on_cooldown: bool,
    /// Remaining wait, rounded up to whole minutes. Zero when off cooldown.
    pub remaining_minutes: i64,
}

impl CooldownStatus {
    fn clear() -> Self {
        Self {
            on_cooldown: false,
            remaining_minutes: 0,
        }
    }
}

pub struct CooldownGuard {
    window_ms: i64,
}

impl CooldownGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
        }
    }

    /// Pure window arithmetic against a known last-initiation time.
    pub fn status_from(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownStatus {
        let Some(last) = last else {
            return CooldownStatus::clear();
        };

        let elapsed_ms = now.signed_duration_since(last).num_milliseconds();
        if elapsed_ms >= self.window_ms {
            return CooldownStatus::clear();
        }

        let remaining_ms = self.window_ms - elapsed_ms;
        CooldownStatus {
            on_cooldown: true,
            remaining_minutes: (remaining_ms + 59_999) / 60_000,
        }
    }

    /// Check a user against their persisted last-initiation timestamp.
    pub async fn check<S: VoteStore>(
        &self,
        store: &S,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<CooldownStatus, VoteError> {
        let last = store.get_cooldown(user_id).await?;
        Ok(self.status_from(last, now))
    }

    /// Record a vote initiation for a user.
    pub async fn record<S: VoteStore>(
        &self,
        store: &S,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<(), VoteError> {
        store.set_cooldown(user_id, now).await
    }
}
