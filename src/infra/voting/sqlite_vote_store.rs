// SQLite-backed vote store for persistent voting data.
//
// Tables:
// - votes: One row per vote, including the final result snapshot
// - vote_reactions: Current reaction per (vote, user, kind)
// - vote_cooldowns: Last vote initiation per user
// - abstain_counters: Lifetime abstain count per user (never reset)
//
// The conditional UPDATE in claim_completion is the atomic primitive the
// whole lifecycle leans on: the first caller flips completed and wins, every
// other caller affects zero rows.

use crate::core::voting::{FinalTally, ReactionKind, Vote, VoteError, VoteReaction, VoteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteVoteStore {
    pool: Pool<Sqlite>,
}

impl SqliteVoteStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                guild_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                initiator_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                start_time TEXT NOT NULL,
                completed BOOLEAN NOT NULL DEFAULT 0,
                end_time TEXT,
                final_up INTEGER,
                final_down INTEGER,
                final_net INTEGER,
                sanction_applied BOOLEAN,
                cancelled BOOLEAN
            );
            CREATE INDEX IF NOT EXISTS idx_votes_message ON votes(message_id);
            CREATE INDEX IF NOT EXISTS idx_votes_target_active ON votes(target_id, completed);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_reactions (
                vote_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                weight INTEGER NOT NULL,
                PRIMARY KEY (vote_id, user_id, kind)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_cooldowns (
                user_id INTEGER PRIMARY KEY,
                last_vote_time TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS abstain_counters (
                user_id INTEGER PRIMARY KEY,
                count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_vote(row: &sqlx::sqlite::SqliteRow) -> Vote {
        let start_time_str: String = row.get("start_time");
        let start_time = DateTime::parse_from_rfc3339(&start_time_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let end_time = row
            .get::<Option<String>, _>("end_time")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let verdict = row.get::<Option<i64>, _>("final_net").map(|net| FinalTally {
            up: row.get::<Option<i64>, _>("final_up").unwrap_or(0),
            down: row.get::<Option<i64>, _>("final_down").unwrap_or(0),
            net,
            sanction_applied: row
                .get::<Option<bool>, _>("sanction_applied")
                .unwrap_or(false),
            cancelled: row.get::<Option<bool>, _>("cancelled").unwrap_or(false),
        });

        Vote {
            id: row.get("id"),
            guild_id: row.get::<i64, _>("guild_id") as u64,
            channel_id: row.get::<i64, _>("channel_id") as u64,
            message_id: row.get::<i64, _>("message_id") as u64,
            target_id: row.get::<i64, _>("target_id") as u64,
            initiator_id: row.get::<i64, _>("initiator_id") as u64,
            reason: row.get("reason"),
            start_time,
            completed: row.get("completed"),
            end_time,
            verdict,
        }
    }
}

#[async_trait]
impl VoteStore for SqliteVoteStore {
    async fn create_vote(&self, vote: &Vote) -> Result<(), VoteError> {
        sqlx::query(
            r#"
            INSERT INTO votes (
                id, guild_id, channel_id, message_id, target_id, initiator_id,
                reason, start_time, completed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&vote.id)
        .bind(vote.guild_id as i64)
        .bind(vote.channel_id as i64)
        .bind(vote.message_id as i64)
        .bind(vote.target_id as i64)
        .bind(vote.initiator_id as i64)
        .bind(&vote.reason)
        .bind(vote.start_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| VoteError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_vote(&self, vote_id: &str) -> Result<Option<Vote>, VoteError> {
        let row = sqlx::query("SELECT * FROM votes WHERE id = ?")
            .bind(vote_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(row.map(|r| Self::row_to_vote(&r)))
    }

    async fn get_vote_by_message(&self, message_id: u64) -> Result<Option<Vote>, VoteError> {
        let row = sqlx::query("SELECT * FROM votes WHERE message_id = ?")
            .bind(message_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(row.map(|r| Self::row_to_vote(&r)))
    }

    async fn list_active_votes(&self) -> Result<Vec<Vote>, VoteError> {
        let rows = sqlx::query("SELECT * FROM votes WHERE completed = 0 ORDER BY start_time")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_vote).collect())
    }

    async fn has_active_vote_against(&self, target_id: u64) -> Result<bool, VoteError> {
        let row = sqlx::query("SELECT 1 FROM votes WHERE target_id = ? AND completed = 0 LIMIT 1")
            .bind(target_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn claim_completion(&self, vote_id: &str, tally: &FinalTally) -> Result<bool, VoteError> {
        let result = sqlx::query(
            r#"
            UPDATE votes
            SET completed = 1,
                end_time = ?,
                final_up = ?,
                final_down = ?,
                final_net = ?,
                sanction_applied = ?,
                cancelled = ?
            WHERE id = ? AND completed = 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(tally.up)
        .bind(tally.down)
        .bind(tally.net)
        .bind(tally.sanction_applied)
        .bind(tally.cancelled)
        .bind(vote_id)
        .execute(&self.pool)
        .await
        .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_reaction(
        &self,
        vote_id: &str,
        user_id: u64,
        kind: ReactionKind,
        weight: u32,
    ) -> Result<(), VoteError> {
        sqlx::query(
            r#"
            INSERT INTO vote_reactions (vote_id, user_id, kind, weight)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(vote_id, user_id, kind) DO UPDATE SET
                weight = excluded.weight
            "#,
        )
        .bind(vote_id)
        .bind(user_id as i64)
        .bind(kind.as_str())
        .bind(weight as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| VoteError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_reaction(
        &self,
        vote_id: &str,
        user_id: u64,
        kind: ReactionKind,
    ) -> Result<(), VoteError> {
        sqlx::query("DELETE FROM vote_reactions WHERE vote_id = ? AND user_id = ? AND kind = ?")
            .bind(vote_id)
            .bind(user_id as i64)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_reactions(&self, vote_id: &str) -> Result<Vec<VoteReaction>, VoteError> {
        let rows = sqlx::query("SELECT user_id, kind, weight FROM vote_reactions WHERE vote_id = ?")
            .bind(vote_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        let mut reactions = Vec::new();
        for row in rows {
            let kind_str: String = row.get("kind");
            // Unknown kinds would mean a corrupted row; skip them.
            let Some(kind) = ReactionKind::from_str(&kind_str) else {
                tracing::warn!(vote_id, kind = %kind_str, "skipping reaction row with unknown kind");
                continue;
            };
            reactions.push(VoteReaction {
                user_id: row.get::<i64, _>("user_id") as u64,
                kind,
                weight: row.get::<i64, _>("weight") as u32,
            });
        }
        Ok(reactions)
    }

    async fn bump_abstain_count(&self, user_id: u64) -> Result<u32, VoteError> {
        sqlx::query(
            r#"
            INSERT INTO abstain_counters (user_id, count)
            VALUES (?, 1)
            ON CONFLICT(user_id) DO UPDATE SET
                count = count + 1
            "#,
        )
        .bind(user_id as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| VoteError::Storage(e.to_string()))?;

        // Get the updated count
        let row = sqlx::query("SELECT count FROM abstain_counters WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count as u32)
    }

    async fn get_cooldown(&self, user_id: u64) -> Result<Option<DateTime<Utc>>, VoteError> {
        let row = sqlx::query("SELECT last_vote_time FROM vote_cooldowns WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VoteError::Storage(e.to_string()))?;

        Ok(row.and_then(|r| {
            let time_str: String = r.get("last_vote_time");
            DateTime::parse_from_rfc3339(&time_str)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    async fn set_cooldown(&self, user_id: u64, last: DateTime<Utc>) -> Result<(), VoteError> {
        sqlx::query(
            r#"
            INSERT INTO vote_cooldowns (user_id, last_vote_time)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                last_vote_time = excluded.last_vote_time
            "#,
        )
        .bind(user_id as i64)
        .bind(last.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| VoteError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteVoteStore {
        SqliteVoteStore::new("sqlite::memory:")
            .await
            .expect("in-memory store should initialize")
    }

    fn sample_vote(id: &str, message_id: u64, target_id: u64) -> Vote {
        Vote {
            id: id.to_string(),
            guild_id: 1,
            channel_id: 42,
            message_id,
            target_id,
            initiator_id: 10,
            reason: "spamming".to_string(),
            start_time: Utc::now(),
            completed: false,
            end_time: None,
            verdict: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_by_id_and_message() {
        let store = memory_store().await;
        let vote = sample_vote("vote_abc123", 9001, 20);
        store.create_vote(&vote).await.unwrap();

        let by_id = store.get_vote("vote_abc123").await.unwrap().unwrap();
        assert_eq!(by_id.message_id, 9001);
        assert_eq!(by_id.target_id, 20);
        assert!(!by_id.completed);
        assert!(by_id.verdict.is_none());

        let by_message = store.get_vote_by_message(9001).await.unwrap().unwrap();
        assert_eq!(by_message.id, "vote_abc123");

        assert!(store.get_vote("vote_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_vote_queries_respect_completed_flag() {
        let store = memory_store().await;
        store
            .create_vote(&sample_vote("vote_one", 1, 20))
            .await
            .unwrap();
        store
            .create_vote(&sample_vote("vote_two", 2, 21))
            .await
            .unwrap();

        assert!(store.has_active_vote_against(20).await.unwrap());
        assert_eq!(store.list_active_votes().await.unwrap().len(), 2);

        let tally = FinalTally {
            up: 0,
            down: 0,
            net: 0,
            sanction_applied: false,
            cancelled: false,
        };
        assert!(store.claim_completion("vote_one", &tally).await.unwrap());

        assert!(!store.has_active_vote_against(20).await.unwrap());
        assert!(store.has_active_vote_against(21).await.unwrap());
        assert_eq!(store.list_active_votes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_can_only_be_claimed_once() {
        let store = memory_store().await;
        store
            .create_vote(&sample_vote("vote_claim", 1, 20))
            .await
            .unwrap();

        let tally = FinalTally {
            up: 9,
            down: 2,
            net: 7,
            sanction_applied: true,
            cancelled: false,
        };
        assert!(store.claim_completion("vote_claim", &tally).await.unwrap());
        assert!(!store.claim_completion("vote_claim", &tally).await.unwrap());
        assert!(!store.claim_completion("vote_nope", &tally).await.unwrap());

        let vote = store.get_vote("vote_claim").await.unwrap().unwrap();
        assert!(vote.completed);
        assert!(vote.end_time.is_some());
        let verdict = vote.verdict.unwrap();
        assert_eq!(verdict.net, 7);
        assert!(verdict.sanction_applied);
        assert!(!verdict.cancelled);
    }

    #[tokio::test]
    async fn reaction_upsert_replaces_weight() {
        let store = memory_store().await;
        store
            .create_vote(&sample_vote("vote_rx", 1, 20))
            .await
            .unwrap();

        store
            .upsert_reaction("vote_rx", 100, ReactionKind::Approve, 1)
            .await
            .unwrap();
        store
            .upsert_reaction("vote_rx", 100, ReactionKind::Approve, 2)
            .await
            .unwrap();

        let reactions = store.get_reactions("vote_rx").await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].weight, 2);
        assert_eq!(reactions[0].kind, ReactionKind::Approve);
    }

    #[tokio::test]
    async fn delete_reaction_removes_only_that_kind() {
        let store = memory_store().await;
        store
            .upsert_reaction("vote_rx", 100, ReactionKind::Approve, 1)
            .await
            .unwrap();
        store
            .upsert_reaction("vote_rx", 100, ReactionKind::Abstain, 3)
            .await
            .unwrap();

        store
            .delete_reaction("vote_rx", 100, ReactionKind::Abstain)
            .await
            .unwrap();

        let reactions = store.get_reactions("vote_rx").await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].kind, ReactionKind::Approve);
    }

    #[tokio::test]
    async fn abstain_counter_increments_monotonically() {
        let store = memory_store().await;

        assert_eq!(store.bump_abstain_count(100).await.unwrap(), 1);
        assert_eq!(store.bump_abstain_count(100).await.unwrap(), 2);
        assert_eq!(store.bump_abstain_count(100).await.unwrap(), 3);
        // Independent per user.
        assert_eq!(store.bump_abstain_count(200).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cooldown_round_trips() {
        let store = memory_store().await;
        assert!(store.get_cooldown(10).await.unwrap().is_none());

        let now = Utc::now();
        store.set_cooldown(10, now).await.unwrap();
        let stored = store.get_cooldown(10).await.unwrap().unwrap();
        assert!((stored - now).num_seconds().abs() < 1);

        let later = now + chrono::Duration::minutes(5);
        store.set_cooldown(10, later).await.unwrap();
        let stored = store.get_cooldown(10).await.unwrap().unwrap();
        assert!((stored - later).num_seconds().abs() < 1);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("votes.db");
        let url = db_path.to_string_lossy().to_string();

        {
            let store = SqliteVoteStore::new(&url).await.unwrap();
            store
                .create_vote(&sample_vote("vote_disk", 1, 20))
                .await
                .unwrap();
            store.bump_abstain_count(100).await.unwrap();
        }

        let reopened = SqliteVoteStore::new(&url).await.unwrap();
        assert!(reopened.get_vote("vote_disk").await.unwrap().is_some());
        assert_eq!(reopened.bump_abstain_count(100).await.unwrap(), 2);
    }
}
