// Implementations for the voting system.

pub mod sqlite_vote_store;

// Re-export for convenience
pub use sqlite_vote_store::SqliteVoteStore;
