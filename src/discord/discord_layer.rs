// Discord layer - commands, event handlers and the platform adapter.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "voting/mod.rs"]
pub mod voting;

// Re-export command types for convenience
pub use commands::votes::{Data, Error};
