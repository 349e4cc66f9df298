// Discord adapters for the voting core.

pub mod embeds;
pub mod platform;
pub mod reactions;
