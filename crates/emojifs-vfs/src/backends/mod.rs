//! Concrete emoji services.
//!
//! - [`SlackService`] - one Slack workspace (flat)
//! - [`DiscordService`] - every guild of one Discord account (grouped)
//! - [`MemoryService`] - ephemeral, for `/scratch` and tests

pub mod discord;
pub mod memory;
pub mod slack;

pub use discord::DiscordService;
pub use memory::MemoryService;
pub use slack::{SlackService, scrape_tokens};
