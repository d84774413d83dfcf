//! Chat-app custom emoji as a filesystem.
//!
//! Remote emoji collections (Slack workspaces, Discord guilds) are exposed
//! through the path-based [`VfsOps`] trait. A [`MountTable`] merges several
//! backends into one tree; a host transport (FUSE, in the `emojifs` binary)
//! drives it.
//!
//! ```text
//! MountTable ─┬─ /slack/acme  → EmojiFs<SlackService>
//!             ├─ /discord     → EmojiFs<DiscordService>
//!             └─ /scratch     → EmojiFs<MemoryService>
//! ```
//!
//! [`EmojiFs`] owns the generic parts (metadata caches, content fetching,
//! write buffering); each [`EmojiService`] only lists and mutates.

pub mod adapter;
pub mod api;
pub mod backends;
pub mod buffers;
pub mod cache;
pub mod emoji;
pub mod vfs;

pub use adapter::{EmojiFs, EmojiService, Layout};
pub use api::{ContentFetcher, HttpTransport, RateLimitedClient, ReqwestTransport};
pub use backends::{DiscordService, MemoryService, SlackService, scrape_tokens};
pub use cache::MetadataCache;
pub use emoji::{Collection, ContentLocator, Entity, ImageFormat};
pub use vfs::{
    DirEntry, FileAttr, FileType, MountTable, MountTableBuilder, VfsError, VfsOps, VfsResult,
};
