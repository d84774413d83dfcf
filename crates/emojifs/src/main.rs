//! emojifs binary.
//!
//! Mounts custom emoji from Slack workspaces and Discord guilds as files.
//!
//! Usage:
//!   # Mount using ~/.emojifs.toml, serving until SIGINT/SIGTERM
//!   emojifs
//!
//!   # Explicit mountpoint, attached to the terminal, debug logging
//!   emojifs -m ~/emoji -f -vv
//!
//! Layout:
//!   /slack/<workspace>/<emoji>.<ext>
//!   /discord/<guild>/<emoji>.<ext>
//!   /scratch/<emoji>.<ext>

mod cli;
mod config;
mod fuse;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use emojifs_vfs::{
    ContentFetcher, DiscordService, EmojiFs, HttpTransport, MemoryService, MountTable,
    ReqwestTransport, SlackService, scrape_tokens,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cli::Args;
use crate::config::Config;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = Config::load(args.config.as_deref())?;
    let mountpoint = config.mountpoint(args.mountpoint.as_deref())?;
    let foreground = args.foreground || config.emojifs.foreground;

    // Built by hand: the FUSE callbacks block on it from threads it does
    // not own.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("emojifs")
        .build()
        .context("failed to start tokio runtime")?;

    let table = runtime.block_on(build_mounts(&config))?;
    tracing::info!(mounts = ?table.mount_points(), "mount table ready");

    fuse::mount(
        Arc::new(table),
        runtime.handle().clone(),
        &mountpoint,
        foreground,
    )
}

/// Connect every configured backend and lay them out.
async fn build_mounts(config: &Config) -> Result<MountTable> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new().context("failed to build HTTP client")?);
    let content = Arc::new(ContentFetcher::new(transport.clone()));

    let mut builder = MountTable::builder();
    let mut mounted = 0usize;

    for workspace in slack_workspaces(config, &transport).await {
        let path = format!("/slack/{}", workspace.workspace());
        builder = builder.mount(path, EmojiFs::new(workspace, content.clone()));
        mounted += 1;
    }

    if let Some(token) = config.discord_token() {
        match DiscordService::connect(transport.clone(), token).await {
            Ok(discord) => {
                builder = builder.mount("/discord", EmojiFs::new(discord, content.clone()));
                mounted += 1;
            }
            Err(e) => tracing::error!(error = %e, "failed to connect to Discord"),
        }
    }

    if config.scratch.enabled {
        let scratch = MemoryService::flat("scratch");
        builder = builder.mount("/scratch", EmojiFs::new(scratch, content.clone()));
        mounted += 1;
    }

    if mounted == 0 {
        tracing::warn!("nothing configured; mounting an empty filesystem");
    }
    builder.build().context("invalid mount layout")
}

/// Authenticate every configured and scraped Slack token.
///
/// Tokens that fail to authenticate are logged and skipped. When two tokens
/// land on the same (renamed) workspace, the first one wins.
async fn slack_workspaces(
    config: &Config,
    transport: &Arc<dyn HttpTransport>,
) -> Vec<SlackService> {
    let mut tokens = config.slack.tokens.clone();
    for cookie in &config.slack.cookies {
        match scrape_tokens(transport.as_ref(), cookie).await {
            Ok(found) => tokens.extend(found),
            Err(e) => tracing::error!(error = %e, "failed to scrape Slack tokens from cookie"),
        }
    }

    let mut seen_tokens = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut workspaces = Vec::new();
    for token in tokens {
        if !seen_tokens.insert(token.clone()) {
            continue;
        }
        let service = match SlackService::connect(transport.clone(), &token).await {
            Ok(service) => service,
            Err(e) => {
                tracing::error!(error = %e, "failed to authenticate Slack token");
                continue;
            }
        };
        let name = config.slack_name(service.workspace()).to_string();
        if !seen_names.insert(name.clone()) {
            tracing::warn!(workspace = %name, "workspace already mounted, skipping token");
            continue;
        }
        workspaces.push(service.renamed(name));
    }
    workspaces
}
