//! Configuration file (`~/.emojifs.toml`).
//!
//! ```toml
//! [emojifs]
//! mountpoint = "~/emoji"
//!
//! [slack]
//! tokens = ["xoxp-..."]
//! cookies = ["xoxd-..."]
//! [slack.renames]
//! oldteam = "newname"
//!
//! [discord]
//! token = "..."
//! acknowledged = "I understand that using this program violates Discord's ToS"
//!
//! [scratch]
//! enabled = true
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const FILE_NAME: &str = ".emojifs.toml";

/// Exact phrase required before the Discord backend is mounted.
pub const DISCORD_ACKNOWLEDGEMENT: &str =
    "I understand that using this program violates Discord's ToS";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub emojifs: General,
    pub slack: Slack,
    pub discord: Discord,
    pub scratch: Scratch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct General {
    pub mountpoint: Option<String>,
    pub foreground: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Slack {
    pub tokens: Vec<String>,
    /// `d` login cookies; tokens are scraped for every signed-in workspace.
    pub cookies: Vec<String>,
    /// Discovered workspace name → name to mount under.
    pub renames: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Discord {
    pub token: Option<String>,
    pub acknowledged: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scratch {
    pub enabled: bool,
}

impl Config {
    /// `~/.emojifs.toml`, if there is a home directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(FILE_NAME))
    }

    /// Load the given file, or the default one.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// an empty configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    tracing::info!("no configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Mountpoint from the command line, falling back to the file.
    pub fn mountpoint(&self, cli: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli {
            return Ok(path.to_path_buf());
        }
        let raw = self
            .emojifs
            .mountpoint
            .as_deref()
            .context("no mountpoint given on the command line or in the config file")?;
        let expanded = shellexpand::full(raw)
            .with_context(|| format!("failed to expand mountpoint {raw:?}"))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Name a Slack workspace should be mounted under.
    pub fn slack_name<'a>(&'a self, discovered: &'a str) -> &'a str {
        self.slack
            .renames
            .get(discovered)
            .map(String::as_str)
            .unwrap_or(discovered)
    }

    /// The Discord token, if one is configured and the terms were acknowledged.
    ///
    /// A token without the acknowledgement is reported and ignored.
    pub fn discord_token(&self) -> Option<&str> {
        let token = self.discord.token.as_deref()?;
        if self.discord.acknowledged.as_deref() == Some(DISCORD_ACKNOWLEDGEMENT) {
            Some(token)
        } else {
            tracing::error!(
                "not mounting Discord: set discord.acknowledged to {:?}",
                DISCORD_ACKNOWLEDGEMENT
            );
            None
        }
    }
}
