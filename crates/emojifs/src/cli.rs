//! Command-line arguments.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "emojifs", version, about = "Chat-app custom emoji as a filesystem")]
pub struct Args {
    /// Where to mount; overrides `emojifs.mountpoint` in the config file
    #[arg(short, long)]
    pub mountpoint: Option<PathBuf>,

    /// Stay attached to the terminal instead of serving from a background thread
    #[arg(short, long)]
    pub foreground: bool,

    /// Configuration file (default: ~/.emojifs.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for more (-v info, -vv debug, -vvv trace)
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,
}
