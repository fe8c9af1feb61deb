//! CLI argument definitions for the sync daemon.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

/// Stream Deck sync daemon.
///
/// Keeps locally attached Stream Deck panels in sync with a shared NATS
/// key-value bucket and publishes button presses on the bus.
#[derive(Parser, Debug)]
#[command(name = "sds", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log JSON lines instead of human-readable output
    #[arg(long, global = true, env = "SDS_LOG_JSON")]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Settings file (default: <config-dir>/config.toml when present)
    #[arg(long, short = 'c', global = true, env = "SDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the settings file and the instance id
    #[arg(long, global = true, env = "SDS_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Overrides for the store connection and engine behaviour.
#[derive(Args, Debug, Default, Clone)]
pub struct StoreArgs {
    /// NATS server URL
    #[arg(long, global = true)]
    pub nats_url: Option<String>,

    /// Key-value bucket name
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Prefix joined to relative image references
    #[arg(long, global = true)]
    pub asset_path: Option<String>,

    /// Follow changes of the current profile and page pointers
    #[arg(long, global = true)]
    pub track_pointers: bool,
}

impl StoreArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            nats_url: self.nats_url.clone(),
            bucket: self.bucket.clone(),
            asset_path: self.asset_path.clone(),
            track_pointer_changes: self.track_pointers.then_some(true),
        }
    }
}

/// Available commands. Without one the daemon runs.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the store and sync attached devices until interrupted
    Run,

    /// Print this host's instance id, creating it on first use
    InstanceId,

    /// List attached HID devices and how they classify
    List(ListArgs),

    /// Show version and build information
    Version,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include devices that are not supported Stream Deck models
    #[arg(long, short = 'a')]
    pub all: bool,
}
