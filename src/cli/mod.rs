//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use clap::{Parser, Subcommand};

use crate::application::OutputFormat;
use crate::domain::DiscoveryMode;

/// localwave - LAN chat broker with offline message store and cloud sync.
#[derive(Parser, Debug)]
#[command(name = "localwave")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format: table or json.
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP/WebSocket broker and the background sync task.
    Serve {
        /// Listen address (overrides `server.bind`).
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Discover devices on the local network.
    Scan {
        /// real, simulated or real-with-fallback (overrides `discovery.mode`).
        #[arg(short, long)]
        mode: Option<DiscoveryMode>,
    },

    /// Push unsynced messages to the cloud now.
    Sync,

    /// Fetch the full message set from the cloud.
    Pull,

    /// Show how many messages are waiting for the cloud.
    Pending,

    /// List locally stored messages.
    Messages {
        /// Show only the most recent N messages.
        #[arg(short, long)]
        last: Option<usize>,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Write a commented default config file if none exists.
    Init,
    /// Print the effective configuration.
    Show,
    /// Print the config file path.
    Path,
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}
