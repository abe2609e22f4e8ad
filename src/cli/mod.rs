//! Command-line interface for the panel.

mod commands;

use clap::{Parser, Subcommand};

/// Plex Panel - subscriptions, invitations and payments for a shared Plex server
#[derive(Parser)]
#[command(name = "plexpanel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the web panel and the scheduler (default)
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run the daily maintenance jobs once and exit
    #[command(alias = "-c", alias = "--check")]
    Check,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Create an invitation and print its URL
    Invite {
        /// Library titles, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        libraries: Vec<String>,
        /// Simultaneous streams (0 = unlimited)
        #[arg(short, long, default_value_t = 0)]
        screens: i32,
        /// Allow media downloads
        #[arg(long)]
        downloads: bool,
        /// Trial length in minutes (0 = no trial)
        #[arg(short, long, default_value_t = 0)]
        trial: i32,
        /// Grant Overseerr access on claim
        #[arg(long)]
        overseerr: bool,
        /// How many accounts may claim it
        #[arg(short, long, default_value_t = 1)]
        uses: i32,
        /// Invitation validity in minutes
        #[arg(short, long)]
        expires: Option<i64>,
        /// Custom code instead of a random one
        #[arg(long)]
        code: Option<String>,
    },

    /// List invitations that can still be claimed
    #[command(alias = "ls")]
    Invites,

    /// Show recent panel notifications
    #[command(alias = "n")]
    Notifications {
        /// Number of entries to show
        #[arg(default_value = "15")]
        limit: u64,
        /// Include notifications already read
        #[arg(long)]
        all: bool,
        /// Mark everything as read afterwards
        #[arg(long)]
        mark_read: bool,
    },
}

pub use commands::*;
