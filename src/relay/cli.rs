// CLI commands for the mission relay

use crate::relay::config::DEFAULT_LISTEN_ADDR;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Mission relay CLI
#[derive(Debug, Parser)]
#[command(name = "mission-relay")]
#[command(about = "Policy-enforcing message relay between ICC, client and operator participants")]
pub struct RelayCli {
    #[command(subcommand)]
    pub command: RelayCommand,
}

/// Relay subcommands
#[derive(Debug, Subcommand)]
pub enum RelayCommand {
    /// Run the relay server
    Serve {
        /// Address to listen on for WebSocket and HTTP requests
        #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
        listen: SocketAddr,

        /// Directory for the history database (default: ~/.mission-relay)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the recorded history of a mission
    History {
        /// Mission id
        #[arg(short, long)]
        mission: String,

        /// Directory for the history database (default: ~/.mission-relay)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Print raw JSON instead of one line per message
        #[arg(long)]
        json: bool,
    },

    /// List missions that have recorded history
    Missions {
        /// Directory for the history database (default: ~/.mission-relay)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}
