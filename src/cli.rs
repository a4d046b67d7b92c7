use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// API Bridge: session-token gateway for an unauthenticated resource API
#[derive(Parser)]
#[command(name = "api-bridge", version, about)]
pub struct Cli {
    /// JSON config file; BRIDGE_* environment variables are used when omitted
    #[arg(short, long, global = true, env = "BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server (default)
    Serve {
        /// Port to bind, overriding the configured one
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Purge expired tokens once and exit
    Sweep,
}
