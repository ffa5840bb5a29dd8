//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the GATT service layout as JSON
    Layout,
    /// Run the bridge scenarios against in-memory collaborators
    Simulate {
        /// Readiness timeout used by the timeout scenario (milliseconds)
        #[arg(long, default_value_t = 200)]
        ready_timeout_ms: u64,
    },
    /// Serve the bridge on the local Bluetooth adapter
    Serve {
        /// Local name to advertise
        #[arg(short, long)]
        name: Option<String>,
    },
}
