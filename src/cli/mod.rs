//! Spot executor CLI
//!
//! Commands:
//! - `spot-executor serve` - Run the webhook server (default)
//! - `spot-executor state` - Inspect or repair stored positions
//! - `spot-executor idempotency` - Inspect or purge idempotency records

pub mod idempotency;
pub mod state;

use clap::{Parser, Subcommand};

pub use idempotency::IdempotencyCommands;
pub use state::StateCommands;

/// Webhook-driven spot executor
#[derive(Parser, Debug)]
#[command(name = "spot-executor")]
#[command(author, version, about = "Webhook-driven spot executor for Binance")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, env = "EXECUTOR_CONFIG_DIR", default_value = "config", global = true)]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the webhook server
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or repair stored positions
    #[command(subcommand)]
    State(StateCommands),

    /// Inspect or purge idempotency records
    #[command(subcommand)]
    Idempotency(IdempotencyCommands),
}
