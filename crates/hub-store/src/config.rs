//! CLI surface and environment bindings (spec §6).

use clap::{Parser, Subcommand};
use hub_types::FarcasterNetwork;
use std::path::PathBuf;

/// hub-store - Farcaster Hub state engine
#[derive(Parser, Debug, Clone)]
#[command(name = "hub-store")]
#[command(about = "CRDT state engine: typed message stores, on-chain event ingestion, sync trie")]
pub struct Config {
    /// Data directory for the embedded KV store
    #[arg(short, long, default_value = "./data/hub-store", global = true)]
    pub data_dir: PathBuf,

    /// Network this hub validates messages against
    #[arg(long, env = "FC_NETWORK_ID", default_value = "mainnet", global = true)]
    pub network: NetworkArg,

    /// Ethereum mainnet RPC endpoint, used to resolve custody/recovery addresses
    #[arg(long, env = "ETH_MAINNET_RPC_URL", global = true)]
    pub eth_mainnet_rpc_url: Option<String>,

    /// Ethereum L2 RPC endpoint the on-chain event contracts are deployed on
    #[arg(long, env = "ETH_RPC_URL", global = true)]
    pub eth_rpc_url: Option<String>,

    /// `host:port` of a statsd collector; metrics are a no-op when unset
    #[arg(long, env = "STATSD_METRICS_SERVER", global = true)]
    pub statsd_metrics_server: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum NetworkArg {
    Mainnet,
    Testnet,
    Devnet,
}

impl From<NetworkArg> for FarcasterNetwork {
    fn from(value: NetworkArg) -> Self {
        match value {
            NetworkArg::Mainnet => FarcasterNetwork::Mainnet,
            NetworkArg::Testnet => FarcasterNetwork::Testnet,
            NetworkArg::Devnet => FarcasterNetwork::Devnet,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the engine: drain revoke jobs and serve reads/writes to callers
    Start {
        /// Poll interval, in seconds, between revoke-job queue drains
        #[arg(long, default_value = "5")]
        job_poll_interval_secs: u64,
    },
    /// Identity-key utilities
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },
    /// Bulk-load historical state ahead of normal operation
    Migration {
        #[command(subcommand)]
        command: MigrationCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum IdentityCommand {
    /// Generate an ed25519 signer keypair and print it as hex
    Create,
}

#[derive(Subcommand, Debug, Clone)]
pub enum MigrationCommand {
    /// Replay a newline-delimited, postcard-encoded file of signed messages
    BackfillMessages {
        #[arg(long)]
        path: PathBuf,
    },
    /// Replay a newline-delimited, postcard-encoded file of on-chain events
    BackfillOnchainEvents {
        #[arg(long)]
        path: PathBuf,
    },
}

impl Config {
    /// Mirrors spec §6's exit-code contract: config-level problems are
    /// distinguished from generic runtime failures so callers (systemd,
    /// shell scripts) can tell the two apart.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Command::Migration {
            command: MigrationCommand::BackfillMessages { path } | MigrationCommand::BackfillOnchainEvents { path },
        } = &self.command
        {
            if !path.exists() {
                anyhow::bail!("migration input file does not exist: {}", path.display());
            }
        }
        Ok(())
    }
}
