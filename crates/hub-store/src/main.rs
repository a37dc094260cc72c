//! hub-store - CRDT state engine for casts, reactions, links,
//! verifications, user data, and username proofs.

use clap::Parser;
use hub_store::config::{Command, Config, IdentityCommand, MigrationCommand};
use hub_store::engine::Engine;
use hub_types::crypto::Ed25519KeyPair;
use hub_types::{FarcasterNetwork, Message, OnChainEvent};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hub_store=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(error) = config.validate() {
        error!("invalid configuration: {error}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    info!(
        "hub-store v{} starting on {:?}",
        env!("CARGO_PKG_VERSION"),
        config.network
    );

    let domain_separator = username_proof_domain_separator();
    let network: FarcasterNetwork = config.network.into();
    let engine = match Engine::open(
        &config.data_dir,
        network,
        domain_separator,
        config.statsd_metrics_server.as_deref(),
    ) {
        Ok(engine) => engine,
        Err(error) => {
            error!("failed to open engine: {error}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &config.command {
        Command::Start { job_poll_interval_secs } => run_start(&engine, *job_poll_interval_secs).await,
        Command::Identity { command } => run_identity(command),
        Command::Migration { command } => run_migration(&engine, command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

/// Drain revoke jobs on an interval until ctrl-c. The wire transport that
/// would serve reads/writes to peers is out of scope here; this keeps the
/// background job queue moving for whatever embeds this binary as a
/// long-running process.
async fn run_start(engine: &Engine, poll_interval_secs: u64) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.run_revoke_jobs(|| true) {
                    Ok(processed) if processed > 0 => {
                        info!(processed, "drained revoke-by-signer jobs");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "revoke job drain failed"),
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }
    Ok(())
}

fn run_identity(command: &IdentityCommand) -> anyhow::Result<()> {
    match command {
        IdentityCommand::Create => {
            let keypair = Ed25519KeyPair::generate();
            println!("public_key: {}", hex::encode(keypair.public_key()));
        }
    }
    Ok(())
}

/// Replay a newline-delimited file of hex-encoded, postcard-serialized rows
/// through the engine. Each line is independent: a bad line is logged and
/// skipped rather than aborting the whole backfill.
fn run_migration(engine: &Engine, command: &MigrationCommand) -> anyhow::Result<()> {
    match command {
        MigrationCommand::BackfillMessages { path } => {
            let contents = std::fs::read_to_string(path)?;
            let now = current_farcaster_time();
            let mut merged = 0;
            let mut skipped = 0;
            for (line_number, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = hex::decode(line.trim())
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| postcard::from_bytes::<Message>(&bytes).map_err(anyhow::Error::from))
                    .and_then(|message| engine.submit_message(message, now).map_err(anyhow::Error::from));
                match outcome {
                    Ok(_) => merged += 1,
                    Err(error) => {
                        warn!(line = line_number + 1, %error, "skipped malformed backfill row");
                        skipped += 1;
                    }
                }
            }
            info!(merged, skipped, "message backfill complete");
            Ok(())
        }
        MigrationCommand::BackfillOnchainEvents { path } => {
            let contents = std::fs::read_to_string(path)?;
            let mut merged = 0;
            let mut skipped = 0;
            for (line_number, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = hex::decode(line.trim())
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| {
                        postcard::from_bytes::<OnChainEvent>(&bytes).map_err(anyhow::Error::from)
                    })
                    .and_then(|event| engine.submit_onchain_event(event).map_err(anyhow::Error::from));
                match outcome {
                    Ok(_) => merged += 1,
                    Err(error) => {
                        warn!(line = line_number + 1, %error, "skipped malformed backfill row");
                        skipped += 1;
                    }
                }
            }
            info!(merged, skipped, "on-chain event backfill complete");
            Ok(())
        }
    }
}

fn current_farcaster_time() -> u32 {
    let unix_seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs();
    (unix_seconds - hub_types::FARCASTER_EPOCH_UNIX_SECONDS) as u32
}

/// Domain separator for the embedded EIP-712 username-proof check. Fixed for
/// the lifetime of this process; rotating it would orphan every proof signed
/// under the old value.
fn username_proof_domain_separator() -> [u8; 32] {
    hub_types::crypto::keccak256(b"hub-store username-proof v1")
}
