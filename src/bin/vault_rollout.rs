//! vault-rollout - Contract rollout CLI
//!
//! Commands:
//! - **campaign**: Run or check a campaign file (deploy, configure, validate)
//! - **registry**: Read and write the per network/environment address book
//! - **timelock**: Queue timelock batches, execute saved batches, inspect snapshots
//!
//! # Examples
//!
//! ```bash
//! # Plan a campaign without sending anything
//! vault-rollout --network mainnet --env prod campaign run vaults.yaml --dry-run
//!
//! # Resume a failed run at a given step
//! vault-rollout --network mainnet --env prod campaign run vaults.yaml --from set-fee
//!
//! # Execute a batch queued two days ago
//! vault-rollout --env prod timelock execute 1700000000_ops_batch
//! ```
//!
//! Chain access needs `--rpc-url` and `--private-key` (or `ROLLOUT_RPC_URL`
//! and `ROLLOUT_PRIVATE_KEY`); registry and snapshot commands work offline.

mod rollout_cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rollout_cli::campaign::CampaignCmd;
use rollout_cli::registry::RegistryCmd;
use rollout_cli::timelock::TimelockCmd;
use vault_rollout::RolloutConfig;

#[derive(Parser)]
#[command(
    name = "vault-rollout",
    author,
    version,
    about = "Multi-network contract rollout",
    long_about = "Runs deployment campaigns against one network/environment, keeps the \
                  address registry and queues/executes timelocked transactions."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: RolloutConfig,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or check a campaign file
    Campaign(CampaignCmd),

    /// Read and write recorded addresses
    Registry(RegistryCmd),

    /// Queue, execute and inspect timelock batches
    Timelock(TimelockCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        config,
        json,
        verbose,
    } = Cli::parse();
    rollout_cli::init_tracing(verbose);

    match command {
        Commands::Campaign(cmd) => cmd.execute(&config, json).await,
        Commands::Registry(cmd) => cmd.execute(&config, json).await,
        Commands::Timelock(cmd) => cmd.execute(&config, json).await,
    }
}
