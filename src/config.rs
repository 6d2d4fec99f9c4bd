//! Run configuration: flags with environment fallbacks.

use anyhow::{Context, Result};
use clap::Args;
use rollout_client::{ChainClient, RpcClient};
use rollout_types::{Environment, Target, U256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::context::RolloutContext;

#[derive(Debug, Clone, Args)]
pub struct RolloutConfig {
    /// Network name; `/` nests (e.g. `mainnet/eth`)
    #[arg(long, env = "ROLLOUT_NETWORK", default_value = "localhost", global = true)]
    pub network: String,

    /// Deployment environment (develop or prod)
    #[arg(long = "env", env = "DEPLOYMENT_ENV", default_value = "develop", global = true)]
    pub environment: Environment,

    /// Root of the address registry and snapshots
    #[arg(long, env = "ROLLOUT_DEPLOYMENTS_DIR", default_value = "deployments", global = true)]
    pub deployments_dir: PathBuf,

    /// Hardhat artifacts directory
    #[arg(long, env = "ROLLOUT_ARTIFACTS_DIR", default_value = "artifacts", global = true)]
    pub artifacts_dir: PathBuf,

    /// JSON-RPC endpoint (only for commands that touch the chain)
    #[arg(long, env = "ROLLOUT_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// Signer private key, hex
    #[arg(long, env = "ROLLOUT_PRIVATE_KEY", hide_env_values = true, global = true)]
    pub private_key: Option<String>,

    /// Fixed gas price in gwei instead of the node's suggestion
    #[arg(long, env = "ROLLOUT_GAS_PRICE_GWEI", global = true)]
    pub gas_price_gwei: Option<u64>,
}

impl RolloutConfig {
    pub fn target(&self) -> Target {
        Target::new(self.network.clone(), self.environment)
    }

    pub fn gas_price(&self) -> Option<U256> {
        self.gas_price_gwei
            .map(|gwei| U256::from(gwei) * U256::exp10(9))
    }

    /// Context without a chain connection.
    pub fn offline_context(&self) -> RolloutContext {
        RolloutContext::new(self.target(), &self.deployments_dir, &self.artifacts_dir)
            .with_gas_price(self.gas_price())
    }

    /// Context with a signer, failing if the connection settings are missing.
    pub async fn connected_context(&self) -> Result<RolloutContext> {
        let chain = self.connect().await?;
        Ok(self.offline_context().with_chain(chain))
    }

    /// Connect when both `--rpc-url` and `--private-key` are given.
    pub async fn optional_context(&self) -> Result<RolloutContext> {
        if self.rpc_url.is_some() && self.private_key.is_some() {
            self.connected_context().await
        } else {
            Ok(self.offline_context())
        }
    }

    async fn connect(&self) -> Result<Arc<dyn ChainClient>> {
        let rpc_url = self
            .rpc_url
            .as_deref()
            .context("--rpc-url (or ROLLOUT_RPC_URL) is required for this command")?;
        let private_key = self
            .private_key
            .as_deref()
            .context("--private-key (or ROLLOUT_PRIVATE_KEY) is required for this command")?;
        let client = RpcClient::connect(rpc_url, private_key)
            .await
            .with_context(|| format!("Failed to connect to {}", rpc_url))?;
        Ok(Arc::new(client))
    }
}
