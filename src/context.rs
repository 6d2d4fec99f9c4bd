//! Everything a run acts on, passed explicitly to every step.

use anyhow::{anyhow, Result};
use rollout_client::{ArtifactStore, ChainClient, SendOptions};
use rollout_registry::{FsAddressRegistry, RegistryError, SnapshotStore};
use rollout_timelock::{BatchStore, ContractTimelock, TimelockEngine};
use rollout_types::{Address, Target, U256};
use std::path::Path;
use std::sync::Arc;

use crate::resolve::Inputs;

#[derive(Clone)]
pub struct RolloutContext {
    pub target: Target,
    pub registry: FsAddressRegistry,
    pub snapshots: SnapshotStore,
    pub artifacts: ArtifactStore,
    chain: Option<Arc<dyn ChainClient>>,
    gas_price: Option<U256>,
}

impl RolloutContext {
    /// Offline context: registry and snapshots only.
    pub fn new(target: Target, deployments_dir: &Path, artifacts_dir: &Path) -> Self {
        Self {
            target,
            registry: FsAddressRegistry::new(deployments_dir),
            snapshots: SnapshotStore::new(deployments_dir),
            artifacts: ArtifactStore::new(artifacts_dir),
            chain: None,
            gas_price: None,
        }
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainClient>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_gas_price(mut self, gas_price: Option<U256>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn chain(&self) -> Result<&Arc<dyn ChainClient>> {
        self.chain
            .as_ref()
            .ok_or_else(|| anyhow!("no chain connection; pass --rpc-url and --private-key"))
    }

    pub fn has_chain(&self) -> bool {
        self.chain.is_some()
    }

    /// Signing account, when connected.
    pub fn deployer(&self) -> Option<Address> {
        self.chain.as_ref().map(|chain| chain.sender())
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            gas_price: self.gas_price,
            ..SendOptions::default()
        }
    }

    /// Look up every name in the registry, failing on the first missing one.
    pub fn resolve(&self, names: &[String]) -> Result<Inputs, RegistryError> {
        let mut inputs = Inputs::new(self.deployer());
        for name in names {
            inputs.insert(name.clone(), self.registry.address(&self.target, name)?);
        }
        Ok(inputs)
    }

    pub fn batches(&self) -> BatchStore {
        BatchStore::new(self.snapshots.clone(), self.target.clone())
    }

    /// Engine bound to the timelock at `address`.
    pub fn timelock_engine(&self, address: Address) -> Result<TimelockEngine> {
        let client = ContractTimelock::new(self.chain()?.clone(), address);
        Ok(TimelockEngine::new(Arc::new(client)).with_gas_price(self.gas_price))
    }
}
