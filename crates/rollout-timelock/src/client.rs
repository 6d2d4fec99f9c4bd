//! The remote timelock capability.

use rollout_client::{ChainClient, RemoteError, SendOptions, TxReceipt};
use rollout_types::{Address, TimelockCall, U256};
use std::sync::Arc;

/// `queueTransaction` / `executeTransaction` of a deployed timelock.
#[async_trait::async_trait]
pub trait TimelockClient: Send + Sync {
    fn address(&self) -> Address;

    async fn queue_transaction(
        &self,
        call: &TimelockCall,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError>;

    /// Gas estimate for executing `call` now.
    async fn estimate_execution(&self, call: &TimelockCall) -> Result<U256, RemoteError>;

    async fn execute_transaction(
        &self,
        call: &TimelockCall,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError>;
}

/// A Compound-style timelock contract reached through a `ChainClient`.
#[derive(Clone)]
pub struct ContractTimelock {
    chain: Arc<dyn ChainClient>,
    address: Address,
}

impl ContractTimelock {
    pub fn new(chain: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { chain, address }
    }
}

#[async_trait::async_trait]
impl TimelockClient for ContractTimelock {
    fn address(&self) -> Address {
        self.address
    }

    async fn queue_transaction(
        &self,
        call: &TimelockCall,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError> {
        self.chain
            .send(self.address, call.queue_calldata(), options)
            .await
    }

    async fn estimate_execution(&self, call: &TimelockCall) -> Result<U256, RemoteError> {
        self.chain
            .estimate_gas(self.address, call.execute_calldata(), None)
            .await
    }

    async fn execute_transaction(
        &self,
        call: &TimelockCall,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError> {
        self.chain
            .send(self.address, call.execute_calldata(), options)
            .await
    }
}
