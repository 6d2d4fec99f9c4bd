//! The chain capability every remote step goes through.

use rollout_types::{Address, Bytes, H256, U256};

use crate::error::RemoteError;

/// Per-transaction overrides. Unset fields are left to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub nonce: Option<U256>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
}

impl SendOptions {
    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// A mined contract creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// Signed access to one chain.
///
/// Every submitting method waits for inclusion before returning. A mined
/// transaction with failed status is `RemoteError::Reverted`.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Address transactions are signed with.
    fn sender(&self) -> Address;

    async fn block_number(&self) -> Result<u64, RemoteError>;

    /// Timestamp of the latest block.
    async fn timestamp(&self) -> Result<u64, RemoteError>;

    /// Next unused nonce of the sender, including pending transactions.
    async fn next_nonce(&self) -> Result<U256, RemoteError>;

    /// Submit contract creation code (bytecode followed by encoded constructor args).
    async fn deploy(&self, init_code: Bytes, options: &SendOptions) -> Result<Deployment, RemoteError>;

    async fn send(
        &self,
        to: Address,
        calldata: Bytes,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError>;

    /// Read-only call against the latest block.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, RemoteError>;

    async fn estimate_gas(
        &self,
        to: Address,
        calldata: Bytes,
        value: Option<U256>,
    ) -> Result<U256, RemoteError>;
}
