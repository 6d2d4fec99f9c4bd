//! JSON-RPC adapter over ethers middleware.

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{BlockNumber, TransactionReceipt, TransactionRequest, U64};
use rollout_types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{ChainClient, Deployment, SendOptions, TxReceipt};
use crate::error::RemoteError;

/// Provider signing with a local private key.
pub type SignedProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// `ChainClient` backed by any ethers middleware stack.
#[derive(Debug, Clone)]
pub struct RpcClient<M> {
    inner: Arc<M>,
    sender: Address,
}

impl<M: Middleware> RpcClient<M> {
    pub fn new(inner: Arc<M>, sender: Address) -> Self {
        Self { inner, sender }
    }
}

impl RpcClient<SignedProvider> {
    /// Connect to `rpc_url` and sign with `private_key` (hex, `0x` optional).
    pub async fn connect(rpc_url: &str, private_key: &str) -> Result<Self, RemoteError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RemoteError::Transport(format!("invalid rpc url `{}`: {}", rpc_url, e)))?;
        let chain_id = provider.get_chainid().await.map_err(classify)?;
        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| RemoteError::Transport("private key is not a valid secp256k1 key".to_string()))?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let sender = wallet.address();
        info!(chain_id = %chain_id, sender = ?sender, "connected to rpc");
        Ok(Self::new(Arc::new(SignerMiddleware::new(provider, wallet)), sender))
    }
}

impl<M: Middleware + 'static> RpcClient<M> {
    fn request(&self, to: Option<Address>, calldata: Bytes, options: &SendOptions) -> TransactionRequest {
        let mut tx = TransactionRequest::new().from(self.sender).data(calldata);
        if let Some(to) = to {
            tx = tx.to(to);
        }
        if let Some(nonce) = options.nonce {
            tx = tx.nonce(nonce);
        }
        if let Some(gas) = options.gas_limit {
            tx = tx.gas(gas);
        }
        if let Some(gas_price) = options.gas_price {
            tx = tx.gas_price(gas_price);
        }
        if let Some(value) = options.value {
            tx = tx.value(value);
        }
        tx
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TransactionReceipt, RemoteError> {
        let pending: PendingTransaction<'_, M::Provider> =
            self.inner.send_transaction(tx, None).await.map_err(classify)?;
        let tx_hash = pending.tx_hash();
        debug!(tx_hash = ?tx_hash, "transaction submitted, waiting for inclusion");

        let receipt = pending
            .await
            .map_err(|e| unconfirmed(tx_hash, e))?
            .ok_or_else(|| {
                RemoteError::Transport(format!("transaction {:?} dropped before inclusion", tx_hash))
            })?;
        if receipt.status == Some(U64::zero()) {
            return Err(RemoteError::Reverted {
                tx_hash,
                reason: "execution reverted".to_string(),
            });
        }
        Ok(receipt)
    }
}

/// A failure after broadcast: the transaction may still land with its nonce.
fn unconfirmed(tx_hash: H256, err: impl std::fmt::Display) -> RemoteError {
    warn!(tx_hash = ?tx_hash, error = %err, "lost track of a broadcast transaction");
    RemoteError::Unconfirmed {
        tx_hash,
        reason: err.to_string(),
    }
}

/// JSON-RPC error responses are node-side refusals; anything else is transport.
fn classify<E: MiddlewareError>(err: E) -> RemoteError {
    match err.as_error_response() {
        Some(response) => RemoteError::Rejected {
            reason: response.message.clone(),
        },
        None => RemoteError::Transport(err.to_string()),
    }
}

#[async_trait::async_trait]
impl<M: Middleware + 'static> ChainClient for RpcClient<M> {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn block_number(&self) -> Result<u64, RemoteError> {
        Ok(self.inner.get_block_number().await.map_err(classify)?.as_u64())
    }

    async fn timestamp(&self) -> Result<u64, RemoteError> {
        let block = self
            .inner
            .get_block(BlockNumber::Latest)
            .await
            .map_err(classify)?
            .ok_or_else(|| RemoteError::Transport("latest block unavailable".to_string()))?;
        Ok(block.timestamp.as_u64())
    }

    async fn next_nonce(&self) -> Result<U256, RemoteError> {
        self.inner
            .get_transaction_count(self.sender, Some(BlockNumber::Pending.into()))
            .await
            .map_err(classify)
    }

    async fn deploy(&self, init_code: Bytes, options: &SendOptions) -> Result<Deployment, RemoteError> {
        let receipt = self.submit(self.request(None, init_code, options)).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            RemoteError::Transport(format!(
                "receipt of {:?} has no contract address",
                receipt.transaction_hash
            ))
        })?;
        Ok(Deployment {
            address,
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }

    async fn send(
        &self,
        to: Address,
        calldata: Bytes,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError> {
        let receipt = self.submit(self.request(Some(to), calldata, options)).await?;
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, RemoteError> {
        let tx = self.request(Some(to), calldata, &SendOptions::default());
        self.inner.call(&tx.into(), None).await.map_err(classify)
    }

    async fn estimate_gas(
        &self,
        to: Address,
        calldata: Bytes,
        value: Option<U256>,
    ) -> Result<U256, RemoteError> {
        let options = SendOptions {
            value,
            ..SendOptions::default()
        };
        let tx = self.request(Some(to), calldata, &options);
        self.inner.estimate_gas(&tx.into(), None).await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_failure_keeps_nonce_consumed() {
        let tx_hash = H256::repeat_byte(0x11);
        let err = unconfirmed(tx_hash, "connection reset by peer");
        assert_eq!(
            err,
            RemoteError::Unconfirmed {
                tx_hash,
                reason: "connection reset by peer".to_string()
            }
        );
        assert!(err.consumed_nonce());
    }
}
