//! Errors surfaced by the chain capability.

use rollout_types::H256;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The node refused the transaction before inclusion (bad nonce, gas
    /// estimation revert, eta too soon). No nonce is consumed.
    Rejected { reason: String },
    /// The transaction was mined with status 0. Its nonce is consumed.
    Reverted { tx_hash: H256, reason: String },
    /// The transaction was broadcast but waiting for its receipt failed. It
    /// may still be mined, so its nonce counts as consumed.
    Unconfirmed { tx_hash: H256, reason: String },
    /// The node could not be reached or answered garbage.
    Transport(String),
}

impl RemoteError {
    pub fn rejected(reason: impl fmt::Display) -> Self {
        RemoteError::Rejected {
            reason: reason.to_string(),
        }
    }

    /// Whether the failed submission still used up its nonce.
    pub fn consumed_nonce(&self) -> bool {
        matches!(
            self,
            RemoteError::Reverted { .. } | RemoteError::Unconfirmed { .. }
        )
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Rejected { reason } => write!(f, "rejected by remote: {}", reason),
            RemoteError::Reverted { tx_hash, reason } => {
                write!(f, "transaction {:?} reverted: {}", tx_hash, reason)
            }
            RemoteError::Unconfirmed { tx_hash, reason } => write!(
                f,
                "transaction {:?} was broadcast but not confirmed: {}",
                tx_hash, reason
            ),
            RemoteError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}
