//! Timelock engine errors.

use rollout_client::RemoteError;
use rollout_registry::RegistryError;
use rollout_types::{EncodingError, U256};
use std::fmt;

use crate::entry::TimelockEntry;

#[derive(Debug)]
pub enum TimelockError {
    /// `(paramTypes, params)` or the signature could not be encoded. Raised
    /// before anything is submitted.
    Encoding { info: String, source: EncodingError },
    /// The timelock or the node refused the queue call (e.g. eta too soon).
    /// Terminal for the entry; never retried.
    RemoteRejection { info: String, source: RemoteError },
    /// Execution could not be estimated or reverted on chain.
    Execution { info: String, source: RemoteError },
    /// The entry has no `queuedAt`, so there is nothing to execute.
    NotQueued { info: String },
    /// Reading or writing a snapshot failed.
    Storage(RegistryError),
}

impl TimelockError {
    /// Whether the failing submission was mined and used up its nonce.
    pub fn consumed_nonce(&self) -> bool {
        match self {
            TimelockError::RemoteRejection { source, .. } | TimelockError::Execution { source, .. } => {
                source.consumed_nonce()
            }
            _ => false,
        }
    }
}

impl fmt::Display for TimelockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelockError::Encoding { info, source } => {
                write!(f, "cannot encode `{}`: {}", info, source)
            }
            TimelockError::RemoteRejection { info, source } => {
                write!(f, "queueing `{}` was rejected: {}", info, source)
            }
            TimelockError::Execution { info, source } => {
                write!(f, "executing `{}` failed: {}", info, source)
            }
            TimelockError::NotQueued { info } => {
                write!(f, "`{}` was never queued; queue it before executing", info)
            }
            TimelockError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TimelockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimelockError::Encoding { source, .. } => Some(source),
            TimelockError::RemoteRejection { source, .. } | TimelockError::Execution { source, .. } => {
                Some(source)
            }
            TimelockError::NotQueued { .. } => None,
            TimelockError::Storage(e) => Some(e),
        }
    }
}

impl From<RegistryError> for TimelockError {
    fn from(e: RegistryError) -> Self {
        TimelockError::Storage(e)
    }
}

/// `queue_batch` stopped at `failed_index`.
///
/// `queued` holds the entries that made it before the failure, in order;
/// `next_nonce` is where a resumed batch should start.
#[derive(Debug)]
pub struct QueueBatchError {
    pub queued: Vec<TimelockEntry>,
    pub failed_index: usize,
    pub error: TimelockError,
    pub next_nonce: U256,
}

impl fmt::Display for QueueBatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch stopped at entry #{} after queueing {} (resume with nonce {}): {}",
            self.failed_index,
            self.queued.len(),
            self.next_nonce,
            self.error
        )
    }
}

impl std::error::Error for QueueBatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
