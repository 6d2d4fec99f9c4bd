//! Chain access for vault-rollout.
//!
//! Everything that leaves the process goes through [`ChainClient`]:
//! - [`RpcClient`]: ethers JSON-RPC provider with a local signer
//! - [`MockChain`] (feature `mock`): in-memory chain with timelock emulation
//!
//! [`ArtifactStore`] resolves hardhat build artifacts to creation bytecode.

pub mod artifacts;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rpc;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use client::{ChainClient, Deployment, SendOptions, TxReceipt};
pub use error::RemoteError;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockChain;
pub use rpc::{RpcClient, SignedProvider};
