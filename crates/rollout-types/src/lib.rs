//! Shared types for the vault-rollout workspace.
//!
//! This crate holds the pieces every other crate agrees on:
//! - [`Target`] / [`Environment`]: the explicit `(network, environment)` pair
//!   threaded through registry, timelock and pipeline calls
//! - [`abi`]: the Solidity parameter codec (the only place where
//!   `(paramTypes, params)` become call data)
//! - [`TimelockCall`]: timelock transaction identity and calldata
//! - [`serde_helpers`]: decimal/checksum encodings used by persisted files

pub mod abi;
pub mod env_utils;
pub mod error;
pub mod serde_helpers;
pub mod target;
pub mod timelock_call;

pub use error::EncodingError;
pub use target::{Environment, EnvironmentMismatch, Target};
pub use timelock_call::{TimelockCall, TimelockMethod};

// Re-export the EVM primitives so downstream crates name one set of types.
pub use ethers::types::{Address, Bytes, H256, U256};
