//! Filesystem-backed deployment state for vault-rollout.
//!
//! This crate provides:
//! - `FsAddressRegistry`: `(network, environment, logical name)` -> `{address, block}`
//! - `SnapshotStore`: append-only, timestamp-named JSON snapshots of timelock batches
//!
//! Both write through a temp file and a rename, so a crash mid-write never
//! corrupts a previously valid record. Each run is assumed to be the only
//! writer for its environment; there is no locking.

pub mod error;
pub mod paths;
pub mod records;
pub mod snapshots;

pub use error::{RegistryError, RegistryKey};
pub use records::{DeploymentRecord, FsAddressRegistry, ACCOUNT_PREFIX};
pub use snapshots::{SnapshotRef, SnapshotStore};
