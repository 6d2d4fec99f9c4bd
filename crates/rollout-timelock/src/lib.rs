//! Two-phase timelock protocol: queue a batch of privileged calls now,
//! persist it, and execute it in a later run once the delay has elapsed.
//!
//! - [`TimelockEntry`]: one staged call, its identity and its lifecycle
//! - [`TimelockEngine`]: `queue`, `queue_batch`, `execute`, `execute_batch`
//! - [`BatchStore`]: queue and execution snapshots
//! - [`TimelockClient`]: the remote timelock, implemented over a `ChainClient`
//!   by [`ContractTimelock`]

pub mod batch;
pub mod client;
pub mod engine;
pub mod entry;
pub mod error;

pub use batch::{execution_label, BatchStore, EXECUTION_SUFFIX};
pub use client::{ContractTimelock, TimelockClient};
pub use engine::{
    EntryOutcome, ExecutionReport, OutcomeStatus, TimelockEngine, DEFAULT_EXECUTION_GAS_MARGIN,
    GAS_MARGIN_ENV,
};
pub use entry::{EntryState, TimelockEntry};
pub use error::{QueueBatchError, TimelockError};
