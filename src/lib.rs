//! Vault Rollout
//!
//! Multi-network contract rollout tooling:
//!
//! - **Campaigns**: Fixed, linear step lists that deploy, configure and validate contracts
//! - **Address registry**: Per network/environment address book on disk
//! - **Timelock batches**: Queue, persist and later execute timelocked transactions
//!
//! See [`pipeline`] for the campaign runner and `rollout_timelock` for the
//! queue/execute protocol.

#![allow(clippy::result_large_err)]

pub mod campaign;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod resolve;
pub mod steps;

pub use campaign::Campaign;
pub use config::RolloutConfig;
pub use context::RolloutContext;
pub use pipeline::{run_campaign, PipelineError, PipelineReport, RunOptions, StepStatus};
