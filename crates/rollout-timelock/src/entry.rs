//! One timelock-gated call and its lifecycle.

use rollout_types::abi::{check_signature, encode_params, parse_param_types};
use rollout_types::serde_helpers::{checksum_address, decimal_u256, decimal_u64};
use rollout_types::{Address, Bytes, EncodingError, TimelockCall, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where an entry is in the queue/execute protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Proposed,
    Rejected,
    Queued,
    Executable,
    Executed,
    Failed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Proposed => "proposed",
            EntryState::Rejected => "rejected",
            EntryState::Queued => "queued",
            EntryState::Executable => "executable",
            EntryState::Executed => "executed",
            EntryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A privileged call staged behind the timelock, as persisted in snapshots.
///
/// `queued_at` / `executed_at` hold transaction hashes, empty until the
/// corresponding submission succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockEntry {
    pub info: String,
    #[serde(default)]
    pub queued_at: String,
    #[serde(default)]
    pub executed_at: String,
    #[serde(default)]
    pub execution_transaction: String,
    #[serde(with = "checksum_address")]
    pub target: Address,
    #[serde(with = "decimal_u256", default)]
    pub value: U256,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(with = "decimal_u64")]
    pub eta: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TimelockEntry {
    /// A fresh, not yet queued entry with zero value.
    pub fn proposed(
        info: impl Into<String>,
        target: Address,
        signature: impl Into<String>,
        param_types: Vec<String>,
        params: Vec<Value>,
        eta: u64,
    ) -> Self {
        Self {
            info: info.into(),
            queued_at: String::new(),
            executed_at: String::new(),
            execution_transaction: String::new(),
            target,
            value: U256::zero(),
            signature: signature.into(),
            param_types,
            params,
            eta,
            error: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// The encoded payload. Queue and execute both go through here.
    pub fn payload(&self) -> Result<Bytes, EncodingError> {
        check_signature(&self.signature, &parse_param_types(&self.param_types)?)?;
        encode_params(&self.param_types, &self.params)
    }

    /// The `(target, value, signature, data, eta)` tuple sent to the timelock.
    pub fn call(&self) -> Result<TimelockCall, EncodingError> {
        Ok(TimelockCall {
            target: self.target,
            value: self.value,
            signature: self.signature.clone(),
            data: self.payload()?,
            eta: self.eta,
        })
    }

    /// Transaction hash the timelock identifies this call by.
    pub fn identity(&self) -> Result<H256, EncodingError> {
        Ok(self.call()?.tx_hash())
    }

    pub fn is_queued(&self) -> bool {
        !self.queued_at.is_empty()
    }

    pub fn is_executed(&self) -> bool {
        !self.executed_at.is_empty()
    }

    pub fn state_at(&self, now: u64) -> EntryState {
        match (self.is_queued(), self.is_executed(), self.error.is_some()) {
            (_, true, _) => EntryState::Executed,
            (false, _, true) => EntryState::Rejected,
            (false, _, false) => EntryState::Proposed,
            (true, false, true) => EntryState::Failed,
            (true, false, false) if now >= self.eta => EntryState::Executable,
            (true, false, false) => EntryState::Queued,
        }
    }
}
