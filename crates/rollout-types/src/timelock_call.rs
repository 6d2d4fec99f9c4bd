//! Timelock transaction identity and calldata.
//!
//! A timelock matches queued and executed transactions by
//! `keccak256(abi.encode(target, value, signature, data, eta))`. Everything
//! here derives from the same token list so the hash, the queue calldata and
//! the execute calldata can never disagree.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

use crate::error::EncodingError;

pub const QUEUE_TRANSACTION: &str = "queueTransaction(address,uint256,string,bytes,uint256)";
pub const EXECUTE_TRANSACTION: &str = "executeTransaction(address,uint256,string,bytes,uint256)";

/// Which timelock entry point a calldata blob targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelockMethod {
    Queue,
    Execute,
}

/// One scheduled call with its payload already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelockCall {
    pub target: Address,
    pub value: U256,
    pub signature: String,
    pub data: Bytes,
    pub eta: u64,
}

impl TimelockCall {
    fn tokens(&self) -> Vec<Token> {
        vec![
            Token::Address(self.target),
            Token::Uint(self.value),
            Token::String(self.signature.clone()),
            Token::Bytes(self.data.to_vec()),
            Token::Uint(U256::from(self.eta)),
        ]
    }

    fn param_kinds() -> [ParamType; 5] {
        [
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::String,
            ParamType::Bytes,
            ParamType::Uint(256),
        ]
    }

    /// Transaction hash the timelock stores in `queuedTransactions`.
    pub fn tx_hash(&self) -> H256 {
        H256::from(keccak256(abi::encode(&self.tokens())))
    }

    pub fn queue_calldata(&self) -> Bytes {
        self.calldata(QUEUE_TRANSACTION)
    }

    pub fn execute_calldata(&self) -> Bytes {
        self.calldata(EXECUTE_TRANSACTION)
    }

    fn calldata(&self, method: &str) -> Bytes {
        let mut data = id(method).to_vec();
        data.extend(abi::encode(&self.tokens()));
        Bytes::from(data)
    }

    /// Decode `queueTransaction` / `executeTransaction` calldata.
    pub fn decode(calldata: &[u8]) -> Result<(TimelockMethod, Self), EncodingError> {
        if calldata.len() < 4 {
            return Err(EncodingError::Decode {
                reason: "calldata shorter than a selector".to_string(),
            });
        }
        let selector = &calldata[..4];
        let method = if selector == id(QUEUE_TRANSACTION).as_slice() {
            TimelockMethod::Queue
        } else if selector == id(EXECUTE_TRANSACTION).as_slice() {
            TimelockMethod::Execute
        } else {
            return Err(EncodingError::Decode {
                reason: format!("unknown timelock selector 0x{}", hex::encode(selector)),
            });
        };

        let tokens = abi::decode(&Self::param_kinds(), &calldata[4..]).map_err(|e| {
            EncodingError::Decode {
                reason: e.to_string(),
            }
        })?;
        let malformed = || EncodingError::Decode {
            reason: "unexpected timelock argument layout".to_string(),
        };
        match tokens.as_slice() {
            [Token::Address(target), Token::Uint(value), Token::String(signature), Token::Bytes(data), Token::Uint(eta)] =>
            {
                if *eta > U256::from(u64::MAX) {
                    return Err(malformed());
                }
                Ok((
                    method,
                    Self {
                        target: *target,
                        value: *value,
                        signature: signature.clone(),
                        data: Bytes::from(data.clone()),
                        eta: eta.as_u64(),
                    },
                ))
            }
            _ => Err(malformed()),
        }
    }
}
