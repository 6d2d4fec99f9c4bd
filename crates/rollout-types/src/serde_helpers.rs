//! Serde adapters for persisted files.
//!
//! Snapshot and registry files keep numbers as decimal strings and addresses
//! in EIP-55 form, which is what operators read and diff.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

/// `Address` as an EIP-55 checksummed string.
pub mod checksum_address {
    use super::*;
    use crate::abi::{checksum, parse_address};
    use ethers::types::Address;

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&checksum(address))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_address(&raw).map_err(serde::de::Error::custom)
    }
}

/// `U256` as a decimal string; decimal/hex strings and integers are accepted.
pub mod decimal_u256 {
    use super::*;
    use crate::abi::parse_uint_str;
    use ethers::types::U256;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(U256::from(n)),
            NumberOrString::String(s) => parse_uint_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// `u64` as a decimal string; strings and integers are accepted.
pub mod decimal_u64 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| serde::de::Error::custom(format!("invalid integer `{}`: {}", s, e))),
        }
    }
}
