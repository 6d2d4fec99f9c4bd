//! Symbolic addresses in campaign arguments.
//!
//! `@name` stands for the registry address of `name` in the current
//! network/environment, `@self` for the existing record a `verify` check
//! runs against and `$deployer` for the signing account.

use anyhow::{anyhow, bail, Result};
use rollout_types::abi::{checksum, parse_address};
use rollout_types::Address;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEPLOYER_ALIAS: &str = "$deployer";
pub const SELF_REF: &str = "@self";

/// Registry names use the same character set as file names.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Collect every `@name` below `value` (except `@self`), without duplicates.
pub fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(raw) => {
            if let Some(name) = raw.strip_prefix('@') {
                if raw != SELF_REF && !out.iter().any(|seen| seen == name) {
                    out.push(name.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

fn is_symbolic(raw: &str) -> bool {
    raw == DEPLOYER_ALIAS || raw.starts_with('@')
}

/// Addresses resolved for one step before it runs.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    addresses: BTreeMap<String, Address>,
    deployer: Option<Address>,
    self_address: Option<Address>,
}

impl Inputs {
    pub fn new(deployer: Option<Address>) -> Self {
        Self {
            deployer,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, address: Address) {
        self.addresses.insert(name.into(), address);
    }

    /// Copy with `@self` bound to `address`.
    pub fn with_self(&self, address: Address) -> Self {
        Self {
            self_address: Some(address),
            ..self.clone()
        }
    }

    pub fn addresses(&self) -> &BTreeMap<String, Address> {
        &self.addresses
    }

    /// Resolve a symbolic or literal address.
    pub fn address(&self, raw: &str) -> Result<Address> {
        let raw = raw.trim();
        if raw == DEPLOYER_ALIAS {
            return self.deployer.ok_or_else(|| {
                anyhow!("`{DEPLOYER_ALIAS}` needs a signer; pass --rpc-url and --private-key")
            });
        }
        if raw == SELF_REF {
            return self
                .self_address
                .ok_or_else(|| anyhow!("`{SELF_REF}` is only bound inside `verify` checks"));
        }
        if let Some(name) = raw.strip_prefix('@') {
            return self
                .addresses
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("reference `@{name}` was not resolved for this step"));
        }
        if !raw.starts_with("0x") && !raw.starts_with("0X") {
            bail!("`{raw}` is neither an address nor a reference (`@name`, `{DEPLOYER_ALIAS}`)");
        }
        Ok(parse_address(raw)?)
    }

    /// Replace every symbolic string below `value` by its checksummed address.
    pub fn value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(raw) if is_symbolic(raw) => Value::String(checksum(&self.address(raw)?)),
            Value::Array(items) => Value::Array(self.values(items)?),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    pub fn values(&self, values: &[Value]) -> Result<Vec<Value>> {
        values.iter().map(|v| self.value(v)).collect()
    }
}
