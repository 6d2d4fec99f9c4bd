//! Filesystem address registry.

use rollout_types::serde_helpers::checksum_address;
use rollout_types::{Address, Environment, Target};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryKey};
use crate::paths::{atomic_write_json, environment_dir, read_json, record_path};

/// Logical-name prefix of operator accounts (`account-<alias>`).
pub const ACCOUNT_PREFIX: &str = "account-";

/// On-disk shape of one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRecord {
    #[serde(with = "checksum_address")]
    address: Address,
    #[serde(default)]
    block: Option<u64>,
}

/// A deployed component, as later steps see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub logical_name: String,
    pub network: String,
    pub environment: Environment,
    #[serde(with = "checksum_address")]
    pub address: Address,
    pub block_number: Option<u64>,
}

impl DeploymentRecord {
    fn from_persisted(target: &Target, logical_name: &str, record: PersistedRecord) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            network: target.network.clone(),
            environment: target.environment,
            address: record.address,
            block_number: record.block,
        }
    }
}

/// Address book rooted at a deployments directory.
///
/// `put` is the only mutation; there is no delete. A second `put` for the
/// same key replaces the record.
#[derive(Debug, Clone)]
pub struct FsAddressRegistry {
    root: Arc<Path>,
}

impl FsAddressRegistry {
    /// Open a registry. Directories are created on first write.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Arc::from(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write (or overwrite) the record for `(target, logical_name)`.
    pub fn put(
        &self,
        target: &Target,
        logical_name: &str,
        address: Address,
        block_number: Option<u64>,
    ) -> Result<DeploymentRecord, RegistryError> {
        let path = record_path(&self.root, target, logical_name)?;
        let record = PersistedRecord {
            address,
            block: block_number,
        };
        atomic_write_json(&path, &record)?;
        debug!(
            logical_name,
            network = %target.network,
            environment = %target.environment,
            address = ?address,
            "registry record written"
        );
        Ok(DeploymentRecord::from_persisted(target, logical_name, record))
    }

    /// Read the record for `(target, logical_name)`.
    pub fn get(&self, target: &Target, logical_name: &str) -> Result<DeploymentRecord, RegistryError> {
        let path = record_path(&self.root, target, logical_name)?;
        if !path.is_file() {
            return Err(RegistryError::NotFound {
                key: RegistryKey::new(target, logical_name),
            });
        }
        let record: PersistedRecord = read_json(&path)?;
        Ok(DeploymentRecord::from_persisted(target, logical_name, record))
    }

    /// Shorthand for `get(..).address`.
    pub fn address(&self, target: &Target, logical_name: &str) -> Result<Address, RegistryError> {
        Ok(self.get(target, logical_name)?.address)
    }

    pub fn contains(&self, target: &Target, logical_name: &str) -> Result<bool, RegistryError> {
        Ok(record_path(&self.root, target, logical_name)?.is_file())
    }

    /// Every record of one network/environment, sorted by logical name.
    pub fn list(&self, target: &Target) -> Result<Vec<DeploymentRecord>, RegistryError> {
        let dir = environment_dir(&self.root, target)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| RegistryError::storage(&dir, format!("failed to list: {}", e)))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RegistryError::storage(&dir, format!("failed to list: {}", e)))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(format!("{}.json", name));
            match read_json::<PersistedRecord>(&path) {
                Ok(record) => records.push(DeploymentRecord::from_persisted(target, &name, record)),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping non-record file"),
            }
        }
        Ok(records)
    }

    /// Aliases of the `account-<alias>` records of one network/environment.
    pub fn accounts(&self, target: &Target) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .list(target)?
            .into_iter()
            .filter_map(|r| r.logical_name.strip_prefix(ACCOUNT_PREFIX).map(str::to_string))
            .collect())
    }
}
