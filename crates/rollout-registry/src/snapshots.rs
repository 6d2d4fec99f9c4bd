//! Append-only JSON snapshots, one file per persisted batch.
//!
//! Files are named `<unix_ts>_<label>.json` and are never rewritten; an
//! execution run saves its outcome under a new label instead.

use rollout_types::Target;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::RegistryError;
use crate::paths::{atomic_write_json_pretty, read_json, snapshot_dir, validate_segment};

/// A snapshot file located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub timestamp: i64,
    pub label: String,
    pub path: PathBuf,
}

impl SnapshotRef {
    /// File stem, the name `load` accepts.
    pub fn name(&self) -> String {
        format!("{}_{}", self.timestamp, self.label)
    }

    fn parse(path: PathBuf) -> Option<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (ts, label) = stem.split_once('_')?;
        let timestamp = ts.parse::<i64>().ok()?;
        if label.is_empty() {
            return None;
        }
        let label = label.to_string();
        Some(Self {
            timestamp,
            label,
            path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Arc<Path>,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Arc::from(root.as_ref()),
        }
    }

    /// Save `value` under the current unix time.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        target: &Target,
        label: &str,
        value: &T,
    ) -> Result<SnapshotRef, RegistryError> {
        self.save_at(target, label, chrono::Utc::now().timestamp(), value)
    }

    /// Save `value` under an explicit timestamp. Fails if the file exists.
    pub fn save_at<T: Serialize + ?Sized>(
        &self,
        target: &Target,
        label: &str,
        timestamp: i64,
        value: &T,
    ) -> Result<SnapshotRef, RegistryError> {
        validate_segment("snapshot label", label)?;
        let dir = snapshot_dir(&self.root, target)?;
        let path = dir.join(format!("{}_{}.json", timestamp, label));
        if path.exists() {
            return Err(RegistryError::storage(
                &path,
                "snapshot already exists; snapshots are never overwritten",
            ));
        }
        atomic_write_json_pretty(&path, value)?;
        info!(
            label,
            timestamp,
            path = %path.display(),
            "snapshot saved"
        );
        Ok(SnapshotRef {
            timestamp,
            label: label.to_string(),
            path,
        })
    }

    /// Load a snapshot by its exact name (`<ts>_<label>`, `.json` optional).
    pub fn load<T: DeserializeOwned>(&self, target: &Target, name: &str) -> Result<T, RegistryError> {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        validate_segment("snapshot name", stem)?;
        let path = snapshot_dir(&self.root, target)?.join(format!("{}.json", stem));
        if !path.is_file() {
            return Err(RegistryError::SnapshotNotFound {
                name: stem.to_string(),
                target: target.clone(),
            });
        }
        read_json(&path)
    }

    /// Every snapshot of one environment, oldest first.
    pub fn list(&self, target: &Target) -> Result<Vec<SnapshotRef>, RegistryError> {
        let dir = snapshot_dir(&self.root, target)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| RegistryError::storage(&dir, format!("failed to list: {}", e)))?;

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RegistryError::storage(&dir, format!("failed to list: {}", e)))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(snapshot) = SnapshotRef::parse(path) {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(snapshots)
    }

    /// Most recent snapshot saved under `label`.
    pub fn latest(&self, target: &Target, label: &str) -> Result<Option<SnapshotRef>, RegistryError> {
        Ok(self
            .list(target)?
            .into_iter()
            .filter(|s| s.label == label)
            .max_by_key(|s| s.timestamp))
    }
}
