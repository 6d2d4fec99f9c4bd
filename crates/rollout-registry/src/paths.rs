//! Path utilities for the deployments directory layout.
//!
//! ```text
//! <root>/<network...>/<environment>/<logical_name>.json
//! <root>/<network...>/<environment>/json/<unix_ts>_<label>.json
//! ```

use rollout_types::Target;
use std::path::{Path, PathBuf};

use crate::error::RegistryError;

/// Directory holding timelock snapshots inside an environment directory.
pub const SNAPSHOT_DIR: &str = "json";

/// Check a single path segment (logical name, label, network component).
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidKey {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(&format!("unsupported character {:?}", bad)));
    }
    Ok(())
}

/// `<root>/<network...>/<environment>`; `/` in the network name nests.
pub fn environment_dir(root: &Path, target: &Target) -> Result<PathBuf, RegistryError> {
    let mut dir = root.to_path_buf();
    for segment in target.network.split('/') {
        validate_segment("network", segment)?;
        dir.push(segment);
    }
    dir.push(target.environment.as_str());
    Ok(dir)
}

/// Full path of one registry record.
pub fn record_path(root: &Path, target: &Target, logical_name: &str) -> Result<PathBuf, RegistryError> {
    validate_segment("logical name", logical_name)?;
    Ok(environment_dir(root, target)?.join(format!("{}.json", logical_name)))
}

/// Directory holding the snapshots of one environment.
pub fn snapshot_dir(root: &Path, target: &Target) -> Result<PathBuf, RegistryError> {
    Ok(environment_dir(root, target)?.join(SNAPSHOT_DIR))
}

/// Ensure all parent directories exist for a path.
pub fn ensure_parent_dirs(path: &Path) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RegistryError::storage(parent, format!("failed to create directory: {}", e))
        })?;
    }
    Ok(())
}

/// Write a file atomically (write to .tmp, then rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), RegistryError> {
    ensure_parent_dirs(path)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|s| s.to_str()).unwrap_or("tmp")
    ));
    std::fs::write(&tmp_path, contents)
        .map_err(|e| RegistryError::storage(&tmp_path, format!("failed to write temp file: {}", e)))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        RegistryError::storage(
            path,
            format!("failed to rename {} into place: {}", tmp_path.display(), e),
        )
    })?;
    Ok(())
}

/// Write a JSON file atomically (compact format).
pub fn atomic_write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RegistryError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| RegistryError::storage(path, format!("failed to serialize JSON: {}", e)))?;
    atomic_write(path, &json)
}

/// Write a JSON file atomically, pretty-printed for human review.
pub fn atomic_write_json_pretty<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), RegistryError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| RegistryError::storage(path, format!("failed to serialize JSON: {}", e)))?;
    atomic_write(path, &json)
}

/// Read and parse a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RegistryError> {
    let raw = std::fs::read(path)
        .map_err(|e| RegistryError::storage(path, format!("failed to read: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| RegistryError::storage(path, format!("failed to parse JSON: {}", e)))
}
