//! Hardhat artifact lookup.
//!
//! Hardhat writes `artifacts/contracts/<path>/<Name>.sol/<Name>.json`; only
//! the `bytecode` field is needed to deploy.

use rollout_types::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub enum ArtifactError {
    NotFound { name: String, root: PathBuf },
    Ambiguous { name: String, paths: Vec<PathBuf> },
    Invalid { path: PathBuf, reason: String },
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::NotFound { name, root } => write!(
                f,
                "artifact `{}` not found under {}; compile the contracts first",
                name,
                root.display()
            ),
            ArtifactError::Ambiguous { name, paths } => {
                write!(f, "artifact `{}` is ambiguous:", name)?;
                for path in paths {
                    write!(f, " {}", path.display())?;
                }
                Ok(())
            }
            ArtifactError::Invalid { path, reason } => {
                write!(f, "invalid artifact {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ArtifactError {}

/// Compiled contract artifacts rooted at a hardhat `artifacts/` directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Arc<Path>,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Arc::from(root.as_ref()),
        }
    }

    /// Locate `<name>.json` anywhere under the root (debug and build-info
    /// files excluded).
    pub fn find(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let file_name = format!("{}.json", name);
        let mut matches = Vec::new();
        let mut pending = vec![self.root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if path.file_name().and_then(|n| n.to_str()) != Some("build-info") {
                        pending.push(path);
                    }
                } else if path.file_name().and_then(|n| n.to_str()) == Some(file_name.as_str()) {
                    matches.push(path);
                }
            }
        }
        matches.sort();
        match matches.len() {
            0 => Err(ArtifactError::NotFound {
                name: name.to_string(),
                root: self.root.to_path_buf(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(ArtifactError::Ambiguous {
                name: name.to_string(),
                paths: matches,
            }),
        }
    }

    /// Creation bytecode of the named contract.
    pub fn bytecode(&self, name: &str) -> Result<Bytes, ArtifactError> {
        let path = self.find(name)?;
        let invalid = |reason: String| ArtifactError::Invalid {
            path: path.clone(),
            reason,
        };
        let raw = std::fs::read(&path).map_err(|e| invalid(e.to_string()))?;
        let json: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|e| invalid(e.to_string()))?;
        let code = json
            .get("bytecode")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("missing `bytecode` field".to_string()))?;
        let stripped = code.strip_prefix("0x").unwrap_or(code);
        if stripped.is_empty() {
            return Err(invalid("empty bytecode (abstract contract or interface?)".to_string()));
        }
        if stripped.contains("__") {
            return Err(invalid("bytecode has unlinked libraries".to_string()));
        }
        let bytes = hex_decode(stripped).map_err(invalid)?;
        Ok(Bytes::from(bytes))
    }
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, String> {
    hex::decode(raw).map_err(|e| format!("bad bytecode hex: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_artifact(root: &Path, rel: &str, bytecode: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let json = serde_json::json!({ "contractName": "X", "abi": [], "bytecode": bytecode });
        std::fs::write(path, serde_json::to_vec(&json).unwrap()).unwrap();
    }

    #[test]
    fn test_finds_nested_artifact() {
        let temp_dir = TempDir::new().unwrap();
        write_artifact(
            temp_dir.path(),
            "contracts/core/Controller.sol/Controller.json",
            "0x6080",
        );
        write_artifact(temp_dir.path(), "build-info/Controller.json", "0x00");

        let store = ArtifactStore::new(temp_dir.path());
        assert_eq!(store.bytecode("Controller").unwrap(), Bytes::from(vec![0x60, 0x80]));
    }

    #[test]
    fn test_missing_and_unlinked() {
        let temp_dir = TempDir::new().unwrap();
        write_artifact(
            temp_dir.path(),
            "contracts/Vault.sol/Vault.json",
            "0x60__$abc$__",
        );
        let store = ArtifactStore::new(temp_dir.path());

        assert!(matches!(store.bytecode("Nope"), Err(ArtifactError::NotFound { .. })));
        assert!(matches!(store.bytecode("Vault"), Err(ArtifactError::Invalid { .. })));
    }
}
