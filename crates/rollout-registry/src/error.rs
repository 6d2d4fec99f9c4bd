//! Registry and snapshot errors.

use rollout_types::{Environment, Target};
use std::fmt;
use std::path::PathBuf;

/// Fully qualified registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub logical_name: String,
    pub network: String,
    pub environment: Environment,
}

impl RegistryKey {
    pub fn new(target: &Target, logical_name: &str) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            network: target.network.clone(),
            environment: target.environment,
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` on {} ({})",
            self.logical_name, self.network, self.environment
        )
    }
}

#[derive(Debug)]
pub enum RegistryError {
    /// No record exists for the key. Almost always a step run before the
    /// step that deploys its dependency.
    NotFound { key: RegistryKey },
    /// No snapshot file with that exact name.
    SnapshotNotFound { name: String, target: Target },
    /// A network, logical name or label that cannot be mapped to a path.
    InvalidKey {
        kind: &'static str,
        value: String,
        reason: String,
    },
    /// Reading or writing persisted state failed.
    Storage { path: PathBuf, message: String },
}

impl RegistryError {
    pub(crate) fn storage(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        RegistryError::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::NotFound { .. } | RegistryError::SnapshotNotFound { .. }
        )
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound { key } => write!(
                f,
                "`{}` deployment on {} ({}) not found; run the step that deploys `{}` first",
                key.logical_name, key.network, key.environment, key.logical_name
            ),
            RegistryError::SnapshotNotFound { name, target } => {
                write!(f, "snapshot `{}` not found for {}", name, target)
            }
            RegistryError::InvalidKey {
                kind,
                value,
                reason,
            } => write!(f, "invalid {} `{}`: {}", kind, value, reason),
            RegistryError::Storage { path, message } => {
                write!(f, "storage error at {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
