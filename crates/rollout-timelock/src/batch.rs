//! Timelock batches on disk.
//!
//! A queue run saves its entries as `<ts>_<label>.json`. An execution run
//! loads that file by name and saves the outcomes as a separate
//! `<ts>_<label>-execution.json`; the queue snapshot is never touched again.

use rollout_registry::{SnapshotRef, SnapshotStore};
use rollout_types::Target;

use crate::engine::ExecutionReport;
use crate::entry::TimelockEntry;
use crate::error::TimelockError;

/// Label suffix of execution snapshots.
pub const EXECUTION_SUFFIX: &str = "-execution";

/// Label of the execution snapshot for a queue snapshot named `<ts>_<label>`.
pub fn execution_label(snapshot_name: &str) -> String {
    let stem = snapshot_name.strip_suffix(".json").unwrap_or(snapshot_name);
    let label = match stem.split_once('_') {
        Some((ts, label)) if ts.parse::<i64>().is_ok() && !label.is_empty() => label,
        _ => stem,
    };
    format!("{}{}", label, EXECUTION_SUFFIX)
}

/// Snapshot access scoped to one network/environment.
#[derive(Debug, Clone)]
pub struct BatchStore {
    snapshots: SnapshotStore,
    target: Target,
}

impl BatchStore {
    pub fn new(snapshots: SnapshotStore, target: Target) -> Self {
        Self { snapshots, target }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn save(&self, label: &str, entries: &[TimelockEntry]) -> Result<SnapshotRef, TimelockError> {
        Ok(self.snapshots.save(&self.target, label, entries)?)
    }

    pub fn load(&self, name: &str) -> Result<Vec<TimelockEntry>, TimelockError> {
        Ok(self.snapshots.load(&self.target, name)?)
    }

    /// Save the outcome of executing snapshot `source_name`.
    pub fn save_execution(
        &self,
        source_name: &str,
        report: &ExecutionReport,
    ) -> Result<SnapshotRef, TimelockError> {
        let label = execution_label(source_name);
        Ok(self.snapshots.save(&self.target, &label, &report.entries())?)
    }

    /// Whether any snapshot was saved under `label`.
    pub fn exists(&self, label: &str) -> Result<bool, TimelockError> {
        Ok(self.snapshots.latest(&self.target, label)?.is_some())
    }

    /// Entries of the most recent snapshot saved under `label`, if any.
    pub fn load_latest(&self, label: &str) -> Result<Option<Vec<TimelockEntry>>, TimelockError> {
        match self.snapshots.latest(&self.target, label)? {
            Some(snapshot) => Ok(Some(self.load(&snapshot.name())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<SnapshotRef>, TimelockError> {
        Ok(self.snapshots.list(&self.target)?)
    }
}
