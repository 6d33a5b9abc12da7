//! Planner configuration.
//!
//! # Invariants
//! - `root` is the project root; records live under `<root>/planning`.
//! - Config values are validated once in [`PlannerConfig::validate`] before a
//!   store is opened.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the project root that holds all records.
pub const PLANNING_DIR_NAME: &str = "planning";

const DEFAULT_CLAIM_LOCK_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Runtime options for one planner instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Project root containing the `planning/` directory.
    pub root: PathBuf,
    /// Fsync files and directories on every write. Tests may turn this off.
    pub sync_writes: bool,
    /// Claim locks older than this are treated as abandoned and broken.
    pub claim_lock_stale_after: Duration,
}

impl PlannerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_writes: true,
            claim_lock_stale_after: DEFAULT_CLAIM_LOCK_STALE_AFTER,
        }
    }

    pub fn planning_dir(&self) -> PathBuf {
        self.root.join(PLANNING_DIR_NAME)
    }

    /// # Errors
    /// - Returns an error when `root` is empty.
    /// - Returns an error when `claim_lock_stale_after` is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("planner root cannot be empty".to_string());
        }
        if self.claim_lock_stale_after.is_zero() {
            return Err("claim_lock_stale_after must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for PlannerConfig {
    /// Current directory as project root.
    fn default() -> Self {
        Self::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::PlannerConfig;
    use std::time::Duration;

    #[test]
    fn planning_dir_is_nested_under_root() {
        let config = PlannerConfig::new("/tmp/project");
        assert!(config.planning_dir().ends_with("project/planning"));
        assert!(config.sync_writes);
    }

    #[test]
    fn validate_rejects_empty_root_and_zero_stale_window() {
        assert!(PlannerConfig::new("").validate().is_err());

        let mut config = PlannerConfig::new("/tmp/project");
        config.claim_lock_stale_after = Duration::ZERO;
        let error = config.validate().unwrap_err();
        assert!(error.contains("claim_lock_stale_after"));
    }
}
