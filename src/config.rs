//! Workspace layout and behavior switches.
//!
//! A chassis workspace is a directory holding `chassis.yaml`, the node
//! inventory (`inst/<platform>/nodes/*.yaml`) and the layer playbooks
//! (`src/<layer>/<layer>.yaml`). Callers usually build the config with
//! [`ChassisConfig::discover`], which honors `CHASSIS_ROOT` and
//! `CHASSIS_PROPAGATION`.

use crate::document::DEFAULT_DOCUMENT;
use crate::error::ChassisError;
use crate::find_chassis_root;
use serde::Serialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

pub const INVENTORY_DIR: &str = "inst";
pub const PLAYBOOK_DIR: &str = "src";
pub const ENV_PROPAGATION: &str = "CHASSIS_PROPAGATION";

/// How rename propagation treats registry failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropagationMode {
    /// Persist the document, then rewrite registries; failures are reported
    /// as warnings and the document change stands.
    #[default]
    BestEffort,
    /// Stage every registry edit first and abort before persisting anything
    /// when a record cannot be staged.
    Staged,
}

impl PropagationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationMode::BestEffort => "best-effort",
            PropagationMode::Staged => "staged",
        }
    }
}

impl TryFrom<&str> for PropagationMode {
    type Error = ChassisError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "best-effort" => Ok(PropagationMode::BestEffort),
            "staged" => Ok(PropagationMode::Staged),
            other => Err(ChassisError::InvalidConfig(format!(
                "unknown {ENV_PROPAGATION} value {other:?} (expected best-effort or staged)"
            ))),
        }
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChassisConfig {
    pub root: PathBuf,
    pub document: PathBuf,
    pub inventory_dir: PathBuf,
    pub playbook_dir: PathBuf,
    pub propagation: PropagationMode,
}

impl ChassisConfig {
    /// Standard layout under `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            document: root.join(DEFAULT_DOCUMENT),
            inventory_dir: root.join(INVENTORY_DIR),
            playbook_dir: root.join(PLAYBOOK_DIR),
            propagation: PropagationMode::default(),
            root,
        }
    }

    /// Locate the workspace from `start` (see [`find_chassis_root`]) and
    /// apply environment overrides.
    pub fn discover(start: &Path) -> Result<Self, ChassisError> {
        let root = find_chassis_root(start)?;
        Self::for_root(root).with_env_overrides()
    }

    /// Apply `CHASSIS_PROPAGATION` when it is set and non-empty.
    pub fn with_env_overrides(mut self) -> Result<Self, ChassisError> {
        if let Ok(raw) = env::var(ENV_PROPAGATION) {
            if !raw.trim().is_empty() {
                self.propagation = PropagationMode::try_from(raw.trim())?;
            }
        }
        Ok(self)
    }

    pub fn with_propagation(mut self, propagation: PropagationMode) -> Self {
        self.propagation = propagation;
        self
    }
}
