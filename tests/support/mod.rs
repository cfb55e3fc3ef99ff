#![allow(dead_code)]

use anyhow::{Context, Result};
use chassis::{ChassisConfig, Coordinator, PropagationMode};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SAMPLE_CHASSIS: &str = "\
platform:
  foundation:
    - cluster:
        - control
        - workers
    - storage
  interaction:
    - legacy
    - gateway
";

// Hand-formatted document: comments, four-space indents, deeper sequence
// indents. Edits must leave everything they do not target byte-for-byte.
pub const HAND_EDITED_CHASSIS: &str = "\
# Platform chassis. Edited by hand; keep the comments.
platform:
    foundation:
        - cluster:   # etcd lives here
              - control
              - workers
        - storage
    # customer facing
    interaction:
        - legacy
        - gateway
";

// Throwaway chassis workspace: chassis.yaml plus inventory and playbooks.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new(chassis: &str) -> Result<Self> {
        let dir = TempDir::new().context("creating workspace")?;
        fs::write(dir.path().join("chassis.yaml"), chassis)
            .context("writing chassis.yaml fixture")?;
        Ok(Self { dir })
    }

    pub fn sample() -> Result<Self> {
        Self::new(SAMPLE_CHASSIS)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn document(&self) -> PathBuf {
        self.root().join("chassis.yaml")
    }

    pub fn read_document(&self) -> Result<String> {
        fs::read_to_string(self.document()).context("reading chassis.yaml")
    }

    pub fn node(&self, platform: &str, host: &str, contents: &str) -> Result<PathBuf> {
        let dir = self.root().join("inst").join(platform).join("nodes");
        fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{host}.yaml"));
        fs::write(&file, contents).with_context(|| format!("writing {}", file.display()))?;
        Ok(file)
    }

    pub fn playbook(&self, layer: &str, contents: &str) -> Result<PathBuf> {
        let dir = self.root().join("src").join(layer);
        fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{layer}.yaml"));
        fs::write(&file, contents).with_context(|| format!("writing {}", file.display()))?;
        Ok(file)
    }

    pub fn config(&self) -> ChassisConfig {
        ChassisConfig::for_root(self.root())
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.config())
    }

    pub fn staged_coordinator(&self) -> Coordinator {
        Coordinator::new(self.config().with_propagation(PropagationMode::Staged))
    }
}

pub fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
