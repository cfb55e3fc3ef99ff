//! Node allocations read from the platform inventory.
//!
//! Each platform instance keeps one record per host under
//! `inst/<platform>/nodes/<hostname>.yaml`; the record's `chassis` list names
//! the paths the host is allocated to. Which paths a node effectively serves
//! is decided by a [`Distribution`].

use super::{Registry, RewritePlan, Scan, read_record, rebase_scalar, stage, subdirectories};
use crate::document::Chassis;
use crate::error::{RecordFailure, RegistryKind};
use crate::layout::{Span, SpanKind, Splice};
use crate::path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const NODES_DIR: &str = "nodes";
const CHASSIS_KEY: &str = "chassis";
const RECORD_EXTENSION: &str = "yaml";

/// A host record from the inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Node {
    pub hostname: String,
    pub platform: String,
    /// Paths as declared in the record.
    pub chassis: Vec<String>,
    pub file: PathBuf,
}

impl Node {
    pub fn display_name(&self) -> String {
        format!("{}@{}", self.hostname, self.platform)
    }
}

#[derive(Debug, Default, Deserialize)]
struct NodeRecord {
    #[serde(default)]
    chassis: Option<Vec<String>>,
}

/// A node together with the paths it effectively serves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub node: String,
    pub hostname: String,
    pub platform: String,
    pub paths: Vec<String>,
}

impl Allocation {
    /// True when any effective path is `chassis_path` or below it.
    pub fn covers(&self, chassis_path: &str) -> bool {
        self.paths
            .iter()
            .any(|candidate| path::is_within(candidate, chassis_path))
    }
}

/// Expands a platform's node records into effective paths per hostname.
pub trait Distribution {
    fn distribute(&self, chassis: &Chassis, nodes: &[Node]) -> BTreeMap<String, Vec<String>>;
}

/// Every node serves exactly the paths its record declares.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeclaredDistribution;

impl Distribution for DeclaredDistribution {
    fn distribute(&self, _chassis: &Chassis, nodes: &[Node]) -> BTreeMap<String, Vec<String>> {
        nodes
            .iter()
            .map(|node| (node.hostname.clone(), node.chassis.clone()))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct AllocationRegistry {
    inventory_dir: PathBuf,
}

impl AllocationRegistry {
    pub fn new(inventory_dir: impl Into<PathBuf>) -> Self {
        Self {
            inventory_dir: inventory_dir.into(),
        }
    }

    /// Node record files, optionally limited to one platform.
    fn records(&self, platform: Option<&str>) -> Result<Vec<(String, PathBuf)>, RecordFailure> {
        let platforms = subdirectories(&self.inventory_dir)
            .map_err(|err| RecordFailure::new(&self.inventory_dir, err))?
            .unwrap_or_default();

        let mut records = Vec::new();
        for platform_dir in platforms {
            let Some(name) = platform_dir.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            if platform.is_some_and(|wanted| wanted != name) {
                continue;
            }
            let nodes_dir = platform_dir.join(NODES_DIR);
            let entries = match fs::read_dir(&nodes_dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(RecordFailure::new(nodes_dir, err)),
            };
            let mut files = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| RecordFailure::new(&nodes_dir, err))?;
                let file = entry.path();
                if file.is_file()
                    && file.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION)
                {
                    files.push(file);
                }
            }
            files.sort();
            records.extend(files.into_iter().map(|file| (name.clone(), file)));
        }
        Ok(records)
    }

    /// Every node record, optionally limited to one platform.
    pub fn load_all(&self, platform: Option<&str>) -> Scan<Node> {
        let mut scan = Scan::default();
        let records = match self.records(platform) {
            Ok(records) => records,
            Err(failure) => {
                scan.skip(RegistryKind::Allocations, failure);
                return scan;
            }
        };
        for (platform, file) in records {
            match load_node(&platform, &file) {
                Ok(node) => scan.facts.push(node),
                Err(failure) => scan.skip(RegistryKind::Allocations, failure),
            }
        }
        debug!(count = scan.facts.len(), dir = %self.inventory_dir.display(), "loaded nodes");
        scan
    }

    /// Nodes grouped by platform name.
    pub fn load_by_platform(&self) -> Scan<(String, Vec<Node>)> {
        let scan = self.load_all(None);
        let mut grouped: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for node in scan.facts {
            grouped.entry(node.platform.clone()).or_default().push(node);
        }
        Scan {
            facts: grouped.into_iter().collect(),
            warnings: scan.warnings,
        }
    }

    /// Effective allocations of every node, distributed per platform.
    pub fn allocations(
        &self,
        chassis: &Chassis,
        distribution: &dyn Distribution,
        platform: Option<&str>,
    ) -> Scan<Allocation> {
        let grouped = self.load_by_platform();
        let mut scan = Scan {
            facts: Vec::new(),
            warnings: grouped.warnings,
        };
        for (name, nodes) in grouped.facts {
            if platform.is_some_and(|wanted| wanted != name) {
                continue;
            }
            let mut effective = distribution.distribute(chassis, &nodes);
            for node in nodes {
                let paths = effective.remove(&node.hostname).unwrap_or_default();
                scan.facts.push(Allocation {
                    node: node.display_name(),
                    hostname: node.hostname,
                    platform: node.platform,
                    paths,
                });
            }
        }
        scan
    }

    /// Allocations covering `chassis_path` or a path below it.
    pub fn allocations_for_path(allocations: &[Allocation], chassis_path: &str) -> Vec<Allocation> {
        allocations
            .iter()
            .filter(|allocation| allocation.covers(chassis_path))
            .cloned()
            .collect()
    }
}

fn load_node(platform: &str, file: &Path) -> Result<Node, RecordFailure> {
    let hostname = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let data = fs::read_to_string(file).map_err(|err| RecordFailure::new(file, err))?;
    let record: NodeRecord = if data.trim().is_empty() {
        NodeRecord::default()
    } else {
        serde_yaml::from_str(&data).map_err(|err| RecordFailure::new(file, err))?
    };
    Ok(Node {
        hostname,
        platform: platform.to_string(),
        chassis: record.chassis.unwrap_or_default(),
        file: file.to_path_buf(),
    })
}

/// Splices rebasing the entries of every `chassis` sequence in the record.
fn rewrite_chassis_lists(
    node: &Span,
    old: &str,
    new: &str,
    splices: &mut Vec<Splice>,
) -> Result<(), String> {
    match &node.kind {
        SpanKind::Mapping { entries, .. } => {
            for (key, value) in entries {
                match &value.kind {
                    SpanKind::Sequence { items, .. } if key.scalar() == Some(CHASSIS_KEY) => {
                        for item in items {
                            splices.extend(rebase_scalar(item, old, new)?);
                        }
                    }
                    _ => rewrite_chassis_lists(value, old, new, splices)?,
                }
            }
        }
        SpanKind::Sequence { items, .. } => {
            for item in items {
                rewrite_chassis_lists(item, old, new, splices)?;
            }
        }
        SpanKind::Scalar { .. } | SpanKind::Alias => {}
    }
    Ok(())
}

impl Registry for AllocationRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Allocations
    }

    fn plan_rewrite(&self, old: &str, new: &str) -> RewritePlan {
        let mut plan = RewritePlan::new(RegistryKind::Allocations);
        let records = match self.records(None) {
            Ok(records) => records,
            Err(failure) => {
                plan.failures.push(failure);
                return plan;
            }
        };
        for (_, file) in records {
            let record = match read_record(&file) {
                Ok(record) => record,
                Err(failure) => {
                    plan.failures.push(failure);
                    continue;
                }
            };
            let mut splices = Vec::new();
            if let Some(root) = &record.root {
                if let Err(reason) = rewrite_chassis_lists(root, old, new, &mut splices) {
                    plan.failures.push(RecordFailure::new(&file, reason));
                    continue;
                }
            }
            stage(&mut plan, &file, &record.text, splices);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_node(root: &Path, platform: &str, host: &str, contents: &str) -> PathBuf {
        let dir = root.join(platform).join(NODES_DIR);
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join(format!("{host}.yaml"));
        fs::write(&file, contents).unwrap();
        file
    }

    #[test]
    fn hostname_comes_from_file_stem() {
        let temp = TempDir::new().unwrap();
        write_node(
            temp.path(),
            "lab",
            "node01",
            "chassis:\n  - platform.foundation.cluster\nroles: [k8s]\n",
        );
        write_node(temp.path(), "lab", "node02", "");
        fs::write(temp.path().join("lab/nodes/README.md"), "notes").unwrap();

        let scan = AllocationRegistry::new(temp.path()).load_all(None);
        assert!(scan.warnings.is_empty());
        assert_eq!(scan.facts.len(), 2);
        assert_eq!(scan.facts[0].display_name(), "node01@lab");
        assert_eq!(scan.facts[0].chassis, vec!["platform.foundation.cluster"]);
        assert!(scan.facts[1].chassis.is_empty());
    }

    #[test]
    fn platform_scope_filters_records() {
        let temp = TempDir::new().unwrap();
        write_node(temp.path(), "lab", "a", "chassis: [platform.x]\n");
        write_node(temp.path(), "prod", "b", "chassis: [platform.y]\n");
        let registry = AllocationRegistry::new(temp.path());
        let lab = registry.load_all(Some("lab"));
        assert_eq!(lab.facts.len(), 1);
        assert_eq!(lab.facts[0].hostname, "a");
        let grouped = registry.load_by_platform();
        let names: Vec<_> = grouped.facts.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["lab", "prod"]);
    }

    #[test]
    fn malformed_record_becomes_warning() {
        let temp = TempDir::new().unwrap();
        write_node(temp.path(), "lab", "bad", "chassis: [unterminated\n");
        write_node(temp.path(), "lab", "good", "chassis: [platform.x]\n");
        let scan = AllocationRegistry::new(temp.path()).load_all(None);
        assert_eq!(scan.facts.len(), 1);
        assert_eq!(scan.warnings.len(), 1);
    }

    #[test]
    fn covering_allocations_use_segment_boundaries() {
        let temp = TempDir::new().unwrap();
        write_node(temp.path(), "lab", "a", "chassis: [platform.foundation.cluster]\n");
        write_node(temp.path(), "lab", "b", "chassis: [platform.foundationx]\n");
        let registry = AllocationRegistry::new(temp.path());
        let chassis = Chassis::new();
        let scan = registry.allocations(&chassis, &DeclaredDistribution, None);
        let blocking = AllocationRegistry::allocations_for_path(&scan.facts, "platform.foundation");
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].node, "a@lab");
    }

    #[test]
    fn rewrite_rebases_chassis_entries_only() {
        let temp = TempDir::new().unwrap();
        let touched = write_node(
            temp.path(),
            "lab",
            "a",
            "chassis:\n  - platform.foundation.cluster.control\n  - platform.interaction\nnote: platform.foundation.cluster\n",
        );
        write_node(temp.path(), "lab", "b", "chassis: [platform.interaction]\n");

        let registry = AllocationRegistry::new(temp.path());
        let plan = registry.plan_rewrite("platform.foundation.cluster", "platform.foundation.core");
        assert_eq!(plan.records(), vec![touched.clone()]);
        let outcome = plan.apply();
        assert!(outcome.is_complete());

        assert_eq!(
            fs::read_to_string(&touched).unwrap(),
            "chassis:\n  - platform.foundation.core.control\n  - platform.interaction\nnote: platform.foundation.cluster\n"
        );
    }

    #[test]
    fn rewrite_keeps_comments_and_flow_lists() {
        let temp = TempDir::new().unwrap();
        let record = write_node(
            temp.path(),
            "lab",
            "rack3",
            "# lab rack 3\nchassis: [platform.foundation.cluster.control, 'platform.interaction']   # pinned\nroles:\n    - k8s\n",
        );
        let outcome = AllocationRegistry::new(temp.path())
            .rewrite_references("platform.foundation.cluster", "platform.foundation.core");
        assert_eq!(outcome.updated, vec![record.clone()]);
        assert_eq!(
            fs::read_to_string(&record).unwrap(),
            "# lab rack 3\nchassis: [platform.foundation.core.control, 'platform.interaction']   # pinned\nroles:\n    - k8s\n"
        );
    }

    #[test]
    fn unparseable_record_is_a_plan_failure() {
        let temp = TempDir::new().unwrap();
        let bad = write_node(temp.path(), "lab", "bad", "chassis: [unterminated\n");
        let plan = AllocationRegistry::new(temp.path()).plan_rewrite("platform.a", "platform.b");
        assert!(plan.edits.is_empty());
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].record, bad);
    }
}
