//! Cross-store operations.
//!
//! The coordinator owns no state between calls: each operation loads
//! `chassis.yaml` fresh, consults the allocation and attachment registries
//! when it needs to, and persists the document at the end of a mutation.
//! Removal is refused while anything still references the subtree, and a
//! rename is carried into every registry record that mentions the old path.

use crate::config::{ChassisConfig, PropagationMode};
use crate::document::Chassis;
use crate::error::{ChassisError, RecordFailure, Warning};
use crate::path::{self, ChassisPath};
use crate::registry::allocations::{
    Allocation, AllocationRegistry, DeclaredDistribution, Distribution,
};
use crate::registry::attachments::{Attachment, AttachmentRegistry};
use crate::registry::{Propagation, Registry, RewritePlan};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which kind of fact `show` and `query` look at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Node,
    Component,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Node => "node",
            FactKind::Component => "component",
        }
    }
}

impl TryFrom<&str> for FactKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "node" => Ok(FactKind::Node),
            "component" => Ok(FactKind::Component),
            other => Err(format!("unknown kind {other:?} (expected node or component)")),
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub chassis: String,
    /// False when the path already existed and `force` was set.
    pub created: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub chassis: String,
    pub dry_run: bool,
    pub removed: bool,
    pub allocated_nodes: Vec<String>,
    pub attached_components: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl RemoveReport {
    pub fn is_blocked(&self) -> bool {
        !self.allocated_nodes.is_empty() || !self.attached_components.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenameReport {
    pub old: String,
    pub new: String,
    pub dry_run: bool,
    pub propagation: PropagationMode,
    /// Playbooks rewritten, or the ones a dry run would rewrite.
    pub updated_attachments: Vec<PathBuf>,
    /// Node records rewritten, or the ones a dry run would rewrite.
    pub updated_allocations: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

impl RenameReport {
    /// True when the document was renamed but some registry records were not.
    pub fn is_partial(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| matches!(warning, Warning::PropagationPartialFailure { .. }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListReport {
    pub prefix: Option<String>,
    pub paths: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub node: String,
    pub hostname: String,
    pub platform: String,
    pub paths: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentEntry {
    pub component: String,
    pub chassis: String,
    pub playbook: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShowReport {
    pub chassis: Option<String>,
    pub nodes: Vec<NodeEntry>,
    pub components: Vec<ComponentEntry>,
    pub warnings: Vec<Warning>,
}

impl ShowReport {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.components.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    pub identifier: String,
    /// Kind of fact the identifier matched, if any.
    pub matched: Option<FactKind>,
    pub paths: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Facts that keep a path from being removed.
struct Blockers {
    allocations: Vec<Allocation>,
    attachments: Vec<Attachment>,
    warnings: Vec<Warning>,
}

pub struct Coordinator {
    config: ChassisConfig,
    allocations: AllocationRegistry,
    attachments: AttachmentRegistry,
    distribution: Box<dyn Distribution>,
}

impl Coordinator {
    pub fn new(config: ChassisConfig) -> Self {
        Self {
            allocations: AllocationRegistry::new(&config.inventory_dir),
            attachments: AttachmentRegistry::new(&config.playbook_dir),
            distribution: Box::new(DeclaredDistribution),
            config,
        }
    }

    /// Replace the default distribution (declared paths only).
    pub fn with_distribution(mut self, distribution: Box<dyn Distribution>) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn config(&self) -> &ChassisConfig {
        &self.config
    }

    pub fn load_chassis(&self) -> Result<Chassis, ChassisError> {
        debug!(document = %self.config.document.display(), "loading chassis");
        Chassis::load(&self.config.document)
    }

    fn save(&self, chassis: &Chassis) -> Result<(), ChassisError> {
        chassis.save(&self.config.document)
    }

    fn blockers(&self, chassis: &Chassis, target: &str) -> Blockers {
        let allocations = self
            .allocations
            .allocations(chassis, self.distribution.as_ref(), None);
        let attachments = self.attachments.load_all();

        let mut warnings = allocations.warnings;
        warnings.extend(attachments.warnings);
        Blockers {
            allocations: AllocationRegistry::allocations_for_path(&allocations.facts, target),
            attachments: AttachmentRegistry::for_path(&attachments.facts, target),
            warnings,
        }
    }

    /// Paths equal to `prefix` or below it; every path when `prefix` is
    /// `None` or empty.
    pub fn list(&self, prefix: Option<&str>) -> Result<ListReport, ChassisError> {
        let chassis = self.load_chassis()?;
        let paths = chassis.flatten_with_prefix(prefix.unwrap_or_default());
        Ok(ListReport {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            paths,
        })
    }

    /// Nodes and components allocated or attached to `target` or below it.
    ///
    /// Without a target every node and every attachment is reported.
    pub fn show(
        &self,
        target: Option<&str>,
        platform: Option<&str>,
        kind: Option<FactKind>,
    ) -> Result<ShowReport, ChassisError> {
        let chassis = self.load_chassis()?;
        let target = match target.filter(|t| !t.is_empty()) {
            Some(raw) => {
                let canonical = ChassisPath::parse(raw)?.to_string();
                if !chassis.exists(&canonical) {
                    return Err(ChassisError::NotFound(canonical));
                }
                Some(canonical)
            }
            None => None,
        };

        let mut warnings = Vec::new();
        let mut nodes = Vec::new();
        if kind != Some(FactKind::Component) {
            let scan = self
                .allocations
                .allocations(&chassis, self.distribution.as_ref(), platform);
            warnings.extend(scan.warnings);
            let matching = match target.as_deref() {
                Some(target) => AllocationRegistry::allocations_for_path(&scan.facts, target),
                None => scan.facts,
            };
            nodes = matching
                .into_iter()
                .map(|allocation| NodeEntry {
                    node: allocation.node,
                    hostname: allocation.hostname,
                    platform: allocation.platform,
                    paths: allocation.paths,
                })
                .collect();
            nodes.sort_by(|a, b| {
                (a.platform.as_str(), a.hostname.as_str())
                    .cmp(&(b.platform.as_str(), b.hostname.as_str()))
            });
        }

        let mut components = Vec::new();
        if kind != Some(FactKind::Node) {
            let scan = self.attachments.load_all();
            warnings.extend(scan.warnings);
            let matching = match target.as_deref() {
                Some(target) => AttachmentRegistry::for_path(&scan.facts, target),
                None => scan.facts,
            };
            components = matching
                .into_iter()
                .map(|attachment| ComponentEntry {
                    component: attachment.component,
                    chassis: attachment.chassis,
                    playbook: attachment.playbook,
                })
                .collect();
            components.sort_by(|a, b| {
                (a.chassis.as_str(), a.component.as_str())
                    .cmp(&(b.chassis.as_str(), b.component.as_str()))
            });
        }

        Ok(ShowReport {
            chassis: target,
            nodes,
            components,
            warnings,
        })
    }

    /// Chassis paths a hostname is allocated to, or failing that, the paths
    /// a component is attached to.
    pub fn query(
        &self,
        identifier: &str,
        kind: Option<FactKind>,
    ) -> Result<QueryReport, ChassisError> {
        let mut warnings = Vec::new();
        let mut matched = None;
        let mut paths = BTreeSet::new();

        if kind != Some(FactKind::Component) {
            let scan = self.allocations.load_all(None);
            warnings.extend(scan.warnings);
            for node in scan.facts.into_iter().filter(|n| n.hostname == identifier) {
                matched = Some(FactKind::Node);
                paths.extend(node.chassis);
            }
        }

        if matched.is_none() && kind != Some(FactKind::Node) {
            // Component lookup needs a readable document.
            self.load_chassis()?;
            let scan = self.attachments.load_all();
            warnings.extend(scan.warnings);
            for attachment in scan.facts.into_iter().filter(|a| a.component == identifier) {
                matched = Some(FactKind::Component);
                paths.insert(attachment.chassis);
            }
        }

        Ok(QueryReport {
            identifier: identifier.to_string(),
            matched,
            paths: paths.into_iter().collect(),
            warnings,
        })
    }

    /// Add `target`, creating missing intermediates.
    ///
    /// With `force`, an existing path is a successful no-op.
    pub fn add(&self, target: &str, force: bool) -> Result<AddReport, ChassisError> {
        let canonical = ChassisPath::parse(target)?.to_string();
        let mut chassis = self.load_chassis()?;
        if force && chassis.exists(&canonical) {
            debug!(chassis = %canonical, "path already present");
            return Ok(AddReport {
                chassis: canonical,
                created: false,
            });
        }
        chassis.add(&canonical)?;
        self.save(&chassis)?;
        info!(chassis = %canonical, "added chassis path");
        Ok(AddReport {
            chassis: canonical,
            created: true,
        })
    }

    /// Remove `target` and its subtree unless a node or component still
    /// references it.
    ///
    /// A dry run reports the blockers and never touches the document.
    pub fn remove(&self, target: &str, dry_run: bool) -> Result<RemoveReport, ChassisError> {
        let canonical = ChassisPath::parse(target)?.to_string();
        let mut chassis = self.load_chassis()?;
        if !chassis.exists(&canonical) {
            return Err(ChassisError::NotFound(canonical));
        }

        let blockers = self.blockers(&chassis, &canonical);
        let allocated_nodes: Vec<String> = blockers
            .allocations
            .iter()
            .map(|allocation| allocation.node.clone())
            .collect();
        let attached_components: Vec<String> = blockers
            .attachments
            .iter()
            .map(|attachment| attachment.component.clone())
            .collect();

        if dry_run {
            return Ok(RemoveReport {
                chassis: canonical,
                dry_run,
                removed: false,
                allocated_nodes,
                attached_components,
                warnings: blockers.warnings,
            });
        }

        if !allocated_nodes.is_empty() || !attached_components.is_empty() {
            return Err(ChassisError::RemovalBlocked {
                path: canonical,
                allocations: allocated_nodes,
                attachments: attached_components,
            });
        }

        chassis.remove(&canonical)?;
        self.save(&chassis)?;
        info!(chassis = %canonical, "removed chassis path");
        Ok(RemoveReport {
            chassis: canonical,
            dry_run,
            removed: true,
            allocated_nodes,
            attached_components,
            warnings: blockers.warnings,
        })
    }

    /// Rename one segment and carry the change into both registries.
    ///
    /// Registry records are rebased on the prefix whose name actually
    /// changed, so renaming an ancestor segment also moves references to
    /// its other descendants.
    pub fn rename(&self, old: &str, new: &str, dry_run: bool) -> Result<RenameReport, ChassisError> {
        let mut chassis = self.load_chassis()?;
        let (renamed, name) = chassis.check_rename(old, new)?;
        let from = renamed.to_string();
        let to = match renamed.parent() {
            Some(parent) => path::join(&[parent.to_string(), name]),
            None => name,
        };
        let old = ChassisPath::parse(old)?.to_string();
        let new = ChassisPath::parse(new)?.to_string();
        let mode = self.config.propagation;

        if dry_run {
            let plans = [
                self.attachments.plan_rewrite(&from, &to),
                self.allocations.plan_rewrite(&from, &to),
            ];
            let warnings: Vec<Warning> = plans
                .iter()
                .flat_map(|plan| {
                    plan.failures.iter().map(move |failure| Warning::RegistryScan {
                        registry: plan.registry,
                        failure: failure.clone(),
                    })
                })
                .collect();
            let [attachments, allocations] = plans;
            return Ok(RenameReport {
                old,
                new,
                dry_run,
                propagation: mode,
                updated_attachments: attachments.records(),
                updated_allocations: allocations.records(),
                warnings,
            });
        }

        let (attachments, allocations) = match mode {
            PropagationMode::BestEffort => {
                chassis.rename(&old, &new)?;
                self.save(&chassis)?;
                info!(%old, %new, "renamed chassis path");
                (
                    self.attachments.rewrite_references(&from, &to),
                    self.allocations.rewrite_references(&from, &to),
                )
            }
            PropagationMode::Staged => {
                let attachments = self.attachments.plan_rewrite(&from, &to);
                let allocations = self.allocations.plan_rewrite(&from, &to);
                let failures = staging_failures(&attachments, &allocations);
                if !failures.is_empty() {
                    return Err(ChassisError::PropagationStaging { old, new, failures });
                }
                chassis.rename(&old, &new)?;
                self.save(&chassis)?;
                info!(%old, %new, "renamed chassis path");
                (attachments.apply(), allocations.apply())
            }
        };

        let warnings: Vec<Warning> = [&attachments, &allocations]
            .into_iter()
            .filter_map(Propagation::warning)
            .collect();
        for warning in &warnings {
            warn!(%warning, "rename propagation incomplete");
        }

        Ok(RenameReport {
            old,
            new,
            dry_run,
            propagation: mode,
            updated_attachments: attachments.updated,
            updated_allocations: allocations.updated,
            warnings,
        })
    }
}

fn staging_failures(attachments: &RewritePlan, allocations: &RewritePlan) -> Vec<RecordFailure> {
    attachments
        .failures
        .iter()
        .chain(&allocations.failures)
        .cloned()
        .collect()
}
