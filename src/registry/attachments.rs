//! Component attachments declared in layer playbooks.
//!
//! Each layer keeps a playbook at `src/<layer>/<layer>.yaml`: a list of plays
//! whose `hosts` value is a chassis path and whose `roles` name the attached
//! components. Roles are either bare names or mappings with a `role` key.

use super::{Registry, RewritePlan, Scan, read_record, rebase_scalar, stage, subdirectories};
use crate::error::{RecordFailure, RegistryKind};
use crate::layout::{Span, SpanKind, Splice};
use crate::path;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const HOSTS_KEY: &str = "hosts";

/// Component `component` attached to chassis path `chassis` by `playbook`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub component: String,
    pub chassis: String,
    pub playbook: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Play {
    #[serde(default)]
    hosts: Option<Value>,
    #[serde(default)]
    roles: Vec<RoleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoleEntry {
    Name(String),
    Detailed { role: String },
    Other(Value),
}

impl RoleEntry {
    fn name(&self) -> Option<&str> {
        match self {
            RoleEntry::Name(name) | RoleEntry::Detailed { role: name } => {
                Some(name.as_str()).filter(|n| !n.is_empty())
            }
            RoleEntry::Other(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttachmentRegistry {
    playbook_dir: PathBuf,
}

impl AttachmentRegistry {
    pub fn new(playbook_dir: impl Into<PathBuf>) -> Self {
        Self {
            playbook_dir: playbook_dir.into(),
        }
    }

    /// Playbook paths for every layer directory, in name order.
    fn playbooks(&self) -> Result<Vec<PathBuf>, RecordFailure> {
        let layers = subdirectories(&self.playbook_dir)
            .map_err(|err| RecordFailure::new(&self.playbook_dir, err))?
            .unwrap_or_default();
        Ok(layers
            .into_iter()
            .filter_map(|layer| {
                let name = layer.file_name()?.to_string_lossy().into_owned();
                let playbook = layer.join(format!("{name}.yaml"));
                playbook.exists().then_some(playbook)
            })
            .collect())
    }

    /// Every attachment declared by every playbook.
    pub fn load_all(&self) -> Scan<Attachment> {
        let mut scan = Scan::default();
        let playbooks = match self.playbooks() {
            Ok(playbooks) => playbooks,
            Err(failure) => {
                scan.skip(RegistryKind::Attachments, failure);
                return scan;
            }
        };
        for playbook in playbooks {
            match load_playbook(&playbook) {
                Ok(mut attachments) => scan.facts.append(&mut attachments),
                Err(failure) => scan.skip(RegistryKind::Attachments, failure),
            }
        }
        debug!(count = scan.facts.len(), dir = %self.playbook_dir.display(), "loaded attachments");
        scan
    }

    /// Attachments whose host selector is `chassis_path` or below it.
    pub fn for_path(attachments: &[Attachment], chassis_path: &str) -> Vec<Attachment> {
        attachments
            .iter()
            .filter(|attachment| path::is_within(&attachment.chassis, chassis_path))
            .cloned()
            .collect()
    }
}

fn load_playbook(playbook: &Path) -> Result<Vec<Attachment>, RecordFailure> {
    let data = fs::read_to_string(playbook).map_err(|err| RecordFailure::new(playbook, err))?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let plays: Vec<Play> =
        serde_yaml::from_str(&data).map_err(|err| RecordFailure::new(playbook, err))?;

    let mut attachments = Vec::new();
    for play in plays {
        let Some(hosts) = play.hosts.as_ref().and_then(Value::as_str) else {
            continue;
        };
        for role in &play.roles {
            if let Some(component) = role.name() {
                attachments.push(Attachment {
                    component: component.to_string(),
                    chassis: hosts.to_string(),
                    playbook: playbook.to_path_buf(),
                });
            }
        }
    }
    Ok(attachments)
}

/// Splices for every `hosts` scalar at or below `old`, wherever it appears.
fn rewrite_hosts(
    node: &Span,
    old: &str,
    new: &str,
    splices: &mut Vec<Splice>,
) -> Result<(), String> {
    match &node.kind {
        SpanKind::Sequence { items, .. } => {
            for item in items {
                rewrite_hosts(item, old, new, splices)?;
            }
        }
        SpanKind::Mapping { entries, .. } => {
            for (key, value) in entries {
                if key.scalar() == Some(HOSTS_KEY) && value.scalar().is_some() {
                    splices.extend(rebase_scalar(value, old, new)?);
                } else {
                    rewrite_hosts(value, old, new, splices)?;
                }
            }
        }
        SpanKind::Scalar { .. } | SpanKind::Alias => {}
    }
    Ok(())
}

impl Registry for AttachmentRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Attachments
    }

    fn plan_rewrite(&self, old: &str, new: &str) -> RewritePlan {
        let mut plan = RewritePlan::new(RegistryKind::Attachments);
        let playbooks = match self.playbooks() {
            Ok(playbooks) => playbooks,
            Err(failure) => {
                plan.failures.push(failure);
                return plan;
            }
        };
        for playbook in playbooks {
            let record = match read_record(&playbook) {
                Ok(record) => record,
                Err(failure) => {
                    plan.failures.push(failure);
                    continue;
                }
            };
            let mut splices = Vec::new();
            if let Some(root) = &record.root {
                if let Err(reason) = rewrite_hosts(root, old, new, &mut splices) {
                    plan.failures.push(RecordFailure::new(&playbook, reason));
                    continue;
                }
            }
            stage(&mut plan, &playbook, &record.text, splices);
        }
        plan
    }
}
