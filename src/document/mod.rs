//! The chassis document (`chassis.yaml`).
//!
//! `Chassis` wraps the order-preserving parse tree and exposes read queries
//! over canonical paths plus structural edits. The document keeps its source
//! text; an edit splices only the lines of the targeted node, so comments,
//! indentation and quoting elsewhere survive byte-for-byte.

mod edit;
mod tree;

use crate::error::ChassisError;
use crate::layout::{self, Splice};
use crate::path::{self, ChassisPath};
use crate::write_atomic;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use tree::{ScalarParent, Tree};

/// Default document file name under the chassis root.
pub const DEFAULT_DOCUMENT: &str = "chassis.yaml";

#[derive(Clone, Debug, Default)]
pub struct Chassis {
    source: String,
    tree: Tree,
}

impl Chassis {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a chassis document from disk.
    pub fn load(path: &Path) -> Result<Self, ChassisError> {
        let source = fs::read_to_string(path).map_err(|source| ChassisError::DocumentRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_from(&source, path)
    }

    /// Parse a chassis document held in memory.
    pub fn parse(source: &str) -> Result<Self, ChassisError> {
        Self::parse_from(source, Path::new("<inline>"))
    }

    fn parse_from(source: &str, origin: &Path) -> Result<Self, ChassisError> {
        if source.trim().is_empty() {
            return Ok(Self {
                source: source.to_string(),
                tree: Tree::default(),
            });
        }
        let value: serde_yaml::Value = serde_yaml::from_str(source)
            .map_err(|err| ChassisError::parse_error(origin, err.to_string()))?;
        let span = layout::parse(source).unwrap_or_else(|message| {
            debug!(origin = %origin.display(), %message, "no source layout; edits will re-emit");
            None
        });
        let tree = Tree::from_value(value, span.as_ref(), source)
            .map_err(|message| ChassisError::parse_error(origin, message))?;
        let chassis = Self {
            source: source.to_string(),
            tree,
        };
        chassis.ensure_unique_paths(origin)?;
        Ok(chassis)
    }

    /// Adopt the edited tree, preferring the spliced text when it reads back
    /// as that tree.
    fn commit(&mut self, edited: Tree, splices: Option<Vec<Splice>>) -> Result<(), ChassisError> {
        if let Some(splices) = splices {
            let text = layout::apply(&self.source, splices);
            match Self::parse(&text) {
                Ok(spliced) if spliced.flatten() == edited.flatten() => {
                    *self = spliced;
                    return Ok(());
                }
                Ok(_) => debug!("spliced document lost paths; re-emitting"),
                Err(err) => debug!(error = %err, "spliced document does not parse; re-emitting"),
            }
        } else {
            debug!("edit target has no usable layout; re-emitting");
        }
        let text = serde_yaml::to_string(&edited.to_value())
            .map_err(|err| ChassisError::DocumentSerialize(err.to_string()))?;
        *self = Self::parse(&text)?;
        Ok(())
    }

    fn ensure_unique_paths(&self, origin: &Path) -> Result<(), ChassisError> {
        let mut seen = std::collections::BTreeSet::new();
        for path in self.flatten() {
            if !seen.insert(path.clone()) {
                return Err(ChassisError::parse_error(
                    origin,
                    format!("duplicate chassis path {path:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Every canonical path in document order.
    ///
    /// Example: `["platform", "platform.foundation", "platform.foundation.cluster"]`.
    pub fn flatten(&self) -> Vec<String> {
        self.tree.flatten()
    }

    /// Paths equal to `prefix` or below it; everything when `prefix` is empty.
    pub fn flatten_with_prefix(&self, prefix: &str) -> Vec<String> {
        let all = self.flatten();
        if prefix.is_empty() {
            return all;
        }
        all.into_iter()
            .filter(|candidate| path::is_within(candidate, prefix))
            .collect()
    }

    pub fn exists(&self, chassis_path: &str) -> bool {
        self.flatten().iter().any(|candidate| candidate == chassis_path)
    }

    /// The first top-level name (e.g. `platform`).
    pub fn root(&self) -> Option<String> {
        self.flatten().into_iter().next()
    }

    /// Direct children of `chassis_path`.
    pub fn children(&self, chassis_path: &str) -> Vec<String> {
        self.flatten()
            .into_iter()
            .filter(|candidate| path::parent(candidate) == Some(chassis_path))
            .collect()
    }

    /// Ancestors of `chassis_path`, nearest first.
    pub fn ancestors(&self, chassis_path: &str) -> Vec<String> {
        path::ancestors(chassis_path)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Parent path to direct children, for every path that has children.
    pub fn children_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for chassis_path in self.flatten() {
            if let Some(parent) = path::parent(&chassis_path) {
                result
                    .entry(parent.to_string())
                    .or_default()
                    .push(chassis_path.clone());
            }
        }
        result
    }

    pub fn ancestors_map(&self) -> BTreeMap<String, Vec<String>> {
        self.flatten()
            .into_iter()
            .map(|chassis_path| {
                let ancestors = self.ancestors(&chassis_path);
                (chassis_path, ancestors)
            })
            .collect()
    }

    /// Paths without children.
    pub fn leaves(&self) -> Vec<String> {
        let parents = self.children_map();
        self.flatten()
            .into_iter()
            .filter(|candidate| !parents.contains_key(candidate))
            .collect()
    }

    /// Add a path, creating any missing intermediate groups.
    pub fn add(&mut self, chassis_path: &str) -> Result<(), ChassisError> {
        let target = ChassisPath::parse(chassis_path)?;
        let canonical = target.to_string();
        if self.exists(&canonical) {
            return Err(ChassisError::AlreadyExists(canonical));
        }
        let segments = target.segments();
        let mut known = 0;
        while known < segments.len() && self.tree.find(&segments[..=known]).is_some() {
            known += 1;
        }
        let existing = self.tree.find(&segments[..known]);
        let mut edited = self.tree.clone();
        edited
            .insert(segments)
            .map_err(|ScalarParent(holder)| ChassisError::ScalarValue(self.tree.path_of(holder)))?;
        let splices = edit::add(&self.tree, &edited, &self.source, existing, &segments[known..]);
        self.commit(edited, splices)
    }

    /// Remove a path together with everything below it.
    pub fn remove(&mut self, chassis_path: &str) -> Result<(), ChassisError> {
        let target = ChassisPath::parse(chassis_path)?;
        let canonical = target.to_string();
        if !self.exists(&canonical) {
            return Err(ChassisError::NotFound(canonical));
        }
        let id = self
            .tree
            .find(target.segments())
            .ok_or_else(|| ChassisError::NotFound(canonical.clone()))?;
        let mut edited = self.tree.clone();
        edited.detach(id);
        let splices = edit::remove(&self.tree, &edited, &self.source, id);
        self.commit(edited, splices)
    }

    /// Rename exactly one segment of `old` in place.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), ChassisError> {
        let (node_path, new_name) = self.check_rename(old, new)?;
        let id = self
            .tree
            .find(node_path.segments())
            .ok_or_else(|| ChassisError::NotFound(old.to_string()))?;
        let mut edited = self.tree.clone();
        edited.set_name(id, &new_name);
        let splices = edit::rename(&self.tree, id, &new_name);
        self.commit(edited, splices)
    }

    /// Validate a rename without applying it.
    ///
    /// Returns the path of the node whose name changes (an ancestor of `old`
    /// when the differing segment is not the last one) and its new name.
    pub fn check_rename(&self, old: &str, new: &str) -> Result<(ChassisPath, String), ChassisError> {
        let old_path = ChassisPath::parse(old)?;
        let new_path = ChassisPath::parse(new)?;
        if old_path.depth() != new_path.depth() {
            return Err(ChassisError::DepthMismatch {
                old: old_path.to_string(),
                new: new_path.to_string(),
                old_depth: old_path.depth(),
                new_depth: new_path.depth(),
            });
        }
        if old_path == new_path {
            return Err(ChassisError::IdenticalPath(old_path.to_string()));
        }
        let positions = old_path.differing_positions(&new_path);
        if positions.len() > 1 {
            return Err(ChassisError::AmbiguousRename {
                old: old_path.to_string(),
                new: new_path.to_string(),
                positions,
            });
        }
        if !self.exists(&old_path.to_string()) {
            return Err(ChassisError::NotFound(old_path.to_string()));
        }
        if self.exists(&new_path.to_string()) {
            return Err(ChassisError::AlreadyExists(new_path.to_string()));
        }
        let position = positions[0];
        let renamed_prefix = new_path.prefix(position + 1);
        // Renaming an ancestor must not collide with an existing sibling.
        if self.exists(&renamed_prefix.to_string()) {
            return Err(ChassisError::AlreadyExists(renamed_prefix.to_string()));
        }
        Ok((
            old_path.prefix(position + 1),
            new_path.segments()[position].clone(),
        ))
    }

    /// The document as YAML text, including every edit so far.
    pub fn to_yaml_string(&self) -> String {
        self.source.clone()
    }

    /// Write the document atomically.
    pub fn save(&self, destination: &Path) -> Result<(), ChassisError> {
        write_atomic(destination, &self.source).map_err(|source| ChassisError::DocumentWrite {
            path: destination.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "platform:\n  foundation:\n    - cluster:\n        - control\n    - storage\n  interaction:\n    - legacy\n";

    #[test]
    fn children_are_one_level_deep() {
        let chassis = Chassis::parse(SAMPLE).unwrap();
        assert_eq!(
            chassis.children("platform"),
            vec!["platform.foundation", "platform.interaction"]
        );
        assert_eq!(
            chassis.children("platform.foundation"),
            vec!["platform.foundation.cluster", "platform.foundation.storage"]
        );
        assert!(chassis.children("platform.interaction.legacy").is_empty());
    }

    #[test]
    fn maps_and_leaves() {
        let chassis = Chassis::parse(SAMPLE).unwrap();
        assert_eq!(chassis.root().as_deref(), Some("platform"));
        assert_eq!(
            chassis.leaves(),
            vec![
                "platform.foundation.cluster.control",
                "platform.foundation.storage",
                "platform.interaction.legacy"
            ]
        );
        let ancestors = chassis.ancestors_map();
        assert_eq!(
            ancestors["platform.foundation.cluster"],
            vec!["platform.foundation", "platform"]
        );
        assert_eq!(chassis.children_map()["platform.foundation.cluster"].len(), 1);
    }

    #[test]
    fn prefix_filter_respects_segment_boundaries() {
        let chassis =
            Chassis::parse("platform:\n  foundation:\n    - cluster\n    - clusterx\n").unwrap();
        assert_eq!(
            chassis.flatten_with_prefix("platform.foundation.cluster"),
            vec!["platform.foundation.cluster"]
        );
        assert_eq!(chassis.flatten_with_prefix("").len(), 4);
    }

    #[test]
    fn duplicate_paths_fail_to_load() {
        let err = Chassis::parse("platform:\n  foundation:\n    - cluster\n    - cluster\n")
            .unwrap_err();
        assert!(matches!(err, ChassisError::DocumentParse { .. }), "{err}");
    }

    #[test]
    fn rename_of_ancestor_segment_checks_sibling_collision() {
        let mut chassis = Chassis::parse(
            "platform:\n  foundation:\n    - cluster:\n        - control\n    - edge\n",
        )
        .unwrap();
        let err = chassis
            .rename("platform.foundation.cluster.control", "platform.foundation.edge.control")
            .unwrap_err();
        assert!(matches!(err, ChassisError::AlreadyExists(ref p) if p == "platform.foundation.edge"));

        chassis
            .rename("platform.foundation.cluster.control", "platform.foundation.core.control")
            .unwrap();
        assert_eq!(
            chassis.flatten(),
            vec![
                "platform",
                "platform.foundation",
                "platform.foundation.core",
                "platform.foundation.core.control",
                "platform.foundation.edge",
            ]
        );
    }

    #[test]
    fn add_below_scalar_value_names_the_holder() {
        let mut chassis =
            Chassis::parse("platform:\n  foundation:\n    - cluster: pinned\n").unwrap();
        let err = chassis.add("platform.foundation.cluster.control").unwrap_err();
        assert!(
            matches!(err, ChassisError::ScalarValue(ref p) if p == "platform.foundation.cluster"),
            "{err}"
        );
    }

    #[test]
    fn edits_without_splices_re_emit_the_edited_tree() {
        let mut chassis = Chassis::parse(&format!("# note\n{SAMPLE}")).unwrap();
        let storage = ["platform", "foundation", "storage"].map(String::from);
        let id = chassis.tree.find(&storage).unwrap();
        let mut edited = chassis.tree.clone();
        edited.detach(id);
        chassis.commit(edited, None).unwrap();
        assert!(!chassis.to_yaml_string().contains("# note"));
        assert!(!chassis.exists("platform.foundation.storage"));
        assert_eq!(chassis.flatten().len(), 6);

        let err = ChassisError::DocumentSerialize("unrepresentable key".into());
        assert_eq!(
            err.to_string(),
            "failed to serialize chassis document: unrepresentable key"
        );
    }
}
