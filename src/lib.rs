//! Chassis management: an order-preserving editor for `chassis.yaml` that
//! keeps node allocations and component attachments consistent with
//! structural edits.

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
mod layout;
pub mod path;
pub mod registry;

pub use config::{ChassisConfig, PropagationMode};
pub use coordinator::{
    AddReport, ComponentEntry, Coordinator, FactKind, ListReport, NodeEntry, QueryReport,
    RemoveReport, RenameReport, ShowReport,
};
pub use document::{Chassis, DEFAULT_DOCUMENT};
pub use error::{ChassisError, RecordFailure, RegistryKind, Warning};
pub use path::ChassisPath;
pub use registry::allocations::{
    Allocation, AllocationRegistry, DeclaredDistribution, Distribution, Node,
};
pub use registry::attachments::{Attachment, AttachmentRegistry};
pub use registry::{Propagation, Registry, RewritePlan, Scan};

use std::io::Write;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

pub const ENV_ROOT: &str = "CHASSIS_ROOT";

fn is_chassis_root(candidate: &Path) -> bool {
    candidate.join(DEFAULT_DOCUMENT).is_file()
}

fn root_from_hint(hint: &str) -> Option<PathBuf> {
    if hint.is_empty() {
        return None;
    }
    let hint_path = PathBuf::from(hint);
    if !hint_path.exists() || !is_chassis_root(&hint_path) {
        return None;
    }
    fs::canonicalize(hint_path).ok()
}

fn search_upwards(start: &Path) -> Option<PathBuf> {
    let mut dir = fs::canonicalize(start).ok()?;
    loop {
        if is_chassis_root(&dir) {
            return Some(dir);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Locate the directory holding `chassis.yaml`.
///
/// `CHASSIS_ROOT` wins when it points at a valid root; otherwise the search
/// walks up from `start`.
pub fn find_chassis_root(start: &Path) -> Result<PathBuf, ChassisError> {
    if let Ok(env_root) = env::var(ENV_ROOT) {
        if let Some(root) = root_from_hint(&env_root) {
            return Ok(root);
        }
    }

    if let Some(root) = search_upwards(start) {
        return Ok(root);
    }

    Err(ChassisError::RootNotFound(format!(
        "no {DEFAULT_DOCUMENT} in {} or its parents; set {ENV_ROOT} to the platform directory",
        start.display()
    )))
}

/// Replace `path` with `contents` via a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(contents.as_bytes())?;
    staged.flush()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}
