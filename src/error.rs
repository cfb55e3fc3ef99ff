//! Error and warning kinds surfaced by chassis operations.
//!
//! Structural errors abort an operation before anything is persisted.
//! Registry read problems and rename propagation failures are not errors:
//! they are carried as [`Warning`]s on the result objects.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Errors during chassis document handling and consistency checks.
#[derive(Debug, thiserror::Error)]
pub enum ChassisError {
    /// The document could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    DocumentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not a well-formed chassis tree.
    #[error("failed to parse {}: {message}", .path.display())]
    DocumentParse { path: PathBuf, message: String },

    /// The document could not be written back.
    #[error("failed to write {}: {source}", .path.display())]
    DocumentWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The edited tree could not be turned back into YAML text.
    #[error("failed to serialize chassis document: {0}")]
    DocumentSerialize(String),

    #[error("invalid chassis path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("chassis path {0:?} already exists")]
    AlreadyExists(String),

    #[error("chassis path {0:?} not found")]
    NotFound(String),

    #[error(
        "cannot rename {old:?} to {new:?}: paths have different depths ({old_depth} vs {new_depth})"
    )]
    DepthMismatch {
        old: String,
        new: String,
        old_depth: usize,
        new_depth: usize,
    },

    #[error("cannot rename {0:?} to itself")]
    IdenticalPath(String),

    /// Only one segment may change per rename.
    #[error(
        "cannot rename {old:?} to {new:?}: {} segments differ, rename one segment at a time",
        .positions.len()
    )]
    AmbiguousRename {
        old: String,
        new: String,
        positions: Vec<usize>,
    },

    /// The node holds a raw value and cannot take children.
    #[error("chassis path {0:?} holds a scalar value and cannot take children")]
    ScalarValue(String),

    #[error(
        "cannot remove chassis {path:?}: {} node(s) allocated [{}], {} component(s) attached [{}]",
        .allocations.len(),
        .allocations.join(", "),
        .attachments.len(),
        .attachments.join(", ")
    )]
    RemovalBlocked {
        path: String,
        allocations: Vec<String>,
        attachments: Vec<String>,
    },

    /// Staged rename propagation could not prepare every registry edit.
    #[error(
        "rename {old:?} -> {new:?} aborted: {} registry record(s) could not be staged ({})",
        .failures.len(),
        describe_failures(.failures)
    )]
    PropagationStaging {
        old: String,
        new: String,
        failures: Vec<RecordFailure>,
    },

    #[error("unable to locate a chassis root: {0}")]
    RootNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChassisError {
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DocumentParse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Which external registry a fact or failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Allocations,
    Attachments,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Allocations => "allocations",
            RegistryKind::Attachments => "attachments",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry record that could not be read, parsed or written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record: PathBuf,
    pub reason: String,
}

impl RecordFailure {
    pub fn new(record: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self {
            record: record.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record.display(), self.reason)
    }
}

fn describe_failures(failures: &[RecordFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Non-fatal conditions reported alongside a successful result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A registry record could not be read; it was treated as holding no facts.
    RegistryScan {
        registry: RegistryKind,
        failure: RecordFailure,
    },
    /// The document change stands but some registry records were not rewritten.
    PropagationPartialFailure {
        registry: RegistryKind,
        failures: Vec<RecordFailure>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::RegistryScan { registry, failure } => {
                write!(f, "skipped {registry} record {failure}")
            }
            Warning::PropagationPartialFailure { registry, failures } => write!(
                f,
                "chassis renamed but {} {registry} record(s) were not updated: {}",
                failures.len(),
                describe_failures(failures)
            ),
        }
    }
}
