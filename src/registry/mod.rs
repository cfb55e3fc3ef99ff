//! External registries that reference chassis paths.
//!
//! Both registries are directories of YAML records owned by other tools. They
//! are read on demand and tolerate missing storage; only rename propagation
//! writes to them. Writes go through a [`RewritePlan`] so a dry run and a
//! staged rename can inspect every edit before anything touches disk.
//!
//! Rewrites replace only the text of the scalars they rebase; the rest of a
//! record (comments, document markers, indentation, quoting) is kept as is.

pub mod allocations;
pub mod attachments;

use crate::error::{RecordFailure, RegistryKind, Warning};
use crate::layout::{self, Span, Splice};
use crate::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Facts read from a registry plus the records that had to be skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct Scan<T> {
    pub facts: Vec<T>,
    pub warnings: Vec<Warning>,
}

impl<T> Default for Scan<T> {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T> Scan<T> {
    pub(crate) fn skip(&mut self, registry: RegistryKind, failure: RecordFailure) {
        warn!(%registry, record = %failure.record.display(), reason = %failure.reason, "skipping registry record");
        self.warnings.push(Warning::RegistryScan { registry, failure });
    }
}

/// New contents for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedEdit {
    pub record: PathBuf,
    pub contents: String,
}

/// Every edit a rename would make to one registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewritePlan {
    pub registry: RegistryKind,
    pub edits: Vec<StagedEdit>,
    /// Records that could not be inspected.
    pub failures: Vec<RecordFailure>,
}

impl RewritePlan {
    pub(crate) fn new(registry: RegistryKind) -> Self {
        Self {
            registry,
            edits: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Records the plan would modify.
    pub fn records(&self) -> Vec<PathBuf> {
        self.edits.iter().map(|edit| edit.record.clone()).collect()
    }

    /// Write every staged edit, collecting per-record failures.
    pub fn apply(self) -> Propagation {
        let mut propagation = Propagation {
            registry: self.registry,
            updated: Vec::new(),
            failures: self.failures,
        };
        for edit in self.edits {
            match write_atomic(&edit.record, &edit.contents) {
                Ok(()) => {
                    debug!(registry = %self.registry, record = %edit.record.display(), "rewrote chassis references");
                    propagation.updated.push(edit.record);
                }
                Err(err) => propagation
                    .failures
                    .push(RecordFailure::new(edit.record, err)),
            }
        }
        propagation
    }
}

/// Outcome of rewriting one registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Propagation {
    pub registry: RegistryKind,
    pub updated: Vec<PathBuf>,
    pub failures: Vec<RecordFailure>,
}

impl Propagation {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Warning to surface when some records were not rewritten.
    pub fn warning(&self) -> Option<Warning> {
        if self.failures.is_empty() {
            return None;
        }
        Some(Warning::PropagationPartialFailure {
            registry: self.registry,
            failures: self.failures.clone(),
        })
    }
}

/// Rename support shared by the allocation and attachment registries.
pub trait Registry {
    fn kind(&self) -> RegistryKind;

    /// Stage new contents for every record referencing `old` or a path
    /// below it.
    fn plan_rewrite(&self, old: &str, new: &str) -> RewritePlan;

    /// Plan and apply in one step.
    fn rewrite_references(&self, old: &str, new: &str) -> Propagation {
        self.plan_rewrite(old, new).apply()
    }
}

/// Sorted subdirectories of `dir`; `Ok(None)` when `dir` does not exist.
pub(crate) fn subdirectories(dir: &Path) -> io::Result<Option<Vec<PathBuf>>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(Some(dirs))
}

/// A record's text and the located YAML inside it.
pub(crate) struct RecordText {
    pub(crate) text: String,
    /// `None` for an empty record.
    pub(crate) root: Option<Span>,
}

pub(crate) fn read_record(record: &Path) -> Result<RecordText, RecordFailure> {
    let text = fs::read_to_string(record).map_err(|err| RecordFailure::new(record, err))?;
    let root = layout::parse(&text).map_err(|reason| RecordFailure::new(record, reason))?;
    Ok(RecordText { text, root })
}

/// Splice rebasing `span` when it is a scalar at or below `old`.
///
/// Fails for a matching scalar whose text cannot be replaced in place, such
/// as a block scalar or a plain scalar folded over several lines.
pub(crate) fn rebase_scalar(span: &Span, old: &str, new: &str) -> Result<Option<Splice>, String> {
    let Some(value) = span.scalar() else {
        return Ok(None);
    };
    let Some(rebased) = crate::path::rebase(value, old, new) else {
        return Ok(None);
    };
    let quoting = span
        .editable()
        .ok_or_else(|| format!("cannot rewrite {value:?} in place"))?;
    Ok(Some(Splice {
        range: span.range(),
        text: layout::render_scalar(&rebased, quoting),
    }))
}

/// Stage the spliced record; records without splices are left alone.
pub(crate) fn stage(plan: &mut RewritePlan, record: &Path, text: &str, splices: Vec<Splice>) {
    if splices.is_empty() {
        return;
    }
    plan.edits.push(StagedEdit {
        record: record.to_path_buf(),
        contents: layout::apply(text, splices),
    });
}
