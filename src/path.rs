//! Dotted chassis path grammar.
//!
//! Paths are plain values such as `platform.foundation.cluster.control`. The
//! free functions operate on raw strings because registry records store paths
//! as text; `ChassisPath` is the validated form every mutating operation goes
//! through.

use crate::error::ChassisError;
use std::fmt;

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Validated, non-empty chassis path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChassisPath {
    segments: Vec<String>,
}

impl ChassisPath {
    /// Parse a path strictly.
    ///
    /// Unlike [`split`], empty segments (leading, trailing or doubled
    /// separators) and segments containing whitespace are rejected.
    pub fn parse(raw: &str) -> Result<Self, ChassisError> {
        if raw.trim().is_empty() {
            return Err(ChassisError::invalid_path(raw, "path is empty"));
        }
        let mut segments = Vec::new();
        for segment in raw.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(ChassisError::invalid_path(raw, "path has an empty segment"));
            }
            if segment.chars().any(char::is_whitespace) {
                return Err(ChassisError::invalid_path(
                    raw,
                    "path segments must not contain whitespace",
                ));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn parent(&self) -> Option<ChassisPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Prefix made of the first `len` segments.
    pub fn prefix(&self, len: usize) -> ChassisPath {
        Self {
            segments: self.segments[..len.clamp(1, self.segments.len())].to_vec(),
        }
    }

    /// Segment indices at which two paths of equal depth differ.
    pub fn differing_positions(&self, other: &ChassisPath) -> Vec<usize> {
        self.segments
            .iter()
            .zip(&other.segments)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(idx, _)| idx)
            .collect()
    }
}

impl fmt::Display for ChassisPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.segments))
    }
}

/// Split a dotted string into segments.
///
/// Lenient: consecutive separators collapse and leading or trailing
/// separators are ignored, so `".a..b."` yields `["a", "b"]`.
pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}

/// Parent of a dotted path, or `None` for a single segment.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|idx| &path[..idx])
}

/// Strict ancestors, nearest first.
///
/// `platform.foundation.cluster` yields `["platform.foundation", "platform"]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(up) = parent(current) {
        out.push(up);
        current = up;
    }
    out
}

pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(SEPARATOR)
}

/// True when `path` is `target` or one of its descendants.
pub fn is_within(path: &str, target: &str) -> bool {
    path == target || is_descendant(path, target)
}

/// Re-home `value` from under `old` to under `new`.
///
/// Returns `None` when `value` is neither `old` nor a descendant of it.
pub fn rebase(value: &str, old: &str, new: &str) -> Option<String> {
    if value == old {
        return Some(new.to_string());
    }
    if is_descendant(value, old) {
        return Some(format!("{new}{}", &value[old.len()..]));
    }
    None
}
