//! Text splices for document edits.
//!
//! Each planner gets the tree as loaded (with layouts into `text`) and the
//! same tree after the edit was applied in memory. It returns the splices
//! that turn `text` into a document with the edited tree, or `None` when the
//! text around the target cannot be edited in place.

use super::tree::{NodeId, Slot, Tree, ValueLayout};
use crate::layout::{self, Quoting, Splice};

pub(super) fn rename(before: &Tree, id: NodeId, name: &str) -> Option<Vec<Splice>> {
    let node = before.layout(id)?;
    Some(vec![Splice {
        range: node.key.clone(),
        text: layout::render_scalar(name, node.quoting),
    }])
}

pub(super) fn remove(before: &Tree, after: &Tree, text: &str, id: NodeId) -> Option<Vec<Splice>> {
    let node = before.layout(id)?;
    let parent = before.parent(id);
    if node.in_flow {
        return rewrite_flow(before, after, parent);
    }
    let whole_item = |head: usize| {
        let mut splices = vec![delete_lines(text, head, node.boundary)];
        if before.container_len(parent) == 1 {
            splices.extend(mark_empty(before, parent)?);
        }
        Some(splices)
    };
    match before.slot(id) {
        Slot::Entry => whole_item(node.key.start),
        Slot::Marker => whole_item(node.dash?),
        Slot::GroupEntry { siblings, .. } if siblings.len() == 1 => whole_item(node.dash?),
        Slot::GroupEntry { siblings, index: 0 } => {
            // The first entry shares its line with the item's dash.
            let next = before.layout(siblings[1])?;
            Some(vec![Splice::delete(node.key.start..next.key.start)])
        }
        Slot::GroupEntry { .. } => Some(vec![delete_lines(text, node.key.start, node.boundary)]),
    }
}

/// `existing` is the deepest node already on the path; `missing` are the
/// names created below it.
pub(super) fn add(
    before: &Tree,
    after: &Tree,
    text: &str,
    existing: Option<NodeId>,
    missing: &[String],
) -> Option<Vec<Splice>> {
    let Some(anchor) = existing else {
        return match before.root_layout() {
            Some(ValueLayout::Flow(_)) => rewrite_flow(before, after, None),
            Some(ValueLayout::Block { start, end, indent }) => {
                let at = layout::content_end(text, *start, *end);
                Some(vec![append_lines(text, at, chain(missing, Shape::Top, *indent))])
            }
            Some(_) => None,
            None => {
                // Nothing but comments (or an explicit null) so far.
                let kept: String = text
                    .split_inclusive('\n')
                    .filter(|line| {
                        let line = line.trim();
                        line.is_empty() || line.starts_with('#')
                    })
                    .collect();
                let mut replacement = kept;
                if !replacement.is_empty() && !replacement.ends_with('\n') {
                    replacement.push('\n');
                }
                replacement.push_str(&chain(missing, Shape::Top, 0));
                Some(vec![Splice {
                    range: 0..text.len(),
                    text: replacement,
                }])
            }
        };
    };

    let node = before.layout(anchor)?;
    if node.in_flow {
        return rewrite_flow(before, after, Some(anchor));
    }
    let below = if before.parent(anchor).is_none() {
        Shape::Entry
    } else {
        Shape::Item
    };
    match &node.value {
        ValueLayout::Flow(_) => rewrite_flow(before, after, Some(anchor)),
        ValueLayout::Block { start, end, indent } => {
            let shape = if before.has_mapping_body(anchor) {
                Shape::Entry
            } else {
                Shape::Item
            };
            let at = layout::content_end(text, *start, *end);
            Some(vec![append_lines(text, at, chain(missing, shape, *indent))])
        }
        ValueLayout::Absent => {
            let mut splices = Vec::new();
            if before.slot(anchor) == Slot::Marker {
                splices.push(Splice::insert(node.key.end, ":"));
            }
            let indent = layout::column(text, node.key.start) + 2;
            let at = layout::line_end(text, node.key.start);
            splices.push(append_lines(text, at, chain(missing, below, indent)));
            Some(splices)
        }
        ValueLayout::Scalar(value) => {
            // An explicit null such as `key: ~`.
            let colon = node.colon?;
            let indent = layout::column(text, node.key.start) + 2;
            let at = layout::line_end(text, value.end);
            Some(vec![
                Splice::delete(colon..value.end),
                append_lines(text, at, chain(missing, below, indent)),
            ])
        }
        ValueLayout::Opaque => None,
    }
}

/// Re-render the outermost flow collection that holds the change below
/// `anchor`.
fn rewrite_flow(before: &Tree, after: &Tree, anchor: Option<NodeId>) -> Option<Vec<Splice>> {
    let mut owner = None;
    let mut current = anchor;
    while let Some(id) = current {
        let node = before.layout(id)?;
        if let ValueLayout::Flow(range) = &node.value {
            owner = Some((Some(id), range.clone()));
        }
        if !node.in_flow {
            break;
        }
        current = before.parent(id);
    }
    if current.is_none() {
        if let Some(ValueLayout::Flow(range)) = before.root_layout() {
            owner = Some((None, range.clone()));
        }
    }
    let (owner, range) = owner?;
    let value = match owner {
        Some(id) => after.value_of(id),
        None => after.to_value(),
    };
    Some(vec![Splice {
        range,
        text: layout::render_flow(&value),
    }])
}

/// After the last child of `parent` goes, write its container as `{}` or
/// `[]` so it keeps its shape.
fn mark_empty(before: &Tree, parent: Option<NodeId>) -> Option<Vec<Splice>> {
    let Some(parent) = parent else {
        return Some(Vec::new());
    };
    let colon = before.layout(parent)?.colon?;
    let empty = if before.has_mapping_body(parent) {
        " {}"
    } else {
        " []"
    };
    Some(vec![Splice::insert(colon, empty)])
}

fn delete_lines(text: &str, head: usize, boundary: usize) -> Splice {
    Splice::delete(layout::line_start(text, head)..layout::content_end(text, head, boundary))
}

fn append_lines(text: &str, at: usize, lines: String) -> Splice {
    if at == text.len() && !text.is_empty() && !text.ends_with('\n') {
        Splice::insert(at, format!("\n{lines}"))
    } else {
        Splice::insert(at, lines)
    }
}

/// Where a newly written node goes, which decides its body.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Top-level name; holds a mapping.
    Top,
    /// Mapping entry below the top level; holds a sequence.
    Entry,
    /// Sequence item: a bare marker, or a group when it has children.
    Item,
}

/// Block YAML for a chain of new nodes, each below the previous one.
fn chain(names: &[String], shape: Shape, indent: usize) -> String {
    let mut out = String::new();
    write_chain(names, shape, indent, &mut out);
    out
}

fn write_chain(names: &[String], shape: Shape, indent: usize, out: &mut String) {
    let Some((name, rest)) = names.split_first() else {
        return;
    };
    let pad = " ".repeat(indent);
    let name = layout::render_scalar(name, Quoting::Plain);
    match shape {
        Shape::Top | Shape::Entry if rest.is_empty() => {
            let empty = if shape == Shape::Top { "{}" } else { "[]" };
            out.push_str(&format!("{pad}{name}: {empty}\n"));
        }
        Shape::Top | Shape::Entry => {
            out.push_str(&format!("{pad}{name}:\n"));
            let next = if shape == Shape::Top {
                Shape::Entry
            } else {
                Shape::Item
            };
            write_chain(rest, next, indent + 2, out);
        }
        Shape::Item if rest.is_empty() => out.push_str(&format!("{pad}- {name}\n")),
        Shape::Item => {
            out.push_str(&format!("{pad}- {name}:\n"));
            write_chain(rest, Shape::Item, indent + 4, out);
        }
    }
}
