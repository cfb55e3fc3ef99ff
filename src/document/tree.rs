//! Arena-backed parse tree for the chassis document.
//!
//! Every named node lives in a flat arena and is referenced by index from its
//! parent's body. Bodies record the YAML shape the node was written in so the
//! tree serializes back to the same structure: top-level names and layers are
//! mapping entries, deeper levels are sequences of bare markers (`- name`) and
//! group items (`- name: [...]`). Detached nodes stay in the arena but are no
//! longer reachable from `roots`.
//!
//! Nodes loaded from text also carry a [`NodeLayout`] locating them in that
//! text, which is what lets edits splice the source instead of re-emitting it.

use crate::layout::{self, Quoting, Span, SpanKind};
use serde_yaml::{Mapping, Value};
use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[derive(Clone, Debug)]
struct Node {
    /// Key scalar as written; kept so untouched numeric or boolean names
    /// serialize unchanged.
    key: Value,
    name: String,
    parent: Option<NodeId>,
    body: Body,
    layout: Option<NodeLayout>,
}

#[derive(Clone, Debug, PartialEq)]
enum Body {
    /// Bare marker, or a mapping key with a null value.
    Empty,
    Mapping(Vec<NodeId>),
    Sequence(Vec<Item>),
    /// Raw scalar (or otherwise opaque) value; a leaf.
    Value(Value),
}

#[derive(Clone, Debug, PartialEq)]
enum Item {
    Marker(NodeId),
    Group(Vec<NodeId>),
    /// Sequence entry that names nothing, kept verbatim.
    Raw(Value),
}

/// Where a node sits in the source text.
#[derive(Clone, Debug)]
pub(crate) struct NodeLayout {
    /// The key, or the marker scalar.
    pub(crate) key: Range<usize>,
    pub(crate) quoting: Quoting,
    /// Dash of the block sequence item this node opens.
    pub(crate) dash: Option<usize>,
    /// Start of the next sibling, or end of the enclosing collection.
    pub(crate) boundary: usize,
    /// Just past the `:` after a mapping key.
    pub(crate) colon: Option<usize>,
    pub(crate) value: ValueLayout,
    pub(crate) in_flow: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ValueLayout {
    /// Bare marker, or `key:` with nothing after it.
    Absent,
    Scalar(Range<usize>),
    Block { start: usize, end: usize, indent: usize },
    Flow(Range<usize>),
    /// Alias or other text that cannot be edited in place.
    Opaque,
}

impl ValueLayout {
    fn of(text: &str, span: &Span) -> Self {
        match &span.kind {
            SpanKind::Scalar { implicit: true, .. } => ValueLayout::Absent,
            SpanKind::Scalar { .. } => ValueLayout::Scalar(span.range()),
            SpanKind::Sequence { .. } | SpanKind::Mapping { .. } if span.is_flow() => {
                ValueLayout::Flow(span.range())
            }
            SpanKind::Sequence { .. } | SpanKind::Mapping { .. } => ValueLayout::Block {
                start: span.start,
                end: span.end,
                indent: layout::column(text, span.start),
            },
            SpanKind::Alias => ValueLayout::Opaque,
        }
    }
}

/// How a node hangs off its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Mapping entry, including top-level names.
    Entry,
    Marker,
    /// Entry of a group item, with the item's entries in order.
    GroupEntry { siblings: Vec<NodeId>, index: usize },
}

/// Failure to extend the tree below a node holding a raw value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ScalarParent(pub(crate) NodeId);

#[derive(Clone, Debug, Default)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    root_layout: Option<ValueLayout>,
}

impl Tree {
    /// Build the tree from a parsed YAML document.
    ///
    /// `span` locates the same document in `text`; without it the tree has no
    /// layout and every edit re-emits the document.
    pub(crate) fn from_value(value: Value, span: Option<&Span>, text: &str) -> Result<Self, String> {
        let mut tree = Tree::default();
        match value {
            Value::Null => {}
            Value::Mapping(mapping) => {
                let span = span.filter(|span| matches!(span.kind, SpanKind::Mapping { .. }));
                tree.root_layout = span.map(|span| ValueLayout::of(text, span));
                tree.roots = tree.entries_from_mapping(mapping, None, span, None, text)?;
            }
            _ => return Err("expected a mapping at the document root".to_string()),
        }
        Ok(tree)
    }

    fn entries_from_mapping(
        &mut self,
        mapping: Mapping,
        parent: Option<NodeId>,
        span: Option<&Span>,
        dash: Option<usize>,
        text: &str,
    ) -> Result<Vec<NodeId>, String> {
        let located = match span.map(|span| (&span.kind, span.end)) {
            Some((SpanKind::Mapping { entries, .. }, end)) if entries.len() == mapping.len() => {
                Some((entries, end))
            }
            _ => None,
        };
        let mut ids = Vec::with_capacity(mapping.len());
        for (idx, (key, value)) in mapping.into_iter().enumerate() {
            let id = self.alloc(key, parent)?;
            let spans = located.map(|(entries, _)| &entries[idx]);
            let body = self.body_from_value(value, id, spans.map(|(_, value)| value), text)?;
            self.nodes[id.0].body = body;
            if let (Some((key_span, value_span)), Some((entries, end))) = (spans, located) {
                let boundary = entries.get(idx + 1).map_or(end, |(next, _)| next.start);
                let dash = if idx == 0 { dash } else { None };
                self.nodes[id.0].layout =
                    node_layout(text, key_span, Some(value_span), boundary, dash);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn body_from_value(
        &mut self,
        value: Value,
        owner: NodeId,
        span: Option<&Span>,
        text: &str,
    ) -> Result<Body, String> {
        match value {
            Value::Null => Ok(Body::Empty),
            Value::Mapping(mapping) => Ok(Body::Mapping(
                self.entries_from_mapping(mapping, Some(owner), span, None, text)?,
            )),
            Value::Sequence(seq) => {
                let located = match span.map(|span| (&span.kind, span.end)) {
                    Some((SpanKind::Sequence { items, .. }, end)) if items.len() == seq.len() => {
                        Some((items, end))
                    }
                    _ => None,
                };
                let mut items = Vec::with_capacity(seq.len());
                for (idx, entry) in seq.into_iter().enumerate() {
                    let item_span = located.map(|(spans, _)| &spans[idx]);
                    let boundary = located.map(|(spans, end)| {
                        spans
                            .get(idx + 1)
                            .map_or(end, |next| layout::item_head(text, next.start))
                    });
                    let dash = item_span
                        .filter(|span| !span.in_flow)
                        .map(|span| layout::item_head(text, span.start));
                    let item = match entry {
                        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                            let id = self.alloc(entry, Some(owner))?;
                            if let (Some(span), Some(boundary)) = (item_span, boundary) {
                                self.nodes[id.0].layout =
                                    node_layout(text, span, None, boundary, dash);
                            }
                            Item::Marker(id)
                        }
                        Value::Mapping(mapping) if !mapping.is_empty() => Item::Group(
                            self.entries_from_mapping(mapping, Some(owner), item_span, dash, text)?,
                        ),
                        other => Item::Raw(other),
                    };
                    items.push(item);
                }
                Ok(Body::Sequence(items))
            }
            other => Ok(Body::Value(other)),
        }
    }

    fn alloc(&mut self, key: Value, parent: Option<NodeId>) -> Result<NodeId, String> {
        let name = scalar_name(&key)?;
        if name.is_empty() {
            return Err("chassis names must not be empty".to_string());
        }
        if name.contains(crate::path::SEPARATOR) {
            return Err(format!("chassis name {name:?} must not contain '.'"));
        }
        Ok(self.push(Node {
            key,
            name,
            parent,
            body: Body::Empty,
            layout: None,
        }))
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Serialize the reachable tree back to a YAML value.
    pub(crate) fn to_value(&self) -> Value {
        Value::Mapping(self.mapping_value(&self.roots))
    }

    /// The value a node's body serializes to.
    pub(crate) fn value_of(&self, id: NodeId) -> Value {
        self.body_value(&self.nodes[id.0].body)
    }

    fn mapping_value(&self, ids: &[NodeId]) -> Mapping {
        let mut mapping = Mapping::new();
        for id in ids {
            let node = &self.nodes[id.0];
            mapping.insert(node.key.clone(), self.body_value(&node.body));
        }
        mapping
    }

    fn body_value(&self, body: &Body) -> Value {
        match body {
            Body::Empty => Value::Null,
            Body::Value(value) => value.clone(),
            Body::Mapping(ids) => Value::Mapping(self.mapping_value(ids)),
            Body::Sequence(items) => Value::Sequence(
                items
                    .iter()
                    .map(|item| match item {
                        Item::Marker(id) => self.nodes[id.0].key.clone(),
                        Item::Group(ids) => Value::Mapping(self.mapping_value(ids)),
                        Item::Raw(value) => value.clone(),
                    })
                    .collect(),
            ),
        }
    }

    pub(crate) fn layout(&self, id: NodeId) -> Option<&NodeLayout> {
        self.nodes[id.0].layout.as_ref()
    }

    pub(crate) fn root_layout(&self) -> Option<&ValueLayout> {
        self.root_layout.as_ref()
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub(crate) fn has_mapping_body(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].body, Body::Mapping(_))
    }

    pub(crate) fn slot(&self, id: NodeId) -> Slot {
        let Some(parent) = self.nodes[id.0].parent else {
            return Slot::Entry;
        };
        if let Body::Sequence(items) = &self.nodes[parent.0].body {
            for item in items {
                match item {
                    Item::Marker(marker) if *marker == id => return Slot::Marker,
                    Item::Group(ids) => {
                        if let Some(index) = ids.iter().position(|entry| *entry == id) {
                            return Slot::GroupEntry {
                                siblings: ids.clone(),
                                index,
                            };
                        }
                    }
                    _ => {}
                }
            }
        }
        Slot::Entry
    }

    /// Entries or items held directly by `parent` (the roots for `None`).
    pub(crate) fn container_len(&self, parent: Option<NodeId>) -> usize {
        match parent {
            None => self.roots.len(),
            Some(id) => match &self.nodes[id.0].body {
                Body::Mapping(ids) => ids.len(),
                Body::Sequence(items) => items.len(),
                Body::Empty | Body::Value(_) => 0,
            },
        }
    }

    /// Canonical paths in pre-order, document order.
    pub(crate) fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        for id in &self.roots {
            self.flatten_into(*id, "", &mut out);
        }
        out
    }

    fn flatten_into(&self, id: NodeId, prefix: &str, out: &mut Vec<String>) {
        let name = &self.nodes[id.0].name;
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        out.push(path.clone());
        for child in self.children_of(id) {
            self.flatten_into(child, &path, out);
        }
    }

    fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id.0].body {
            Body::Mapping(ids) => ids.clone(),
            Body::Sequence(items) => items
                .iter()
                .flat_map(|item| match item {
                    Item::Marker(id) => vec![*id],
                    Item::Group(ids) => ids.clone(),
                    Item::Raw(_) => Vec::new(),
                })
                .collect(),
            Body::Empty | Body::Value(_) => Vec::new(),
        }
    }

    fn child_named(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        let candidates = match parent {
            None => self.roots.clone(),
            Some(id) => self.children_of(id),
        };
        candidates
            .into_iter()
            .find(|id| self.nodes[id.0].name == name)
    }

    /// Resolve a segment sequence to its node.
    pub(crate) fn find<S: AsRef<str>>(&self, segments: &[S]) -> Option<NodeId> {
        let mut current = None;
        for segment in segments {
            current = Some(self.child_named(current, segment.as_ref())?);
        }
        current
    }

    /// Insert a path, creating missing intermediates.
    ///
    /// Existing nodes along the way are reused; the caller has checked the
    /// full path is absent.
    pub(crate) fn insert<S: AsRef<str>>(&mut self, segments: &[S]) -> Result<(), ScalarParent> {
        let mut parent: Option<NodeId> = None;
        for (idx, segment) in segments.iter().enumerate() {
            let segment = segment.as_ref();
            let leaf = idx + 1 == segments.len();
            let id = match self.child_named(parent, segment) {
                Some(existing) => existing,
                None => self.append_child(parent, segment, leaf)?,
            };
            parent = Some(id);
        }
        Ok(())
    }

    fn append_child(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        leaf: bool,
    ) -> Result<NodeId, ScalarParent> {
        let Some(parent_id) = parent else {
            let id = self.push(Node {
                key: Value::String(name.to_string()),
                name: name.to_string(),
                parent: None,
                body: Body::Mapping(Vec::new()),
                layout: None,
            });
            self.roots.push(id);
            return Ok(id);
        };

        self.open_container(parent_id)?;
        let in_sequence = matches!(self.nodes[parent_id.0].body, Body::Sequence(_));
        let body = if in_sequence && leaf {
            Body::Empty
        } else {
            Body::Sequence(Vec::new())
        };
        let id = self.push(Node {
            key: Value::String(name.to_string()),
            name: name.to_string(),
            parent: Some(parent_id),
            body,
            layout: None,
        });
        match &mut self.nodes[parent_id.0].body {
            Body::Mapping(ids) => ids.push(id),
            Body::Sequence(items) if leaf => items.push(Item::Marker(id)),
            Body::Sequence(items) => items.push(Item::Group(vec![id])),
            Body::Empty | Body::Value(_) => unreachable!("open_container yields a container"),
        }
        Ok(id)
    }

    /// Make sure `id` can hold children, converting a bare marker or a null
    /// value into a group in place.
    fn open_container(&mut self, id: NodeId) -> Result<(), ScalarParent> {
        match self.nodes[id.0].body {
            Body::Mapping(_) | Body::Sequence(_) => return Ok(()),
            Body::Value(_) => return Err(ScalarParent(id)),
            Body::Empty => {}
        }

        let parent = self.nodes[id.0].parent;
        self.nodes[id.0].body = match parent {
            None => Body::Mapping(Vec::new()),
            Some(_) => Body::Sequence(Vec::new()),
        };

        if let Some(parent_id) = parent {
            if let Body::Sequence(items) = &mut self.nodes[parent_id.0].body {
                for item in items.iter_mut() {
                    if *item == Item::Marker(id) {
                        *item = Item::Group(vec![id]);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Unlink a node (and its subtree) from its parent.
    pub(crate) fn detach(&mut self, id: NodeId) {
        let Some(parent_id) = self.nodes[id.0].parent else {
            self.roots.retain(|root| *root != id);
            return;
        };
        match &mut self.nodes[parent_id.0].body {
            Body::Mapping(ids) => ids.retain(|child| *child != id),
            Body::Sequence(items) => {
                items.retain_mut(|item| match item {
                    Item::Marker(marker) => *marker != id,
                    Item::Group(ids) => {
                        ids.retain(|child| *child != id);
                        !ids.is_empty()
                    }
                    Item::Raw(_) => true,
                });
            }
            Body::Empty | Body::Value(_) => {}
        }
        self.nodes[id.0].parent = None;
    }

    /// Canonical path of a reachable node.
    pub(crate) fn path_of(&self, id: NodeId) -> String {
        let mut segments = vec![self.nodes[id.0].name.as_str()];
        let mut current = self.nodes[id.0].parent;
        while let Some(up) = current {
            segments.push(self.nodes[up.0].name.as_str());
            current = self.nodes[up.0].parent;
        }
        segments.reverse();
        crate::path::join(&segments)
    }

    /// Rename a node. A numeric or boolean key stays one when the new name
    /// reads as the same kind of scalar.
    pub(crate) fn set_name(&mut self, id: NodeId, name: &str) {
        let node = &mut self.nodes[id.0];
        node.key = match (&node.key, serde_yaml::from_str::<Value>(name)) {
            (Value::Number(_), Ok(number @ Value::Number(_))) => number,
            (Value::Bool(_), Ok(flag @ Value::Bool(_))) => flag,
            _ => Value::String(name.to_string()),
        };
        node.name = name.to_string();
    }
}

fn node_layout(
    text: &str,
    key: &Span,
    value: Option<&Span>,
    boundary: usize,
    dash: Option<usize>,
) -> Option<NodeLayout> {
    let quoting = key.editable()?;
    Some(NodeLayout {
        key: key.range(),
        quoting,
        dash,
        boundary,
        colon: value.and_then(|_| layout::colon_after(text, key.end)),
        value: value.map_or(ValueLayout::Absent, |span| ValueLayout::of(text, span)),
        in_flow: key.in_flow,
    })
}

fn scalar_name(key: &Value) -> Result<String, String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported chassis key {other:?}; expected a scalar")),
    }
}
