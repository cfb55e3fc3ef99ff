//! Source positions for YAML text.
//!
//! `serde_yaml` hands back values without positions. Edits that must leave
//! the rest of a file byte-for-byte intact locate their targets with the
//! `yaml-rust2` event parser instead and splice the original text.

use serde_yaml::Value;
use std::ops::Range;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

/// How a scalar was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Quoting {
    Plain,
    Single,
    Double,
    /// Literal or folded block scalar.
    Block,
}

/// One YAML node with the byte range it occupies.
///
/// `end` is exclusive. For block collections it is where the next token after
/// the collection starts, which may lie past trailing comments.
#[derive(Clone, Debug)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
    /// Inside a `[...]` or `{...}` collection.
    pub(crate) in_flow: bool,
    pub(crate) kind: SpanKind,
}

#[derive(Clone, Debug)]
pub(crate) enum SpanKind {
    Scalar {
        value: String,
        quoting: Quoting,
        /// A missing value, as in `key:` with nothing after it.
        implicit: bool,
        /// The text in range is exactly one line and reproduces `value`.
        exact: bool,
    },
    Sequence {
        flow: bool,
        items: Vec<Span>,
    },
    Mapping {
        flow: bool,
        entries: Vec<(Span, Span)>,
    },
    Alias,
}

impl Span {
    pub(crate) fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub(crate) fn scalar(&self) -> Option<&str> {
        match &self.kind {
            SpanKind::Scalar { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Quoting of a scalar whose text can be replaced in place.
    pub(crate) fn editable(&self) -> Option<Quoting> {
        match self.kind {
            SpanKind::Scalar {
                quoting,
                implicit: false,
                exact: true,
                ..
            } if quoting != Quoting::Block => Some(quoting),
            _ => None,
        }
    }

    pub(crate) fn is_flow(&self) -> bool {
        matches!(
            self.kind,
            SpanKind::Sequence { flow: true, .. } | SpanKind::Mapping { flow: true, .. }
        )
    }
}

/// Replacement of a byte range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Splice {
    pub(crate) range: Range<usize>,
    pub(crate) text: String,
}

impl Splice {
    pub(crate) fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range: at..at,
            text: text.into(),
        }
    }

    pub(crate) fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            text: String::new(),
        }
    }
}

/// Apply non-overlapping splices to `text`.
pub(crate) fn apply(text: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    let mut out = text.to_string();
    for splice in splices {
        out.replace_range(splice.range, &splice.text);
    }
    out
}

struct Recorder {
    events: Vec<(Event, usize)>,
}

impl MarkedEventReceiver for Recorder {
    fn on_event(&mut self, event: Event, mark: Marker) {
        self.events.push((event, mark.index()));
    }
}

/// Locate every node of the first document in `text`.
///
/// Returns `None` for an empty stream.
pub(crate) fn parse(text: &str) -> Result<Option<Span>, String> {
    let mut recorder = Recorder { events: Vec::new() };
    Parser::new(text.chars())
        .load(&mut recorder, false)
        .map_err(|err| err.to_string())?;
    // Parser marks count characters.
    let offsets = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let mut builder = Builder {
        text,
        offsets,
        events: recorder.events,
        pos: 0,
        flow_depth: 0,
    };
    builder.document()
}

struct Builder<'a> {
    text: &'a str,
    offsets: Vec<usize>,
    events: Vec<(Event, usize)>,
    pos: usize,
    flow_depth: usize,
}

impl Builder<'_> {
    fn document(&mut self) -> Result<Option<Span>, String> {
        while let Some((event, _)) = self.events.get(self.pos) {
            match event {
                Event::StreamEnd => return Ok(None),
                Event::Scalar(..)
                | Event::Alias(..)
                | Event::SequenceStart(..)
                | Event::MappingStart(..) => return self.node().map(Some),
                _ => self.pos += 1,
            }
        }
        Ok(None)
    }

    fn byte(&self, mark: usize) -> usize {
        self.offsets.get(mark).copied().unwrap_or(self.text.len())
    }

    fn next(&mut self) -> Result<(Event, usize), String> {
        let (event, mark) = self
            .events
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "YAML event stream ended early".to_string())?;
        self.pos += 1;
        Ok((event, self.byte(mark)))
    }

    /// Consume a closing event if it is next, returning its byte position.
    fn close(&mut self, sequence: bool) -> Option<usize> {
        let mark = match self.events.get(self.pos) {
            Some((Event::SequenceEnd, mark)) if sequence => *mark,
            Some((Event::MappingEnd, mark)) if !sequence => *mark,
            _ => return None,
        };
        self.pos += 1;
        Some(self.byte(mark))
    }

    fn node(&mut self) -> Result<Span, String> {
        let (event, at) = self.next()?;
        let in_flow = self.flow_depth > 0;
        let start = skip_properties(self.text, at);
        match event {
            Event::Scalar(value, style, ..) => {
                let quoting = match style {
                    TScalarStyle::Plain => Quoting::Plain,
                    TScalarStyle::SingleQuoted => Quoting::Single,
                    TScalarStyle::DoubleQuoted => Quoting::Double,
                    _ => Quoting::Block,
                };
                let implicit = quoting == Quoting::Plain
                    && value == "~"
                    && !self.text[start..].starts_with('~');
                let end = if implicit {
                    start
                } else {
                    scalar_end(self.text, start, quoting, in_flow)
                };
                let written = &self.text[start..end];
                let exact = !implicit
                    && match quoting {
                        Quoting::Plain => written == value,
                        Quoting::Single | Quoting::Double => !written.contains('\n'),
                        Quoting::Block => false,
                    };
                Ok(Span {
                    start,
                    end,
                    in_flow,
                    kind: SpanKind::Scalar {
                        value,
                        quoting,
                        implicit,
                        exact,
                    },
                })
            }
            Event::Alias(..) => Ok(Span {
                start,
                end: start,
                in_flow,
                kind: SpanKind::Alias,
            }),
            Event::SequenceStart(..) => {
                let flow = self.text[start..].starts_with('[');
                self.flow_depth += usize::from(flow);
                let mut items = Vec::new();
                let end = loop {
                    if let Some(end) = self.close(true) {
                        break end;
                    }
                    items.push(self.node()?);
                };
                self.flow_depth -= usize::from(flow);
                Ok(Span {
                    start,
                    end: if flow { closing(self.text, end, ']') } else { end },
                    in_flow,
                    kind: SpanKind::Sequence { flow, items },
                })
            }
            Event::MappingStart(..) => {
                let flow = self.text[start..].starts_with('{');
                self.flow_depth += usize::from(flow);
                let mut entries = Vec::new();
                let end = loop {
                    if let Some(end) = self.close(false) {
                        break end;
                    }
                    let key = self.node()?;
                    let value = self.node()?;
                    entries.push((key, value));
                };
                self.flow_depth -= usize::from(flow);
                Ok(Span {
                    start,
                    end: if flow { closing(self.text, end, '}') } else { end },
                    in_flow,
                    kind: SpanKind::Mapping { flow, entries },
                })
            }
            other => Err(format!("unexpected YAML event {other:?}")),
        }
    }
}

/// Step over anchors and tags written before a node.
fn skip_properties(text: &str, mut pos: usize) -> usize {
    while text[pos..].starts_with(['&', '!']) {
        let rest = &text[pos..];
        let token = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let after = &rest[token..];
        pos += token + (after.len() - after.trim_start().len());
    }
    pos
}

fn closing(text: &str, at: usize, bracket: char) -> usize {
    if text[at..].starts_with(bracket) {
        return at + 1;
    }
    text[at..].find(bracket).map_or(at, |offset| at + offset + 1)
}

/// End of the single-line scalar starting at `start`.
fn scalar_end(text: &str, start: usize, quoting: Quoting, in_flow: bool) -> usize {
    let rest = &text[start..];
    match quoting {
        Quoting::Single => {
            let mut chars = rest.char_indices().skip(1).peekable();
            while let Some((idx, c)) = chars.next() {
                if c == '\'' {
                    if matches!(chars.peek(), Some((_, '\''))) {
                        chars.next();
                    } else {
                        return start + idx + 1;
                    }
                }
            }
            text.len()
        }
        Quoting::Double => {
            let mut escaped = false;
            for (idx, c) in rest.char_indices().skip(1) {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    return start + idx + 1;
                }
            }
            text.len()
        }
        Quoting::Plain => {
            let mut end = start;
            let mut prev = ' ';
            let mut chars = rest.char_indices().peekable();
            while let Some((idx, c)) = chars.next() {
                let next = chars.peek().map(|(_, n)| *n);
                let stop = match c {
                    '\n' | '\r' => true,
                    ':' => next.is_none_or(|n| {
                        n.is_whitespace() || (in_flow && ",[]{}".contains(n))
                    }),
                    '#' => prev == ' ' || prev == '\t',
                    ',' | '[' | ']' | '{' | '}' => in_flow,
                    _ => false,
                };
                if stop {
                    break;
                }
                if c != ' ' && c != '\t' {
                    end = start + idx + c.len_utf8();
                }
                prev = c;
            }
            end
        }
        Quoting::Block => start,
    }
}

pub(crate) fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map_or(0, |idx| idx + 1)
}

/// Position just past the newline ending the line that holds `pos`.
pub(crate) fn line_end(text: &str, pos: usize) -> usize {
    text[pos..].find('\n').map_or(text.len(), |idx| pos + idx + 1)
}

pub(crate) fn column(text: &str, pos: usize) -> usize {
    pos - line_start(text, pos)
}

/// The `-` introducing the block sequence item whose content starts at
/// `content`, or `content` itself when there is none.
pub(crate) fn item_head(text: &str, content: usize) -> usize {
    let before = text[..content].trim_end();
    if before.ends_with('-') {
        before.len() - 1
    } else {
        content
    }
}

/// End of the last line in `[from, boundary)` carrying content.
///
/// The line holding `from` always counts; comment and blank lines after the
/// last content line are left to whatever follows.
pub(crate) fn content_end(text: &str, from: usize, boundary: usize) -> usize {
    let limit = if boundary >= text.len() {
        text.len()
    } else {
        line_start(text, boundary)
    };
    let mut end = line_end(text, from);
    let mut cursor = end;
    while cursor < limit {
        let next = line_end(text, cursor);
        let line = text[cursor..next].trim();
        if !line.is_empty() && !line.starts_with('#') {
            end = next;
        }
        cursor = next;
    }
    end
}

/// Position just past the `:` that follows a mapping key ending at `key_end`.
pub(crate) fn colon_after(text: &str, key_end: usize) -> Option<usize> {
    let rest = &text[key_end..];
    let trimmed = rest.trim_start_matches([' ', '\t']);
    trimmed
        .starts_with(':')
        .then(|| key_end + (rest.len() - trimmed.len()) + 1)
}

fn is_plain_safe(value: &str) -> bool {
    !value.is_empty()
        && !matches!(value, "~" | "null" | "Null" | "NULL")
        && value
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '/')
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || "._-/+@".contains(c))
}

/// Write `value` as a scalar in the given style.
///
/// Plain text that would not read back as a plain scalar is single-quoted.
pub(crate) fn render_scalar(value: &str, quoting: Quoting) -> String {
    match quoting {
        Quoting::Double => format!(
            "\"{}\"",
            value.replace('\\', "\\\\").replace('"', "\\\"")
        ),
        Quoting::Plain | Quoting::Block if is_plain_safe(value) => value.to_string(),
        _ => format!("'{}'", value.replace('\'', "''")),
    }
}

/// Write a value in flow style on one line.
pub(crate) fn render_flow(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let reads_as_string =
                matches!(serde_yaml::from_str::<Value>(s), Ok(Value::String(ref back)) if back == s);
            if reads_as_string {
                render_scalar(s, Quoting::Plain)
            } else {
                render_scalar(s, Quoting::Single)
            }
        }
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().map(render_flow).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(mapping) => {
            let entries: Vec<String> = mapping
                .iter()
                .map(|(key, value)| format!("{}: {}", render_flow(key), render_flow(value)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, render_flow(&tagged.value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn root(text: &str) -> Span {
        parse(text).unwrap().unwrap()
    }

    fn entries(span: &Span) -> &[(Span, Span)] {
        match &span.kind {
            SpanKind::Mapping { entries, .. } => entries,
            other => panic!("expected a mapping, got {other:?}"),
        }
    }

    #[test]
    fn scalars_cover_exactly_their_text() {
        let text = "# header\nplain: value  # trailing\n'quoted': \"it's\"\nempty:\n";
        let span = root(text);
        let entries = entries(&span);
        assert_eq!(&text[entries[0].0.range()], "plain");
        assert_eq!(&text[entries[0].1.range()], "value");
        assert_eq!(&text[entries[1].0.range()], "'quoted'");
        assert_eq!(entries[1].0.editable(), Some(Quoting::Single));
        assert_eq!(&text[entries[1].1.range()], "\"it's\"");
        assert!(matches!(
            entries[2].1.kind,
            SpanKind::Scalar { implicit: true, .. }
        ));
        assert_eq!(entries[2].1.editable(), None);
    }

    #[test]
    fn flow_collections_end_after_their_bracket() {
        let text = "chassis: [a.b, 'c.d']   # pinned\n";
        let span = root(text);
        let (_, list) = &entries(&span)[0];
        assert!(list.is_flow());
        assert_eq!(&text[list.range()], "[a.b, 'c.d']");
        let SpanKind::Sequence { items, .. } = &list.kind else {
            panic!("expected a sequence");
        };
        assert_eq!(&text[items[0].range()], "a.b");
        assert_eq!(&text[items[1].range()], "'c.d'");
        assert!(items[0].in_flow);
    }

    #[test]
    fn block_items_find_their_dash_and_content() {
        let text = "list:\n    - one   # first\n    # about two\n    - two\nnext: 1\n";
        let span = root(text);
        let (_, list) = &entries(&span)[0];
        let SpanKind::Sequence { items, flow: false } = &list.kind else {
            panic!("expected a block sequence");
        };
        let head = item_head(text, items[0].start);
        assert_eq!(column(text, head), 4);
        let boundary = item_head(text, items[1].start);
        assert_eq!(
            &text[line_start(text, head)..content_end(text, head, boundary)],
            "    - one   # first\n"
        );
        assert_eq!(&text[list.end..], "next: 1\n");
    }

    #[test]
    fn multi_line_plain_scalars_are_not_editable() {
        let span = root("key: first\n  second\n");
        assert_eq!(entries(&span)[0].1.editable(), None);
    }

    #[test]
    fn splices_apply_back_to_front() {
        let text = "abc def";
        let out = apply(
            text,
            vec![Splice::insert(3, ":"), Splice::delete(4..7), Splice::insert(7, "x")],
        );
        assert_eq!(out, "abc: x");
    }

    #[test]
    fn rendering_keeps_scalar_types_readable() {
        assert_eq!(render_scalar("platform.core", Quoting::Plain), "platform.core");
        assert_eq!(render_scalar("two words", Quoting::Plain), "'two words'");
        assert_eq!(render_scalar("o'neil", Quoting::Single), "'o''neil'");
        assert_eq!(render_scalar("a\"b", Quoting::Double), "\"a\\\"b\"");
        let value: Value = serde_yaml::from_str("{a: [b, '2024', 7], c: null}").unwrap();
        assert_eq!(render_flow(&value), "{a: [b, '2024', 7], c: null}");
    }
}
