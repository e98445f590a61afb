//! Runtime values produced by template evaluation.

use std::fmt;

use crate::ast::SourceRef;
use crate::error::{CastError, Severity};
use crate::mapping::{Highlight, TextMapping};
use crate::model::{FeatureValue, ModelAccessor, ObjectId};
use crate::position::Position;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Object,
    List,
    String,
    Bool,
    Int,
    Double,
    Null,
}

/// Generated text together with its two traceability mappings. Both
/// mappings always span exactly the bytes of `value`.
#[derive(Debug, Clone)]
pub struct Text {
    pub value: String,
    pub model_map: TextMapping<ObjectId>,
    pub source_map: TextMapping<SourceRef>,
}

impl Text {
    pub fn new(value: String, container: Option<ObjectId>, origin: Option<SourceRef>) -> Self {
        let len = value.len();
        Self {
            value,
            model_map: TextMapping::new(container, len),
            source_map: TextMapping::new(origin, len),
        }
    }

    /// Text written by the template itself, tagged with `highlight`.
    pub fn highlighted(
        value: String,
        container: Option<ObjectId>,
        origin: Option<SourceRef>,
        highlight: Highlight,
    ) -> Self {
        let len = value.len();
        let mut text = Self::new(value, container, origin);
        text.model_map = TextMapping::new(container, 0);
        text.model_map.shift(len, Some(highlight));
        text
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Appends `other`, carrying its mappings over.
    pub fn push_text(&mut self, other: &Self) {
        self.value.push_str(&other.value);
        self.model_map.absorb(&other.model_map);
        self.source_map.absorb(&other.source_map);
    }

    fn restrict(&mut self, bounds: Position) {
        self.value = self
            .value
            .get(bounds.begin..bounds.end)
            .unwrap_or_default()
            .to_string();
        self.model_map.range(bounds);
        self.source_map.range(bounds);
    }

    fn rewrite(&mut self, value: String) {
        if value.len() != self.value.len() {
            self.model_map.reset(value.len());
            self.source_map.reset(value.len());
        }
        self.value = value;
    }

    pub fn trim(&mut self) {
        let start = self.value.len() - self.value.trim_start().len();
        let end = self.value.trim_end().len().max(start);
        self.restrict(Position::new(start, end));
    }

    /// Keeps the bytes of `bounds`, which must sit on character boundaries.
    pub fn substring(&mut self, bounds: Position) {
        self.restrict(bounds);
    }

    pub fn to_upper_case(&mut self) {
        let upper = self.value.to_uppercase();
        self.rewrite(upper);
    }

    pub fn to_lower_case(&mut self) {
        let lower = self.value.to_lowercase();
        self.rewrite(lower);
    }

    pub fn capitalize(&mut self) {
        let mut chars = self.value.chars();
        let Some(first) = chars.next() else {
            return;
        };
        let value = first.to_uppercase().chain(chars).collect();
        self.rewrite(value);
    }

    pub fn uncapitalize(&mut self) {
        let mut chars = self.value.chars();
        let Some(first) = chars.next() else {
            return;
        };
        let value = first.to_lowercase().chain(chars).collect();
        self.rewrite(value);
    }

    pub fn indent_space(&mut self) {
        self.indent_lines(" ", false);
    }

    pub fn indent_tab(&mut self) {
        self.indent_lines("\t", false);
    }

    /// Inserts `prefix` at the start of every non-empty line, the first one
    /// excepted when `skip_first` is set.
    pub fn indent_lines(&mut self, prefix: &str, skip_first: bool) {
        if prefix.is_empty() {
            return;
        }
        let len = self.value.len();
        let mut starts = Vec::new();
        if !skip_first && len > 0 {
            starts.push(0);
        }
        starts.extend(
            self.value
                .match_indices('\n')
                .map(|(i, _)| i + 1)
                .filter(|&start| start < len),
        );
        if starts.is_empty() {
            return;
        }
        let mut out = String::with_capacity(len + starts.len() * prefix.len());
        let mut last = 0;
        for &start in &starts {
            out.push_str(self.value.get(last..start).unwrap_or_default());
            out.push_str(prefix);
            last = start;
        }
        out.push_str(self.value.get(last..).unwrap_or_default());
        self.value = out;
        self.model_map.indent(&starts, prefix.len());
        self.source_map.indent(&starts, prefix.len());
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// A flat sequence of nodes; inserting a list inserts its elements.
#[derive(Debug, Clone, Default)]
pub struct NodeList {
    items: Vec<Node>,
    unique: bool,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list that ignores values equal to one already present.
    pub fn unique() -> Self {
        Self {
            items: Vec::new(),
            unique: true,
        }
    }

    pub fn push(&mut self, node: Node, model: &dyn ModelAccessor) {
        match node.value {
            Value::List(list) => {
                for item in list.items {
                    self.push(item, model);
                }
            }
            _ => {
                if self.unique && self.items.iter().any(|item| item.equals(&node, model)) {
                    return;
                }
                self.items.push(node);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&Node> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Node> {
        self.items.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.items.iter()
    }

    pub fn into_items(self) -> Vec<Node> {
        self.items
    }
}

impl IntoIterator for NodeList {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeList {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Object(ObjectId),
    List(NodeList),
    Str(Text),
    Bool(bool),
    Int(i64),
    Double(f64),
    Null,
}

impl Value {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Object(_) => ValueKind::Object,
            Self::List(_) => ValueKind::List,
            Self::Str(_) => ValueKind::String,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Double(_) => ValueKind::Double,
            Self::Null => ValueKind::Null,
        }
    }
}

/// A recorded problem that did not interrupt evaluation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalIssue {
    pub severity: Severity,
    pub message: String,
    /// Range of the generated text the issue applies to.
    pub position: Position,
    pub source: Option<SourceRef>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvalLog {
    issues: Vec<EvalIssue>,
}

impl EvalLog {
    pub fn push(&mut self, issue: EvalIssue) {
        self.issues.push(issue);
    }

    pub fn warning<M: Into<String>>(&mut self, message: M, position: Position, source: Option<SourceRef>) {
        self.push(EvalIssue {
            severity: Severity::Warning,
            message: message.into(),
            position,
            source,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[EvalIssue] {
        &self.issues
    }

    /// Appends `other`, whose positions are relative to text placed at
    /// `offset`.
    pub fn extend_shifted(&mut self, other: EvalLog, offset: usize) {
        let delta = isize::try_from(offset).unwrap_or(isize::MAX);
        self.issues.extend(other.issues.into_iter().map(|issue| EvalIssue {
            position: issue.position.shift(delta),
            ..issue
        }));
    }
}

/// A value together with its provenance: the model object it belongs to,
/// the template node that produced it and the issues met on the way.
#[derive(Debug, Clone)]
pub struct Node {
    pub value: Value,
    pub container: Option<ObjectId>,
    pub origin: Option<SourceRef>,
    pub log: EvalLog,
}

impl Node {
    pub fn new(value: Value, container: Option<ObjectId>) -> Self {
        Self {
            value,
            container,
            origin: None,
            log: EvalLog::default(),
        }
    }

    /// The node of an object evaluated on its own behalf.
    pub fn root(object: ObjectId) -> Self {
        Self::new(Value::Object(object), Some(object))
    }

    pub fn object(object: ObjectId, parent: &Node) -> Self {
        Self::new(Value::Object(object), parent.container)
    }

    pub fn string<S: Into<String>>(value: S, parent: &Node) -> Self {
        let text = Text::new(value.into(), parent.container, parent.origin);
        Self {
            origin: parent.origin,
            ..Self::new(Value::Str(text), parent.container)
        }
    }

    pub fn int(value: i64, parent: &Node) -> Self {
        Self::new(Value::Int(value), parent.container)
    }

    pub fn double(value: f64, parent: &Node) -> Self {
        Self::new(Value::Double(value), parent.container)
    }

    pub fn boolean(value: bool, parent: &Node) -> Self {
        Self::new(Value::Bool(value), parent.container)
    }

    pub fn list(value: NodeList, parent: &Node) -> Self {
        Self::new(Value::List(value), parent.container)
    }

    pub fn null(parent: &Node) -> Self {
        Self::new(Value::Null, parent.container)
    }

    /// Converts a feature value read from the model.
    pub fn from_feature(value: FeatureValue, parent: &Node) -> Self {
        match value {
            FeatureValue::Null => Self::null(parent),
            FeatureValue::Bool(b) => Self::boolean(b, parent),
            FeatureValue::Int(i) => Self::int(i, parent),
            FeatureValue::Double(d) => Self::double(d, parent),
            FeatureValue::Str(s) => Self::string(s, parent),
            FeatureValue::Object(o) => Self::object(o, parent),
            FeatureValue::List(items) => {
                let mut list = NodeList::new();
                for item in items {
                    // Nested feature lists flatten; no model is needed for
                    // a non-unique list.
                    list.items.extend(match Self::from_feature(item, parent).value {
                        Value::List(inner) => inner.items,
                        value => vec![Self {
                            value,
                            ..Self::null(parent)
                        }],
                    });
                }
                Self::list(list, parent)
            }
        }
    }

    pub const fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn with_origin(mut self, origin: Option<SourceRef>) -> Self {
        self.origin = origin;
        self
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self.value {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match &self.value {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut Text> {
        match &mut self.value {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&NodeList> {
        match &self.value {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self.value, Value::Int(_) | Value::Double(_))
    }

    /// Number of elements: a list counts its items, null and the empty
    /// string count nothing, everything else is one element.
    pub fn size(&self) -> usize {
        match &self.value {
            Value::List(list) => list.len(),
            Value::Null => 0,
            Value::Str(text) => usize::from(!text.is_empty()),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the node is an object or a list starting with one.
    pub fn is_object_like(&self) -> bool {
        match &self.value {
            Value::Object(_) => true,
            Value::List(list) => list.first().is_some_and(|first| first.as_object().is_some()),
            _ => false,
        }
    }

    fn derive(&self, value: Value) -> Self {
        Self {
            value,
            container: self.container,
            origin: self.origin,
            log: self.log.clone(),
        }
    }

    /// The string form with mappings; objects map to themselves and are
    /// recorded as links.
    pub fn to_text(&self, model: &dyn ModelAccessor) -> Text {
        match &self.value {
            Value::Str(text) => text.clone(),
            Value::Object(object) => {
                let value = model.describe(*object);
                let len = value.len();
                let mut text = Text::new(value, Some(*object), self.origin);
                text.model_map = TextMapping::new(Some(*object), 0);
                text.model_map.set_pending_link(Some(*object));
                text.model_map.shift(len, None);
                text.model_map.set_pending_link(None);
                text
            }
            Value::List(list) => {
                let mut text = Text::new(String::new(), self.container, self.origin);
                for item in list {
                    text.push_text(&item.to_text(model));
                }
                text
            }
            _ => Text::new(self.plain_string(model), self.container, self.origin),
        }
    }

    /// The string form without mappings.
    pub fn plain_string(&self, model: &dyn ModelAccessor) -> String {
        match &self.value {
            Value::Str(text) => text.value.clone(),
            Value::Object(object) => model.describe(*object),
            Value::List(list) => list.iter().map(|item| item.plain_string(model)).collect(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_double(*d),
            Value::Null => String::new(),
        }
    }

    pub fn to_list(&self) -> NodeList {
        match &self.value {
            Value::List(list) => list.clone(),
            Value::Null => NodeList::new(),
            _ => NodeList {
                items: vec![self.clone()],
                unique: false,
            },
        }
    }

    pub fn to_bool(&self) -> bool {
        match &self.value {
            Value::Object(_) => true,
            Value::List(list) => !list.is_empty(),
            Value::Str(text) => text.value.trim().eq_ignore_ascii_case("true"),
            Value::Bool(b) => *b,
            Value::Int(i) => *i > 0,
            Value::Double(d) => *d > 0.0,
            Value::Null => false,
        }
    }

    fn cast_error(&self, to: ValueKind, text: &str) -> CastError {
        CastError {
            from: self.kind(),
            to,
            text: text.to_string(),
        }
    }

    pub fn to_int(&self) -> Result<i64, CastError> {
        Ok(match &self.value {
            Value::Object(_) => 1,
            Value::List(list) => i64::try_from(list.len()).unwrap_or(i64::MAX),
            Value::Str(text) => text
                .value
                .trim()
                .parse()
                .map_err(|_| self.cast_error(ValueKind::Int, &text.value))?,
            Value::Bool(b) => i64::from(*b),
            Value::Int(i) => *i,
            Value::Double(d) => *d as i64,
            Value::Null => 0,
        })
    }

    pub fn to_double(&self) -> Result<f64, CastError> {
        Ok(match &self.value {
            Value::Object(_) => 1.0,
            Value::List(list) => list.len() as f64,
            Value::Str(text) => text
                .value
                .trim()
                .parse()
                .map_err(|_| self.cast_error(ValueKind::Double, &text.value))?,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(i) => *i as f64,
            Value::Double(d) => *d,
            Value::Null => 0.0,
        })
    }

    fn to_object(&self, model: &dyn ModelAccessor) -> Value {
        match &self.value {
            Value::Object(o) => Value::Object(*o),
            Value::List(list) => list
                .first()
                .map_or(Value::Null, |first| first.to_object(model)),
            Value::Null => Value::Null,
            _ => model
                .lookup(&self.plain_string(model))
                .map_or(Value::Null, Value::Object),
        }
    }

    /// Converts to `kind`. Only the parsing of malformed strings as numbers
    /// can fail.
    pub fn adapt(&self, kind: ValueKind, model: &dyn ModelAccessor) -> Result<Node, CastError> {
        let value = match kind {
            ValueKind::Object => self.to_object(model),
            ValueKind::List => Value::List(self.to_list()),
            ValueKind::String => Value::Str(self.to_text(model)),
            ValueKind::Bool => Value::Bool(self.to_bool()),
            ValueKind::Int => Value::Int(self.to_int()?),
            ValueKind::Double => Value::Double(self.to_double()?),
            ValueKind::Null => Value::Null,
        };
        Ok(self.derive(value))
    }

    /// Value equality across kinds. Never fails: a failed conversion falls
    /// back to comparing string forms.
    pub fn equals(&self, other: &Node, model: &dyn ModelAccessor) -> bool {
        match (&self.value, &other.value) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => {
                self.plain_string(model) == other.plain_string(model)
            }
            _ if self.kind() == other.kind() => self.same_kind_equals(other, model),
            _ => match self.adapt(other.kind(), model) {
                Ok(adapted) if adapted.kind() == other.kind() => {
                    adapted.same_kind_equals(other, model)
                }
                _ => self.plain_string(model) == other.plain_string(model),
            },
        }
    }

    fn same_kind_equals(&self, other: &Node, model: &dyn ModelAccessor) -> bool {
        match (&self.value, &other.value) {
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y, model))
            }
            (Value::Str(a), Value::Str(b)) => a.value == b.value,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// Appends `other` to this node.
    ///
    /// A null node takes over a non-string value, lists are appended element
    /// by element, a list accumulates non-string values and everything else
    /// is concatenated as text.
    pub fn append(&mut self, other: Node, model: &dyn ModelAccessor) {
        match (&mut self.value, other.value) {
            (_, Value::Null) => self.log.extend_shifted(other.log, 0),
            (Value::Null, value) if !matches!(value, Value::Str(_)) => {
                let mut log = std::mem::take(&mut self.log);
                log.extend_shifted(other.log, 0);
                *self = Node {
                    value,
                    container: other.container,
                    origin: other.origin,
                    log,
                };
            }
            (_, Value::List(list)) => {
                self.log.extend_shifted(other.log, 0);
                for item in list {
                    self.append(item, model);
                }
            }
            (Value::List(list), value) if !matches!(value, Value::Str(_)) => {
                list.push(
                    Node {
                        value,
                        container: other.container,
                        origin: other.origin,
                        log: EvalLog::default(),
                    },
                    model,
                );
                self.log.extend_shifted(other.log, 0);
            }
            (_, value) => {
                let other = Node { value, ..other };
                let mut text = self.to_text(model);
                let offset = text.len();
                text.push_text(&other.to_text(model));
                self.value = Value::Str(text);
                self.log.extend_shifted(other.log, offset);
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Object(o) => write!(f, "{o}"),
            Value::List(list) => {
                f.write_str("[")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Str(text) => f.write_str(&text.value),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => f.write_str(&format_double(*d)),
            Value::Null => Ok(()),
        }
    }
}

/// Formats a double with at most three fraction digits and no grouping;
/// integral values print without a fraction.
pub fn format_double(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{value:.3}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}
