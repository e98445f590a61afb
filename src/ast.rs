use std::fmt;

use crate::position::Position;
use crate::syntax::Dialect;

/// Index of a node inside its [`SyntaxTree`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a loaded template file.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileId(pub(crate) u32);

impl FileId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node addressed across every loaded file; the target type of the
/// text-to-template mapping.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRef {
    pub file: FileId,
    pub node: NodeId,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Double(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Or,
    And,
    Equal,
    NotEqual,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
    Add,
    Subtract,
    Divide,
    Multiply,
}

impl Operator {
    /// Every binary operator, longest spelling first within equal prefixes.
    pub const ALL: [Self; 12] = [
        Self::Or,
        Self::And,
        Self::Equal,
        Self::NotEqual,
        Self::GreaterOrEqual,
        Self::LessOrEqual,
        Self::Greater,
        Self::Less,
        Self::Add,
        Self::Subtract,
        Self::Divide,
        Self::Multiply,
    ];

    /// Operator groups from the loosest to the tightest binding.
    pub const PRECEDENCE: [&'static [Self]; 5] = [
        &[Self::Or],
        &[Self::And],
        &[
            Self::Equal,
            Self::NotEqual,
            Self::GreaterOrEqual,
            Self::LessOrEqual,
            Self::Greater,
            Self::Less,
        ],
        &[Self::Add, Self::Subtract],
        &[Self::Divide, Self::Multiply],
    ];

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Divide => "/",
            Self::Multiply => "*",
        }
    }
}

/// Restricts the lookup of a call to one kind of callable.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallPrefix {
    Script,
    Service,
    Feature,
}

impl CallPrefix {
    pub fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "script" => Some(Self::Script),
            "service" => Some(Self::Service),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Service => "service",
            Self::Feature => "feature",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An ordered sequence of statements: a script body or a block body.
    Template,
    Text(String),
    Comment(String),
    Feature {
        expression: NodeId,
    },
    For {
        iterator: NodeId,
        body: NodeId,
    },
    If {
        condition: NodeId,
        then: NodeId,
        else_ifs: Vec<(NodeId, NodeId)>,
        otherwise: Option<NodeId>,
    },
    Literal(Literal),
    Not(NodeId),
    Operator {
        operator: Operator,
        operands: Vec<NodeId>,
    },
    Parenthesis(NodeId),
    Call {
        prefix: Option<CallPrefix>,
        name: String,
        filter: Option<NodeId>,
        args: Vec<NodeId>,
    },
    CallSet {
        calls: Vec<NodeId>,
    },
}

impl NodeKind {
    pub const fn is_statement(&self) -> bool {
        matches!(
            self,
            Self::Text(_) | Self::Comment(_) | Self::Feature { .. } | Self::For { .. } | Self::If { .. }
        )
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Text(_) => "text",
            Self::Comment(_) => "comment",
            Self::Feature { .. } => "feature",
            Self::For { .. } => "for",
            Self::If { .. } => "if",
            Self::Literal(_) => "literal",
            Self::Not(_) => "not",
            Self::Operator { .. } => "operator",
            Self::Parenthesis(_) => "parenthesis",
            Self::Call { .. } => "call",
            Self::CallSet { .. } => "call set",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub position: Position,
    pub parent: Option<NodeId>,
    pub previous: Option<NodeId>,
    pub next: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena holding every node parsed from one buffer.
///
/// Nodes are immutable once their parent has been built; the only links
/// written after creation are the parent/sibling indices set by
/// [`SyntaxTree::adopt`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    dialect: Dialect,
}

impl SyntaxTree {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            nodes: Vec::new(),
            dialect,
        }
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node and links it as the parent of `children`.
    pub(crate) fn push(&mut self, kind: NodeKind, position: Position, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(SyntaxNode {
            kind,
            position,
            parent: None,
            previous: None,
            next: None,
            children: Vec::new(),
        });
        self.adopt(id, children);
        id
    }

    /// Appends `children` to `parent`, wiring the parent and sibling links.
    pub(crate) fn adopt(&mut self, parent: NodeId, children: Vec<NodeId>) {
        let mut previous = self.get(parent).and_then(|p| p.children.last().copied());
        for &child in &children {
            if let Some(node) = self.nodes.get_mut(child.index()) {
                node.parent = Some(parent);
                node.previous = previous;
            }
            if let Some(prev) = previous.and_then(|p| self.nodes.get_mut(p.index())) {
                prev.next = Some(child);
            }
            previous = Some(child);
        }
        if let Some(node) = self.nodes.get_mut(parent.index()) {
            node.children.extend(children);
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.nodes.get(id.index())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|node| &node.kind)
    }

    pub fn position(&self, id: NodeId) -> Position {
        self.get(id).map(|node| node.position).unwrap_or_default()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn previous(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.previous)
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.next)
    }

    /// Every node below `root` (depth first, document order) matching `predicate`.
    pub fn descendants<F>(&self, root: NodeId, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&NodeKind) -> bool,
    {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.kind(id).is_some_and(&predicate) {
                found.push(id);
            }
            stack.extend(self.children(id).iter().rev().copied());
        }
        found
    }

    /// Serializes the subtree below `id` back to template text.
    ///
    /// Parsing the result yields a tree of the same shape, except for the
    /// whitespace that untabification removed from the original.
    pub fn unparse(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let tags = self.dialect.tags();
        let Some(kind) = self.kind(id) else {
            return;
        };
        match kind {
            NodeKind::Template => {
                for &child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(text) => {
                out.push_str(tags.comment_begin);
                out.push_str(text);
                out.push_str(tags.comment_end);
            }
            NodeKind::Feature { expression } => {
                out.push_str(tags.begin);
                self.write_node(*expression, out);
                out.push_str(tags.end);
            }
            NodeKind::For { iterator, body } => {
                out.push_str(tags.for_begin);
                out.push_str(" (");
                self.write_node(*iterator, out);
                out.push(')');
                out.push_str(tags.block_open);
                self.write_node(*body, out);
                out.push_str(tags.block_close);
            }
            NodeKind::If {
                condition,
                then,
                else_ifs,
                otherwise,
            } => {
                out.push_str(tags.if_begin);
                out.push_str(" (");
                self.write_node(*condition, out);
                out.push(')');
                out.push_str(tags.block_open);
                self.write_node(*then, out);
                for (condition, body) in else_ifs {
                    out.push_str(tags.else_begin);
                    out.push_str(" if (");
                    self.write_node(*condition, out);
                    out.push(')');
                    out.push_str(tags.block_open);
                    self.write_node(*body, out);
                }
                if let Some(otherwise) = otherwise {
                    out.push_str(tags.else_begin);
                    out.push_str(tags.block_open);
                    self.write_node(*otherwise, out);
                }
                out.push_str(tags.block_close);
            }
            NodeKind::Literal(literal) => out.push_str(&literal.to_string()),
            NodeKind::Not(operand) => {
                out.push('!');
                self.write_node(*operand, out);
            }
            NodeKind::Operator { operator, operands } => {
                for (i, &operand) in operands.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                        out.push_str(operator.symbol());
                        out.push(' ');
                    }
                    self.write_node(operand, out);
                }
            }
            NodeKind::Parenthesis(inner) => {
                out.push('(');
                self.write_node(*inner, out);
                out.push(')');
            }
            NodeKind::Call {
                prefix,
                name,
                filter,
                args,
            } => {
                if let Some(prefix) = prefix {
                    out.push_str(prefix.as_str());
                    out.push_str("::");
                }
                out.push_str(name);
                if !args.is_empty() {
                    out.push('(');
                    for (i, &arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.write_node(arg, out);
                    }
                    out.push(')');
                }
                if let Some(filter) = filter {
                    out.push('[');
                    self.write_node(*filter, out);
                    out.push(']');
                }
            }
            NodeKind::CallSet { calls } => {
                for (i, &call) in calls.iter().enumerate() {
                    if i > 0 {
                        out.push('.');
                    }
                    self.write_node(call, out);
                }
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Double(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Self::Str(value) => {
                f.write_str("\"")?;
                for c in value.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Bool(value) => write!(f, "{value}"),
            Self::Null => f.write_str("null"),
        }
    }
}
