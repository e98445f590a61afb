use crate::ast::{CallPrefix, Literal, NodeId, NodeKind, Operator, SyntaxTree};
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::position::Position;
use crate::scanner;
use crate::syntax::{Dialect, Tags};

type ParseResult<T> = Result<T, SyntaxError>;

/// What the statement loop does after looking at an open tag.
enum Step {
    Statement {
        node: NodeId,
        span: Position,
        /// Start of the tag ending the statement.
        last_tag: usize,
        feature: bool,
    },
    Skip {
        resume: usize,
    },
}

pub(crate) struct Parser<'a> {
    buffer: &'a str,
    tags: &'static Tags,
    tree: SyntaxTree,
    errors: Vec<SyntaxError>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(buffer: &'a str, dialect: Dialect) -> Self {
        Parser {
            buffer,
            tags: dialect.tags(),
            tree: SyntaxTree::new(dialect),
            errors: Vec::new(),
        }
    }

    pub(crate) const fn tags(&self) -> &'static Tags {
        self.tags
    }

    pub(crate) fn finish(self) -> (SyntaxTree, Vec<SyntaxError>) {
        (self.tree, self.errors)
    }

    pub(crate) fn report(&mut self, error: SyntaxError) {
        self.errors.push(error);
    }

    #[inline]
    fn error(&self, position: Position, kind: SyntaxErrorKind) -> SyntaxError {
        SyntaxError::new(self.buffer, position, kind)
    }

    fn slice(&self, position: Position) -> &'a str {
        self.buffer.get(position.begin..position.end).unwrap_or("")
    }

    fn starts_with_at(&self, at: usize, token: &str) -> bool {
        self.buffer
            .get(at..)
            .is_some_and(|rest| rest.starts_with(token))
    }

    /// Whether a keyword tag at `at` is followed by a separator rather than
    /// more identifier characters (`<%if (` versus `<%ifNeeded%>`).
    fn keyword_at(&self, at: usize, keyword_tag: &str) -> bool {
        self.starts_with_at(at, keyword_tag)
            && self
                .buffer
                .get(at + keyword_tag.len()..)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_whitespace() || c == '(')
    }

    // --- Statements ---

    /// Parses the statements of `limits` into a new `Template` node.
    pub(crate) fn parse_template(&mut self, limits: Position) -> NodeId {
        let mut children = Vec::new();
        let mut pos = limits.begin;
        let tags = self.tags;

        while pos < limits.end {
            let Some(open) = scanner::find(
                self.buffer,
                tags.begin,
                Position::new(pos, limits.end),
                &[],
            ) else {
                break;
            };

            match self.parse_statement(open.begin, limits) {
                Step::Statement {
                    node,
                    span,
                    last_tag,
                    feature,
                } => {
                    let mut text_end = open.begin;
                    let mut resume = span.end;
                    // A block closed after text on its line keeps its line break.
                    let closed_alone = scanner::is_first_on_line(self.buffer, last_tag).is_some();
                    if !feature && closed_alone {
                        if let (Some(line_start), Some(after)) = (
                            scanner::is_first_on_line(self.buffer, span.begin),
                            scanner::is_last_on_line(self.buffer, span.end),
                        ) {
                            text_end = line_start.max(pos);
                            resume = after.min(limits.end);
                        }
                    }
                    self.push_text(&mut children, Position::new(pos, text_end));
                    children.push(node);
                    pos = resume;
                }
                Step::Skip { resume } => {
                    self.push_text(&mut children, Position::new(pos, open.begin));
                    pos = resume.max(open.end);
                }
            }
        }
        if pos < limits.end {
            self.push_text(&mut children, Position::new(pos, limits.end));
        }

        self.tree.push(NodeKind::Template, limits, children)
    }

    fn push_text(&mut self, children: &mut Vec<NodeId>, position: Position) {
        if position.is_empty() {
            return;
        }
        let text = self.slice(position).to_string();
        children.push(self.tree.push(NodeKind::Text(text), position, vec![]));
    }

    fn parse_statement(&mut self, at: usize, limits: Position) -> Step {
        let tags = self.tags;
        if self.starts_with_at(at, tags.comment_begin) {
            self.parse_comment(at, limits)
        } else if self.keyword_at(at, tags.if_begin) {
            self.parse_if(at, limits)
        } else if self.keyword_at(at, tags.for_begin) {
            self.parse_for(at, limits)
        } else if self.starts_with_at(at, tags.else_begin)
            || self.starts_with_at(at, tags.block_close)
        {
            let tag_end = scanner::find(
                self.buffer,
                tags.end,
                Position::new(at, limits.end),
                &tags.literal_inhibitors,
            )
            .map_or(limits.end, |end| end.end);
            let tag = self.slice(Position::new(at, tag_end)).to_string();
            self.report(self.error(
                Position::new(at, tag_end),
                SyntaxErrorKind::UnexpectedTag { tag },
            ));
            Step::Skip { resume: tag_end }
        } else {
            self.parse_feature(at, limits)
        }
    }

    fn unmatched(&mut self, at: usize, open: &str, close: &str) {
        let position = Position::new(at, at + open.len());
        self.report(self.error(
            position,
            SyntaxErrorKind::UnmatchedTag {
                open: open.to_string(),
                close: close.to_string(),
            },
        ));
    }

    fn parse_comment(&mut self, at: usize, limits: Position) -> Step {
        let tags = self.tags;
        let inner_begin = at + tags.comment_begin.len();
        let Some(close) = scanner::find(
            self.buffer,
            tags.comment_end,
            Position::new(inner_begin, limits.end),
            &[],
        ) else {
            self.unmatched(at, tags.comment_begin, tags.comment_end);
            return Step::Skip { resume: limits.end };
        };
        let text = self.slice(Position::new(inner_begin, close.begin)).to_string();
        let span = Position::new(at, close.end);
        Step::Statement {
            node: self.tree.push(NodeKind::Comment(text), span, vec![]),
            span,
            last_tag: at,
            feature: false,
        }
    }

    fn parse_feature(&mut self, at: usize, limits: Position) -> Step {
        let tags = self.tags;
        let inner_begin = at + tags.begin.len();
        let Some(close) = scanner::find(
            self.buffer,
            tags.end,
            Position::new(inner_begin, limits.end),
            &tags.literal_inhibitors,
        ) else {
            self.unmatched(at, tags.begin, tags.end);
            return Step::Skip { resume: limits.end };
        };
        let expression = self.expression_or_placeholder(Position::new(inner_begin, close.begin));
        let span = Position::new(at, close.end);
        Step::Statement {
            node: self
                .tree
                .push(NodeKind::Feature { expression }, span, vec![expression]),
            span,
            last_tag: at,
            feature: true,
        }
    }

    /// Parses `<%keyword expression{%>` starting at `at`, returning the
    /// expression and the full header span.
    fn parse_block_header(
        &mut self,
        at: usize,
        keyword_tag: &str,
        limits: Position,
    ) -> Option<(NodeId, Position)> {
        let tags = self.tags;
        let expression_begin = at + keyword_tag.len();
        let Some(open) = scanner::find(
            self.buffer,
            tags.block_open,
            Position::new(expression_begin, limits.end),
            &tags.expression_inhibitors,
        ) else {
            self.unmatched(at, keyword_tag, tags.block_open);
            return None;
        };
        let expression = self.header_expression(Position::new(expression_begin, open.begin));
        Some((expression, Position::new(at, open.end)))
    }

    /// Body limits between an opening tag and a closing tag, with the
    /// indentation and line break of tags that sit alone on their line
    /// removed.
    fn body_limits(&self, opening_tag: Position, closing_tag: Position) -> Position {
        let alone = |tag: Position| {
            scanner::is_first_on_line(self.buffer, tag.begin).is_some()
                && scanner::is_last_on_line(self.buffer, tag.end).is_some()
        };
        let mut begin = opening_tag.end;
        let mut end = closing_tag.begin;
        if alone(opening_tag) {
            if let Some(after) = scanner::is_last_on_line(self.buffer, opening_tag.end) {
                begin = after.min(end);
            }
        }
        if alone(closing_tag) {
            if let Some(line_start) = scanner::is_first_on_line(self.buffer, closing_tag.begin) {
                end = line_start.max(begin);
            }
        }
        Position::new(begin, end)
    }

    fn parse_for(&mut self, at: usize, limits: Position) -> Step {
        let tags = self.tags;
        let Some((iterator, header)) = self.parse_block_header(at, tags.for_begin, limits) else {
            return Step::Skip {
                resume: at + tags.for_begin.len(),
            };
        };
        let Some(close) = scanner::find_block_end(
            self.buffer,
            tags.for_begin,
            tags.block_close,
            Position::new(header.end, limits.end),
            true,
            &tags.statement_inhibitors,
        ) else {
            self.unmatched(at, tags.for_begin, tags.block_close);
            return Step::Skip { resume: header.end };
        };

        let body = self.parse_template(self.body_limits(header, close));
        let span = Position::new(at, close.end);
        Step::Statement {
            node: self
                .tree
                .push(NodeKind::For { iterator, body }, span, vec![iterator, body]),
            span,
            last_tag: close.begin,
            feature: false,
        }
    }

    fn parse_if(&mut self, at: usize, limits: Position) -> Step {
        let tags = self.tags;
        let Some((condition, header)) = self.parse_block_header(at, tags.if_begin, limits) else {
            return Step::Skip {
                resume: at + tags.if_begin.len(),
            };
        };
        let Some(close) = scanner::find_block_end(
            self.buffer,
            tags.if_begin,
            tags.block_close,
            Position::new(header.end, limits.end),
            true,
            &tags.statement_inhibitors,
        ) else {
            self.unmatched(at, tags.if_begin, tags.block_close);
            return Step::Skip { resume: header.end };
        };

        // Each branch: its condition (None for the final else), the tag that
        // opens it, and the tag that closes it.
        let mut branches: Vec<(Option<NodeId>, Position, Position)> = Vec::new();
        let mut current = (Some(condition), header);
        let mut cursor = header.end;
        loop {
            let found = scanner::find(
                self.buffer,
                tags.else_begin,
                Position::new(cursor, close.begin),
                &tags.statement_inhibitors,
            );
            let Some(else_tag) = found else {
                branches.push((current.0, current.1, close));
                break;
            };
            let Some((else_condition, else_header)) = self.parse_else_header(else_tag, close) else {
                return Step::Skip { resume: close.end };
            };
            branches.push((current.0, current.1, else_header));
            if current.0.is_none() {
                // Anything after a plain else is unreachable.
                self.report(self.error(
                    else_header,
                    SyntaxErrorKind::UnexpectedTag {
                        tag: self.slice(else_header).to_string(),
                    },
                ));
            }
            current = (else_condition, else_header);
            cursor = else_header.end;
        }

        let mut children = vec![condition];
        let mut then = None;
        let mut else_ifs = Vec::new();
        let mut otherwise = None;
        for (branch_condition, opening, closing) in branches {
            let body = self.parse_template(self.body_limits(opening, closing));
            match (then, branch_condition) {
                (None, _) => then = Some(body),
                (Some(_), Some(branch_condition)) => {
                    children.push(branch_condition);
                    else_ifs.push((branch_condition, body));
                }
                (Some(_), None) => otherwise = Some(body),
            }
            children.push(body);
        }
        let Some(then) = then else {
            return Step::Skip { resume: close.end };
        };

        let span = Position::new(at, close.end);
        Step::Statement {
            node: self.tree.push(
                NodeKind::If {
                    condition,
                    then,
                    else_ifs,
                    otherwise,
                },
                span,
                children,
            ),
            span,
            last_tag: close.begin,
            feature: false,
        }
    }

    /// Parses `<%}else{%>` or `<%}else if cond{%>` found at `else_tag`.
    fn parse_else_header(
        &mut self,
        else_tag: Position,
        close: Position,
    ) -> Option<(Option<NodeId>, Position)> {
        let tags = self.tags;
        let after = scanner::trim(self.buffer, Position::new(else_tag.end, close.begin)).begin;
        let is_else_if = self.starts_with_at(after, "if")
            && self
                .buffer
                .get(after + 2..)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_whitespace() || c == '(');
        let condition_begin = if is_else_if { after + 2 } else { after };
        let Some(open) = scanner::find(
            self.buffer,
            tags.block_open,
            Position::new(condition_begin, close.begin),
            &tags.expression_inhibitors,
        ) else {
            self.unmatched(else_tag.begin, tags.else_begin, tags.block_open);
            return None;
        };
        let condition = if is_else_if {
            Some(self.header_expression(Position::new(condition_begin, open.begin)))
        } else {
            let between = Position::new(condition_begin, open.begin);
            if !scanner::trim(self.buffer, between).is_empty() {
                self.report(self.error(
                    between,
                    SyntaxErrorKind::InvalidExpression {
                        text: self.slice(between).trim().to_string(),
                    },
                ));
            }
            None
        };
        Some((condition, Position::new(else_tag.begin, open.end)))
    }

    // --- Expressions ---

    /// Parses an expression, recording the error and substituting a `null`
    /// literal when it is malformed so that later statements are still
    /// checked.
    pub(crate) fn expression_or_placeholder(&mut self, limits: Position) -> NodeId {
        match self.parse_expression(limits) {
            Ok(node) => node,
            Err(error) => {
                self.report(error);
                self.tree
                    .push(NodeKind::Literal(Literal::Null), limits, vec![])
            }
        }
    }

    /// Block headers are written `(expression)`; the parentheses belong to
    /// the tag, not to the expression.
    fn header_expression(&mut self, limits: Position) -> NodeId {
        let expression = self.expression_or_placeholder(limits);
        match self.tree.kind(expression) {
            Some(&NodeKind::Parenthesis(inner)) => inner,
            _ => expression,
        }
    }

    pub(crate) fn parse_expression(&mut self, limits: Position) -> ParseResult<NodeId> {
        let span = scanner::trim(self.buffer, limits);
        if span.is_empty() {
            return Err(self.error(
                limits,
                SyntaxErrorKind::InvalidExpression {
                    text: String::new(),
                },
            ));
        }

        for group in Operator::PRECEDENCE {
            let splits = self.operator_splits(span, group);
            let Some(&(last_operator, last)) = splits.last() else {
                continue;
            };
            if splits.iter().all(|(operator, _)| *operator == last_operator) {
                let mut operands = Vec::with_capacity(splits.len() + 1);
                let mut begin = span.begin;
                for &(_, split) in &splits {
                    operands.push(self.parse_expression(Position::new(begin, split.begin))?);
                    begin = split.end;
                }
                operands.push(self.parse_expression(Position::new(begin, span.end))?);
                return Ok(self.operator_node(last_operator, operands, span));
            }
            // Mixed operators of equal precedence associate to the left.
            let left = self.parse_expression(Position::new(span.begin, last.begin))?;
            let right = self.parse_expression(Position::new(last.end, span.end))?;
            return Ok(self.operator_node(last_operator, vec![left, right], span));
        }

        let text = self.slice(span);
        if text.starts_with('!') {
            let operand = self.parse_expression(Position::new(span.begin + 1, span.end))?;
            return Ok(self.tree.push(NodeKind::Not(operand), span, vec![operand]));
        }
        if let Some(literal) = self.literal(span) {
            return Ok(self.tree.push(NodeKind::Literal(literal), span, vec![]));
        }
        if let Some(rest) = text.strip_prefix('-') {
            // Unary minus on a non literal operand: `0 - operand`.
            let operand_begin = span.end - rest.len();
            let zero = self.tree.push(
                NodeKind::Literal(Literal::Int(0)),
                Position::at(span.begin),
                vec![],
            );
            let operand = self.parse_expression(Position::new(operand_begin, span.end))?;
            return Ok(self.operator_node(Operator::Subtract, vec![zero, operand], span));
        }
        if text.starts_with('(') {
            let close = scanner::find_block_end(
                self.buffer,
                "(",
                ")",
                Position::new(span.begin + 1, span.end),
                true,
                &self.tags.literal_inhibitors,
            );
            if close.is_some_and(|close| close.end == span.end) {
                let inner = self.parse_expression(Position::new(span.begin + 1, span.end - 1))?;
                return Ok(self.tree.push(NodeKind::Parenthesis(inner), span, vec![inner]));
            }
        }

        let parts = self.split_top_level(span, ".");
        if parts.len() > 1 {
            let calls = parts
                .into_iter()
                .map(|part| self.parse_call(part))
                .collect::<ParseResult<Vec<_>>>()?;
            return Ok(self
                .tree
                .push(NodeKind::CallSet { calls: calls.clone() }, span, calls));
        }
        self.parse_call(span)
    }

    fn operator_node(&mut self, operator: Operator, operands: Vec<NodeId>, span: Position) -> NodeId {
        self.tree.push(
            NodeKind::Operator {
                operator,
                operands: operands.clone(),
            },
            span,
            operands,
        )
    }

    /// Top-level occurrences of binary operators belonging to `group`.
    fn operator_splits(&self, span: Position, group: &[Operator]) -> Vec<(Operator, Position)> {
        const SYMBOLS: [&str; 12] = [
            "||", "&&", "==", "!=", ">=", "<=", ">", "<", "+", "-", "/", "*",
        ];
        let mut splits = Vec::new();
        let mut cursor = span.begin;
        let mut operand_begin = span.begin;
        while let Some((index, found)) = scanner::find_any(
            self.buffer,
            &SYMBOLS,
            Position::new(cursor, span.end),
            &self.tags.expression_inhibitors,
        ) {
            cursor = found.end;
            let Some(&operator) = Operator::ALL.get(index) else {
                break;
            };
            let before = self.slice(Position::new(operand_begin, found.begin)).trim_end();
            let unary = before.is_empty() || before.ends_with(|c: char| "|&=!<>+-*/".contains(c));
            if unary {
                continue;
            }
            operand_begin = found.end;
            if group.contains(&operator) {
                splits.push((operator, found));
            }
        }
        splits
    }

    /// Splits `span` on every top-level occurrence of `separator`.
    fn split_top_level(&self, span: Position, separator: &str) -> Vec<Position> {
        let mut parts = Vec::new();
        let mut begin = span.begin;
        while let Some(found) = scanner::find(
            self.buffer,
            separator,
            Position::new(begin, span.end),
            &self.tags.expression_inhibitors,
        ) {
            parts.push(Position::new(begin, found.begin));
            begin = found.end;
        }
        parts.push(Position::new(begin, span.end));
        parts
    }

    fn literal(&self, span: Position) -> Option<Literal> {
        let text = self.slice(span);
        match text {
            "true" => return Some(Literal::Bool(true)),
            "false" => return Some(Literal::Bool(false)),
            "null" => return Some(Literal::Null),
            _ => {}
        }
        if text.len() >= 2 && text.starts_with('"') {
            let inner = Position::new(span.begin + 1, span.end);
            return (quoted_end(self.buffer, inner) == Some(span.end)).then(|| Literal::Str(unescape(text)));
        }
        let numeric = text.strip_prefix('-').unwrap_or(text);
        if !numeric.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        if let Ok(value) = text.parse::<i64>() {
            return Some(Literal::Int(value));
        }
        text.parse::<f64>().ok().map(Literal::Double)
    }

    fn parse_call(&mut self, limits: Position) -> ParseResult<NodeId> {
        let span = scanner::trim(self.buffer, limits);
        let text = self.slice(span);
        let invalid = |parser: &Self, at_char: char| {
            parser.error(
                span,
                SyntaxErrorKind::InvalidIdentifier {
                    identifier: text.to_string(),
                    at_char,
                },
            )
        };

        let mut name_begin = span.begin;
        let mut prefix = None;
        let head_end = text.find(['(', '[']).unwrap_or(text.len());
        if let Some(separator) = text.get(..head_end).and_then(|head| head.find("::")) {
            let prefix_text = text.get(..separator).unwrap_or("");
            prefix = Some(CallPrefix::parse(prefix_text).ok_or_else(|| {
                invalid(self, prefix_text.chars().next().unwrap_or(':'))
            })?);
            name_begin = span.begin + separator + 2;
        }

        let name_text = self.slice(Position::new(name_begin, span.end));
        let name_len = name_text
            .char_indices()
            .find(|&(i, c)| !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())))
            .map_or(name_text.len(), |(i, _)| i);
        if name_len == 0 {
            return Err(invalid(self, name_text.chars().next().unwrap_or(' ')));
        }
        let name = name_text.get(..name_len).unwrap_or("").to_string();
        let mut cursor = name_begin + name_len;

        let mut args = Vec::new();
        if self.starts_with_at(cursor, "(") {
            let Some(close) = scanner::find_block_end(
                self.buffer,
                "(",
                ")",
                Position::new(cursor + 1, span.end),
                true,
                &self.tags.literal_inhibitors,
            ) else {
                return Err(self.error(
                    Position::new(cursor, cursor + 1),
                    SyntaxErrorKind::UnmatchedTag {
                        open: "(".to_string(),
                        close: ")".to_string(),
                    },
                ));
            };
            let region = Position::new(cursor + 1, close.begin);
            if !scanner::trim(self.buffer, region).is_empty() {
                for part in self.split_top_level(region, ",") {
                    args.push(self.parse_expression(part)?);
                }
            }
            cursor = close.end;
        }

        let mut filter = None;
        if self.starts_with_at(cursor, "[") {
            let Some(close) = scanner::find_block_end(
                self.buffer,
                "[",
                "]",
                Position::new(cursor + 1, span.end),
                true,
                &self.tags.literal_inhibitors,
            ) else {
                return Err(self.error(
                    Position::new(cursor, cursor + 1),
                    SyntaxErrorKind::UnmatchedTag {
                        open: "[".to_string(),
                        close: "]".to_string(),
                    },
                ));
            };
            filter = Some(self.parse_expression(Position::new(cursor + 1, close.begin))?);
            cursor = close.end;
        }

        if cursor < span.end {
            let at_char = self
                .slice(Position::new(cursor, span.end))
                .trim_start()
                .chars()
                .next()
                .unwrap_or(' ');
            return Err(invalid(self, at_char));
        }

        let mut children = args.clone();
        children.extend(filter);
        Ok(self.tree.push(
            NodeKind::Call {
                prefix,
                name,
                filter,
                args,
            },
            span,
            children,
        ))
    }
}

fn quoted_end(buffer: &str, inner: Position) -> Option<usize> {
    let bytes = buffer.as_bytes();
    let mut i = inner.begin;
    while i < inner.end {
        match bytes.get(i) {
            Some(b'\\') => i += 2,
            Some(b'"') => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn unescape(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Parses a whole buffer as one template, detecting its dialect.
pub fn parse(buffer: &str) -> (SyntaxTree, NodeId, Vec<SyntaxError>) {
    let mut parser = Parser::new(buffer, Dialect::detect(buffer));
    let root = parser.parse_template(Position::new(0, buffer.len()));
    let (tree, errors) = parser.finish();
    (tree, root, errors)
}

/// Normalises the span of a template body.
///
/// A first line holding only blanks (or only a comment) is dropped, and the
/// trailing blank content is cut down to at most `trailing_newlines` line
/// breaks. A trailing comment standing on its own lines documents whatever
/// follows the body, so it is excluded and the trimming recomputed.
pub fn format_template(
    buffer: &str,
    limits: Position,
    trailing_newlines: usize,
    dialect: Dialect,
) -> Position {
    format_limits(buffer, limits, trailing_newlines, dialect.tags(), true)
}

fn format_limits(
    buffer: &str,
    limits: Position,
    trailing_newlines: usize,
    tags: &Tags,
    exclude_trailing_comment: bool,
) -> Position {
    let bytes = buffer.as_bytes();
    let end = limits.end.min(bytes.len());
    let mut begin = limits.begin.min(end);

    if let Some(newline) = scanner::find(buffer, "\n", Position::new(begin, end), &[]) {
        let head = scanner::trim(buffer, Position::new(begin, newline.begin));
        let head_text = buffer.get(head.begin..head.end).unwrap_or("");
        let comment_only = head_text.starts_with(tags.comment_begin)
            && head_text.ends_with(tags.comment_end)
            && scanner::find(buffer, tags.comment_end, head, &[])
                .is_some_and(|close| close.end == head.end);
        if head.is_empty() || comment_only {
            begin = newline.end;
        }
    }

    let content = scanner::trim(buffer, Position::new(begin, end));
    if content.is_empty() {
        return Position::at(begin);
    }

    if exclude_trailing_comment {
        let text = buffer.get(content.begin..content.end).unwrap_or("");
        if text.ends_with(tags.comment_end) {
            if let Some(comment_at) = text.rfind(tags.comment_begin).map(|i| content.begin + i) {
                if comment_at > content.begin {
                    if let Some(line_start) = scanner::is_first_on_line(buffer, comment_at) {
                        return format_limits(
                            buffer,
                            Position::new(begin, line_start.max(begin)),
                            trailing_newlines,
                            tags,
                            false,
                        );
                    }
                }
            }
        }
    }

    let mut kept = 0;
    let mut new_end = content.end;
    for i in content.end..end {
        if kept >= trailing_newlines {
            break;
        }
        if bytes.get(i) == Some(&b'\n') {
            kept += 1;
            new_end = i + 1;
        }
    }
    Position::new(begin, new_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compact structural dump used to compare trees.
    fn outline(tree: &SyntaxTree, id: NodeId) -> String {
        let children = |id: NodeId| {
            tree.children(id)
                .iter()
                .map(|&c| outline(tree, c))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match tree.kind(id).unwrap() {
            NodeKind::Template => format!("[{}]", children(id)),
            NodeKind::Text(text) => format!("{text:?}"),
            NodeKind::Comment(text) => format!("comment({text:?})"),
            NodeKind::Feature { .. } => format!("feature({})", children(id)),
            NodeKind::For { .. } => format!("for({})", children(id)),
            NodeKind::If { .. } => format!("if({})", children(id)),
            NodeKind::Literal(literal) => literal.to_string(),
            NodeKind::Not(_) => format!("!{}", children(id)),
            NodeKind::Operator { operator, .. } => {
                format!("({} {})", operator.symbol(), children(id))
            }
            NodeKind::Parenthesis(_) => format!("paren({})", children(id)),
            NodeKind::Call { prefix, name, .. } => {
                let prefix = prefix.map_or(String::new(), |p| format!("{}::", p.as_str()));
                if tree.children(id).is_empty() {
                    format!("{prefix}{name}")
                } else {
                    format!("{prefix}{name}<{}>", children(id))
                }
            }
            NodeKind::CallSet { .. } => format!("chain({})", children(id)),
        }
    }

    fn parse_outline(buffer: &str) -> String {
        let (tree, root, errors) = parse(buffer);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        outline(&tree, root)
    }

    fn parse_errors(buffer: &str) -> Vec<SyntaxErrorKind> {
        let (_, _, errors) = parse(buffer);
        errors.into_iter().map(|e| e.kind).collect()
    }

    fn expression_outline(text: &str) -> String {
        let mut parser = Parser::new(text, Dialect::Angle);
        let node = parser.parse_expression(Position::new(0, text.len())).unwrap();
        let (tree, _) = parser.finish();
        outline(&tree, node)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(parse_outline(""), "[]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_text() {
        assert_eq!(parse_outline("hello world"), r#"["hello world"]"#);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_and_feature() {
        assert_eq!(
            parse_outline("Hello <%name%>!"),
            r#"["Hello " feature(name) "!"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_feature_positions() {
        let (tree, root, _) = parse("Hello <%name%>!");
        let feature = tree.children(root)[1];
        assert_eq!(tree.position(feature), Position::new(6, 14));
        let call = tree.children(feature)[0];
        assert_eq!(tree.position(call), Position::new(8, 12));
        assert_eq!(tree.parent(call), Some(feature));
        assert_eq!(tree.previous(feature), Some(tree.children(root)[0]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_feature_on_its_own_line_is_kept() {
        assert_eq!(
            parse_outline("A\n<%name%>\nC"),
            r#"["A\n" feature(name) "\nC"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_untabification_of_if_block() {
        assert_eq!(
            parse_outline("A\n<%if (true){%>\nB\n<%}%>\nC"),
            r#"["A\n" if(true ["B\n"]) "C"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_close_tag_after_text_keeps_line_break() {
        assert_eq!(
            parse_outline("A\n<%if (true){%>\nB<%}%>\nC"),
            r#"["A\n" if(true ["B"]) "\nC"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_untabification_removes_indentation() {
        assert_eq!(
            parse_outline("A\n    <%for (items){%>\n  - <%name%>\n    <%}%>\nC"),
            r#"["A\n" for(items ["  - " feature(name) "\n"]) "C"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_statement_keeps_surrounding_text() {
        assert_eq!(
            parse_outline("a <%if (x){%>b<%}%> c"),
            r#"["a " if(x ["b"]) " c"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment_line_is_removed() {
        assert_eq!(
            parse_outline("A\n  <%-- note --%>\nB"),
            r#"["A\n" comment(" note ") "B"]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_else_if_else() {
        assert_eq!(
            parse_outline("<%if (a){%>1<%}else if (b){%>2<%}else{%>3<%}%>"),
            r#"[if(a ["1"] b ["2"] ["3"])]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_statements_are_matched() {
        assert_eq!(
            parse_outline("<%if (a){%><%for (b){%><%if (c){%>x<%}%><%}%>y<%}else{%>z<%}%>"),
            r#"[if(a [for(b [if(c ["x"])]) "y"] ["z"])]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_inside_string_literal() {
        assert_eq!(
            parse_outline(r#"<%sep("%>")%>"#),
            r#"[feature(sep<"%>">)]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bracket_dialect() {
        assert_eq!(
            parse_outline("[%if (a){%]x[%}else{%]y[%}%] [%name%]"),
            r#"[if(a ["x"] ["y"]) " " feature(name)]"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_feature_named_like_keyword() {
        assert_eq!(parse_outline("<%format%>"), "[feature(format)]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unmatched_feature() {
        assert_eq!(
            parse_errors("abc <%name"),
            vec![SyntaxErrorKind::UnmatchedTag {
                open: "<%".to_string(),
                close: "%>".to_string()
            }]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unmatched_if_reports_position() {
        let (_, _, errors) = parse("line\n  <%if (a){%>body");
        assert_eq!(errors.len(), 1);
        assert_eq!((errors[0].line, errors[0].column), (2, 3));
        assert_eq!(
            errors[0].kind,
            SyntaxErrorKind::UnmatchedTag {
                open: "<%if".to_string(),
                close: "<%}%>".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_errors_are_collected() {
        let errors = parse_errors("<%a b%> <%if (x){%>ok<%}%> <%c-%> <%}%>");
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(matches!(errors[0], SyntaxErrorKind::InvalidIdentifier { at_char: 'b', .. }));
        assert!(matches!(errors[1], SyntaxErrorKind::InvalidExpression { .. }));
        assert!(matches!(errors[2], SyntaxErrorKind::UnexpectedTag { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_precedence() {
        assert_eq!(expression_outline("a || b && c"), "(|| a (&& b c))");
        assert_eq!(expression_outline("a + b * c"), "(+ a (* b c))");
        assert_eq!(expression_outline("a == b"), "(== a b)");
        assert_eq!(expression_outline("a >= 1"), "(>= a 1)");
        assert_eq!(expression_outline("1 + 2 + 3"), "(+ 1 2 3)");
        assert_eq!(expression_outline("1 - 2 + 3"), "(+ (- 1 2) 3)");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_unary_and_parenthesis() {
        assert_eq!(expression_outline("!a"), "!a");
        assert_eq!(expression_outline("!(a || b)"), "!paren((|| a b))");
        assert_eq!(expression_outline("a != -1"), "(!= a -1)");
        assert_eq!(expression_outline("-size"), "(- 0 size)");
        assert_eq!(expression_outline("2 * -3"), "(* 2 -3)");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_literals() {
        assert_eq!(expression_outline("42"), "42");
        assert_eq!(expression_outline("4.5"), "4.5");
        assert_eq!(expression_outline(r#""a.b, \"c\"""#), r#""a.b, \"c\"""#);
        assert_eq!(expression_outline("true"), "true");
        assert_eq!(expression_outline("null"), "null");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_calls() {
        assert_eq!(expression_outline("name"), "name");
        assert_eq!(expression_outline("substring(1, 3)"), "substring<1 3>");
        assert_eq!(
            expression_outline("children.name.toUpperCase()"),
            "chain(children name toUpperCase)"
        );
        assert_eq!(
            expression_outline("script::full(\"x\").trim()"),
            r#"chain(script::full<"x"> trim)"#
        );
        assert_eq!(
            expression_outline("attributes[visible == true].sep(\", \")"),
            r#"chain(attributes<(== visible true)> sep<", ">)"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_invalid_identifier() {
        let mut parser = Parser::new("na$me", Dialect::Angle);
        let error = parser.parse_expression(Position::new(0, 5)).unwrap_err();
        assert_eq!(
            error.kind,
            SyntaxErrorKind::InvalidIdentifier {
                identifier: "na$me".to_string(),
                at_char: '$'
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_prefix() {
        let mut parser = Parser::new("java::name", Dialect::Angle);
        assert!(parser.parse_expression(Position::new(0, 10)).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_round_trip_preserves_structure() {
        let sources = [
            "Hello <%name%>!",
            "<%if (a && !b){%>x<%}else if (c == \"q\"){%>y<%}else{%>z<%}%>",
            "<%for (children[visible]){%>- <%name.toUpperCase()%>, <%}%><%-- c --%>",
            "[%for (a.b(1, 2.5)){%]<[%x + 1%]>[%}%]",
        ];
        for source in sources {
            let (tree, root, errors) = parse(source);
            assert!(errors.is_empty());
            let printed = tree.unparse(root);
            let (reparsed, reparsed_root, errors) = parse(&printed);
            assert!(errors.is_empty(), "{printed}: {errors:?}");
            assert_eq!(
                outline(&tree, root),
                outline(&reparsed, reparsed_root),
                "{source} -> {printed}"
            );
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_template_trims_edges() {
        let buffer = "\nbody\n\n\n";
        let all = Position::new(0, buffer.len());
        assert_eq!(format_template(buffer, all, 0, Dialect::Angle), Position::new(1, 5));
        assert_eq!(format_template(buffer, all, 1, Dialect::Angle), Position::new(1, 6));
        assert_eq!(format_template(buffer, all, 5, Dialect::Angle), Position::new(1, 8));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_template_keeps_non_blank_first_line() {
        let buffer = " body\nmore";
        let all = Position::new(0, buffer.len());
        assert_eq!(format_template(buffer, all, 0, Dialect::Angle), all);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_template_excludes_comments() {
        let buffer = " <%-- head --%>\nbody\n<%-- next --%>\n";
        let all = Position::new(0, buffer.len());
        let formatted = format_template(buffer, all, 0, Dialect::Angle);
        assert_eq!(&buffer[formatted.begin..formatted.end], "body");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_template_blank_body() {
        let buffer = "\n   \n";
        let formatted = format_template(buffer, Position::new(0, buffer.len()), 1, Dialect::Angle);
        assert!(formatted.is_empty());
    }
}
