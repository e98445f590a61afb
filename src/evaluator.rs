//! Evaluation of script bodies against model objects.
//!
//! An [`Evaluator`] walks the syntax tree of a script with a current node and
//! a stack of context frames. Script frames carry the call arguments, `for`
//! frames carry the iteration index. Every script frame is guarded against
//! re-entering the same script on the same object.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ast::{CallPrefix, FileId, Literal, NodeId, NodeKind, Operator, SourceRef};
use crate::engine::Generator;
use crate::error::{EvaluationError, EvaluationErrorKind, Severity};
use crate::mapping::Highlight;
use crate::model::{ModelAccessor, ObjectId, is_kind_of};
use crate::position::Position;
use crate::registry::ScriptRef;
use crate::script::{ScriptDecl, ScriptFile};
use crate::services::Service;
use crate::value::{EvalIssue, Node, NodeList, Text, Value, ValueKind};

type EvalResult<T = Node> = Result<T, EvaluationError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum EvalMode {
    /// Failures abort the evaluation.
    #[default]
    Generation,
    /// Failures of a statement are logged and the statement yields nothing.
    Preview,
}

/// Shared flag polled at the start of every script evaluation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Frame {
    node: Node,
    args: Vec<Node>,
    index: Option<usize>,
    script: Option<ScriptRef>,
}

/// Where the nodes being evaluated come from.
#[derive(Clone, Copy)]
struct Scope<'g> {
    file_id: FileId,
    file: &'g ScriptFile,
    script: &'g ScriptDecl,
}

impl<'g> Scope<'g> {
    fn source(&self, node: NodeId) -> SourceRef {
        SourceRef {
            file: self.file_id,
            node,
        }
    }

    fn kind(&self, node: NodeId) -> Option<&'g NodeKind> {
        self.file.tree.kind(node)
    }
}

/// The model object text produced on behalf of `node` belongs to.
fn owner(node: &Node) -> Option<ObjectId> {
    node.as_object().or(node.container)
}

/// The whitespace a line of `text` ends with, when that is all the line holds.
fn trailing_indent(text: &str) -> Option<&str> {
    let last = text.rsplit('\n').next().unwrap_or(text);
    (!last.is_empty() && last.chars().all(char::is_whitespace)).then_some(last)
}

pub struct Evaluator<'g> {
    generator: &'g Generator,
    model: &'g dyn ModelAccessor,
    mode: EvalMode,
    cancellation: Cancellation,
    active: HashMap<ScriptRef, HashSet<ObjectId>>,
    frames: Vec<Frame>,
    cache: HashMap<(SourceRef, ObjectId), Node>,
    empty: HashMap<ScriptRef, bool>,
}

impl<'g> Evaluator<'g> {
    pub(crate) fn new(generator: &'g Generator, model: &'g dyn ModelAccessor) -> Self {
        Self {
            generator,
            model,
            mode: EvalMode::default(),
            cancellation: Cancellation::default(),
            active: HashMap::new(),
            frames: Vec::new(),
            cache: HashMap::new(),
            empty: HashMap::new(),
        }
    }

    pub fn mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Whether the last evaluation of `script` produced nothing, or failed.
    pub fn was_empty(&self, script: ScriptRef) -> Option<bool> {
        self.empty.get(&script).copied()
    }

    /// Evaluates the script `name` applicable to `object`.
    pub fn render(&mut self, name: &str, object: ObjectId) -> EvalResult {
        let root_type = &self.generator.config().root_type;
        let type_name = self.model.type_of(object).unwrap_or(root_type).to_string();
        let Some(script) = self.generator.resolve_template(self.model, &type_name, name) else {
            return Err(EvaluationErrorKind::UnresolvedTemplate {
                type_name,
                name: name.to_string(),
            }
            .into());
        };
        self.evaluate_script(script, &Node::root(object), Vec::new())
    }

    pub fn evaluate_script(
        &mut self,
        script: ScriptRef,
        current: &Node,
        args: Vec<Node>,
    ) -> EvalResult {
        let generator = self.generator;
        let (file, decl) = generator.script(script).ok_or_else(|| {
            EvaluationError::new(EvaluationErrorKind::UnresolvedCall {
                name: format!("script {}", script.index),
            })
        })?;
        let scope = Scope {
            file_id: script.file,
            file,
            script: decl,
        };
        self.evaluate_body(scope, script, decl.body, current, args)
    }

    /// Evaluates the file template of a file script, giving the path of the
    /// generated file.
    pub fn evaluate_path(&mut self, script: ScriptRef, object: ObjectId) -> EvalResult<Option<String>> {
        let generator = self.generator;
        let Some((file, decl)) = generator.script(script) else {
            return Ok(None);
        };
        let Some(path) = decl.file else {
            return Ok(None);
        };
        let scope = Scope {
            file_id: script.file,
            file,
            script: decl,
        };
        let current = Node::root(object);
        let node = self.evaluate_sequence(scope, path, &current)?;
        Ok(Some(node.plain_string(self.model).trim().to_string()))
    }

    fn evaluate_body(
        &mut self,
        scope: Scope<'g>,
        script: ScriptRef,
        body: NodeId,
        current: &Node,
        args: Vec<Node>,
    ) -> EvalResult {
        if self.cancellation.is_cancelled() {
            return Err(EvaluationErrorKind::Cancelled.into());
        }
        let object = current.as_object();
        if let Some(object) = object {
            if !self.active.entry(script).or_default().insert(object) {
                let error = EvaluationError::new(EvaluationErrorKind::RecursiveCall {
                    script: scope.script.name.clone(),
                    object: self.model.describe(object),
                });
                return Err(error.located(scope.script.position, Some(&scope.script.name), None));
            }
        }

        self.frames.push(Frame {
            node: current.clone(),
            args,
            index: None,
            script: Some(script),
        });
        tracing::trace!(script = %scope.script.name, depth = self.frames.len(), "entering script");
        let result = self.evaluate_sequence(scope, body, current);
        self.frames.pop();
        if let Some(object) = object {
            if let Some(active) = self.active.get_mut(&script) {
                active.remove(&object);
            }
        }

        let result = match (result, scope.script.post) {
            (Ok(node), Some(post)) => self.evaluate_expression(scope, post, &node, current),
            (result, _) => result,
        };
        self.empty
            .insert(script, result.as_ref().map_or(true, Node::is_empty));
        result
    }

    fn evaluate_sequence(&mut self, scope: Scope<'g>, container: NodeId, current: &Node) -> EvalResult {
        let children = scope.file.tree.children(container);
        let auto_indent = self.generator.config().auto_indent.applies(scope.file.kind);
        let mut result = Node::new(Value::Null, owner(current));
        let mut previous_text = None;

        for (i, &child) in children.iter().enumerate() {
            let kind = scope.kind(child);
            if i + 1 == children.len() && result.is_object_like() {
                if let Some(NodeKind::Text(text)) = kind {
                    if text.trim().is_empty() {
                        continue;
                    }
                }
            }

            let mut node = match self.evaluate_statement(scope, child, current) {
                Ok(node) => node,
                Err(error) if self.mode == EvalMode::Preview && !error.is_cancellation() => {
                    self.swallow(scope, child, current, error)
                }
                Err(error) => return Err(error),
            };

            if auto_indent && matches!(kind, Some(NodeKind::Feature { .. })) {
                if let Some(indent) = previous_text.and_then(trailing_indent) {
                    if let Some(text) = node.as_text_mut() {
                        if text.as_str().contains('\n') {
                            text.indent_lines(indent, true);
                        }
                    }
                }
            }
            previous_text = match kind {
                Some(NodeKind::Text(text)) => Some(text.as_str()),
                _ => None,
            };
            result.append(node, self.model);
        }
        Ok(result)
    }

    fn swallow(&self, scope: Scope<'g>, node: NodeId, current: &Node, error: EvaluationError) -> Node {
        tracing::warn!(%error, "statement failed during preview");
        let mut empty = Node::new(Value::Null, owner(current));
        if error.report {
            empty.log.push(EvalIssue {
                severity: Severity::Error,
                message: error.to_string(),
                position: Position::default(),
                source: Some(scope.source(node)),
            });
        }
        empty
    }

    fn evaluate_statement(&mut self, scope: Scope<'g>, id: NodeId, current: &Node) -> EvalResult {
        self.statement(scope, id, current).map_err(|error| {
            let object = current.as_object().map(|object| self.model.describe(object));
            error.located(
                scope.file.tree.position(id),
                Some(&scope.script.name),
                object,
            )
        })
    }

    fn statement(&mut self, scope: Scope<'g>, id: NodeId, current: &Node) -> EvalResult {
        let source = scope.source(id);
        match scope.kind(id) {
            Some(NodeKind::Text(text)) => {
                let container = owner(current);
                let text = Text::highlighted(text.clone(), container, Some(source), Highlight::StaticText);
                Ok(Node::new(Value::Str(text), container).with_origin(Some(source)))
            }
            Some(NodeKind::Comment(_)) => Ok(Node::new(Value::Null, owner(current))),
            Some(NodeKind::Feature { expression }) => {
                let mut node = self.evaluate_expression(scope, *expression, current, current)?;
                if node.is_empty() {
                    node.log.warning(
                        format!(
                            "Empty result for '{}'",
                            scope.file.tree.unparse(*expression)
                        ),
                        Position::default(),
                        Some(source),
                    );
                }
                if let Some(text) = node.as_text_mut() {
                    let len = text.len();
                    text.source_map.add_mapping(source, 0, len);
                }
                Ok(node.with_origin(Some(source)))
            }
            Some(NodeKind::For { iterator, body }) => {
                let items = self
                    .evaluate_expression(scope, *iterator, current, current)?
                    .to_list();
                let mut result = Node::new(Value::Null, owner(current));
                for (index, item) in items.into_iter().enumerate() {
                    self.frames.push(Frame {
                        node: item.clone(),
                        args: Vec::new(),
                        index: Some(index),
                        script: None,
                    });
                    let node = self.evaluate_sequence(scope, *body, &item);
                    self.frames.pop();
                    result.append(node?, self.model);
                }
                Ok(result)
            }
            Some(NodeKind::If {
                condition,
                then,
                else_ifs,
                otherwise,
            }) => {
                if self.condition(scope, *condition, current)? {
                    return self.evaluate_sequence(scope, *then, current);
                }
                for &(condition, branch) in else_ifs {
                    if self.condition(scope, condition, current)? {
                        return self.evaluate_sequence(scope, branch, current);
                    }
                }
                match otherwise {
                    Some(branch) => self.evaluate_sequence(scope, *branch, current),
                    None => Ok(Node::new(Value::Null, owner(current))),
                }
            }
            Some(NodeKind::Template) => self.evaluate_sequence(scope, id, current),
            _ => self.evaluate_expression(scope, id, current, current),
        }
    }

    fn condition(&mut self, scope: Scope<'g>, id: NodeId, current: &Node) -> EvalResult<bool> {
        Ok(self.evaluate_expression(scope, id, current, current)?.to_bool())
    }

    /// Evaluates the expression `id`. Calls apply to `receiver`; arguments
    /// and filters are evaluated against `current`.
    fn evaluate_expression(
        &mut self,
        scope: Scope<'g>,
        id: NodeId,
        receiver: &Node,
        current: &Node,
    ) -> EvalResult {
        match scope.kind(id) {
            Some(NodeKind::Literal(literal)) => Ok(match literal {
                Literal::Int(i) => Node::int(*i, current),
                Literal::Double(d) => Node::double(*d, current),
                Literal::Str(s) => Node::string(s.as_str(), current),
                Literal::Bool(b) => Node::boolean(*b, current),
                Literal::Null => Node::null(current),
            }),
            Some(NodeKind::Not(inner)) => {
                let value = self.evaluate_expression(scope, *inner, receiver, current)?;
                Ok(Node::boolean(!value.to_bool(), current))
            }
            Some(NodeKind::Parenthesis(inner)) => self.evaluate_expression(scope, *inner, receiver, current),
            Some(NodeKind::Operator { operator, operands }) => {
                self.operation(scope, *operator, operands, receiver, current)
            }
            Some(NodeKind::Call { .. }) => self.call(scope, id, receiver, current),
            Some(NodeKind::CallSet { calls }) => {
                let mut value = receiver.clone();
                for &call in calls {
                    value = self.call(scope, call, &value, current)?;
                }
                Ok(value)
            }
            Some(NodeKind::Template) => self.evaluate_sequence(scope, id, current),
            Some(_) => self.statement(scope, id, current),
            None => Ok(Node::null(current)),
        }
    }

    fn operation(
        &mut self,
        scope: Scope<'g>,
        operator: Operator,
        operands: &[NodeId],
        receiver: &Node,
        current: &Node,
    ) -> EvalResult {
        let Some((&first, rest)) = operands.split_first() else {
            return Ok(Node::null(current));
        };
        let mut result = self.evaluate_expression(scope, first, receiver, current)?;
        for &operand in rest {
            result = match operator {
                Operator::Or if result.to_bool() => return Ok(Node::boolean(true, current)),
                Operator::And if !result.to_bool() => return Ok(Node::boolean(false, current)),
                Operator::Or | Operator::And => {
                    let right = self.evaluate_expression(scope, operand, receiver, current)?;
                    Node::boolean(right.to_bool(), current)
                }
                _ => {
                    let right = self.evaluate_expression(scope, operand, receiver, current)?;
                    self.binary(operator, result, right, current)?
                }
            };
        }
        Ok(result)
    }

    fn binary(&self, operator: Operator, left: Node, right: Node, current: &Node) -> EvalResult {
        let model = self.model;
        Ok(match operator {
            Operator::Equal => Node::boolean(left.equals(&right, model), current),
            Operator::NotEqual => Node::boolean(!left.equals(&right, model), current),
            Operator::Greater | Operator::Less | Operator::GreaterOrEqual | Operator::LessOrEqual => {
                let ordering = if left.is_numeric() && right.is_numeric() {
                    left.to_double()?
                        .partial_cmp(&right.to_double()?)
                        .unwrap_or(std::cmp::Ordering::Equal)
                } else {
                    left.plain_string(model).cmp(&right.plain_string(model))
                };
                Node::boolean(
                    match operator {
                        Operator::Greater => ordering.is_gt(),
                        Operator::Less => ordering.is_lt(),
                        Operator::GreaterOrEqual => ordering.is_ge(),
                        _ => ordering.is_le(),
                    },
                    current,
                )
            }
            Operator::Add => match (&left.value, &right.value) {
                (Value::Str(_), _) | (_, Value::Str(_)) | (Value::List(_), Value::List(_)) => {
                    let mut sum = left;
                    sum.append(right, model);
                    sum
                }
                (Value::Int(a), Value::Int(b)) => Node::int(a.wrapping_add(*b), current),
                _ if left.kind() == ValueKind::Double || right.kind() == ValueKind::Double => {
                    Node::double(left.to_double()? + right.to_double()?, current)
                }
                _ => Node::int(left.to_int()?.wrapping_add(right.to_int()?), current),
            },
            Operator::Subtract | Operator::Multiply | Operator::Divide => {
                if left.kind() == ValueKind::Double || right.kind() == ValueKind::Double {
                    let (a, b) = (left.to_double()?, right.to_double()?);
                    Node::double(
                        match operator {
                            Operator::Subtract => a - b,
                            Operator::Multiply => a * b,
                            _ => a / b,
                        },
                        current,
                    )
                } else {
                    let (a, b) = (left.to_int()?, right.to_int()?);
                    Node::int(
                        match operator {
                            Operator::Subtract => a.wrapping_sub(b),
                            Operator::Multiply => a.wrapping_mul(b),
                            _ if b == 0 => return Err(EvaluationErrorKind::DivisionByZero.into()),
                            _ => a.wrapping_div(b),
                        },
                        current,
                    )
                }
            }
            Operator::Or => Node::boolean(left.to_bool() || right.to_bool(), current),
            Operator::And => Node::boolean(left.to_bool() && right.to_bool(), current),
        })
    }

    fn call(&mut self, scope: Scope<'g>, id: NodeId, receiver: &Node, current: &Node) -> EvalResult {
        let Some(NodeKind::Call {
            prefix,
            name,
            filter,
            args,
        }) = scope.kind(id)
        else {
            return self.evaluate_expression(scope, id, receiver, current);
        };

        if prefix.is_none() {
            if let Some(node) = self.system_call(scope, name, args, current)? {
                return Ok(node);
            }
        }

        let mut arguments = Vec::with_capacity(args.len());
        for &arg in args {
            arguments.push(self.evaluate_expression(scope, arg, current, current)?);
        }
        let result = self.dispatch(scope, scope.source(id), *prefix, name, receiver, &arguments)?;
        match filter {
            Some(filter) => self.apply_filter(scope, *filter, result),
            None => Ok(result),
        }
    }

    /// `args(i)`, `current()`, `current(n)`, `current("Type")` and `i()`.
    fn system_call(
        &mut self,
        scope: Scope<'g>,
        name: &str,
        args: &[NodeId],
        current: &Node,
    ) -> EvalResult<Option<Node>> {
        if !matches!(name, "args" | "current" | "i") {
            return Ok(None);
        }
        let argument = match args {
            [] => None,
            [arg] => Some(self.evaluate_expression(scope, *arg, current, current)?),
            _ => return Ok(None),
        };
        let node = match (name, argument) {
            ("args", Some(index)) => {
                let index = index.to_int()?;
                let frame = self.frames.iter().rev().find(|f| f.script.is_some());
                frame
                    .and_then(|f| usize::try_from(index).ok().and_then(|i| f.args.get(i)))
                    .cloned()
                    .unwrap_or_else(|| Node::null(current))
            }
            ("current", None) => self
                .frames
                .last()
                .map_or_else(|| current.clone(), |f| f.node.clone()),
            ("current", Some(selector)) => {
                let found = match selector.value {
                    Value::Int(depth) => usize::try_from(depth)
                        .ok()
                        .and_then(|depth| self.frames.iter().rev().nth(depth)),
                    _ => {
                        let type_name = selector.plain_string(self.model);
                        self.frames.iter().rev().find(|f| {
                            f.node
                                .as_object()
                                .is_some_and(|o| is_kind_of(self.model, o, &type_name))
                        })
                    }
                };
                found.map_or_else(|| Node::null(current), |f| f.node.clone())
            }
            ("i", None) => {
                let index = self.frames.iter().rev().find_map(|f| f.index).unwrap_or(0);
                Node::int(i64::try_from(index).unwrap_or(i64::MAX), current)
            }
            _ => return Ok(None),
        };
        Ok(Some(node))
    }

    fn dispatch(
        &mut self,
        scope: Scope<'g>,
        source: SourceRef,
        prefix: Option<CallPrefix>,
        name: &str,
        receiver: &Node,
        args: &[Node],
    ) -> EvalResult {
        match &receiver.value {
            Value::Null => Ok(Node::null(receiver)),
            Value::List(list) if !self.takes_list(scope, prefix, name, args.len()) => {
                let mut results = NodeList::new();
                for item in list {
                    let result = self.call_single(scope, source, prefix, name, item, args)?;
                    if result.kind() != ValueKind::Null {
                        results.push(result, self.model);
                    }
                }
                Ok(Node::list(results, receiver))
            }
            _ => self.call_single(scope, source, prefix, name, receiver, args),
        }
    }

    fn takes_list(&self, scope: Scope<'g>, prefix: Option<CallPrefix>, name: &str, arity: usize) -> bool {
        matches!(prefix, None | Some(CallPrefix::Service))
            && self
                .generator
                .find_service(scope.file, name, arity)
                .is_some_and(|s| s.signature().receiver == ValueKind::List)
    }

    fn call_single(
        &mut self,
        scope: Scope<'g>,
        source: SourceRef,
        prefix: Option<CallPrefix>,
        name: &str,
        receiver: &Node,
        args: &[Node],
    ) -> EvalResult {
        let unresolved = || {
            EvaluationError::new(EvaluationErrorKind::UnresolvedCall {
                name: name.to_string(),
            })
        };

        if matches!(prefix, None | Some(CallPrefix::Script)) {
            if let Some(object) = receiver.as_object() {
                let root_type = &self.generator.config().root_type;
                let type_name = self.model.type_of(object).unwrap_or(root_type).to_string();
                if let Some(script) = self.generator.resolve_template(self.model, &type_name, name) {
                    return self.call_script(script, source, object, args);
                }
            }
            if prefix.is_some() {
                return Err(unresolved());
            }
        }

        if matches!(prefix, None | Some(CallPrefix::Service)) {
            if let Some(service) = self.generator.find_service(scope.file, name, args.len()) {
                return self.invoke(service, receiver, args);
            }
            if prefix.is_some() {
                return Err(unresolved());
            }
        }

        if let (Some(object), []) = (receiver.as_object(), args) {
            match self.model.feature(object, name) {
                Ok(Some(value)) => {
                    return Ok(Node::from_feature(value, &Node::root(object)).with_origin(Some(source)));
                }
                Ok(None) => {}
                Err(error) => return Err(EvaluationErrorKind::Model(error.to_string()).into()),
            }
        }
        Err(unresolved())
    }

    fn call_script(
        &mut self,
        script: ScriptRef,
        source: SourceRef,
        object: ObjectId,
        args: &[Node],
    ) -> EvalResult {
        let cacheable = args.is_empty() && self.generator.config().cache_results;
        if cacheable {
            if let Some(hit) = self.cache.get(&(source, object)) {
                tracing::trace!(?source, %object, "reusing cached script result");
                return Ok(hit.clone());
            }
        }
        let result = self.evaluate_script(script, &Node::root(object), args.to_vec())?;
        if cacheable {
            self.cache.insert((source, object), result.clone());
        }
        Ok(result)
    }

    fn invoke(&self, service: &dyn Service, receiver: &Node, args: &[Node]) -> EvalResult {
        let signature = service.signature();
        let adapt = |node: &Node, kind: ValueKind| match kind {
            ValueKind::Null => Ok(node.clone()),
            kind => node.adapt(kind, self.model),
        };
        let receiver = adapt(receiver, signature.receiver)?;
        let args = args
            .iter()
            .zip(&signature.params)
            .map(|(arg, &kind)| adapt(arg, kind))
            .collect::<Result<Vec<_>, _>>()?;
        service.invoke(&receiver, &args, self.model)
    }

    fn apply_filter(&mut self, scope: Scope<'g>, filter: NodeId, result: Node) -> EvalResult {
        let mut kept = NodeList::new();
        for item in result.to_list() {
            if self.evaluate_expression(scope, filter, &item, &item)?.to_bool() {
                kept.push(item, self.model);
            }
        }
        Ok(Node::list(kept, &result))
    }
}
