//! Callable services: the built-in string, list and model operations and
//! any host provided ones.

use std::fmt;

use crate::error::{EvaluationError, EvaluationErrorKind};
use crate::model::{ModelAccessor, all_contents, is_kind_of};
use crate::position::Position;
use crate::value::{Node, NodeList, Text, Value, ValueKind};

/// Declared types of a service: the receiver it is called on, its
/// parameters and its result. `ValueKind::Null` accepts any kind.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub receiver: ValueKind,
    pub params: Vec<ValueKind>,
    pub returns: ValueKind,
}

impl Signature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A callable with a fixed arity and declared parameter types.
///
/// The receiver and arguments handed to [`Service::invoke`] have already
/// been converted to the declared kinds.
pub trait Service {
    fn name(&self) -> &str;

    fn signature(&self) -> &Signature;

    fn invoke(
        &self,
        receiver: &Node,
        args: &[Node],
        model: &dyn ModelAccessor,
    ) -> Result<Node, EvaluationError>;
}

pub type ServiceFn = fn(&Node, &[Node], &dyn ModelAccessor) -> Result<Node, EvaluationError>;

/// A service backed by a plain function.
#[derive(Clone)]
pub struct BuiltinService {
    name: String,
    signature: Signature,
    function: ServiceFn,
}

impl BuiltinService {
    pub fn new(
        name: &str,
        receiver: ValueKind,
        params: &[ValueKind],
        returns: ValueKind,
        function: ServiceFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            signature: Signature {
                receiver,
                params: params.to_vec(),
                returns,
            },
            function,
        }
    }
}

impl fmt::Debug for BuiltinService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinService")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Service for BuiltinService {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn invoke(
        &self,
        receiver: &Node,
        args: &[Node],
        model: &dyn ModelAccessor,
    ) -> Result<Node, EvaluationError> {
        (self.function)(receiver, args, model)
    }
}

/// A named group of services, made visible to a script file by
/// `<%import name%>`.
pub struct ServiceSet {
    name: String,
    services: Vec<Box<dyn Service>>,
}

impl fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSet")
            .field("name", &self.name)
            .field(
                "services",
                &self.services.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ServiceSet {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
        }
    }

    pub fn with<S: Service + 'static>(mut self, service: S) -> Self {
        self.add(service);
        self
    }

    pub fn add<S: Service + 'static>(&mut self, service: S) {
        self.services.push(Box::new(service));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The service called `name` taking `arity` arguments.
    pub fn find(&self, name: &str, arity: usize) -> Option<&dyn Service> {
        self.services
            .iter()
            .find(|s| s.name() == name && s.signature().arity() == arity)
            .map(Box::as_ref)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name() == name)
    }
}

fn invalid(name: &str, message: impl Into<String>) -> EvaluationError {
    EvaluationError::new(EvaluationErrorKind::InvalidArgument {
        name: name.to_string(),
        message: message.into(),
    })
}

fn text_of(node: &Node) -> Text {
    node.as_text()
        .cloned()
        .unwrap_or_else(|| Text::new(String::new(), node.container, node.origin))
}

fn string_arg(args: &[Node], index: usize) -> String {
    args.get(index)
        .and_then(Node::as_text)
        .map(|t| t.value.clone())
        .unwrap_or_default()
}

fn int_arg(args: &[Node], index: usize) -> i64 {
    match args.get(index).map(|n| &n.value) {
        Some(Value::Int(i)) => *i,
        _ => 0,
    }
}

fn with_text(receiver: &Node, edit: impl FnOnce(&mut Text)) -> Node {
    let mut text = text_of(receiver);
    edit(&mut text);
    Node {
        value: Value::Str(text),
        ..receiver.clone()
    }
}

fn list_of(receiver: &Node) -> NodeList {
    receiver.as_list().cloned().unwrap_or_default()
}

/// Byte offset of the `index`th character, the end counting as a character
/// boundary.
fn char_offset(value: &str, index: i64) -> Option<usize> {
    let index = usize::try_from(index).ok()?;
    value
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(value.len()))
        .nth(index)
}

fn substring(name: &str, receiver: &Node, begin: i64, end: Option<i64>) -> Result<Node, EvaluationError> {
    let text = text_of(receiver);
    let value = text.as_str();
    let begin_offset = char_offset(value, begin)
        .ok_or_else(|| invalid(name, format!("index {begin} out of range")))?;
    let end_offset = match end {
        Some(end) => char_offset(value, end)
            .ok_or_else(|| invalid(name, format!("index {end} out of range")))?,
        None => value.len(),
    };
    if end_offset < begin_offset {
        return Err(invalid(name, format!("{begin} is after {}", end.unwrap_or_default())));
    }
    Ok(with_text(receiver, |t| t.substring(Position::new(begin_offset, end_offset))))
}

fn string_services() -> Vec<BuiltinService> {
    use ValueKind as Kind;
    vec![
        BuiltinService::new("toUpperCase", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::to_upper_case))
        }),
        BuiltinService::new("toLowerCase", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::to_lower_case))
        }),
        BuiltinService::new("toU1Case", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::capitalize))
        }),
        BuiltinService::new("toL1Case", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::uncapitalize))
        }),
        BuiltinService::new("trim", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::trim))
        }),
        BuiltinService::new("indentSpace", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::indent_space))
        }),
        BuiltinService::new("indentTab", Kind::String, &[], Kind::String, |r, _, _| {
            Ok(with_text(r, Text::indent_tab))
        }),
        BuiltinService::new("substring", Kind::String, &[Kind::Int], Kind::String, |r, args, _| {
            substring("substring", r, int_arg(args, 0), None)
        }),
        BuiltinService::new("substring", Kind::String, &[Kind::Int, Kind::Int], Kind::String, |r, args, _| {
            substring("substring", r, int_arg(args, 0), Some(int_arg(args, 1)))
        }),
        BuiltinService::new("length", Kind::String, &[], Kind::Int, |r, _, _| {
            let count = text_of(r).as_str().chars().count();
            Ok(Node::int(i64::try_from(count).unwrap_or(i64::MAX), r))
        }),
        BuiltinService::new("startsWith", Kind::String, &[Kind::String], Kind::Bool, |r, args, _| {
            let found = text_of(r).as_str().starts_with(&string_arg(args, 0));
            Ok(Node::boolean(found, r))
        }),
        BuiltinService::new("endsWith", Kind::String, &[Kind::String], Kind::Bool, |r, args, _| {
            let found = text_of(r).as_str().ends_with(&string_arg(args, 0));
            Ok(Node::boolean(found, r))
        }),
        BuiltinService::new("indexOf", Kind::String, &[Kind::String], Kind::Int, |r, args, _| {
            let text = text_of(r);
            let index = text
                .as_str()
                .find(&string_arg(args, 0))
                .map_or(-1, |offset| {
                    let chars = text.as_str().get(..offset).map_or(0, |s| s.chars().count());
                    i64::try_from(chars).unwrap_or(i64::MAX)
                });
            Ok(Node::int(index, r))
        }),
        BuiltinService::new("split", Kind::String, &[Kind::String], Kind::List, |r, args, model| {
            let separator = string_arg(args, 0);
            if separator.is_empty() {
                return Err(invalid("split", "empty separator"));
            }
            let text = text_of(r);
            let mut parts = NodeList::new();
            let mut begin = 0;
            let value = text.as_str();
            let mut bounds: Vec<Position> = value
                .match_indices(separator.as_str())
                .map(|(offset, _)| {
                    let part = Position::new(begin, offset);
                    begin = offset + separator.len();
                    part
                })
                .collect();
            bounds.push(Position::new(begin, value.len()));
            for part in bounds {
                parts.push(with_text(r, |t| t.substring(part)), model);
            }
            Ok(Node::list(parts, r))
        }),
    ]
}

fn list_services() -> Vec<BuiltinService> {
    use ValueKind as Kind;
    vec![
        BuiltinService::new("nSize", Kind::List, &[], Kind::Int, |r, _, _| {
            Ok(Node::int(i64::try_from(list_of(r).len()).unwrap_or(i64::MAX), r))
        }),
        BuiltinService::new("nFirst", Kind::List, &[], Kind::Null, |r, _, _| {
            Ok(list_of(r).first().cloned().unwrap_or_else(|| Node::null(r)))
        }),
        BuiltinService::new("nLast", Kind::List, &[], Kind::Null, |r, _, _| {
            Ok(list_of(r).last().cloned().unwrap_or_else(|| Node::null(r)))
        }),
        BuiltinService::new("nGet", Kind::List, &[Kind::Int], Kind::Null, |r, args, _| {
            let item = usize::try_from(int_arg(args, 0))
                .ok()
                .and_then(|i| list_of(r).get(i).cloned());
            Ok(item.unwrap_or_else(|| Node::null(r)))
        }),
        BuiltinService::new("nReverse", Kind::List, &[], Kind::List, |r, _, model| {
            let mut reversed = NodeList::new();
            for item in list_of(r).into_items().into_iter().rev() {
                reversed.push(item, model);
            }
            Ok(Node::list(reversed, r))
        }),
        BuiltinService::new("nMinimize", Kind::List, &[], Kind::List, |r, _, model| {
            let mut unique = NodeList::unique();
            for item in list_of(r) {
                unique.push(item, model);
            }
            Ok(Node::list(unique, r))
        }),
        BuiltinService::new("nContains", Kind::List, &[Kind::Null], Kind::Bool, |r, args, model| {
            let found = args
                .first()
                .is_some_and(|needle| list_of(r).iter().any(|item| item.equals(needle, model)));
            Ok(Node::boolean(found, r))
        }),
        BuiltinService::new("sep", Kind::List, &[Kind::String], Kind::List, |r, args, model| {
            let separator = args.first().cloned().unwrap_or_else(|| Node::string("", r));
            let mut joined = NodeList::new();
            for (i, item) in list_of(r).into_iter().enumerate() {
                if i > 0 {
                    joined.push(separator.clone(), model);
                }
                joined.push(item, model);
            }
            Ok(Node::list(joined, r))
        }),
    ]
}

fn model_services() -> Vec<BuiltinService> {
    use ValueKind as Kind;
    vec![
        BuiltinService::new("eContainer", Kind::Object, &[], Kind::Object, |r, _, model| {
            Ok(r.as_object()
                .and_then(|o| model.parent(o))
                .map_or_else(|| Node::null(r), |p| Node::object(p, r)))
        }),
        BuiltinService::new("eContents", Kind::Object, &[], Kind::List, |r, _, model| {
            let mut list = NodeList::new();
            for child in r.as_object().map(|o| model.children(o)).unwrap_or_default() {
                list.push(Node::object(child, r), model);
            }
            Ok(Node::list(list, r))
        }),
        BuiltinService::new("eAllContents", Kind::Object, &[], Kind::List, |r, _, model| {
            let mut list = NodeList::new();
            for child in r.as_object().map(|o| all_contents(model, o)).unwrap_or_default() {
                list.push(Node::object(child, r), model);
            }
            Ok(Node::list(list, r))
        }),
        BuiltinService::new("eAllContents", Kind::Object, &[Kind::String], Kind::List, |r, args, model| {
            let type_name = string_arg(args, 0);
            let mut list = NodeList::new();
            for child in r.as_object().map(|o| all_contents(model, o)).unwrap_or_default() {
                if is_kind_of(model, child, &type_name) {
                    list.push(Node::object(child, r), model);
                }
            }
            Ok(Node::list(list, r))
        }),
        BuiltinService::new("eClass", Kind::Object, &[], Kind::String, |r, _, model| {
            let type_name = r.as_object().and_then(|o| model.type_of(o)).unwrap_or_default();
            Ok(Node::string(type_name, r))
        }),
        BuiltinService::new("filter", Kind::Object, &[Kind::String], Kind::Object, |r, args, model| {
            let keep = r
                .as_object()
                .is_some_and(|o| is_kind_of(model, o, &string_arg(args, 0)));
            Ok(if keep { r.clone() } else { Node::null(r) })
        }),
    ]
}

/// The services available to every script file.
pub fn builtins() -> ServiceSet {
    let mut set = ServiceSet::new("builtin");
    for service in string_services()
        .into_iter()
        .chain(list_services())
        .chain(model_services())
    {
        set.add(service);
    }
    set
}
