mod ast;
mod config;
mod engine;
mod error;
mod evaluator;
mod interface;
mod mapping;
mod model;
mod parser;
mod position;
mod registry;
mod scanner;
mod script;
mod services;
mod syntax;
mod template;
mod value;

// Crate-level imports to make convienent imports for the rest of the library.
pub(crate) use error::ModelgenResult;

// Public exports.
pub use ast::{CallPrefix, FileId, Literal, NodeId, NodeKind, Operator, SourceRef, SyntaxNode, SyntaxTree};
pub use config::{AutoIndent, DEFAULT_ROOT_TYPE, GeneratorConfig};
pub use engine::Generator;
pub use error::{
    CastError, EvaluationError, EvaluationErrorKind, ModelgenError, Severity, SyntaxError,
    SyntaxErrorKind,
};
pub use evaluator::{Cancellation, EvalMode, Evaluator};
pub use interface::{GeneratedFile, GeneratorInterface};
pub use mapping::{Highlight, TextMapping};
pub use model::{
    FeatureValue, MemoryModel, MemoryObject, ModelAccessor, ModelError, ObjectId, all_contents,
    is_kind_of, type_conforms,
};
pub use parser::{format_template, parse};
pub use position::{InvalidSourceLocation, Position, SourceLocation};
pub use registry::ScriptRef;
pub use script::{ScriptDecl, ScriptFile, SourceKind, file_stem};
pub use services::{BuiltinService, Service, ServiceFn, ServiceSet, Signature, builtins};
pub use syntax::{Dialect, Tags};
pub use template::Template;
pub use value::{EvalIssue, EvalLog, Node, NodeList, Text, Value, ValueKind, format_double};
