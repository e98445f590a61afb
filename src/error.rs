use crate::position::Position;
use crate::value::ValueKind;

pub type ModelgenResult<T> = std::result::Result<T, ModelgenError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("Unmatched tag '{open}', expected '{close}'")]
    UnmatchedTag { open: String, close: String },
    #[error("Unexpected tag '{tag}'")]
    UnexpectedTag { tag: String },
    #[error("Duplicate script '{name}' for type '{type_name}'")]
    DuplicateScript { type_name: String, name: String },
    #[error("Unresolved import '{name}'")]
    UnresolvedImport { name: String },
    #[error("Unresolved classifier '{name}'")]
    UnresolvedClassifier { name: String },
    #[error("Invalid character '{at_char}' in identifier '{identifier}'")]
    InvalidIdentifier { identifier: String, at_char: char },
    #[error("Missing script property '{property}'")]
    MissingProperty { property: String },
    #[error("Unknown script property '{property}'")]
    UnknownProperty { property: String },
    #[error("Invalid expression '{text}'")]
    InvalidExpression { text: String },
}

/// A problem found while parsing or linking a template source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Syntax {} at line {line}, column {column}: {kind}", severity_label(.severity))]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub position: Position,
    pub severity: Severity,
    #[source]
    pub kind: SyntaxErrorKind,
}

const fn severity_label(severity: &Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

impl SyntaxError {
    /// Builds an error located at `position` of `buffer`.
    pub fn new(buffer: &str, position: Position, kind: SyntaxErrorKind) -> Self {
        let (line, column) = crate::scanner::line_column(buffer, position.begin);
        Self {
            line,
            column,
            position,
            severity: Severity::Error,
            kind,
        }
    }

    pub fn warning(buffer: &str, position: Position, kind: SyntaxErrorKind) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(buffer, position, kind)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A value that has no representation in the requested kind.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Cannot convert {from:?} '{text}' to {to:?}")]
pub struct CastError {
    pub from: ValueKind,
    pub to: ValueKind,
    pub text: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EvaluationErrorKind {
    #[error("Recursive call of script '{script}' on {object}")]
    RecursiveCall { script: String, object: String },
    #[error("Unresolved call '{name}'")]
    UnresolvedCall { name: String },
    #[error("No script '{name}' for type '{type_name}'")]
    UnresolvedTemplate { type_name: String, name: String },
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Invalid argument for '{name}': {message}")]
    InvalidArgument { name: String, message: String },
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error("Model access failed: {0}")]
    Model(String),
}

/// A failure raised while evaluating a template against a model object.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{kind}{}", describe_origin(.script.as_deref(), .object.as_deref(), .position))]
pub struct EvaluationError {
    #[source]
    pub kind: EvaluationErrorKind,
    pub position: Option<Position>,
    pub script: Option<String>,
    pub object: Option<String>,
    /// Whether the failure should reach the log; preview evaluation turns
    /// unreported failures into empty results.
    pub report: bool,
}

fn describe_origin(
    script: Option<&str>,
    object: Option<&str>,
    position: &Option<Position>,
) -> String {
    let mut origin = String::new();
    if let Some(script) = script {
        origin.push_str(" in script '");
        origin.push_str(script);
        origin.push('\'');
    }
    if let Some(position) = position {
        origin.push_str(" at ");
        origin.push_str(&position.to_string());
    }
    if let Some(object) = object {
        origin.push_str(" on ");
        origin.push_str(object);
    }
    origin
}

impl EvaluationError {
    pub const fn new(kind: EvaluationErrorKind) -> Self {
        Self {
            kind,
            position: None,
            script: None,
            object: None,
            report: true,
        }
    }

    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, EvaluationErrorKind::Cancelled)
    }

    /// Fills in the location fields that are still unknown.
    pub fn located(mut self, position: Position, script: Option<&str>, object: Option<String>) -> Self {
        self.position.get_or_insert(position);
        if self.script.is_none() {
            self.script = script.map(str::to_string);
        }
        if self.object.is_none() {
            self.object = object;
        }
        self
    }
}

impl From<EvaluationErrorKind> for EvaluationError {
    fn from(kind: EvaluationErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<CastError> for EvaluationError {
    fn from(error: CastError) -> Self {
        Self::new(EvaluationErrorKind::Cast(error))
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ModelgenError {
    #[error("Template file already exists: {name}")]
    FileExists { name: String },
    #[error("Template not found: {name}")]
    MissingTemplate { name: String },
    #[error("{} syntax error(s) in '{file}': {}", .errors.len(), join_errors(.errors))]
    Syntax {
        file: String,
        errors: Vec<SyntaxError>,
    },
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

fn join_errors(errors: &[SyntaxError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
