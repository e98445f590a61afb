//! Script files: a header of imports followed by script declarations, each
//! introducing a template body for one model type.

use crate::ast::{NodeId, SyntaxTree};
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::parser::{Parser, format_template};
use crate::position::Position;
use crate::scanner;
use crate::syntax::Dialect;

/// Kind of a template source, from its file name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SourceKind {
    /// `.mt` sources, whose features are indented like the text before them.
    Mt,
    #[default]
    Plain,
}

impl SourceKind {
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".mt") {
            Self::Mt
        } else {
            Self::Plain
        }
    }
}

/// Name of a file without its extension.
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => base.get(..dot).unwrap_or(base),
        _ => base,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDecl {
    pub type_name: String,
    pub name: String,
    pub description: Option<String>,
    /// Template computing the path of the generated file.
    pub file: Option<NodeId>,
    /// Call applied to the result of the body.
    pub post: Option<NodeId>,
    pub body: NodeId,
    /// Span of the declaration tag.
    pub position: Position,
}

impl ScriptDecl {
    pub const fn is_file_script(&self) -> bool {
        self.file.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFile {
    pub name: String,
    pub kind: SourceKind,
    pub source: String,
    pub tree: SyntaxTree,
    pub imports: Vec<(String, Position)>,
    pub metamodels: Vec<(String, Position)>,
    pub scripts: Vec<ScriptDecl>,
    /// Errors and warnings found while parsing.
    pub diagnostics: Vec<SyntaxError>,
}

impl ScriptFile {
    /// Parses a script file. A source without any declaration becomes one
    /// script of `root_type` named after the file.
    pub fn parse(name: &str, source: &str, root_type: &str, file_trailing_newlines: usize) -> Self {
        let dialect = Dialect::detect(source);
        let mut reader = ScriptReader {
            parser: Parser::new(source, dialect),
            source,
            dialect,
            imports: Vec::new(),
            metamodels: Vec::new(),
            scripts: Vec::new(),
        };

        let declarations = reader.find_declarations();
        if declarations.is_empty() {
            let body = reader.parser.parse_template(Position::new(0, source.len()));
            reader.scripts.push(bare_script(name, root_type, body, source.len()));
        } else {
            let header_end = declarations.first().map_or(0, |d| d.begin);
            reader.read_header(Position::new(0, header_end));
            for (i, declaration) in declarations.iter().enumerate() {
                let body_end = declarations.get(i + 1).map_or(source.len(), |next| next.begin);
                reader.read_declaration(*declaration, body_end, file_trailing_newlines);
            }
        }

        let ScriptReader {
            parser,
            imports,
            metamodels,
            scripts,
            ..
        } = reader;
        let (tree, diagnostics) = parser.finish();
        tracing::debug!(
            file = name,
            scripts = scripts.len(),
            diagnostics = diagnostics.len(),
            "parsed script file"
        );
        Self {
            name: name.to_string(),
            kind: SourceKind::from_name(name),
            source: source.to_string(),
            tree,
            imports,
            metamodels,
            scripts,
            diagnostics,
        }
    }

    /// Parses a bare template: the whole source is the body of a single
    /// script, even if it contains declarations.
    pub fn bare(name: &str, source: &str, root_type: &str) -> Self {
        let mut parser = Parser::new(source, Dialect::detect(source));
        let body = parser.parse_template(Position::new(0, source.len()));
        let (tree, diagnostics) = parser.finish();
        Self {
            name: name.to_string(),
            kind: SourceKind::from_name(name),
            source: source.to_string(),
            tree,
            imports: Vec::new(),
            metamodels: Vec::new(),
            scripts: vec![bare_script(name, root_type, body, source.len())],
            diagnostics,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(SyntaxError::is_error)
    }

    pub fn errors(&self) -> Vec<SyntaxError> {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .cloned()
            .collect()
    }

    pub fn dialect(&self) -> Dialect {
        self.tree.dialect()
    }

    pub fn script(&self, index: usize) -> Option<&ScriptDecl> {
        self.scripts.get(index)
    }
}

fn bare_script(name: &str, root_type: &str, body: NodeId, len: usize) -> ScriptDecl {
    ScriptDecl {
        type_name: root_type.to_string(),
        name: file_stem(name).to_string(),
        description: None,
        file: None,
        post: None,
        body,
        position: Position::new(0, len),
    }
}

struct ScriptReader<'a> {
    parser: Parser<'a>,
    source: &'a str,
    dialect: Dialect,
    imports: Vec<(String, Position)>,
    metamodels: Vec<(String, Position)>,
    scripts: Vec<ScriptDecl>,
}

/// One `name="value"` pair of a declaration; `value` excludes the quotes.
struct Property<'a> {
    key: &'a str,
    value: Position,
}

impl<'a> ScriptReader<'a> {
    fn slice(&self, position: Position) -> &'a str {
        self.source.get(position.begin..position.end).unwrap_or("")
    }

    fn error(&mut self, position: Position, kind: SyntaxErrorKind) {
        let error = SyntaxError::new(self.source, position, kind);
        self.parser.report(error);
    }

    fn warning(&mut self, position: Position, kind: SyntaxErrorKind) {
        let warning = SyntaxError::warning(self.source, position, kind);
        self.parser.report(warning);
    }

    fn all(&self) -> Position {
        Position::new(0, self.source.len())
    }

    /// Spans of every `<%script …%>` tag outside of comments.
    fn find_declarations(&mut self) -> Vec<Position> {
        let tags = self.parser.tags();
        let comments = [tags.statement_inhibitors[0]];
        let mut found = Vec::new();
        let mut cursor = 0;
        while let Some(open) = scanner::find(
            self.source,
            tags.script_begin,
            Position::new(cursor, self.source.len()),
            &comments,
        ) {
            cursor = open.end;
            let separated = self
                .source
                .get(open.end..)
                .and_then(|rest| rest.chars().next())
                .is_some_and(char::is_whitespace);
            if !separated {
                continue;
            }
            let Some(close) = scanner::find(
                self.source,
                tags.end,
                Position::new(open.end, self.source.len()),
                &tags.literal_inhibitors,
            ) else {
                self.error(
                    open,
                    SyntaxErrorKind::UnmatchedTag {
                        open: tags.script_begin.to_string(),
                        close: tags.end.to_string(),
                    },
                );
                break;
            };
            found.push(Position::new(open.begin, close.end));
            cursor = close.end;
        }
        found
    }

    fn read_header(&mut self, limits: Position) {
        let tags = self.parser.tags();
        let mut cursor = limits.begin;
        while let Some(open) = scanner::find(
            self.source,
            tags.begin,
            Position::new(cursor, limits.end),
            &[],
        ) {
            let (close_token, inhibitors): (&str, &[_]) =
                if self.slice(Position::new(open.begin, limits.end)).starts_with(tags.comment_begin) {
                    (tags.comment_end, &[])
                } else {
                    (tags.end, &tags.literal_inhibitors)
                };
            let Some(close) = scanner::find(
                self.source,
                close_token,
                Position::new(open.end, limits.end),
                inhibitors,
            ) else {
                self.error(
                    open,
                    SyntaxErrorKind::UnmatchedTag {
                        open: tags.begin.to_string(),
                        close: close_token.to_string(),
                    },
                );
                return;
            };
            let tag = Position::new(open.begin, close.end);
            let text = self.slice(tag);
            if let Some(rest) = text.strip_prefix(tags.import_begin) {
                let value = rest.strip_suffix(tags.end).unwrap_or(rest).trim();
                self.imports.push((value.to_string(), tag));
            } else if let Some(rest) = text.strip_prefix(tags.metamodel_begin) {
                let value = rest.strip_suffix(tags.end).unwrap_or(rest).trim();
                self.metamodels.push((value.to_string(), tag));
            } else if !text.starts_with(tags.comment_begin) {
                self.error(tag, SyntaxErrorKind::UnexpectedTag { tag: text.to_string() });
            }
            cursor = close.end;
        }
    }

    fn read_properties(&mut self, limits: Position) -> Vec<Property<'a>> {
        let mut properties = Vec::new();
        let mut cursor = limits.begin;
        loop {
            let rest = scanner::trim(self.source, Position::new(cursor, limits.end));
            if rest.is_empty() {
                break;
            }
            let Some(equals) = scanner::find(self.source, "=", rest, &[]) else {
                self.error(
                    rest,
                    SyntaxErrorKind::InvalidExpression {
                        text: self.slice(rest).to_string(),
                    },
                );
                break;
            };
            let key = self.slice(Position::new(rest.begin, equals.begin)).trim();
            let value_start = scanner::trim(self.source, Position::new(equals.end, limits.end)).begin;
            let quoted = self.slice(Position::new(value_start, limits.end)).starts_with('"');
            let value_end = quoted
                .then(|| {
                    scanner::find(
                        self.source,
                        "\"",
                        Position::new(value_start + 1, limits.end),
                        &[],
                    )
                })
                .flatten();
            let Some(value_end) = value_end else {
                self.error(
                    Position::new(rest.begin, limits.end),
                    SyntaxErrorKind::InvalidExpression {
                        text: self.slice(Position::new(rest.begin, limits.end)).to_string(),
                    },
                );
                break;
            };
            properties.push(Property {
                key,
                value: Position::new(value_start + 1, value_end.begin),
            });
            cursor = value_end.end;
        }
        properties
    }

    fn read_declaration(&mut self, declaration: Position, body_end: usize, file_trailing_newlines: usize) {
        let tags = self.parser.tags();
        let inner = Position::new(
            declaration.begin + tags.script_begin.len(),
            declaration.end - tags.end.len(),
        );

        let mut type_name = None;
        let mut name = None;
        let mut description = None;
        let mut file_span = None;
        let mut post_span = None;
        for property in self.read_properties(inner) {
            let value = self.slice(property.value).to_string();
            match property.key {
                "type" => type_name = Some(value),
                "name" => name = Some(value),
                "description" => description = Some(value),
                "file" => file_span = Some(property.value),
                "post" => post_span = Some(property.value),
                other => self.warning(
                    property.value,
                    SyntaxErrorKind::UnknownProperty {
                        property: other.to_string(),
                    },
                ),
            }
        }

        let (Some(type_name), Some(name)) = (type_name.clone(), name.clone()) else {
            let property = if type_name.is_none() { "type" } else { "name" };
            self.error(
                declaration,
                SyntaxErrorKind::MissingProperty {
                    property: property.to_string(),
                },
            );
            return;
        };

        if self
            .scripts
            .iter()
            .any(|s| s.type_name == type_name && s.name == name)
        {
            self.error(
                declaration,
                SyntaxErrorKind::DuplicateScript {
                    type_name: type_name.clone(),
                    name: name.clone(),
                },
            );
        }

        let file = file_span.map(|span| self.parser.parse_template(span));
        let post = post_span.map(|span| self.parser.expression_or_placeholder(span));
        let keep = if file.is_some() { file_trailing_newlines } else { 0 };
        let body_limits = format_template(
            self.source,
            Position::new(declaration.end, body_end),
            keep,
            self.dialect,
        );
        let body = self.parser.parse_template(body_limits);

        self.scripts.push(ScriptDecl {
            type_name,
            name,
            description,
            file,
            post,
            body,
            position: declaration,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    const SOURCE: &str = r#"<%-- Java generation --%>
<%metamodel http://example.org/uml%>
<%import common%>

<%script type="Class" name="fullName" description="qualified"%>
<%name%>

<%-- Generates one file per class --%>
<%script type="Class" name="javaFile" file="<%name%>.java" post="trim()"%>
public class <%fullName%> {
}

"#;

    fn body_text(file: &ScriptFile, script: &ScriptDecl) -> String {
        file.tree.unparse(script.body)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_header_and_declarations() {
        let file = ScriptFile::parse("java.mt", SOURCE, "EObject", 1);
        assert!(file.diagnostics.is_empty(), "{:?}", file.diagnostics);
        assert_eq!(file.kind, SourceKind::Mt);
        assert_eq!(file.imports[0].0, "common");
        assert_eq!(file.metamodels[0].0, "http://example.org/uml");
        assert_eq!(file.scripts.len(), 2);

        let full = &file.scripts[0];
        assert_eq!((full.type_name.as_str(), full.name.as_str()), ("Class", "fullName"));
        assert_eq!(full.description.as_deref(), Some("qualified"));
        assert_eq!(body_text(&file, full), "<%name%>");

        let java = &file.scripts[1];
        assert!(java.is_file_script());
        assert_eq!(body_text(&file, java), "public class <%fullName%> {\n}\n");
        assert_eq!(file.tree.unparse(java.file.unwrap()), "<%name%>.java");
        assert!(matches!(
            file.tree.kind(java.post.unwrap()),
            Some(NodeKind::Call { name, .. }) if name == "trim"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bare_template() {
        let file = ScriptFile::parse("templates/hello.txt", "Hello <%name%>!", "EObject", 1);
        assert_eq!(file.kind, SourceKind::Plain);
        assert_eq!(file.scripts.len(), 1);
        assert_eq!(file.scripts[0].name, "hello");
        assert_eq!(file.scripts[0].type_name, "EObject");
        assert_eq!(body_text(&file, &file.scripts[0]), "Hello <%name%>!");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_duplicate_and_missing_properties() {
        let source = "<%script type=\"A\" name=\"x\"%>1\n<%script type=\"A\" name=\"x\"%>2\n<%script name=\"y\"%>3";
        let file = ScriptFile::parse("dup.mt", source, "EObject", 0);
        let kinds: Vec<_> = file.diagnostics.iter().map(|d| d.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                SyntaxErrorKind::DuplicateScript {
                    type_name: "A".to_string(),
                    name: "x".to_string()
                },
                SyntaxErrorKind::MissingProperty {
                    property: "type".to_string()
                },
            ]
        );
        assert!(file.has_errors());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_property_is_a_warning() {
        let source = "<%script type=\"A\" name=\"x\" visibility=\"public\"%>body";
        let file = ScriptFile::parse("a.mt", source, "EObject", 0);
        assert_eq!(file.diagnostics.len(), 1);
        assert!(!file.has_errors());
        assert_eq!(
            file.diagnostics[0].kind,
            SyntaxErrorKind::UnknownProperty {
                property: "visibility".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bracket_script_file() {
        let source = "[%script type=\"A\" name=\"x\"%]\n[%if (ok){%]yes[%}%]\n";
        let file = ScriptFile::parse("a.mt", source, "EObject", 0);
        assert!(file.diagnostics.is_empty());
        assert_eq!(file.dialect(), Dialect::Bracket);
        assert_eq!(body_text(&file, &file.scripts[0]), "[%if (ok){%]yes[%}%]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_file_stem() {
        assert_eq!(file_stem("a/b/hello.mt"), "hello");
        assert_eq!(file_stem("hello"), "hello");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
