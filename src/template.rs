use crate::ast::{NodeId, NodeKind, SyntaxTree};
use crate::error::{ModelgenError, ModelgenResult, SyntaxError};
use crate::parser::parse;

/// A Template is a standalone buffer parsed into a syntax tree.
///
/// Unlike a script file it has no header and no declarations, the whole
/// buffer is one template body. It is the unit used to inspect or rewrite
/// template source without a generator.
///
/// # Example
///
/// ```rust
/// use modelgen::Template;
///
/// let template = Template::new("Hello <%name.substring(0, 1)%>!").unwrap();
/// assert_eq!(template.call_names(), vec!["name", "substring"]);
/// assert_eq!(template.unparse(), "Hello <%name.substring(0, 1)%>!");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    content: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    tree: SyntaxTree,
    #[cfg_attr(feature = "serde", serde(skip))]
    root: NodeId,
    #[cfg_attr(feature = "serde", serde(skip))]
    warnings: Vec<SyntaxError>,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            content: String,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;

        // The tree is rebuilt from the source.
        Template::new(helper.content)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {e}")))
    }
}

impl Template {
    /// Parses `content`.
    ///
    /// # Errors
    ///
    /// Returns `ModelgenError::Syntax` with every error found if the content
    /// is malformed. Warnings are kept and available from [`Template::warnings`].
    pub fn new<T: Into<String>>(content: T) -> ModelgenResult<Self> {
        let content = content.into();
        let (tree, root, diagnostics) = parse(&content);
        let (errors, warnings): (Vec<_>, Vec<_>) =
            diagnostics.into_iter().partition(SyntaxError::is_error);
        if !errors.is_empty() {
            return Err(ModelgenError::Syntax {
                file: String::from("<template>"),
                errors,
            });
        }
        Ok(Self {
            content,
            tree,
            root,
            warnings,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub const fn root(&self) -> NodeId {
        self.root
    }

    pub const fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    pub fn warnings(&self) -> &[SyntaxError] {
        &self.warnings
    }

    /// Source text regenerated from the tree.
    pub fn unparse(&self) -> String {
        self.tree.unparse(self.root)
    }

    /// Names of every call in the template, in source order, without repeats.
    pub fn call_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let calls = self
            .tree
            .descendants(self.root, |kind| matches!(kind, NodeKind::Call { .. }));
        let mut calls: Vec<_> = calls
            .into_iter()
            .map(|id| (self.tree.position(id).begin, id))
            .collect();
        calls.sort();
        for (_, id) in calls {
            if let Some(NodeKind::Call { name, .. }) = self.tree.kind(id) {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_new_and_unparse() {
        let source = "<%for (children){%><%name%>, <%}%>";
        let template = Template::new(source).unwrap();
        assert_eq!(template.content(), source);
        assert_eq!(template.unparse(), source);
        assert_eq!(template.tree().children(template.root()).len(), 1);
        assert!(template.warnings().is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_names_are_unique_and_ordered() {
        let template =
            Template::new("<%if (name == label){%><%name%><%label.trim()%><%}%>").unwrap();
        assert_eq!(template.call_names(), vec!["name", "label", "trim"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_syntax_error() {
        let error = Template::new("<%name").unwrap_err();
        assert!(matches!(error, ModelgenError::Syntax { ref errors, .. } if errors.len() == 1));
    }
}
