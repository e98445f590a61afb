use crate::script::SourceKind;

/// Type every model object conforms to; scripts declared for it apply to
/// any object whose own hierarchy has no better match.
pub const DEFAULT_ROOT_TYPE: &str = "EObject";

/// When multi-line feature results are indented like the text before them.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum AutoIndent {
    /// Only in `.mt` sources.
    #[default]
    BySourceKind,
    Always,
    Never,
}

impl AutoIndent {
    pub const fn applies(self, kind: SourceKind) -> bool {
        match self {
            Self::BySourceKind => matches!(kind, SourceKind::Mt),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratorConfig {
    pub auto_indent: AutoIndent,
    pub root_type: String,
    /// Reuse the result of an argument-less script call on the same object.
    pub cache_results: bool,
    /// Line breaks kept at the end of the body of a file script.
    pub file_trailing_newlines: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            auto_indent: AutoIndent::default(),
            root_type: DEFAULT_ROOT_TYPE.to_string(),
            cache_results: false,
            file_trailing_newlines: 1,
        }
    }
}

impl GeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_auto_indent(mut self, auto_indent: AutoIndent) -> Self {
        self.auto_indent = auto_indent;
        self
    }

    pub fn with_root_type<T: Into<String>>(mut self, root_type: T) -> Self {
        self.root_type = root_type.into();
        self
    }

    pub const fn with_cache_results(mut self, cache_results: bool) -> Self {
        self.cache_results = cache_results;
        self
    }

    pub const fn with_file_trailing_newlines(mut self, count: usize) -> Self {
        self.file_trailing_newlines = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_defaults_and_builders() {
        let config = GeneratorConfig::new();
        assert_eq!(config.root_type, "EObject");
        assert_eq!(config.file_trailing_newlines, 1);
        assert!(!config.cache_results);

        let config = config
            .with_root_type("Element")
            .with_cache_results(true)
            .with_auto_indent(AutoIndent::Never);
        assert_eq!(config.root_type, "Element");
        assert!(config.cache_results);
        assert!(!config.auto_indent.applies(SourceKind::Mt));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_auto_indent_by_source_kind() {
        assert!(AutoIndent::BySourceKind.applies(SourceKind::Mt));
        assert!(!AutoIndent::BySourceKind.applies(SourceKind::Plain));
        assert!(AutoIndent::Always.applies(SourceKind::Plain));
    }
}
