#[cfg(feature = "serde")]
mod serde_tests {
    use modelgen::{
        AutoIndent, EvalMode, GeneratorConfig, MemoryModel, ModelgenError, Position, SyntaxError,
        SyntaxErrorKind, Template, ValueKind,
    };
    use serde_json;

    #[test]
    fn test_value_kind_serialization() {
        let kind = ValueKind::String;
        let serialized = serde_json::to_string(&kind).unwrap();
        assert_eq!(serialized, r#""String""#);

        let deserialized: ValueKind = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, kind);

        let mode: EvalMode = serde_json::from_str(r#""Preview""#).unwrap();
        assert_eq!(mode, EvalMode::Preview);
    }

    #[test]
    fn test_config_serialization() {
        let config = GeneratorConfig::new()
            .with_auto_indent(AutoIndent::Never)
            .with_root_type("Object")
            .with_cache_results(true);

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: GeneratorConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, config);

        // Missing fields take their defaults.
        let partial: GeneratorConfig = serde_json::from_str(r#"{"cache_results":true}"#).unwrap();
        assert_eq!(partial, GeneratorConfig::new().with_cache_results(true));
    }

    #[test]
    fn test_model_serialization() {
        let mut model = MemoryModel::new()
            .with_type("NamedElement", &[])
            .with_type("Class", &["NamedElement"]);
        let package = model.create("NamedElement", None);
        let class = model.create("Class", Some(package));
        model.set(class, "name", "Shape");
        model.set(class, "abstract", true);
        model.set(package, "classes", vec![class]);

        let serialized = serde_json::to_string(&model).unwrap();
        let deserialized: MemoryModel = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, model);
    }

    #[test]
    fn test_error_serialization() {
        let error = ModelgenError::Syntax {
            file: "a.mt".to_string(),
            errors: vec![SyntaxError::new(
                "<%name",
                Position::new(0, 2),
                SyntaxErrorKind::UnmatchedTag {
                    open: "<%".to_string(),
                    close: "%>".to_string(),
                },
            )],
        };

        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: ModelgenError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, error);
        assert_eq!(deserialized.to_string(), error.to_string());
    }

    #[test]
    fn test_template_serialization() {
        let template = Template::new("<%for (children){%><%name%>, <%}%>").unwrap();

        // Only the source is serialized
        let serialized = serde_json::to_string(&template).unwrap();
        assert_eq!(
            serialized,
            r#"{"content":"<%for (children){%><%name%>, <%}%>"}"#
        );

        // The tree is rebuilt on the way back
        let deserialized: Template = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.unparse(), template.unparse());
        assert_eq!(deserialized.call_names(), vec!["children", "name"]);

        let malformed = serde_json::from_str::<Template>(r#"{"content":"<%name"}"#);
        assert!(malformed.is_err());
    }
}
