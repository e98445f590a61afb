
use fixtures::{
    class_model, generate_random_whitespace, get_generator, person, tree_model,
};
use modelgen::{
    AutoIndent, Cancellation, EvalMode, EvaluationErrorKind, Generator, GeneratorConfig,
    GeneratorInterface, ModelgenError, NodeKind, ObjectId, Position, Severity, SourceRef,
    SyntaxErrorKind, ValueKind, all_contents, parse,
};

#[test]
#[ntest::timeout(100)]
fn test_hello_world_mappings() {
    let (model, world) = person("World");
    let mut generator = get_generator();
    let file = generator.add_template("hello", "Hello <%name%>!").unwrap();

    let mut node = generator.render("hello", world, &model).unwrap();
    let text = node.as_text_mut().unwrap();
    assert_eq!(text.as_str(), "Hello World!");

    // The whole output belongs to the object.
    assert_eq!(
        text.model_map.target_to_positions(world),
        vec![Position::new(0, 12)]
    );
    assert!((0..12).all(|i| text.model_map.position_to_target(i) == Some(world)));

    // The substituted name traces back to the feature.
    let tree = &generator.file(file).unwrap().tree;
    let root = generator.file(file).unwrap().scripts[0].body;
    let features = tree.descendants(root, |kind| matches!(kind, NodeKind::Feature { .. }));
    assert_eq!(features.len(), 1);
    let feature = SourceRef {
        file,
        node: features[0],
    };
    assert_eq!(
        text.source_map.target_to_positions(feature),
        vec![Position::new(6, 11)]
    );
    assert_eq!(text.source_map.position_to_target(8), Some(feature));
}

#[test]
#[ntest::timeout(100)]
fn test_committed_mapping_ignores_mutations() {
    let (model, world) = person("World");
    let other = ObjectId(99);
    let mut generator = get_generator();
    generator.add_template("hello", "Hello <%name%>!").unwrap();

    let mut node = generator.render("hello", world, &model).unwrap();
    let text = node.as_text_mut().unwrap();
    assert_eq!(text.model_map.position_to_target(0), Some(world));
    assert!(text.model_map.is_committed());

    text.model_map.add_mapping(other, 0, 3);
    text.model_map.shift(4, None);
    assert_eq!(text.model_map.position_to_target(1), Some(world));
    assert_eq!(text.model_map.len(), 12);
}

#[test]
#[ntest::timeout(100)]
fn test_untabification() {
    let (model, world) = person("World");
    let template = format!(
        "A\n{}<%if (true){{%>\nB\n{}<%}}%>\nC",
        generate_random_whitespace(),
        generate_random_whitespace(),
    );
    let mut generator = get_generator();
    generator.add_template("t", template).unwrap();
    let node = generator.render("t", world, &model).unwrap();
    assert_eq!(node.to_string(), "A\nB\nC");
}

#[test]
#[ntest::timeout(100)]
fn test_close_tag_after_text_keeps_line_break() {
    let (model, world) = person("World");
    let mut generator = get_generator();
    generator
        .add_template("t", "A\n<%if (true){%>\nB<%}%>\nC")
        .unwrap();
    let node = generator.render("t", world, &model).unwrap();
    assert_eq!(node.to_string(), "A\nB\nC");
}

#[test]
#[ntest::timeout(100)]
fn test_trailing_whitespace_after_objects_is_dropped() {
    let (model, package) = class_model(&[("A", &["x"]), ("B", &[])]);
    let contents = all_contents(&model, package);
    let mut generator = get_generator();
    generator.add_template("object", "<%current()%>\n  ").unwrap();
    generator.add_template("list", "<%classes%>\n  ").unwrap();
    generator.add_template("text", "<%name%>\n  ").unwrap();

    let object = generator.render("object", package, &model).unwrap();
    assert_eq!(object.kind(), ValueKind::Object);
    assert_eq!(object.as_object(), Some(package));

    let list = generator.render("list", package, &model).unwrap();
    assert_eq!(list.kind(), ValueKind::List);
    let classes: Vec<_> = list
        .as_list()
        .unwrap()
        .iter()
        .filter_map(|item| item.as_object())
        .collect();
    assert_eq!(classes, vec![contents[0], contents[2]]);

    let text = generator.render("text", package, &model).unwrap();
    assert_eq!(text.kind(), ValueKind::String);
    assert_eq!(text.to_string(), "model\n  ");
}

#[test]
#[ntest::timeout(100)]
fn test_recursion_guard() {
    let (model, root) = tree_model(2, 2);
    let mut generator = get_generator();
    let source = concat!(
        "<%script type=\"Node\" name=\"tree\"%>\n",
        "<%name%>(<%for (children){%><%tree%><%}%>)\n",
        "<%script type=\"Node\" name=\"loop\"%>\n",
        "<%name%><%loop%>\n",
    );
    generator.add_file("tree.mt", source).unwrap();

    let node = generator.render("tree", root, &model).unwrap();
    assert_eq!(node.to_string(), "root(n0_0(n1_0()n1_1())n0_1(n1_0()n1_1()))");

    let error = generator.render("loop", root, &model).unwrap_err();
    let ModelgenError::Evaluation(error) = error else {
        panic!("expected an evaluation error");
    };
    assert_eq!(
        error.kind,
        EvaluationErrorKind::RecursiveCall {
            script: "loop".to_string(),
            object: "Node name=root children=[#1, #2]".to_string(),
        }
    );
    assert_eq!(error.script.as_deref(), Some("loop"));
    assert!(error.position.is_some());
}

#[test]
#[ntest::timeout(100)]
fn test_list_flattening() {
    let (model, package) = class_model(&[("A", &["x", "y"]), ("B", &["z"])]);
    let mut generator = get_generator();
    generator
        .add_template("size", "<%classes.attributes.nSize()%>")
        .unwrap();
    generator
        .add_template("names", "<%classes.attributes.name%>")
        .unwrap();
    generator
        .add_template("joined", "<%classes.name.sep(\", \")%>")
        .unwrap();

    let render = |name: &str| generator.render(name, package, &model).unwrap().to_string();
    assert_eq!(render("size"), "3");
    assert_eq!(
        generator
            .render("names", package, &model)
            .unwrap()
            .plain_string(&model),
        "xyz"
    );
    assert_eq!(
        generator
            .render("joined", package, &model)
            .unwrap()
            .plain_string(&model),
        "A, B"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_coercions() {
    let (model, world) = person("World");
    let cases = [
        ("<%\"5\" + 1%>", "51"),
        ("<%1 + 2.5%>", "3.5"),
        ("<%\"3\" * 2%>", "6"),
        ("<%10 / 4.0%>", "2.5"),
        ("<%if (\"true\"){%>yes<%}%>", "yes"),
        ("<%if (0){%>no<%}else{%>zero<%}%>", "zero"),
        ("<%name == \"World\"%>", "true"),
        ("<%null == \"\"%>", "true"),
    ];
    for (i, (source, expected)) in cases.iter().enumerate() {
        let mut generator = get_generator();
        let name = format!("case{i}");
        generator.add_template(&name, source).unwrap();
        let node = generator.render(&name, world, &model).unwrap();
        assert_eq!(node.plain_string(&model), *expected, "{source}");
    }
}

#[test]
#[ntest::timeout(100)]
fn test_empty_feature_is_logged() {
    let (model, nobody) = person("");
    let mut generator = get_generator();
    generator.add_template("t", "(<%name%>)").unwrap();
    let node = generator.render("t", nobody, &model).unwrap();
    assert_eq!(node.to_string(), "()");
    let issues = node.log.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Warning);
}

#[test]
#[ntest::timeout(100)]
fn test_preview_mode_swallows_errors() {
    let (model, world) = person("World");
    let mut generator = get_generator();
    generator.add_template("t", "a<%missing%>b").unwrap();

    assert!(generator.render("t", world, &model).is_err());

    let node = generator
        .evaluator(&model)
        .mode(EvalMode::Preview)
        .render("t", world)
        .unwrap();
    assert_eq!(node.to_string(), "ab");
    let issues = node.log.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
}

#[test]
#[ntest::timeout(100)]
fn test_cancellation_is_not_swallowed() {
    let (model, root) = tree_model(1, 2);
    let mut generator = get_generator();
    generator
        .add_file(
            "tree.mt",
            "<%script type=\"Node\" name=\"tree\"%>\n<%name%><%for (children){%><%tree%><%}%>",
        )
        .unwrap();
    let cancellation = Cancellation::new();
    let flag = cancellation.clone();
    flag.cancel();
    let error = generator
        .evaluator(&model)
        .mode(EvalMode::Preview)
        .cancellation(cancellation)
        .render("tree", root)
        .unwrap_err();
    assert_eq!(error.kind, EvaluationErrorKind::Cancelled);
}

#[test]
#[ntest::timeout(100)]
fn test_type_dispatch() {
    let (model, package) = class_model(&[("A", &["x"])]);
    let contents = all_contents(&model, package);
    let (class, attribute) = (contents[0], contents[1]);
    let mut generator = get_generator();
    let source = concat!(
        "<%script type=\"NamedElement\" name=\"label\"%>\n",
        "named <%name%>\n",
        "<%script type=\"Class\" name=\"label\"%>\n",
        "class <%name%>\n",
        "<%script type=\"EObject\" name=\"debug\"%>\n",
        "debug <%name%>\n",
    );
    generator.add_file("labels.mt", source).unwrap();

    let render = |name: &str, object| generator.render(name, object, &model).unwrap().to_string();
    assert_eq!(render("label", class), "class A");
    assert_eq!(render("label", attribute), "named x");
    assert_eq!(render("label", package), "named model");
    assert_eq!(render("debug", attribute), "debug x");
}

#[test]
#[ntest::timeout(100)]
fn test_post_expression_and_arguments() {
    let (model, world) = person("World");
    let mut generator = get_generator();
    let source = concat!(
        "<%script type=\"Person\" name=\"shout\" post=\"toUpperCase()\"%>\n",
        "hello <%name%>\n",
        "<%script type=\"Person\" name=\"greet\"%>\n",
        "<%args(0)%>, <%args(1)%>\n",
        "<%script type=\"Person\" name=\"main\"%>\n",
        "<%greet(\"Hi\", name)%>\n",
    );
    generator.add_file("people.mt", source).unwrap();
    assert_eq!(
        generator.render("shout", world, &model).unwrap().to_string(),
        "HELLO WORLD"
    );
    assert_eq!(
        generator.render("main", world, &model).unwrap().to_string(),
        "Hi, World"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_context_calls() {
    let (model, package) = class_model(&[("A", &["x", "y"])]);
    let class = all_contents(&model, package)[0];
    let mut generator = get_generator();
    let source = concat!(
        "<%script type=\"Class\" name=\"attrs\"%>\n",
        "<%for (attributes){%><%i()%>:<%name%>@<%current(\"Class\").name%> <%}%>\n",
    );
    generator.add_file("attrs.mt", source).unwrap();
    assert_eq!(
        generator.render("attrs", class, &model).unwrap().to_string(),
        "0:x@A 1:y@A "
    );
}

#[test]
#[ntest::timeout(100)]
fn test_generate_files() {
    let (model, package) = class_model(&[("A", &["x", "y"]), ("B", &[])]);
    let contents = all_contents(&model, package);
    let mut generator = get_generator();
    let source = concat!(
        "<%script type=\"Class\" name=\"java\" file=\"<%name%>.java\"%>\n",
        "class <%name%> {\n",
        "<%for (attributes){%>\n",
        "  int <%name%>;\n",
        "<%}%>\n",
        "}\n",
    );
    generator.add_file("java.mt", source).unwrap();

    let mut files = generator.generate(package, &model).unwrap();
    let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["A.java", "B.java"]);
    assert_eq!(files[0].content.as_str(), "class A {\n  int x;\n  int y;\n}\n");
    assert_eq!(files[1].content.as_str(), "class B {\n}\n");

    // Characters trace back to the object that produced them.
    let content = &mut files[0].content;
    assert_eq!(content.model_map.position_to_target(6), Some(contents[0]));
    assert_eq!(content.model_map.position_to_target(16), Some(contents[1]));
}

#[test]
#[ntest::timeout(100)]
fn test_auto_indent() {
    let (model, package) = class_model(&[("A", &[])]);
    let class = all_contents(&model, package)[0];
    let source = concat!(
        "<%script type=\"Class\" name=\"body\"%>\n",
        "line1\n",
        "line2\n",
        "<%script type=\"Class\" name=\"outer\"%>\n",
        "{\n",
        "    <%body%>\n",
        "}",
    );

    let mut generator = get_generator();
    generator.add_file("gen.mt", source).unwrap();
    assert_eq!(
        generator.render("outer", class, &model).unwrap().to_string(),
        "{\n    line1\n    line2\n}"
    );

    let mut generator =
        Generator::with_config(GeneratorConfig::default().with_auto_indent(AutoIndent::Never));
    generator.add_file("gen.mt", source).unwrap();
    assert_eq!(
        generator.render("outer", class, &model).unwrap().to_string(),
        "{\n    line1\nline2\n}"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_bracket_dialect() {
    let (model, world) = person("World");
    let mut generator = get_generator();
    generator
        .add_template("t", "[%name%] is [%if (name.length() > 3){%]long[%}%]")
        .unwrap();
    assert_eq!(
        generator.render("t", world, &model).unwrap().to_string(),
        "World is long"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_check() {
    let (model, _) = class_model(&[]);
    let mut generator = get_generator();
    let source = concat!(
        "<%import helpers%>\n",
        "<%import missing%>\n",
        "<%script type=\"Interface\" name=\"x\" color=\"red\"%>\n",
        "x\n",
    );
    generator.add_file("helpers.mt", "<%script type=\"Class\" name=\"h\"%>\nh").unwrap();
    generator.add_file("main.mt", source).unwrap();

    let kinds: Vec<_> = generator
        .check(&model)
        .into_iter()
        .map(|(_, error)| error.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            SyntaxErrorKind::UnknownProperty {
                property: "color".to_string()
            },
            SyntaxErrorKind::UnresolvedImport {
                name: "missing".to_string()
            },
            SyntaxErrorKind::UnresolvedClassifier {
                name: "Interface".to_string()
            },
        ]
    );
}

#[test]
#[ntest::timeout(100)]
fn test_parse_round_trip() {
    let source = "<%if (a && !b){%>x<%}else if (c == \"q\"){%>y<%}else{%>z<%}%><%-- note --%>";
    let (tree, root, errors) = parse(source);
    assert!(errors.is_empty());
    let printed = tree.unparse(root);
    let (reparsed, reparsed_root, errors) = parse(&printed);
    assert!(errors.is_empty(), "{printed}: {errors:?}");
    assert_eq!(reparsed.unparse(reparsed_root), printed);
    assert_eq!(reparsed.len(), tree.len());
}
