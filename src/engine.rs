use crate::ast::FileId;
use crate::config::GeneratorConfig;
use crate::error::{ModelgenError, ModelgenResult, SyntaxError, SyntaxErrorKind};
use crate::evaluator::Evaluator;
use crate::interface::{GeneratedFile, GeneratorInterface};
use crate::model::{ModelAccessor, ObjectId, all_contents};
use crate::registry::{Registry, ScriptRef};
use crate::script::{ScriptDecl, ScriptFile, file_stem};
use crate::services::{Service, ServiceSet, builtins};
use crate::value::Node;

/// `Generator` is the primary implementation of the `GeneratorInterface`
/// trait. It owns the loaded script files, the services they may import and
/// the lookup of scripts by model type.
///
/// # Examples
///
/// ```
/// use modelgen::{Generator, GeneratorInterface, MemoryModel};
///
/// // Build a model
/// let mut model = MemoryModel::new().with_type("Person", &[]);
/// let person = model.create("Person", None);
/// model.set(person, "name", "World");
///
/// // Add a template
/// let mut generator = Generator::new();
/// generator.add_template("greeting", "Hello <%name%>!").unwrap();
///
/// // Render it for the person
/// let output = generator.render("greeting", person, &model).unwrap();
/// assert_eq!(output.to_string(), "Hello World!");
/// ```
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    files: Vec<ScriptFile>,
    registry: Registry,
    service_sets: Vec<ServiceSet>,
    builtins: ServiceSet,
}

impl Generator {
    /// Creates a generator with the default configuration and no files.
    pub fn new() -> Self {
        Self::with_config(GeneratorConfig::default())
    }

    pub fn with_config(config: GeneratorConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            registry: Registry::new(),
            service_sets: Vec::new(),
            builtins: builtins(),
        }
    }

    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn file(&self, id: FileId) -> Option<&ScriptFile> {
        self.files.get(id.index())
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &ScriptFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, file)| (FileId(i as u32), file))
    }

    pub fn script(&self, script: ScriptRef) -> Option<(&ScriptFile, &ScriptDecl)> {
        let file = self.file(script.file)?;
        Some((file, file.script(script.index)?))
    }

    /// Makes a set of services importable by its name.
    ///
    /// A set registered under the name of an earlier one replaces it.
    pub fn register_services(&mut self, set: ServiceSet) {
        self.service_sets.retain(|s| s.name() != set.name());
        tracing::debug!(name = set.name(), services = set.len(), "registered services");
        self.service_sets.push(set);
    }

    /// Finds the script `name` for objects of `type_name`, walking up the
    /// type hierarchy and falling back to the root type.
    pub fn resolve_template(
        &self,
        model: &dyn ModelAccessor,
        type_name: &str,
        name: &str,
    ) -> Option<ScriptRef> {
        self.registry
            .resolve(model, type_name, name, &self.config.root_type)
    }

    /// The service `name` with `arity` arguments visible from `file`: the
    /// imported sets in import order, then the built-in services.
    pub fn find_service(&self, file: &ScriptFile, name: &str, arity: usize) -> Option<&dyn Service> {
        file.imports
            .iter()
            .filter_map(|(import, _)| self.service_sets.iter().find(|s| s.name() == import))
            .find_map(|set| set.find(name, arity))
            .or_else(|| self.builtins.find(name, arity))
    }

    /// Creates an evaluator over `model`. Its mode and cancellation flag are
    /// set with the builder methods of [`Evaluator`].
    pub fn evaluator<'g>(&'g self, model: &'g dyn ModelAccessor) -> Evaluator<'g> {
        Evaluator::new(self, model)
    }

    fn add(&mut self, file: ScriptFile) -> ModelgenResult<FileId> {
        if self.files.iter().any(|f| f.name == file.name) {
            return Err(ModelgenError::FileExists { name: file.name });
        }
        if file.has_errors() {
            return Err(ModelgenError::Syntax {
                errors: file.errors(),
                file: file.name,
            });
        }
        let id = FileId(self.files.len() as u32);
        self.registry.register(id, &file.scripts);
        tracing::debug!(file = %file.name, scripts = file.scripts.len(), "added script file");
        self.files.push(file);
        Ok(id)
    }

    fn is_importable(&self, import: &str) -> bool {
        self.service_sets.iter().any(|s| s.name() == import)
            || self.files.iter().any(|f| file_stem(&f.name) == import)
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorInterface for Generator {
    /// Parses a script file and registers its scripts.
    ///
    /// # Arguments
    ///
    /// * `name` - The file name; a `.mt` extension enables auto-indentation
    /// * `content` - The script source
    ///
    /// # Returns
    ///
    /// * `Ok(FileId)` identifying the file in source mappings
    /// * `Err(ModelgenError::FileExists)` if a file with the given name was already added
    /// * `Err(ModelgenError::Syntax)` with every error found in the file
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgen::{Generator, GeneratorInterface};
    ///
    /// let mut generator = Generator::new();
    /// let source = "<%script type=\"Person\" name=\"greet\"%>\nHello <%name%>\n";
    /// generator.add_file("people.mt", source).unwrap();
    /// assert!(generator.add_file("people.mt", source).is_err());
    /// ```
    fn add_file<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> ModelgenResult<FileId> {
        let file = ScriptFile::parse(
            name.as_ref(),
            content.as_ref(),
            &self.config.root_type,
            self.config.file_trailing_newlines,
        );
        self.add(file)
    }

    fn add_template<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> ModelgenResult<FileId> {
        let file = ScriptFile::bare(name.as_ref(), content.as_ref(), &self.config.root_type);
        self.add(file)
    }

    /// Evaluates the script `name` for `object`.
    ///
    /// # Returns
    ///
    /// * `Ok(Node)` holding the result and its mappings
    /// * `Err(ModelgenError::MissingTemplate)` if no file declares a script with that name
    /// * `Err(ModelgenError::Evaluation)` if the script does not apply to the object or fails
    fn render<N: AsRef<str>>(
        &self,
        name: N,
        object: ObjectId,
        model: &dyn ModelAccessor,
    ) -> ModelgenResult<Node> {
        let name = name.as_ref();
        if !self.registry.has_name(name) {
            return Err(ModelgenError::MissingTemplate {
                name: name.to_string(),
            });
        }
        Ok(self.evaluator(model).render(name, object)?)
    }

    /// Runs every file script applicable to `root` or one of its contents.
    ///
    /// A script whose body evaluates to nothing produces no file. The path
    /// is its `file` template, trimmed.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgen::{Generator, GeneratorInterface, MemoryModel};
    ///
    /// let mut model = MemoryModel::new().with_type("Class", &[]);
    /// let class = model.create("Class", None);
    /// model.set(class, "name", "Shape");
    ///
    /// let mut generator = Generator::new();
    /// let source = "<%script type=\"Class\" name=\"java\" file=\"<%name%>.java\"%>\nclass <%name%> {}\n";
    /// generator.add_file("java.mt", source).unwrap();
    ///
    /// let files = generator.generate(class, &model).unwrap();
    /// assert_eq!(files.len(), 1);
    /// assert_eq!(files[0].path, "Shape.java");
    /// ```
    fn generate(
        &self,
        root: ObjectId,
        model: &dyn ModelAccessor,
    ) -> ModelgenResult<Vec<GeneratedFile>> {
        let mut names: Vec<&str> = Vec::new();
        for file in &self.files {
            for script in file.scripts.iter().filter(|s| s.is_file_script()) {
                if !names.contains(&script.name.as_str()) {
                    names.push(&script.name);
                }
            }
        }

        let mut objects = vec![root];
        objects.extend(all_contents(model, root));

        let mut evaluator = self.evaluator(model);
        let mut generated = Vec::new();
        for object in objects {
            let type_name = model.type_of(object).unwrap_or(&self.config.root_type);
            for name in &names {
                let Some(script) = self.resolve_template(model, type_name, name) else {
                    continue;
                };
                if !self.script(script).is_some_and(|(_, s)| s.is_file_script()) {
                    continue;
                }
                let node = evaluator.evaluate_script(script, &Node::root(object), Vec::new())?;
                if node.is_empty() {
                    tracing::debug!(script = name, %object, "empty result, no file generated");
                    continue;
                }
                let Some(path) = evaluator.evaluate_path(script, object)? else {
                    continue;
                };
                tracing::debug!(path = %path, script = name, %object, "generated file");
                generated.push(GeneratedFile {
                    path,
                    content: node.to_text(model),
                });
            }
        }
        Ok(generated)
    }

    fn check(&self, model: &dyn ModelAccessor) -> Vec<(String, SyntaxError)> {
        let mut reports = Vec::new();
        for file in &self.files {
            let mut report = |error: SyntaxError| reports.push((file.name.clone(), error));
            for warning in file.diagnostics.iter().filter(|d| !d.is_error()) {
                report(warning.clone());
            }
            for (import, position) in &file.imports {
                if !self.is_importable(import) {
                    report(SyntaxError::new(
                        &file.source,
                        *position,
                        SyntaxErrorKind::UnresolvedImport {
                            name: import.clone(),
                        },
                    ));
                }
            }
            for script in &file.scripts {
                if script.type_name != self.config.root_type && !model.has_type(&script.type_name) {
                    report(SyntaxError::new(
                        &file.source,
                        script.position,
                        SyntaxErrorKind::UnresolvedClassifier {
                            name: script.type_name.clone(),
                        },
                    ));
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::services::BuiltinService;
    use crate::value::ValueKind;

    fn model() -> (MemoryModel, ObjectId) {
        let mut model = MemoryModel::new()
            .with_type("Package", &[])
            .with_type("Class", &[]);
        let package = model.create("Package", None);
        model.set(package, "name", "shapes");
        for name in ["Circle", "Square"] {
            let class = model.create("Class", Some(package));
            model.set(class, "name", name);
        }
        (model, package)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_duplicate_file() {
        let mut generator = Generator::new();
        generator.add_template("a", "x").unwrap();
        assert_eq!(
            generator.add_template("a", "y").unwrap_err(),
            ModelgenError::FileExists {
                name: "a".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_syntax_errors_are_reported() {
        let mut generator = Generator::new();
        let error = generator.add_template("a", "<%if (true){%>x").unwrap_err();
        let ModelgenError::Syntax { file, errors } = error else {
            panic!("expected a syntax error");
        };
        assert_eq!(file, "a");
        assert!(!errors.is_empty());
        assert!(generator.files().next().is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_template() {
        let (model, package) = model();
        let generator = Generator::new();
        assert!(matches!(
            generator.render("nothing", package, &model),
            Err(ModelgenError::MissingTemplate { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_generate_skips_empty_results() {
        let (model, package) = model();
        let mut generator = Generator::new();
        let source = concat!(
            "<%script type=\"Class\" name=\"gen\" file=\"<%name%>.txt\"%>\n",
            "<%if (name != \"Square\"){%>\n",
            "class <%name%>\n",
            "<%}%>\n",
        );
        generator.add_file("gen.mt", source).unwrap();
        let files = generator.generate(package, &model).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "Circle.txt");
        assert_eq!(files[0].content.as_str(), "class Circle\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_imported_services() {
        let (model, package) = model();
        let mut generator = Generator::new();
        generator.register_services(ServiceSet::new("shout").with(BuiltinService::new(
            "shout",
            ValueKind::String,
            &[],
            ValueKind::String,
            |receiver, _, _| {
                let text = receiver.to_string();
                Ok(Node::string(format!("{}!", text.to_uppercase()), receiver))
            },
        )));
        let source = "<%import shout%>\n<%script type=\"Package\" name=\"p\"%>\n<%name.shout()%>";
        generator.add_file("p.mt", source).unwrap();
        let node = generator.render("p", package, &model).unwrap();
        assert_eq!(node.to_string(), "SHAPES!");
        assert!(generator.check(&model).is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_check_reports_unresolved_names() {
        let (model, _) = model();
        let mut generator = Generator::new();
        let source = "<%import missing%>\n<%script type=\"Interface\" name=\"p\"%>\nx";
        generator.add_file("p.mt", source).unwrap();
        let reports = generator.check(&model);
        let kinds: Vec<_> = reports.iter().map(|(_, e)| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                SyntaxErrorKind::UnresolvedImport {
                    name: "missing".to_string()
                },
                SyntaxErrorKind::UnresolvedClassifier {
                    name: "Interface".to_string()
                },
            ]
        );
        assert!(reports.iter().all(|(file, _)| file == "p.mt"));
    }
}
