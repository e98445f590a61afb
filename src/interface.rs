use crate::ast::FileId;
use crate::error::SyntaxError;
use crate::model::{ModelAccessor, ObjectId};
use crate::value::{Node, Text};

/// A file produced by a file script.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    /// Path computed by the `file` template of the script.
    pub path: String,
    /// Generated text, with its mappings to the model and to the scripts.
    pub content: Text,
}

/// `GeneratorInterface` is the surface of a model-to-text generator: script
/// files are loaded once, then evaluated against any number of models.
pub trait GeneratorInterface {
    /// `add_file` parses a script file and makes its scripts available.
    ///
    /// # Errors
    /// - If a file with the same name was already added.
    /// - If the file has syntax errors.
    fn add_file<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> crate::ModelgenResult<FileId>;

    /// `add_template` adds a bare template: the whole content is the body of
    /// one script named after the file, applicable to every object.
    ///
    /// # Errors
    /// - If a file with the same name was already added.
    /// - If the template has syntax errors.
    fn add_template<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> crate::ModelgenResult<FileId>;

    /// `render` evaluates the script `name` applicable to `object`.
    ///
    /// # Errors
    /// - If no script with that name exists.
    /// - If the evaluation fails.
    fn render<N: AsRef<str>>(
        &self,
        name: N,
        object: ObjectId,
        model: &dyn ModelAccessor,
    ) -> crate::ModelgenResult<Node>;

    /// `generate` runs every file script on `root` and its contents, keeping
    /// the non-empty results.
    ///
    /// # Errors
    /// - If an evaluation fails.
    fn generate(
        &self,
        root: ObjectId,
        model: &dyn ModelAccessor,
    ) -> crate::ModelgenResult<Vec<GeneratedFile>>;

    /// `check` reports the warnings of every file together with the imports
    /// and types that cannot be resolved against `model`.
    fn check(&self, model: &dyn ModelAccessor) -> Vec<(String, SyntaxError)>;
}
