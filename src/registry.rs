//! Type-directed lookup of scripts.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::ast::FileId;
use crate::model::ModelAccessor;
use crate::script::ScriptDecl;

/// A script declaration inside a loaded file.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptRef {
    pub file: FileId,
    pub index: usize,
}

type Key = (String, String);

/// Every script of every loaded file, keyed by `(type, name)`.
///
/// When several files declare the same key the first file loaded wins.
#[derive(Debug, Default)]
pub struct Registry {
    scripts: HashMap<Key, ScriptRef>,
    names: HashSet<String>,
    resolved: RefCell<HashMap<Key, Option<ScriptRef>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file: FileId, scripts: &[ScriptDecl]) {
        for (index, script) in scripts.iter().enumerate() {
            self.scripts
                .entry((script.type_name.clone(), script.name.clone()))
                .or_insert(ScriptRef { file, index });
            self.names.insert(script.name.clone());
        }
        self.resolved.borrow_mut().clear();
    }

    /// Whether any script, for any type, is called `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn exact(&self, type_name: &str, name: &str) -> Option<ScriptRef> {
        self.scripts
            .get(&(type_name.to_string(), name.to_string()))
            .copied()
    }

    /// Finds the script `name` applicable to `type_name`: its own, then the
    /// one of the nearest supertype (depth first, in declaration order),
    /// then the one of `root_type`.
    pub fn resolve(
        &self,
        model: &dyn ModelAccessor,
        type_name: &str,
        name: &str,
        root_type: &str,
    ) -> Option<ScriptRef> {
        let key = (type_name.to_string(), name.to_string());
        if let Some(&cached) = self.resolved.borrow().get(&key) {
            return cached;
        }
        let found = self
            .walk(model, type_name, name, &mut HashSet::new())
            .or_else(|| {
                if type_name == root_type {
                    None
                } else {
                    self.exact(root_type, name)
                }
            });
        tracing::debug!(type_name, name, ?found, "resolved script");
        self.resolved.borrow_mut().insert(key, found);
        found
    }

    /// Searches `type_name` and its supertypes, depth first.
    fn walk(
        &self,
        model: &dyn ModelAccessor,
        type_name: &str,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Option<ScriptRef> {
        if !visited.insert(type_name.to_string()) {
            return None;
        }
        if let Some(found) = self.exact(type_name, name) {
            return Some(found);
        }
        model
            .supertypes(type_name)
            .iter()
            .find_map(|supertype| self.walk(model, supertype, name, visited))
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
        self.names.clear();
        self.resolved.borrow_mut().clear();
    }
}
