//! Access to the typed object tree templates are evaluated against.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

/// Opaque handle of a model object. The engine never owns the object.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value of a feature as the model hands it out.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Object(ObjectId),
    List(Vec<FeatureValue>),
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<ObjectId> for FeatureValue {
    fn from(value: ObjectId) -> Self {
        Self::Object(value)
    }
}

impl From<Vec<ObjectId>> for FeatureValue {
    fn from(value: Vec<ObjectId>) -> Self {
        Self::List(value.into_iter().map(Self::Object).collect())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown object {0}")]
    UnknownObject(ObjectId),
    #[error("Cannot read feature '{feature}': {message}")]
    Access { feature: String, message: String },
}

/// What the engine needs from a model.
///
/// Feature reads may load resources lazily and are therefore fallible; a
/// feature the object's type does not define is `Ok(None)`.
pub trait ModelAccessor {
    fn type_of(&self, object: ObjectId) -> Option<&str>;

    /// Immediate supertypes of `type_name`, in declaration order.
    fn supertypes(&self, type_name: &str) -> Vec<String>;

    fn feature(&self, object: ObjectId, name: &str) -> Result<Option<FeatureValue>, ModelError>;

    /// Contained objects, in containment order.
    fn children(&self, object: ObjectId) -> Vec<ObjectId>;

    fn parent(&self, object: ObjectId) -> Option<ObjectId>;

    /// Short human readable form: the type followed by its properties.
    fn describe(&self, object: ObjectId) -> String {
        match self.type_of(object) {
            Some(type_name) => format!("{type_name} {object}"),
            None => object.to_string(),
        }
    }

    /// Resolves the textual form of an object, if the model has one.
    fn lookup(&self, _text: &str) -> Option<ObjectId> {
        None
    }

    /// Whether the model knows a type named `type_name`.
    fn has_type(&self, _type_name: &str) -> bool {
        true
    }
}

/// Whether `object`'s type is `type_name` or inherits from it.
pub fn is_kind_of(model: &dyn ModelAccessor, object: ObjectId, type_name: &str) -> bool {
    model
        .type_of(object)
        .is_some_and(|own| type_conforms(model, own, type_name))
}

/// Whether `type_name` is `expected` or one of its transitive supertypes is.
pub fn type_conforms(model: &dyn ModelAccessor, type_name: &str, expected: &str) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([type_name.to_string()]);
    while let Some(current) = queue.pop_front() {
        if current == expected {
            return true;
        }
        if seen.insert(current.clone()) {
            queue.extend(model.supertypes(&current));
        }
    }
    false
}

/// Every object contained below `object`, depth first.
pub fn all_contents(model: &dyn ModelAccessor, object: ObjectId) -> Vec<ObjectId> {
    let mut found = Vec::new();
    let mut stack: Vec<ObjectId> = model.children(object).into_iter().rev().collect();
    while let Some(current) = stack.pop() {
        found.push(current);
        stack.extend(model.children(current).into_iter().rev());
    }
    found
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryObject {
    pub type_name: String,
    pub features: Vec<(String, FeatureValue)>,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
}

/// A model held entirely in memory: typed objects with features, a
/// containment tree and a type hierarchy.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryModel {
    types: BTreeMap<String, Vec<String>>,
    objects: Vec<MemoryObject>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` with its immediate supertypes.
    pub fn with_type(mut self, name: &str, supertypes: &[&str]) -> Self {
        self.declare_type(name, supertypes);
        self
    }

    pub fn declare_type(&mut self, name: &str, supertypes: &[&str]) {
        self.types.insert(
            name.to_string(),
            supertypes.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    /// Creates an object, contained by `parent` when given.
    pub fn create(&mut self, type_name: &str, parent: Option<ObjectId>) -> ObjectId {
        let id = ObjectId(self.objects.len() as u64);
        self.objects.push(MemoryObject {
            type_name: type_name.to_string(),
            parent,
            ..MemoryObject::default()
        });
        if let Some(parent) = parent.and_then(|p| self.object_mut(p)) {
            parent.children.push(id);
        }
        self.types.entry(type_name.to_string()).or_default();
        id
    }

    /// Sets a feature, replacing any previous value.
    pub fn set<V: Into<FeatureValue>>(&mut self, object: ObjectId, feature: &str, value: V) {
        let value = value.into();
        if let Some(object) = self.object_mut(object) {
            match object.features.iter_mut().find(|(name, _)| name == feature) {
                Some((_, slot)) => *slot = value,
                None => object.features.push((feature.to_string(), value)),
            }
        }
    }

    pub fn object(&self, object: ObjectId) -> Option<&MemoryObject> {
        usize::try_from(object.0).ok().and_then(|i| self.objects.get(i))
    }

    fn object_mut(&mut self, object: ObjectId) -> Option<&mut MemoryObject> {
        usize::try_from(object.0).ok().and_then(|i| self.objects.get_mut(i))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn describe_value(&self, value: &FeatureValue, out: &mut String) {
        match value {
            FeatureValue::Null => out.push_str("null"),
            FeatureValue::Bool(b) => out.push_str(&b.to_string()),
            FeatureValue::Int(i) => out.push_str(&i.to_string()),
            FeatureValue::Double(d) => out.push_str(&d.to_string()),
            FeatureValue::Str(s) => out.push_str(s),
            FeatureValue::Object(id) => out.push_str(&id.to_string()),
            FeatureValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.describe_value(item, out);
                }
                out.push(']');
            }
        }
    }
}

impl ModelAccessor for MemoryModel {
    fn type_of(&self, object: ObjectId) -> Option<&str> {
        self.object(object).map(|o| o.type_name.as_str())
    }

    fn supertypes(&self, type_name: &str) -> Vec<String> {
        self.types.get(type_name).cloned().unwrap_or_default()
    }

    fn feature(&self, object: ObjectId, name: &str) -> Result<Option<FeatureValue>, ModelError> {
        let found = self.object(object).ok_or(ModelError::UnknownObject(object))?;
        Ok(found
            .features
            .iter()
            .find(|(feature, _)| feature == name)
            .map(|(_, value)| value.clone()))
    }

    fn children(&self, object: ObjectId) -> Vec<ObjectId> {
        self.object(object)
            .map(|o| o.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self, object: ObjectId) -> Option<ObjectId> {
        self.object(object).and_then(|o| o.parent)
    }

    fn describe(&self, object: ObjectId) -> String {
        let Some(found) = self.object(object) else {
            return object.to_string();
        };
        let mut out = found.type_name.clone();
        for (name, value) in &found.features {
            out.push(' ');
            out.push_str(name);
            out.push('=');
            self.describe_value(value, &mut out);
        }
        out
    }

    /// Objects are spelled `#index`.
    fn lookup(&self, text: &str) -> Option<ObjectId> {
        let id = ObjectId(text.trim().strip_prefix('#')?.parse().ok()?);
        self.object(id).map(|_| id)
    }

    fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }
}
