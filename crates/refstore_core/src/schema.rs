//! Per-type model configuration and the type registry.
//!
//! Where the store holds heterogeneous entity kinds in one index, each
//! kind is described by a [`ModelSchema`]: its type tag, id and type
//! attribute names, default values, autoincrement policy, preprocessing
//! hook and declared references. A [`SchemaRegistry`] maps type tags to
//! schemas and supplies the fallback used for unregistered types.

use crate::key::Key;
use refstore_codec::Map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Reserved property holding the type tag in serialized snapshots.
///
/// This is also the default `type_attribute` for dynamically typed
/// schemas.
pub const TYPE_PROP: &str = "__type__";

/// Type tag of models built from the fallback schema when no type was
/// supplied at all.
pub const DEFAULT_TYPE: &str = "__default_type__";

/// Attribute names skipped by `Model::update`.
///
/// These are bookkeeping names a legacy or hostile payload could carry;
/// they never belong in the attribute bag.
pub const RESERVED_KEYS: &[&str] = &["__collection__", "__refs__", "__schema__"];

/// Name of a model type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(String);

impl TypeTag {
    /// Creates a type tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a model's effective type comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSource {
    /// The schema carries a fixed type tag.
    Static(TypeTag),
    /// The effective type is read from the instance's `type_attribute`.
    Dynamic,
}

/// A declared reference attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind {
    /// The attribute's raw value is a foreign key or key array of the
    /// given type.
    Direct(TypeTag),
    /// A derived, read-only set: all models of `model` whose own
    /// reference `property` points back at this model.
    External {
        /// Type of the models scanned.
        model: TypeTag,
        /// Name of the reference attribute on those models.
        property: String,
    },
}

/// Generator for automatically assigned ids.
type IdGenerator = Box<dyn Fn() -> Key + Send + Sync>;

/// Hook run over raw input data before it becomes model attributes.
type Preprocess = Box<dyn Fn(Map) -> Map + Send + Sync>;

/// Static configuration of one model type.
///
/// Built with chained methods and registered in a [`SchemaRegistry`]:
///
/// ```
/// use refstore_core::{ModelSchema, SchemaRegistry};
///
/// let registry = SchemaRegistry::new()
///     .register(ModelSchema::new("user"))
///     .register(
///         ModelSchema::new("cart")
///             .reference("user", "user")
///             .reference("products", "cartItem"),
///     );
/// # let _ = registry;
/// ```
pub struct ModelSchema {
    type_source: TypeSource,
    id_attribute: String,
    type_attribute: String,
    defaults: Map,
    auto_id: bool,
    auto_counter: AtomicI64,
    id_generator: Option<IdGenerator>,
    preprocess: Option<Preprocess>,
    refs: BTreeMap<String, RefKind>,
}

impl ModelSchema {
    /// Creates a schema with a fixed type tag.
    pub fn new(ty: impl Into<TypeTag>) -> Self {
        Self::with_source(TypeSource::Static(ty.into()))
    }

    /// Creates a schema whose effective type is read from the
    /// instance's type attribute.
    pub fn dynamic() -> Self {
        Self::with_source(TypeSource::Dynamic)
    }

    fn with_source(type_source: TypeSource) -> Self {
        Self {
            type_source,
            id_attribute: "id".to_string(),
            type_attribute: TYPE_PROP.to_string(),
            defaults: Map::new(),
            auto_id: true,
            auto_counter: AtomicI64::new(1),
            id_generator: None,
            preprocess: None,
            refs: BTreeMap::new(),
        }
    }

    /// Sets the attribute used as the unique identifier.
    #[must_use]
    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Sets the attribute holding the dynamic type tag.
    #[must_use]
    pub fn type_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.type_attribute = attribute.into();
        self
    }

    /// Adds a default attribute value, merged under supplied data.
    #[must_use]
    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<refstore_codec::Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Enables or disables automatic id assignment.
    ///
    /// With auto-id disabled, constructing a model without an id fails.
    #[must_use]
    pub fn auto_id(mut self, enabled: bool) -> Self {
        self.auto_id = enabled;
        self
    }

    /// Replaces the built-in autoincrement counter with a custom id
    /// generator.
    #[must_use]
    pub fn id_generator(mut self, generator: impl Fn() -> Key + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Box::new(generator));
        self
    }

    /// Sets a hook that transforms raw input data (e.g. an API payload)
    /// before it becomes model attributes.
    #[must_use]
    pub fn preprocess(mut self, hook: impl Fn(Map) -> Map + Send + Sync + 'static) -> Self {
        self.preprocess = Some(Box::new(hook));
        self
    }

    /// Declares a direct reference attribute pointing at models of
    /// `target`.
    #[must_use]
    pub fn reference(mut self, key: impl Into<String>, target: impl Into<TypeTag>) -> Self {
        self.refs.insert(key.into(), RefKind::Direct(target.into()));
        self
    }

    /// Declares an external (inverse) reference: the derived set of all
    /// `model` instances whose reference `property` points back here.
    #[must_use]
    pub fn external_reference(
        mut self,
        key: impl Into<String>,
        model: impl Into<TypeTag>,
        property: impl Into<String>,
    ) -> Self {
        self.refs.insert(
            key.into(),
            RefKind::External {
                model: model.into(),
                property: property.into(),
            },
        );
        self
    }

    /// Returns where this schema's effective type comes from.
    #[must_use]
    pub fn type_source(&self) -> &TypeSource {
        &self.type_source
    }

    /// Returns the fixed type tag, or `None` for dynamic schemas.
    #[must_use]
    pub fn static_type(&self) -> Option<&TypeTag> {
        match &self.type_source {
            TypeSource::Static(ty) => Some(ty),
            TypeSource::Dynamic => None,
        }
    }

    /// Returns the id attribute name.
    #[must_use]
    pub fn id_attribute_name(&self) -> &str {
        &self.id_attribute
    }

    /// Returns the type attribute name.
    #[must_use]
    pub fn type_attribute_name(&self) -> &str {
        &self.type_attribute
    }

    /// Returns the declared references.
    #[must_use]
    pub fn refs(&self) -> &BTreeMap<String, RefKind> {
        &self.refs
    }

    /// Returns the declared kind of a reference attribute.
    #[must_use]
    pub fn ref_kind(&self, key: &str) -> Option<&RefKind> {
        self.refs.get(key)
    }

    /// Whether automatic id assignment is enabled.
    #[must_use]
    pub fn auto_id_enabled(&self) -> bool {
        self.auto_id
    }

    pub(crate) fn defaults(&self) -> &Map {
        &self.defaults
    }

    pub(crate) fn run_preprocess(&self, data: Map) -> Map {
        match &self.preprocess {
            Some(hook) => hook(data),
            None => data,
        }
    }

    /// Produces the next candidate id.
    ///
    /// The built-in generator is a per-schema counter starting at 1;
    /// collision checking against the target collection happens in the
    /// model constructor.
    pub(crate) fn next_auto_id(&self) -> Key {
        match &self.id_generator {
            Some(generator) => generator(),
            None => Key::Integer(self.auto_counter.fetch_add(1, Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("type_source", &self.type_source)
            .field("id_attribute", &self.id_attribute)
            .field("type_attribute", &self.type_attribute)
            .field("auto_id", &self.auto_id)
            .field("refs", &self.refs)
            .finish_non_exhaustive()
    }
}

/// Registry of known model schemas.
///
/// `resolve` returns the first registered schema whose static tag
/// matches; anything else falls back to a shared dynamic schema, so a
/// collection can always construct a model for any type tag.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<Arc<ModelSchema>>,
    fallback: Arc<ModelSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: Vec::new(),
            fallback: Arc::new(ModelSchema::dynamic()),
        }
    }

    /// Registers a schema.
    #[must_use]
    pub fn register(mut self, schema: ModelSchema) -> Self {
        self.schemas.push(Arc::new(schema));
        self
    }

    /// Resolves the schema for a type tag.
    pub fn resolve(&self, ty: &TypeTag) -> Arc<ModelSchema> {
        self.schemas
            .iter()
            .find(|schema| schema.static_type() == Some(ty))
            .unwrap_or(&self.fallback)
            .clone()
    }

    /// Returns the registered schemas.
    #[must_use]
    pub fn schemas(&self) -> &[Arc<ModelSchema>] {
        &self.schemas
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refstore_codec::Value;

    #[test]
    fn builder_defaults() {
        let schema = ModelSchema::new("person");
        assert_eq!(schema.static_type(), Some(&TypeTag::new("person")));
        assert_eq!(schema.id_attribute_name(), "id");
        assert_eq!(schema.type_attribute_name(), TYPE_PROP);
        assert!(schema.auto_id_enabled());
        assert!(schema.refs().is_empty());
    }

    #[test]
    fn dynamic_schema_has_no_static_type() {
        assert_eq!(ModelSchema::dynamic().static_type(), None);
    }

    #[test]
    fn autoincrement_starts_at_one() {
        let schema = ModelSchema::new("person");
        assert_eq!(schema.next_auto_id(), Key::Integer(1));
        assert_eq!(schema.next_auto_id(), Key::Integer(2));
        assert_eq!(schema.next_auto_id(), Key::Integer(3));
    }

    #[test]
    fn counters_are_per_schema() {
        let a = ModelSchema::new("a");
        let b = ModelSchema::new("b");
        assert_eq!(a.next_auto_id(), Key::Integer(1));
        assert_eq!(a.next_auto_id(), Key::Integer(2));
        assert_eq!(b.next_auto_id(), Key::Integer(1));
    }

    #[test]
    fn custom_id_generator() {
        let schema = ModelSchema::new("person").id_generator(|| Key::Text("fixed".into()));
        assert_eq!(schema.next_auto_id(), Key::Text("fixed".into()));
    }

    #[test]
    fn preprocess_hook_runs() {
        let schema = ModelSchema::new("person").preprocess(|mut data| {
            data.insert("seen".into(), Value::Bool(true));
            data
        });

        let out = schema.run_preprocess(Map::new());
        assert_eq!(out.get("seen"), Some(&Value::Bool(true)));
    }

    #[test]
    fn reference_declarations() {
        let schema = ModelSchema::new("cart")
            .reference("user", "user")
            .external_reference("orders", "order", "cart");

        assert_eq!(
            schema.ref_kind("user"),
            Some(&RefKind::Direct(TypeTag::new("user")))
        );
        assert_eq!(
            schema.ref_kind("orders"),
            Some(&RefKind::External {
                model: TypeTag::new("order"),
                property: "cart".into(),
            })
        );
        assert_eq!(schema.ref_kind("missing"), None);
    }

    #[test]
    fn registry_resolves_first_match() {
        let registry = SchemaRegistry::new()
            .register(ModelSchema::new("person").auto_id(false))
            .register(ModelSchema::new("person"));

        let schema = registry.resolve(&TypeTag::new("person"));
        assert!(!schema.auto_id_enabled());
    }

    #[test]
    fn registry_falls_back_to_dynamic() {
        let registry = SchemaRegistry::new();
        let schema = registry.resolve(&TypeTag::new("unknown"));
        assert_eq!(schema.static_type(), None);
    }
}
