//! Model instances.
//!
//! A [`Model`] is one entity: a bag of plain attributes plus declared
//! reference attributes, owned by at most one collection at a time.
//! `Model` is a cheap handle over shared state — two lookups of the
//! same entity compare equal and observe the same mutations.

use crate::collection::{Collection, CollectionInner};
use crate::error::{StoreError, StoreResult};
use crate::feed::PatchFeed;
use crate::key::Key;
use crate::patch::{field_path, Patch, PatchOp};
use crate::schema::{ModelSchema, RefKind, TypeTag, DEFAULT_TYPE, RESERVED_KEYS, TYPE_PROP};
use parking_lot::RwLock;
use refstore_codec::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

/// Construction overrides supplied by the collection.
#[derive(Default)]
pub(crate) struct CreateOpts {
    /// Explicit type tag, stored under the schema's type attribute.
    pub(crate) type_override: Option<TypeTag>,
    /// Explicit id, bypassing auto-id assignment.
    pub(crate) id_override: Option<Key>,
}

pub(crate) struct ModelInner {
    schema: Arc<ModelSchema>,
    /// Raw attribute storage. Reference attributes hold their key
    /// scalar/array form here, never resolved entities.
    pub(crate) attributes: RwLock<Map>,
    /// Runtime reference table: the schema's declarations plus
    /// `assign_ref` promotions.
    refs: RwLock<BTreeMap<String, RefKind>>,
    collection: RwLock<Weak<CollectionInner>>,
    feed: PatchFeed,
    /// Patch emission is suppressed during construction.
    silent: AtomicBool,
}

/// One entity instance.
///
/// Cloning a `Model` clones the handle, not the entity; equality is
/// instance identity.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Arc<ModelInner>,
}

impl Model {
    /// Constructs a detached model from a schema and raw data.
    ///
    /// Detached models have no owning collection: their references
    /// resolve to nothing until they are added to one, and reference
    /// attributes can only be written with bare keys.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::MissingId`] when the schema disables
    /// auto-id and the data carries no identifier.
    pub fn new(schema: impl Into<Arc<ModelSchema>>, data: Map) -> StoreResult<Self> {
        Self::create(schema.into(), data, CreateOpts::default(), None)
    }

    /// Constructs a detached model with an explicit identifier,
    /// bypassing auto-id assignment.
    pub fn with_id(
        schema: impl Into<Arc<ModelSchema>>,
        data: Map,
        id: impl Into<Key>,
    ) -> StoreResult<Self> {
        Self::create(
            schema.into(),
            data,
            CreateOpts {
                type_override: None,
                id_override: Some(id.into()),
            },
            None,
        )
    }

    pub(crate) fn create(
        schema: Arc<ModelSchema>,
        data: Map,
        opts: CreateOpts,
        collection: Option<&Arc<CollectionInner>>,
    ) -> StoreResult<Self> {
        let processed = schema.run_preprocess(data);
        let mut merged = schema.defaults().clone();
        merged.extend(processed);

        if let Some(ty) = &opts.type_override {
            merged.insert(
                schema.type_attribute_name().to_string(),
                Value::Text(ty.to_string()),
            );
        }

        let mut id_set = false;
        if let Some(id) = &opts.id_override {
            merged.insert(schema.id_attribute_name().to_string(), id.to_value());
            id_set = true;
        }
        if !id_set {
            ensure_id(&schema, &mut merged, collection)?;
        }

        let model = Model {
            inner: Arc::new(ModelInner {
                refs: RwLock::new(schema.refs().clone()),
                schema,
                attributes: RwLock::new(Map::new()),
                collection: RwLock::new(
                    collection.map(Arc::downgrade).unwrap_or_else(Weak::new),
                ),
                feed: PatchFeed::new(),
                silent: AtomicBool::new(true),
            }),
        };

        // Declared references stay resolvable even when the input
        // carried no data for them.
        {
            let mut attrs = model.inner.attributes.write();
            for (key, kind) in model.inner.schema.refs() {
                if matches!(kind, RefKind::Direct(_)) && !merged.contains_key(key) {
                    attrs.insert(key.clone(), Value::Null);
                }
            }
        }

        model.update(merged)?;
        model.inner.silent.store(false, Ordering::Release);
        Ok(model)
    }

    /// Returns this model's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.inner.schema
    }

    /// Returns the model's identifier, read from the schema's id
    /// attribute.
    #[must_use]
    pub fn record_id(&self) -> Option<Key> {
        let attrs = self.inner.attributes.read();
        attrs
            .get(self.inner.schema.id_attribute_name())
            .and_then(Key::from_value)
    }

    /// Returns the model's effective type: the stored type attribute if
    /// present, else the schema's static tag.
    #[must_use]
    pub fn record_type(&self) -> TypeTag {
        {
            let attrs = self.inner.attributes.read();
            if let Some(Value::Text(tag)) = attrs.get(self.inner.schema.type_attribute_name()) {
                return TypeTag::new(tag.clone());
            }
        }
        self.inner
            .schema
            .static_type()
            .cloned()
            .unwrap_or_else(|| TypeTag::new(DEFAULT_TYPE))
    }

    /// Reads an attribute's raw stored value.
    ///
    /// Reference attributes read as their key scalar/array form; use
    /// [`Model::ref_one`] / [`Model::ref_list`] for resolved entities.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.attributes.read().get(key).cloned()
    }

    /// Merges `data` into the model via [`Model::assign`].
    ///
    /// Reserved internal key names, external reference keys and the
    /// write-once id/type attributes (once set) are skipped. Returns
    /// the keys actually stored with their raw stored values.
    pub fn update(&self, data: Map) -> StoreResult<Map> {
        let mut changed = Map::new();
        for (key, value) in data {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if self.is_locked_attribute(&key) {
                continue;
            }
            if matches!(self.ref_kind(&key), Some(RefKind::External { .. })) {
                // derived sets cannot be imported
                continue;
            }
            let stored = self.assign(&key, value)?;
            changed.insert(key, stored);
        }
        Ok(changed)
    }

    /// Sets one attribute.
    ///
    /// Declared direct references resolve the value through the
    /// reference engine (objects are upserted into the owning
    /// collection); everything else is stored raw. Emits one patch
    /// unless the write is a no-op replace. Returns the raw stored
    /// value.
    ///
    /// # Errors
    ///
    /// Fails when `key` is an external reference, or when a reference
    /// write violates its contract (see [`Model::set_ref`]).
    pub fn assign(&self, key: &str, value: Value) -> StoreResult<Value> {
        if self.is_locked_attribute(key) {
            // id and type are write-once; later writes keep the stored value
            return Ok(self.get(key).unwrap_or(Value::Null));
        }
        match self.ref_kind(key) {
            Some(RefKind::Direct(_)) => {
                let input = crate::refs::RefInput::from_value(key, value)?;
                self.set_ref_input(key, input)
            }
            Some(RefKind::External { .. }) => Err(StoreError::external_reference(key)),
            None => Ok(self.assign_plain(key, value)),
        }
    }

    fn assign_plain(&self, key: &str, value: Value) -> Value {
        let old = {
            let mut attrs = self.inner.attributes.write();
            let old = attrs.get(key).cloned();
            attrs.insert(key.to_string(), value.clone());
            old
        };
        match old {
            None => self.emit_field(PatchOp::Add, key, Some(value.clone()), None),
            Some(ref previous) if *previous == value => {}
            Some(previous) => {
                self.emit_field(PatchOp::Replace, key, Some(value.clone()), Some(previous));
            }
        }
        value
    }

    /// Deletes an attribute and emits a remove patch.
    ///
    /// Returns the previous value, if any.
    pub fn unassign(&self, key: &str) -> Option<Value> {
        let old = self.inner.attributes.write().remove(key);
        self.emit_field(PatchOp::Remove, key, None, old.clone());
        old
    }

    /// Flattens the model into its plain serialized form: all raw
    /// attributes plus the effective type under [`TYPE_PROP`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = { self.inner.attributes.read().clone() };
        map.insert(TYPE_PROP.to_string(), Value::Text(self.record_type().to_string()));
        Value::Object(map)
    }

    /// Snapshot of the model's serialized state.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.to_value()
    }

    /// Replays an externally supplied model-level patch (`/<field>`).
    ///
    /// # Errors
    ///
    /// Fails when the path is not a single field, or when the
    /// underlying `assign` fails.
    pub fn apply_patch(&self, patch: &Patch) -> StoreResult<()> {
        let segments = patch.segments();
        let [field] = segments.as_slice() else {
            return Err(StoreError::invalid_operation(format!(
                "model patch path must be '/<field>', got '{}'",
                patch.path
            )));
        };
        match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                self.assign(field, patch.value.clone().unwrap_or(Value::Null))?;
            }
            PatchOp::Remove => {
                self.unassign(field);
            }
            PatchOp::Copy | PatchOp::Move | PatchOp::Test => {}
        }
        Ok(())
    }

    /// Subscribes to this model's own patches (model-level `/<field>`
    /// paths).
    pub fn subscribe(&self) -> Receiver<Patch> {
        self.inner.feed.subscribe()
    }

    /// Returns the owning collection, if this model is a member of one.
    #[must_use]
    pub fn collection(&self) -> Option<Collection> {
        self.collection_inner().map(Collection::from_inner)
    }

    /// Clone of the raw attribute bag.
    #[must_use]
    pub fn raw_attributes(&self) -> Map {
        self.inner.attributes.read().clone()
    }

    /// Returns the runtime kind of a reference attribute, if `key` is
    /// one.
    #[must_use]
    pub fn ref_kind(&self, key: &str) -> Option<RefKind> {
        self.inner.refs.read().get(key).cloned()
    }

    pub(crate) fn collection_inner(&self) -> Option<Arc<CollectionInner>> {
        self.inner.collection.read().upgrade()
    }

    pub(crate) fn set_collection(&self, inner: &Arc<CollectionInner>) {
        *self.inner.collection.write() = Arc::downgrade(inner);
    }

    pub(crate) fn clear_collection(&self) {
        *self.inner.collection.write() = Weak::new();
    }

    pub(crate) fn declare_ref(&self, key: String, kind: RefKind) {
        self.inner.refs.write().insert(key, kind);
    }

    /// The id attribute (once set) and the type attribute (once set)
    /// are write-once.
    fn is_locked_attribute(&self, key: &str) -> bool {
        if key == self.inner.schema.id_attribute_name() {
            return self.record_id().is_some();
        }
        if key == self.inner.schema.type_attribute_name() {
            let attrs = self.inner.attributes.read();
            return attrs.get(key).is_some_and(|v| !v.is_null());
        }
        false
    }

    pub(crate) fn emit_field(
        &self,
        op: PatchOp,
        field: &str,
        value: Option<Value>,
        old_value: Option<Value>,
    ) {
        if self.inner.silent.load(Ordering::Acquire) {
            return;
        }
        let patch = Patch {
            op,
            path: field_path(field),
            value,
            old_value,
        };
        self.inner.feed.emit(patch.clone());

        let collection = self.collection_inner();
        if let (Some(collection), Some(id)) = (collection, self.record_id()) {
            collection.broadcast(patch.rebase(&self.record_type(), &id));
        }
    }
}

fn ensure_id(
    schema: &ModelSchema,
    data: &mut Map,
    collection: Option<&Arc<CollectionInner>>,
) -> StoreResult<()> {
    let id_attribute = schema.id_attribute_name();
    if data.get(id_attribute).is_some_and(|v| !v.is_null()) {
        return Ok(());
    }
    if !schema.auto_id_enabled() {
        return Err(StoreError::missing_id(id_attribute));
    }

    let ty = effective_type(schema, data);
    // Retry on collision: imported data may already occupy counter values.
    loop {
        let candidate = schema.next_auto_id();
        let taken = collection.is_some_and(|c| c.find(&ty, &candidate).is_some());
        if !taken {
            data.insert(id_attribute.to_string(), candidate.to_value());
            return Ok(());
        }
    }
}

fn effective_type(schema: &ModelSchema, data: &Map) -> TypeTag {
    if let Some(Value::Text(tag)) = data.get(schema.type_attribute_name()) {
        return TypeTag::new(tag.clone());
    }
    schema
        .static_type()
        .cloned()
        .unwrap_or_else(|| TypeTag::new(DEFAULT_TYPE))
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type", &self.record_type())
            .field("id", &self.record_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;

    fn person_schema() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("person"))
    }

    fn map(pairs: &[(&str, Value)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn construction_merges_defaults_under_data() {
        let schema = Arc::new(
            ModelSchema::new("person")
                .default_value("role", "guest")
                .default_value("active", true),
        );
        let model = Model::new(schema, map(&[("role", Value::from("admin"))])).unwrap();

        assert_eq!(model.get("role"), Some(Value::from("admin")));
        assert_eq!(model.get("active"), Some(Value::Bool(true)));
    }

    #[test]
    fn preprocess_runs_over_input() {
        let schema = Arc::new(ModelSchema::new("person").preprocess(|mut data| {
            if let Some(Value::Text(name)) = data.remove("full_name") {
                data.insert("name".into(), Value::Text(name));
            }
            data
        }));
        let model = Model::new(schema, map(&[("full_name", Value::from("Ada"))])).unwrap();

        assert_eq!(model.get("name"), Some(Value::from("Ada")));
        assert_eq!(model.get("full_name"), None);
    }

    #[test]
    fn auto_id_assigned_when_missing() {
        let schema = person_schema();
        let model = Model::new(schema.clone(), Map::new()).unwrap();
        assert_eq!(model.record_id(), Some(Key::Integer(1)));

        let next = Model::new(schema, Map::new()).unwrap();
        assert_eq!(next.record_id(), Some(Key::Integer(2)));
    }

    #[test]
    fn missing_id_fails_when_auto_id_disabled() {
        let schema = Arc::new(ModelSchema::new("person").auto_id(false));
        let err = Model::new(schema, Map::new()).unwrap_err();
        assert!(matches!(err, StoreError::MissingId { .. }));
    }

    #[test]
    fn id_is_write_once() {
        let model = Model::new(person_schema(), map(&[("id", Value::Integer(7))])).unwrap();

        model.update(map(&[("id", Value::Integer(99))])).unwrap();
        assert_eq!(model.record_id(), Some(Key::Integer(7)));

        model.assign("id", Value::Integer(99)).unwrap();
        assert_eq!(model.record_id(), Some(Key::Integer(7)));
    }

    #[test]
    fn update_skips_reserved_keys() {
        let model = Model::new(person_schema(), Map::new()).unwrap();
        let changed = model
            .update(map(&[
                ("__collection__", Value::from("x")),
                ("name", Value::from("Ada")),
            ]))
            .unwrap();

        assert_eq!(model.get("__collection__"), None);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn construction_is_silent() {
        let model = Model::new(
            person_schema(),
            map(&[("id", Value::Integer(1)), ("name", Value::from("Ada"))]),
        )
        .unwrap();
        let rx = model.subscribe();

        // Nothing from construction, one patch per later assign.
        model.assign("name", Value::from("Grace")).unwrap();
        let patch = rx.try_recv().unwrap();
        assert_eq!(patch.op, PatchOp::Replace);
        assert_eq!(patch.path, "/name");
        assert_eq!(patch.value, Some(Value::from("Grace")));
        assert_eq!(patch.old_value, Some(Value::from("Ada")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn noop_replace_emits_nothing() {
        let model = Model::new(person_schema(), map(&[("name", Value::from("Ada"))])).unwrap();
        let rx = model.subscribe();

        model.assign("name", Value::from("Ada")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn new_attribute_emits_add() {
        let model = Model::new(person_schema(), Map::new()).unwrap();
        let rx = model.subscribe();

        model.assign("name", Value::from("Ada")).unwrap();
        let patch = rx.try_recv().unwrap();
        assert_eq!(patch.op, PatchOp::Add);
        assert_eq!(patch.path, "/name");
    }

    #[test]
    fn unassign_removes_and_emits() {
        let model = Model::new(person_schema(), map(&[("name", Value::from("Ada"))])).unwrap();
        let rx = model.subscribe();

        let old = model.unassign("name");
        assert_eq!(old, Some(Value::from("Ada")));
        assert_eq!(model.get("name"), None);

        let patch = rx.try_recv().unwrap();
        assert_eq!(patch.op, PatchOp::Remove);
        assert_eq!(patch.old_value, Some(Value::from("Ada")));
    }

    #[test]
    fn snapshot_carries_type_tag() {
        let model = Model::new(
            person_schema(),
            map(&[("id", Value::Integer(1)), ("name", Value::from("Ada"))]),
        )
        .unwrap();

        let snapshot = model.snapshot();
        assert_eq!(snapshot.get(TYPE_PROP), Some(&Value::from("person")));
        assert_eq!(snapshot.get("name"), Some(&Value::from("Ada")));
        assert_eq!(snapshot.get("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn dynamic_type_reads_type_attribute() {
        let schema = Arc::new(ModelSchema::dynamic());
        let model = Model::new(schema, map(&[(TYPE_PROP, Value::from("note"))])).unwrap();
        assert_eq!(model.record_type(), TypeTag::new("note"));
    }

    #[test]
    fn dynamic_type_without_tag_is_default() {
        let model = Model::new(Arc::new(ModelSchema::dynamic()), Map::new()).unwrap();
        assert_eq!(model.record_type(), TypeTag::new(DEFAULT_TYPE));
    }

    #[test]
    fn apply_patch_round_trip() {
        let model = Model::new(person_schema(), map(&[("name", Value::from("Ada"))])).unwrap();

        model
            .apply_patch(&Patch::replace("/name", Value::from("Grace"), None))
            .unwrap();
        assert_eq!(model.get("name"), Some(Value::from("Grace")));

        model
            .apply_patch(&Patch::remove("/name", Some(Value::from("Grace"))))
            .unwrap();
        assert_eq!(model.get("name"), None);

        model
            .apply_patch(&Patch::add("/name", Value::from("Lin")))
            .unwrap();
        assert_eq!(model.get("name"), Some(Value::from("Lin")));
    }

    #[test]
    fn apply_patch_rejects_deep_paths() {
        let model = Model::new(person_schema(), Map::new()).unwrap();
        let err = model
            .apply_patch(&Patch::add("/a/b", Value::Null))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation { .. }));
    }

    #[test]
    fn handle_equality_is_instance_identity() {
        let a = Model::new(person_schema(), map(&[("id", Value::Integer(1))])).unwrap();
        let b = Model::new(person_schema(), map(&[("id", Value::Integer(1))])).unwrap();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn explicit_id_override() {
        let model = Model::with_id(person_schema(), Map::new(), 41i64).unwrap();
        assert_eq!(model.record_id(), Some(Key::Integer(41)));
    }

    #[test]
    fn custom_id_attribute() {
        let schema = Arc::new(ModelSchema::new("book").id_attribute("isbn"));
        let model = Model::new(schema, map(&[("isbn", Value::from("978-3"))])).unwrap();
        assert_eq!(model.record_id(), Some(Key::Text("978-3".into())));
    }
}
