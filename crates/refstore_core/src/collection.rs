//! The indexed model container.
//!
//! A [`Collection`] holds heterogeneous models in one index: an
//! ordered member list, an id-keyed `(type, id)` lookup table, and
//! per-type member lists kept consistent incrementally. `add` has
//! upsert semantics — a second add of the same `(type, id)` merges
//! into and returns the original instance, never a duplicate.
//!
//! Member patches are re-broadcast with collection-level paths, so one
//! subscription observes every mutation in the graph. Bulk operations
//! run inside a batch: their patches are delivered only after the
//! whole operation completes, in order.

use crate::error::{StoreError, StoreResult};
use crate::feed::PatchFeed;
use crate::key::Key;
use crate::model::{CreateOpts, Model};
use crate::patch::{field_path, member_path, Patch, PatchOp};
use crate::schema::{SchemaRegistry, TypeTag, TYPE_PROP};
use parking_lot::{Mutex, RwLock};
use refstore_codec::{Map, Value};
use std::collections::HashMap;
use std::mem;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<Patch>,
}

pub(crate) struct CollectionInner {
    registry: SchemaRegistry,
    members: RwLock<Vec<Model>>,
    index: RwLock<HashMap<(TypeTag, Key), Model>>,
    by_type: RwLock<HashMap<TypeTag, Vec<Model>>>,
    feed: PatchFeed,
    batch: Mutex<BatchState>,
}

impl CollectionInner {
    pub(crate) fn find(&self, ty: &TypeTag, id: &Key) -> Option<Model> {
        self.index.read().get(&(ty.clone(), id.clone())).cloned()
    }

    pub(crate) fn find_all(&self, ty: &TypeTag) -> Vec<Model> {
        self.by_type.read().get(ty).cloned().unwrap_or_default()
    }

    /// Delivers a collection-level patch, buffering it while a batch
    /// is open.
    pub(crate) fn broadcast(&self, patch: Patch) {
        trace!(path = %patch.path, op = ?patch.op, "patch");
        let mut batch = self.batch.lock();
        if batch.depth > 0 {
            batch.pending.push(patch);
            return;
        }
        drop(batch);
        self.feed.emit(patch);
    }
}

/// Suspends patch delivery until the outermost batch completes.
pub(crate) struct BatchGuard {
    inner: Arc<CollectionInner>,
}

impl BatchGuard {
    pub(crate) fn new(inner: Arc<CollectionInner>) -> Self {
        inner.batch.lock().depth += 1;
        Self { inner }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let pending = {
            let mut batch = self.inner.batch.lock();
            batch.depth -= 1;
            if batch.depth > 0 {
                return;
            }
            mem::take(&mut batch.pending)
        };
        self.inner.feed.emit_batch(pending);
    }
}

/// The indexed container of all model instances, keyed by type and id.
///
/// `Collection` is a cheap handle over shared state; clones observe
/// the same members.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Creates an empty collection with the given registry.
    #[must_use]
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                registry,
                members: RwLock::new(Vec::new()),
                index: RwLock::new(HashMap::new()),
                by_type: RwLock::new(HashMap::new()),
                feed: PatchFeed::new(),
                batch: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Reconstructs a collection from serialized data (the output of
    /// [`Collection::to_value`]).
    ///
    /// # Errors
    ///
    /// Fails when an item is not an object or lacks a resolvable type
    /// tag.
    pub fn from_snapshot(registry: SchemaRegistry, data: Vec<Value>) -> StoreResult<Self> {
        let collection = Self::new(registry);
        collection.insert(data)?;
        Ok(collection)
    }

    pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
        Self { inner }
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.members.read().len()
    }

    /// Whether the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.members.read().is_empty()
    }

    /// All members, in insertion order.
    #[must_use]
    pub fn models(&self) -> Vec<Model> {
        self.inner.members.read().clone()
    }

    /// Constructs a model of `ty` from plain data and upserts it.
    ///
    /// Nested reference objects are upserted recursively during
    /// construction. When a member with the same `(type, id)` already
    /// exists, the data is merged into it and the existing instance is
    /// returned.
    pub fn add(&self, data: Map, ty: impl Into<TypeTag>) -> StoreResult<Model> {
        let tag = ty.into();
        let schema = self.inner.registry.resolve(&tag);
        let model = Model::create(
            schema,
            data.clone(),
            CreateOpts {
                type_override: Some(tag),
                id_override: None,
            },
            Some(&self.inner),
        )?;
        self.attach(model, data)
    }

    /// Adds a list of plain objects of one type, in one batch.
    pub fn add_many(&self, items: Vec<Map>, ty: impl Into<TypeTag>) -> StoreResult<Vec<Model>> {
        let tag = ty.into();
        self.batch(|| {
            items
                .into_iter()
                .map(|item| self.add(item, tag.clone()))
                .collect()
        })
    }

    /// Upserts an existing model instance.
    ///
    /// A member with the same `(type, id)` absorbs the incoming
    /// instance's attributes and is returned; otherwise the instance
    /// itself becomes a member (detaching from any previous owner
    /// first, since a model belongs to at most one collection).
    pub fn add_model(&self, model: &Model) -> StoreResult<Model> {
        let ty = model.record_type();
        let id = model
            .record_id()
            .ok_or_else(|| StoreError::invalid_operation("model has no id"))?;

        if let Some(existing) = self.inner.find(&ty, &id) {
            if existing == *model {
                return Ok(existing);
            }
            existing.update(model.raw_attributes())?;
            return Ok(existing);
        }

        if let Some(previous) = model.collection() {
            if !Arc::ptr_eq(&previous.inner, &self.inner) {
                previous.detach(model);
            }
        }
        self.insert_member(model.clone(), ty, id);
        Ok(model.clone())
    }

    /// Bulk-imports serialized objects, each carrying its own type
    /// under [`TYPE_PROP`]. Runs in one batch.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::UnresolvableType`] when an item is not
    /// an object or has no type tag.
    pub fn insert(&self, data: Vec<Value>) -> StoreResult<Vec<Model>> {
        self.batch(|| {
            data.into_iter()
                .map(|value| {
                    let map = value.into_object().ok_or_else(|| {
                        StoreError::unresolvable_type("import item is not an object")
                    })?;
                    let tag = map
                        .get(TYPE_PROP)
                        .and_then(Value::as_text)
                        .map(TypeTag::new)
                        .ok_or_else(|| {
                            StoreError::unresolvable_type(format!(
                                "import item has no '{TYPE_PROP}' tag"
                            ))
                        })?;
                    let schema = self.inner.registry.resolve(&tag);
                    let model = Model::create(
                        schema,
                        map.clone(),
                        CreateOpts::default(),
                        Some(&self.inner),
                    )?;
                    self.attach(model, map)
                })
                .collect()
        })
    }

    /// O(1) lookup by type and id.
    #[must_use]
    pub fn find(&self, ty: impl Into<TypeTag>, id: impl Into<Key>) -> Option<Model> {
        self.inner.find(&ty.into(), &id.into())
    }

    /// First member of a type, in insertion order.
    #[must_use]
    pub fn find_first(&self, ty: impl Into<TypeTag>) -> Option<Model> {
        self.inner.by_type.read().get(&ty.into())?.first().cloned()
    }

    /// All members of a type, in insertion order.
    #[must_use]
    pub fn find_all(&self, ty: impl Into<TypeTag>) -> Vec<Model> {
        self.inner.find_all(&ty.into())
    }

    /// Removes a member by type and id.
    ///
    /// The removed model stays valid but detached: its plain
    /// attributes survive and reference resolution degrades until it
    /// is re-added. Returns `None` when nothing matched.
    pub fn remove(&self, ty: impl Into<TypeTag>, id: impl Into<Key>) -> Option<Model> {
        let model = self.find(ty, id)?;
        self.detach(&model);
        Some(model)
    }

    /// Removes the first member of a type.
    pub fn remove_first(&self, ty: impl Into<TypeTag>) -> Option<Model> {
        let model = self.find_first(ty)?;
        self.detach(&model);
        Some(model)
    }

    /// Removes all members of a type, in one batch.
    pub fn remove_all(&self, ty: impl Into<TypeTag>) -> Vec<Model> {
        let models = self.find_all(ty);
        self.batch(|| {
            for model in &models {
                self.detach(model);
            }
        });
        models
    }

    /// Removes every member, in one batch.
    pub fn reset(&self) {
        let models = self.models();
        self.batch(|| {
            for model in &models {
                self.detach(model);
            }
        });
    }

    /// Serializes the collection: an array of member snapshots.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.models().iter().map(Model::to_value).collect())
    }

    /// Snapshot of the collection's serialized state.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.to_value()
    }

    /// Subscribes to collection-level patches.
    pub fn subscribe(&self) -> Receiver<Patch> {
        self.inner.feed.subscribe()
    }

    /// Runs `f` with patch delivery suspended; buffered patches are
    /// delivered in order when the outermost batch completes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = BatchGuard::new(self.inner.clone());
        f()
    }

    /// Replays an externally supplied collection-level patch.
    ///
    /// `/<type>/<id>/<field>` paths dispatch to the addressed model;
    /// `/<type>/<id>` paths perform a membership add or remove.
    ///
    /// # Errors
    ///
    /// Fails when the path shape is unsupported, the addressed model
    /// is absent, or the replayed mutation itself fails.
    pub fn apply_patch(&self, patch: &Patch) -> StoreResult<()> {
        let segments = patch.segments();
        match segments.as_slice() {
            [ty, id, field] => {
                let ty = TypeTag::new(ty.clone());
                let id = Key::from_path_segment(id);
                let model = self
                    .inner
                    .find(&ty, &id)
                    .ok_or_else(|| StoreError::model_not_found(ty, id))?;
                let field_patch = Patch {
                    op: patch.op,
                    path: field_path(field),
                    value: patch.value.clone(),
                    old_value: patch.old_value.clone(),
                };
                model.apply_patch(&field_patch)
            }
            [ty, id] => {
                let ty = TypeTag::new(ty.clone());
                let id = Key::from_path_segment(id);
                match patch.op {
                    PatchOp::Add | PatchOp::Replace => {
                        let map = patch
                            .value
                            .clone()
                            .and_then(Value::into_object)
                            .ok_or_else(|| {
                                StoreError::invalid_operation(
                                    "membership patch value must be an object",
                                )
                            })?;
                        self.add(map, ty)?;
                        Ok(())
                    }
                    PatchOp::Remove => {
                        self.remove(ty, id);
                        Ok(())
                    }
                    PatchOp::Copy | PatchOp::Move | PatchOp::Test => Ok(()),
                }
            }
            _ => Err(StoreError::invalid_operation(format!(
                "unsupported patch path '{}'",
                patch.path
            ))),
        }
    }

    /// Upsert step shared by `add` and `insert`: a freshly constructed
    /// model either merges into an existing `(type, id)` member or
    /// becomes one.
    fn attach(&self, model: Model, raw: Map) -> StoreResult<Model> {
        let ty = model.record_type();
        let id = model
            .record_id()
            .ok_or_else(|| StoreError::invalid_operation("model has no id"))?;

        if let Some(existing) = self.inner.find(&ty, &id) {
            if existing == model {
                return Ok(existing);
            }
            // The fresh instance never became a member; its nested
            // upserts already landed in the collection.
            model.clear_collection();
            existing.update(raw)?;
            return Ok(existing);
        }

        self.insert_member(model.clone(), ty, id);
        Ok(model)
    }

    fn insert_member(&self, model: Model, ty: TypeTag, id: Key) {
        model.set_collection(&self.inner);
        self.inner.members.write().push(model.clone());
        self.inner
            .index
            .write()
            .insert((ty.clone(), id.clone()), model.clone());
        self.inner
            .by_type
            .write()
            .entry(ty.clone())
            .or_default()
            .push(model.clone());

        debug!(ty = %ty, id = %id, "model added");
        self.inner
            .broadcast(Patch::add(member_path(&ty, &id), model.to_value()));
    }

    /// Detaches a member from the list, index and per-type lists,
    /// clears its back-reference and emits a membership remove patch.
    pub(crate) fn detach(&self, model: &Model) {
        let ty = model.record_type();
        let id = model.record_id();

        self.inner.members.write().retain(|member| member != model);
        if let Some(id) = &id {
            self.inner.index.write().remove(&(ty.clone(), id.clone()));
        }
        if let Some(list) = self.inner.by_type.write().get_mut(&ty) {
            list.retain(|member| member != model);
        }
        model.clear_collection();

        if let Some(id) = id {
            debug!(ty = %ty, id = %id, "model removed");
            self.inner
                .broadcast(Patch::remove(member_path(&ty, &id), Some(model.to_value())));
        }
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
