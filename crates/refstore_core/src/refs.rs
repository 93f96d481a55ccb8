//! Reference resolution.
//!
//! A direct reference attribute stores raw key(s) and resolves to live
//! models against the owning collection on every read. Writes accept
//! bare keys, plain objects (upserted into the collection under the
//! declared target type) and live models, in scalars or arrays.
//!
//! Array references are exposed through [`RefList`], whose mutators all
//! funnel through one reconciliation routine, so the exposed entity
//! sequence and the stored key array always describe the same ordered
//! set of references.

use crate::collection::{BatchGuard, Collection, CollectionInner};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::model::Model;
use crate::patch::PatchOp;
use crate::schema::{RefKind, TypeTag};
use refstore_codec::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A value being written to a reference attribute.
#[derive(Debug, Clone)]
pub enum RefInput {
    /// Unset the reference.
    Null,
    /// A bare foreign key, passed through unchanged.
    Key(Key),
    /// A plain object, upserted under the declared target type.
    Object(Map),
    /// A live model, upserted (merged if already present).
    Model(Model),
    /// An array of any mix of the above.
    Many(Vec<RefInput>),
}

impl RefInput {
    pub(crate) fn contains_model(&self) -> bool {
        match self {
            RefInput::Model(_) => true,
            RefInput::Many(items) => items.iter().any(RefInput::contains_model),
            _ => false,
        }
    }

    /// Converts a raw attribute value into a reference input.
    pub(crate) fn from_value(key: &str, value: Value) -> StoreResult<Self> {
        Ok(match value {
            Value::Null => RefInput::Null,
            Value::Integer(n) => RefInput::Key(Key::Integer(n)),
            Value::Text(s) => RefInput::Key(Key::Text(s)),
            Value::Object(map) => RefInput::Object(map),
            Value::Array(items) => RefInput::Many(
                items
                    .into_iter()
                    .map(|item| Self::from_value(key, item))
                    .collect::<StoreResult<_>>()?,
            ),
            other => {
                return Err(StoreError::invalid_operation(format!(
                    "reference '{key}' cannot hold {other:?}"
                )))
            }
        })
    }
}

impl From<Key> for RefInput {
    fn from(key: Key) -> Self {
        RefInput::Key(key)
    }
}

impl From<i64> for RefInput {
    fn from(n: i64) -> Self {
        RefInput::Key(Key::Integer(n))
    }
}

impl From<&str> for RefInput {
    fn from(s: &str) -> Self {
        RefInput::Key(Key::Text(s.to_string()))
    }
}

impl From<String> for RefInput {
    fn from(s: String) -> Self {
        RefInput::Key(Key::Text(s))
    }
}

impl From<Map> for RefInput {
    fn from(map: Map) -> Self {
        RefInput::Object(map)
    }
}

impl From<Model> for RefInput {
    fn from(model: Model) -> Self {
        RefInput::Model(model)
    }
}

impl From<&Model> for RefInput {
    fn from(model: &Model) -> Self {
        RefInput::Model(model.clone())
    }
}

impl<T: Into<RefInput>> From<Vec<T>> for RefInput {
    fn from(items: Vec<T>) -> Self {
        RefInput::Many(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RefInput>> From<Option<T>> for RefInput {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(item) => item.into(),
            None => RefInput::Null,
        }
    }
}

impl Model {
    /// Writes a declared direct reference.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ExternalReference`] when `key` is an external
    ///   reference.
    /// - [`StoreError::UnanchoredReference`] when the value contains a
    ///   live model or object and this model has no owning collection.
    /// - [`StoreError::RefTypeMismatch`] when an upserted value
    ///   resolves to a different type than declared.
    pub fn set_ref(&self, key: &str, value: impl Into<RefInput>) -> StoreResult<()> {
        match self.ref_kind(key) {
            Some(RefKind::Direct(_)) => {
                self.set_ref_input(key, value.into())?;
                Ok(())
            }
            Some(RefKind::External { .. }) => Err(StoreError::external_reference(key)),
            None => Err(StoreError::invalid_operation(format!(
                "'{key}' is not a declared reference"
            ))),
        }
    }

    /// Promotes an attribute into a direct reference at runtime.
    ///
    /// The target type is inferred from the first model element of the
    /// value, else taken from `ty`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ExternalReference`] when the schema declares
    ///   `key` as an external reference.
    /// - [`StoreError::UnknownReferenceType`] when no target type can
    ///   be determined.
    pub fn assign_ref(
        &self,
        key: &str,
        value: impl Into<RefInput>,
        ty: Option<TypeTag>,
    ) -> StoreResult<()> {
        if matches!(self.schema().ref_kind(key), Some(RefKind::External { .. })) {
            return Err(StoreError::external_reference(key));
        }
        let input = value.into();
        if matches!(self.ref_kind(key), Some(RefKind::Direct(_))) {
            self.set_ref_input(key, input)?;
            return Ok(());
        }

        let first = match &input {
            RefInput::Many(items) => items.first(),
            other => Some(other),
        };
        let inferred = match first {
            Some(RefInput::Model(model)) => Some(model.record_type()),
            _ => None,
        };
        let target = inferred
            .or(ty)
            .ok_or_else(|| StoreError::unknown_reference_type(key))?;

        self.declare_ref(key.to_string(), RefKind::Direct(target));
        self.set_ref_input(key, input)?;
        Ok(())
    }

    /// Resolves a scalar reference to its model.
    ///
    /// Returns `None` when `key` is not a scalar direct reference, when
    /// the model is detached, or when the stored key resolves to
    /// nothing — absence is never an error.
    #[must_use]
    pub fn ref_one(&self, key: &str) -> Option<Model> {
        let RefKind::Direct(target) = self.ref_kind(key)? else {
            return None;
        };
        let id = Key::from_value(&self.get(key)?)?;
        self.collection_inner()?.find(&target, &id)
    }

    /// Returns the raw key of a scalar reference.
    #[must_use]
    pub fn ref_id(&self, key: &str) -> Option<Key> {
        Key::from_value(&self.get(key)?)
    }

    /// Returns the raw key(s) of a reference, scalar or array.
    #[must_use]
    pub fn ref_ids(&self, key: &str) -> Vec<Key> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Key::from_value).collect(),
            Some(scalar) => Key::from_value(&scalar).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Resolves every model a reference currently points at.
    ///
    /// Direct references resolve their stored key(s) against the
    /// owning collection, skipping unresolvable entries. External
    /// references scan the collection for models pointing back here.
    #[must_use]
    pub fn ref_all(&self, key: &str) -> Vec<Model> {
        match self.ref_kind(key) {
            Some(RefKind::Direct(target)) => {
                let Some(collection) = self.collection_inner() else {
                    return Vec::new();
                };
                self.ref_ids(key)
                    .iter()
                    .filter_map(|id| collection.find(&target, id))
                    .collect()
            }
            Some(RefKind::External { model, property }) => self.scan_external(&model, &property),
            None => Vec::new(),
        }
    }

    /// Returns the array view of a direct reference.
    ///
    /// A scalar reference reads as a one-element sequence; mutating the
    /// list stores an array. Returns `None` when `key` is not a direct
    /// reference.
    #[must_use]
    pub fn ref_list(&self, key: &str) -> Option<RefList> {
        match self.ref_kind(key) {
            Some(RefKind::Direct(_)) => Some(RefList {
                model: self.clone(),
                key: key.to_string(),
            }),
            _ => None,
        }
    }

    /// All models of `model_ty` whose reference `property` currently
    /// points at this model.
    fn scan_external(&self, model_ty: &TypeTag, property: &str) -> Vec<Model> {
        let Some(collection) = self.collection_inner() else {
            return Vec::new();
        };
        let Some(my_id) = self.record_id() else {
            return Vec::new();
        };
        let my_ty = self.record_type();

        collection
            .find_all(model_ty)
            .into_iter()
            .filter(|candidate| match candidate.ref_kind(property) {
                Some(RefKind::Direct(target)) if target == my_ty => {
                    candidate.ref_ids(property).contains(&my_id)
                }
                _ => false,
            })
            .collect()
    }

    /// The write path shared by `assign`, `set_ref` and `assign_ref`.
    pub(crate) fn set_ref_input(&self, key: &str, input: RefInput) -> StoreResult<Value> {
        let Some(RefKind::Direct(target)) = self.ref_kind(key) else {
            return Err(StoreError::invalid_operation(format!(
                "'{key}' is not a direct reference"
            )));
        };
        let collection = self.collection_inner();
        if collection.is_none() && input.contains_model() {
            return Err(StoreError::unanchored_reference(key));
        }

        let raw = match input {
            RefInput::Null => Value::Null,
            RefInput::Many(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(match resolve_to_key(collection.as_ref(), &target, key, item)? {
                        Some(id) => id.to_value(),
                        None => Value::Null,
                    });
                }
                Value::Array(keys)
            }
            single => match resolve_to_key(collection.as_ref(), &target, key, single)? {
                Some(id) => id.to_value(),
                None => Value::Null,
            },
        };
        self.store_ref_raw(key, raw)
    }

    /// Stores a resolved raw key form and emits the change.
    fn store_ref_raw(&self, key: &str, raw: Value) -> StoreResult<Value> {
        let old = {
            let mut attrs = self.inner.attributes.write();
            let old = attrs.get(key).cloned();
            attrs.insert(key.to_string(), raw.clone());
            old
        };
        let had_old = old.as_ref().is_some_and(|v| !v.is_null());
        if raw.is_null() {
            self.emit_field(
                PatchOp::Remove,
                key,
                None,
                old.filter(|v| !v.is_null()),
            );
        } else if !had_old {
            self.emit_field(PatchOp::Add, key, Some(raw.clone()), None);
        } else if old.as_ref() != Some(&raw) {
            self.emit_field(PatchOp::Replace, key, Some(raw.clone()), old);
        }
        Ok(raw)
    }

    /// Applies one splice to a reference array, resolving added
    /// elements by the same upsert rule as a fresh write.
    ///
    /// Returns the removed keys.
    pub(crate) fn splice_ref(
        &self,
        key: &str,
        index: usize,
        remove_count: usize,
        items: Vec<RefInput>,
    ) -> StoreResult<Vec<Key>> {
        let Some(RefKind::Direct(target)) = self.ref_kind(key) else {
            return Err(StoreError::invalid_operation(format!(
                "'{key}' is not a direct reference"
            )));
        };
        let collection = self.collection_inner();
        if collection.is_none() && items.iter().any(RefInput::contains_model) {
            return Err(StoreError::unanchored_reference(key));
        }

        let _batch = collection.as_ref().map(|c| BatchGuard::new(c.clone()));

        let mut added = Vec::with_capacity(items.len());
        for item in items {
            if matches!(item, RefInput::Many(_)) {
                return Err(StoreError::invalid_operation(format!(
                    "reference '{key}' cannot hold nested arrays"
                )));
            }
            added.push(match resolve_to_key(collection.as_ref(), &target, key, item)? {
                Some(id) => id.to_value(),
                None => Value::Null,
            });
        }

        let mut raw = match self.get(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(scalar) => vec![scalar],
        };
        let index = index.min(raw.len());
        let remove_count = remove_count.min(raw.len() - index);
        let removed: Vec<Key> = raw
            .splice(index..index + remove_count, added)
            .filter_map(|v| Key::from_value(&v))
            .collect();

        self.store_ref_raw(key, Value::Array(raw))?;
        Ok(removed)
    }
}

fn resolve_to_key(
    collection: Option<&Arc<CollectionInner>>,
    target: &TypeTag,
    key: &str,
    item: RefInput,
) -> StoreResult<Option<Key>> {
    match item {
        RefInput::Null => Ok(None),
        RefInput::Key(id) => Ok(Some(id)),
        RefInput::Object(map) => {
            let collection = collection.ok_or_else(|| StoreError::unanchored_reference(key))?;
            let model = Collection::from_inner(collection.clone()).add(map, target.clone())?;
            let actual = model.record_type();
            if actual != *target {
                return Err(StoreError::ref_type_mismatch(target.clone(), actual));
            }
            model
                .record_id()
                .map(Some)
                .ok_or_else(|| StoreError::invalid_operation("upserted model has no id"))
        }
        RefInput::Model(model) => {
            let collection = collection.ok_or_else(|| StoreError::unanchored_reference(key))?;
            let actual = model.record_type();
            if actual != *target {
                return Err(StoreError::ref_type_mismatch(target.clone(), actual));
            }
            let member = Collection::from_inner(collection.clone()).add_model(&model)?;
            member
                .record_id()
                .map(Some)
                .ok_or_else(|| StoreError::invalid_operation("upserted model has no id"))
        }
        RefInput::Many(_) => Err(StoreError::invalid_operation(format!(
            "reference '{key}' cannot hold nested arrays"
        ))),
    }
}

/// Live array view over a direct reference.
///
/// Reads re-resolve against the owning collection on every call. The
/// only mutators are the methods below; every one of them reconciles
/// the stored key array through [`Model::splice_ref`], so the exposed
/// sequence can never drift from the stored keys.
#[derive(Clone)]
pub struct RefList {
    model: Model,
    key: String,
}

impl RefList {
    /// Number of stored references (resolved or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw().len()
    }

    /// Whether the reference holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    /// The raw stored keys, in order. Unset entries are skipped.
    #[must_use]
    pub fn ids(&self) -> Vec<Key> {
        self.raw().iter().filter_map(Key::from_value).collect()
    }

    /// The resolved models, in order, with `None` holes for keys that
    /// do not currently resolve.
    #[must_use]
    pub fn models(&self) -> Vec<Option<Model>> {
        let collection = self.model.collection_inner();
        let Some(RefKind::Direct(target)) = self.model.ref_kind(&self.key) else {
            return Vec::new();
        };
        self.raw()
            .iter()
            .map(|entry| {
                let id = Key::from_value(entry)?;
                collection.as_ref()?.find(&target, &id)
            })
            .collect()
    }

    /// Resolves the reference at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Model> {
        self.models().into_iter().nth(index).flatten()
    }

    /// Appends a reference.
    pub fn push(&self, item: impl Into<RefInput>) -> StoreResult<()> {
        let len = self.len();
        self.model.splice_ref(&self.key, len, 0, vec![item.into()])?;
        Ok(())
    }

    /// Inserts a reference at `index`.
    pub fn insert(&self, index: usize, item: impl Into<RefInput>) -> StoreResult<()> {
        self.model.splice_ref(&self.key, index, 0, vec![item.into()])?;
        Ok(())
    }

    /// Replaces the reference at `index`.
    pub fn set(&self, index: usize, item: impl Into<RefInput>) -> StoreResult<()> {
        self.model.splice_ref(&self.key, index, 1, vec![item.into()])?;
        Ok(())
    }

    /// Removes the reference at `index`, returning its key.
    pub fn remove(&self, index: usize) -> StoreResult<Option<Key>> {
        let removed = self.model.splice_ref(&self.key, index, 1, Vec::new())?;
        Ok(removed.into_iter().next())
    }

    /// Removes `remove_count` references at `index` and inserts
    /// `items` in their place. Returns the removed keys.
    pub fn splice(
        &self,
        index: usize,
        remove_count: usize,
        items: Vec<RefInput>,
    ) -> StoreResult<Vec<Key>> {
        self.model.splice_ref(&self.key, index, remove_count, items)
    }

    fn raw(&self) -> Vec<Value> {
        match self.model.get(&self.key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(scalar) => vec![scalar],
        }
    }
}

impl fmt::Debug for RefList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefList")
            .field("key", &self.key)
            .field("ids", &self.ids())
            .finish()
    }
}
