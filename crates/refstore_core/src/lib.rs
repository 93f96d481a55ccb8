//! # refstore core
//!
//! A normalized, reactive, in-memory object graph: typed collections
//! of models that reference one another by identifier, stay in sync
//! when either side of a reference changes, and serialize to and
//! reconstruct from plain data.
//!
//! This crate provides:
//! - [`Collection`] — the indexed container with upsert/find/remove
//!   semantics
//! - [`Model`] — one entity with dynamic attributes and typed
//!   references
//! - [`ModelSchema`] / [`SchemaRegistry`] — per-type configuration and
//!   constructor dispatch
//! - [`Patch`] — the JSON-Patch-style change protocol shared by models
//!   and collections
//! - [`History`] — undo/redo over the patch feed
//!
//! ## Example
//!
//! ```
//! use refstore_core::{Collection, ModelSchema, SchemaRegistry};
//! use refstore_codec::Value;
//!
//! let registry = SchemaRegistry::new()
//!     .register(ModelSchema::new("user"))
//!     .register(ModelSchema::new("cart").reference("user", "user"));
//! let store = Collection::new(registry);
//!
//! let cart = store
//!     .add(
//!         [
//!             ("id".to_string(), Value::Integer(1)),
//!             (
//!                 "user".to_string(),
//!                 Value::object([("id", Value::Integer(7)), ("name", Value::from("Ada"))]),
//!             ),
//!         ]
//!         .into_iter()
//!         .collect(),
//!         "cart",
//!     )
//!     .unwrap();
//!
//! // The inline user was upserted and the reference resolves live.
//! let user = cart.ref_one("user").unwrap();
//! assert_eq!(user.get("name"), Some(Value::from("Ada")));
//! assert_eq!(store.len(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod feed;
mod history;
mod key;
mod model;
mod patch;
mod refs;
mod schema;

pub use collection::Collection;
pub use error::{StoreError, StoreResult};
pub use history::History;
pub use key::Key;
pub use model::Model;
pub use patch::{Patch, PatchOp};
pub use refs::{RefInput, RefList};
pub use schema::{
    ModelSchema, RefKind, SchemaRegistry, TypeSource, TypeTag, DEFAULT_TYPE, RESERVED_KEYS,
    TYPE_PROP,
};
