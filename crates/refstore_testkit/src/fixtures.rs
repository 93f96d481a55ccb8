//! Store fixtures and sample payloads.
//!
//! Provides pre-built registries and data sets for the scenarios the
//! store is designed around: a flat person index and a shop graph
//! (users, carts, cart items, products) with nested references.

use refstore_codec::{from_json, Map, Value};
use refstore_core::{Collection, ModelSchema, SchemaRegistry};

/// A test store with automatic access to its collection.
pub struct TestStore {
    /// The collection under test.
    pub store: Collection,
}

impl TestStore {
    /// Creates a store over the person registry.
    pub fn person() -> Self {
        Self {
            store: Collection::new(person_registry()),
        }
    }

    /// Creates a store over the shop registry.
    pub fn shop() -> Self {
        Self {
            store: Collection::new(shop_registry()),
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Collection;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Registry with a single `person` type.
pub fn person_registry() -> SchemaRegistry {
    SchemaRegistry::new().register(ModelSchema::new("person"))
}

/// Registry for the shop graph:
///
/// - `user`, with a derived `carts` set (all carts pointing at the
///   user)
/// - `product`
/// - `cartItem`, referencing one `product`
/// - `cart`, referencing one `user` and many `cartItem`s
pub fn shop_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(ModelSchema::new("user").external_reference("carts", "cart", "user"))
        .register(ModelSchema::new("product"))
        .register(ModelSchema::new("cartItem").reference("product", "product"))
        .register(
            ModelSchema::new("cart")
                .reference("user", "user")
                .reference("products", "cartItem"),
        )
}

/// A nested raw cart payload, the shape an API would return: the user
/// and every product are inline objects that normalize into their own
/// typed members on a single `add`.
pub fn cart_payload() -> Map {
    json_object(
        r#"{
            "id": 1,
            "user": {"id": 7, "name": "Ada"},
            "products": [
                {"id": 11, "quantity": 2, "product": {"id": 101, "name": "Pen", "price": 3}},
                {"id": 12, "quantity": 1, "product": {"id": 102, "name": "Ink", "price": 9}}
            ]
        }"#,
    )
}

/// Parses a JSON object literal into an attribute map.
///
/// # Panics
///
/// Panics on invalid JSON or a non-object literal; fixtures are
/// test-only.
pub fn json_object(json: &str) -> Map {
    let parsed: serde_json::Value = serde_json::from_str(json).expect("fixture JSON is valid");
    from_json(parsed)
        .into_object()
        .expect("fixture JSON is an object")
}

/// Parses a JSON array literal into a list of values.
///
/// # Panics
///
/// Panics on invalid JSON or a non-array literal.
pub fn json_array(json: &str) -> Vec<Value> {
    let parsed: serde_json::Value = serde_json::from_str(json).expect("fixture JSON is valid");
    match from_json(parsed) {
        Value::Array(items) => items,
        other => panic!("fixture JSON is not an array: {other:?}"),
    }
}
