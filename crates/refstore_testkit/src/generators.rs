//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random store data that maintains
//! required invariants.

use proptest::prelude::*;
use refstore_codec::{Map, Value};
use refstore_core::Key;

/// Strategy for generating model keys, integer or text.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        (0i64..1000).prop_map(Key::Integer),
        "[a-z]{1,8}".prop_map(Key::Text),
    ]
}

/// Strategy for generating valid type names.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}").expect("valid regex")
}

/// Strategy for generating scalar attribute values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for generating small attribute maps (without an id).
pub fn attributes_strategy() -> impl Strategy<Value = Map> {
    proptest::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 0..5)
}
