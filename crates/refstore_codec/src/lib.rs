//! # refstore codec
//!
//! Plain-data value representation for refstore.
//!
//! This crate provides the boundary format of the store: a dynamic
//! [`Value`] tree that mirrors JSON, plus lossless conversion to and
//! from [`serde_json::Value`] for serialization.
//!
//! Model snapshots, bulk-import payloads and patch values are all
//! expressed as `Value` trees, so the store core never touches bytes
//! directly.
//!
//! ## Usage
//!
//! ```
//! use refstore_codec::{from_json_str, to_json_string, Value};
//!
//! let value = Value::object([("id", Value::Integer(1))]);
//! let json = to_json_string(&value).unwrap();
//!
//! let decoded = from_json_str(&json).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;
mod value;

pub use error::{CodecError, CodecResult};
pub use json::{from_json, from_json_str, to_json, to_json_string};
pub use value::{Map, Value};
