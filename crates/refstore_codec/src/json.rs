//! JSON conversion.
//!
//! Snapshots and bulk-import payloads cross the process boundary as
//! JSON. These functions convert between [`Value`] trees and
//! [`serde_json::Value`] / JSON text.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Convert a JSON tree into a [`Value`].
///
/// Numbers that fit `i64` become [`Value::Integer`]; all other numbers
/// (including `u64` values above `i64::MAX`) become [`Value::Float`].
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                // u64 out of i64 range, or a true float
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter().map(|(k, v)| (k, from_json(v))).collect(),
        ),
    }
}

/// Convert a [`Value`] into a JSON tree.
///
/// # Errors
///
/// Returns an error if the value contains a non-finite float, which
/// JSON cannot represent.
pub fn to_json(value: &Value) -> CodecResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                CodecError::encoding_failed("non-finite float cannot be represented in JSON")
            })?,
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<CodecResult<_>>()?)
        }
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
    })
}

/// Parse JSON text into a [`Value`].
///
/// # Errors
///
/// Returns an error if the input is not valid JSON.
pub fn from_json_str(input: &str) -> CodecResult<Value> {
    let json: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    Ok(from_json(json))
}

/// Serialize a [`Value`] to JSON text.
///
/// # Errors
///
/// Returns an error if the value contains a non-finite float.
pub fn to_json_string(value: &Value) -> CodecResult<String> {
    serde_json::to_string(&to_json(value)?)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_object() {
        let value = Value::object([
            ("id", Value::Integer(1)),
            ("name", Value::from("Alice")),
            ("tags", Value::array([Value::from("a"), Value::from("b")])),
            ("score", Value::Float(0.5)),
            ("active", Value::Bool(true)),
            ("extra", Value::Null),
        ]);

        let json = to_json_string(&value).unwrap();
        let decoded = from_json_str(&json).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn integers_stay_integers() {
        let decoded = from_json_str("{\"id\": 42}").unwrap();
        assert_eq!(decoded.get("id"), Some(&Value::Integer(42)));
    }

    #[test]
    fn floats_stay_floats() {
        let decoded = from_json_str("{\"rate\": 1.25}").unwrap();
        assert_eq!(decoded.get("rate"), Some(&Value::Float(1.25)));
    }

    #[test]
    fn large_u64_becomes_float() {
        let decoded = from_json_str("18446744073709551615").unwrap();
        assert!(matches!(decoded, Value::Float(_)));
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let value = Value::Float(f64::NAN);
        assert!(to_json_string(&value).is_err());
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(from_json_str("{not json").is_err());
    }

    proptest! {
        #[test]
        fn scalar_round_trip(n in any::<i64>(), s in "[a-zA-Z0-9 ]{0,32}") {
            let value = Value::object([
                ("n", Value::Integer(n)),
                ("s", Value::from(s.as_str())),
            ]);
            let json = to_json_string(&value).unwrap();
            prop_assert_eq!(from_json_str(&json).unwrap(), value);
        }
    }
}
