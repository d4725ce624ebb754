// crates/mediator-core/src/core/json.rs
// ============================================================================
// Module: Strict JSON Parsing
// Description: JSON parsing that rejects duplicate object keys and deep nesting.
// Purpose: Remove parser ambiguity before any signature or schema check runs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Standard JSON parsers silently keep the last value of a duplicated key, so
//! two readers of the same bytes can disagree about what a message says.
//! [`parse_strict`] rejects any object that repeats a key at any depth. Keys
//! are compared after escape decoding, so `"\u0061"` and `"a"` collide.
//!
//! The violation is reported through a typed side channel carried by the
//! deserializer seed, never recovered by inspecting error text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::Cell;
use std::fmt;

use serde::Deserializer;
use serde::de;
use serde::de::DeserializeSeed;
use serde::de::MapAccess;
use serde::de::SeqAccess;
use serde::de::Visitor;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum nesting depth of arrays and objects.
///
/// Kept below `serde_json`'s own recursion limit so this parser reports the
/// violation first.
pub const MAX_JSON_DEPTH: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Strict parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrictJsonError {
    /// An object repeats a key.
    #[error("duplicate json key: {key}")]
    DuplicateKey {
        /// The repeated key after escape decoding.
        key: String,
    },
    /// The document nests deeper than [`MAX_JSON_DEPTH`].
    #[error("json nesting exceeds {max_depth} levels")]
    DepthExceeded {
        /// Configured maximum depth.
        max_depth: usize,
    },
    /// The input is not well-formed UTF-8 JSON.
    #[error("invalid json: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses bytes into a JSON value, rejecting duplicate keys at every level.
///
/// # Errors
///
/// Returns [`StrictJsonError::DuplicateKey`] on the first repeated key,
/// [`StrictJsonError::DepthExceeded`] on excessive nesting, and
/// [`StrictJsonError::Parse`] for any other malformed input.
pub fn parse_strict(bytes: &[u8]) -> Result<Value, StrictJsonError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| StrictJsonError::Parse("input is not valid utf-8".to_string()))?;
    let violation = Cell::new(None);
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let seed = StrictValueSeed {
        violation: &violation,
        depth: 0,
    };
    match seed.deserialize(&mut deserializer) {
        Ok(value) => {
            deserializer.end().map_err(|err| StrictJsonError::Parse(err.to_string()))?;
            Ok(value)
        }
        Err(err) => {
            Err(violation.take().unwrap_or_else(|| StrictJsonError::Parse(err.to_string())))
        }
    }
}

// ============================================================================
// SECTION: Visitor
// ============================================================================

/// Seed that parses one JSON value at a known depth.
struct StrictValueSeed<'a> {
    /// Slot receiving the first strictness violation.
    violation: &'a Cell<Option<StrictJsonError>>,
    /// Nesting depth of the value being parsed.
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for StrictValueSeed<'_> {
    type Value = Value;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictValueVisitor {
            violation: self.violation,
            depth: self.depth,
        })
    }
}

/// Visitor building a [`Value`] while enforcing strictness rules.
struct StrictValueVisitor<'a> {
    /// Slot receiving the first strictness violation.
    violation: &'a Cell<Option<StrictJsonError>>,
    /// Nesting depth of the value being visited.
    depth: usize,
}

impl StrictValueVisitor<'_> {
    /// Returns the depth of a nested container, failing past the limit.
    fn enter<E: de::Error>(&self) -> Result<usize, E> {
        let depth = self.depth + 1;
        if depth > MAX_JSON_DEPTH {
            return Err(self.fail(StrictJsonError::DepthExceeded {
                max_depth: MAX_JSON_DEPTH,
            }));
        }
        Ok(depth)
    }

    /// Records a violation and converts it into a deserializer error.
    fn fail<E: de::Error>(&self, violation: StrictJsonError) -> E {
        let message = violation.to_string();
        self.violation.set(Some(violation));
        E::custom(message)
    }
}

impl<'de> Visitor<'de> for StrictValueVisitor<'_> {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("any valid JSON value")
    }

    fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
        Ok(Value::Bool(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
        Ok(Value::Number(value.into()))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
        Ok(Value::Number(value.into()))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Number::from_f64(value).map(Value::Number).ok_or_else(|| E::custom("invalid float value"))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
        Ok(Value::String(value.to_owned()))
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
        Ok(Value::String(value))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let depth = self.enter::<A::Error>()?;
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(StrictValueSeed {
            violation: self.violation,
            depth,
        })? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let depth = self.enter::<A::Error>()?;
        let mut object = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            if object.contains_key(&key) {
                return Err(self.fail(StrictJsonError::DuplicateKey {
                    key,
                }));
            }
            let value = map.next_value_seed(StrictValueSeed {
                violation: self.violation,
                depth,
            })?;
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn duplicate_key_in_nested_array_object_is_rejected() {
        let raw = br#"{"a":[{"x":1,"y":2,"x":3}]}"#;
        let err = parse_strict(raw).unwrap_err();
        assert_eq!(err, StrictJsonError::DuplicateKey { key: "x".to_string() });
    }

    #[test]
    fn escaped_key_collides_with_plain_key() {
        let raw = br#"{"a":1,"\u0061":2}"#;
        assert!(matches!(parse_strict(raw), Err(StrictJsonError::DuplicateKey { .. })));
    }

    #[test]
    fn trailing_garbage_is_a_parse_error() {
        assert!(matches!(parse_strict(br#"{"a":1} {"#), Err(StrictJsonError::Parse(_))));
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let depth = MAX_JSON_DEPTH + 1;
        let raw = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        assert_eq!(
            parse_strict(raw.as_bytes()).unwrap_err(),
            StrictJsonError::DepthExceeded { max_depth: MAX_JSON_DEPTH }
        );
    }

    #[test]
    fn same_key_in_sibling_objects_is_allowed() {
        let value = parse_strict(br#"{"a":{"k":1},"b":{"k":2}}"#).unwrap();
        assert_eq!(value["b"]["k"], 2);
    }
}
