// crates/mediator-core/src/core/schema.rs
// ============================================================================
// Module: Closed Schemas
// Description: JSON Schema compilation that rejects undeclared fields.
// Purpose: Share one structural validation rule between payloads and tool args.
// Dependencies: jsonschema, serde_json
// ============================================================================

//! ## Overview
//! Payloads and tool arguments must not carry fields their schema does not
//! declare. [`compile_closed_schema`] adds `"additionalProperties": false` to
//! every object schema that leaves it unspecified before compiling with
//! Draft 2020-12. Closing descends through `properties`, `items`,
//! `prefixItems`, `patternProperties`, `$defs` and `definitions`. Composition
//! keywords (`allOf`, `anyOf`, `oneOf`) are left as authored, since closing a
//! branch would reject fields declared by its siblings.

use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

/// Schema compilation failure.
#[derive(Debug, Error)]
#[error("invalid json schema: {0}")]
pub struct SchemaError(pub String);

/// Compiled schema that rejects undeclared object fields.
pub struct ClosedSchema {
    /// Compiled validator.
    validator: Validator,
}

impl std::fmt::Debug for ClosedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedSchema").finish_non_exhaustive()
    }
}

impl ClosedSchema {
    /// Returns the first violation message, if any.
    #[must_use]
    pub fn first_violation(&self, instance: &Value) -> Option<String> {
        self.validator.iter_errors(instance).next().map(|err| err.to_string())
    }
}

/// Closes and compiles `schema` under Draft 2020-12.
///
/// # Errors
///
/// Returns [`SchemaError`] when the schema is not a valid JSON Schema.
pub fn compile_closed_schema(schema: &Value) -> Result<ClosedSchema, SchemaError> {
    let closed = close_schema(schema);
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&closed)
        .map_err(|err| SchemaError(err.to_string()))?;
    Ok(ClosedSchema {
        validator,
    })
}

/// Returns a copy of `schema` with object schemas closed.
#[must_use]
pub fn close_schema(schema: &Value) -> Value {
    let mut closed = schema.clone();
    close_in_place(&mut closed);
    closed
}

/// Recursively closes object schemas.
fn close_in_place(schema: &mut Value) {
    let Value::Object(node) = schema else {
        return;
    };
    let describes_object = node.get("type").is_some_and(|ty| ty == "object")
        || node.contains_key("properties");
    if describes_object
        && !node.contains_key("additionalProperties")
        && !node.contains_key("unevaluatedProperties")
    {
        node.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    for keyword in ["properties", "patternProperties", "$defs", "definitions"] {
        if let Some(Value::Object(children)) = node.get_mut(keyword) {
            children.values_mut().for_each(close_in_place);
        }
    }
    for keyword in ["items", "additionalProperties"] {
        if let Some(child) = node.get_mut(keyword) {
            close_in_place(child);
        }
    }
    if let Some(Value::Array(children)) = node.get_mut("prefixItems") {
        children.iter_mut().for_each(close_in_place);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::*;

    #[test]
    fn nested_unknown_field_is_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {
                "meta": {"type": "object", "properties": {"tag": {"type": "string"}}}
            }
        });
        let compiled = compile_closed_schema(&schema).unwrap();
        assert!(compiled.first_violation(&json!({"meta": {"tag": "a"}})).is_none());
        assert!(compiled.first_violation(&json!({"meta": {"tag": "a", "x": 1}})).is_some());
        assert!(compiled.first_violation(&json!({"other": 1})).is_some());
    }

    #[test]
    fn explicit_additional_properties_is_respected() {
        let schema = json!({"type": "object", "additionalProperties": {"type": "integer"}});
        let compiled = compile_closed_schema(&schema).unwrap();
        assert!(compiled.first_violation(&json!({"n": 1})).is_none());
    }
}
