//! Default-valued request templates
//!
//! Builds the JSON object a caller would fill in to make a request: every
//! field present, each holding the zero value of its type.

use crate::domain::ports::{FieldType, MessageDescriptor, SchemaRegistry};
use crate::error::{Error, Result};
use serde_json::{json, Map, Value};

/// Nesting limit for message types
pub const MAX_TEMPLATE_DEPTH: usize = 32;

/// Default instance of `message`, with nested types resolved through `registry`
///
/// Field order follows the definition.
pub fn default_template(message: &MessageDescriptor, registry: &dyn SchemaRegistry) -> Result<Value> {
    message_template(message, registry, 0)
}

fn message_template(
    message: &MessageDescriptor,
    registry: &dyn SchemaRegistry,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(Error::SchemaRecursion {
            type_name: message.type_name.clone(),
        });
    }

    let mut object = Map::with_capacity(message.fields.len());
    for field in &message.fields {
        object.insert(
            field.name.clone(),
            default_value(&field.field_type, registry, depth)?,
        );
    }
    Ok(Value::Object(object))
}

fn default_value(field_type: &FieldType, registry: &dyn SchemaRegistry, depth: usize) -> Result<Value> {
    let value = match field_type {
        FieldType::Bool => Value::Bool(false),
        FieldType::Int8
        | FieldType::Uint8
        | FieldType::Int16
        | FieldType::Uint16
        | FieldType::Int32
        | FieldType::Uint32
        | FieldType::Int64
        | FieldType::Uint64 => json!(0),
        FieldType::Float32 | FieldType::Float64 => json!(0.0),
        FieldType::String => Value::String(String::new()),
        FieldType::Time | FieldType::Duration => json!({ "secs": 0, "nsecs": 0 }),
        FieldType::Message(type_name) => {
            let nested = registry.resolve_message(type_name)?;
            message_template(&nested, registry, depth + 1)?
        }
        FieldType::Array { len: None, .. } => Value::Array(Vec::new()),
        FieldType::Array {
            element,
            len: Some(len),
        } => {
            let element = default_value(element, registry, depth)?;
            Value::Array(vec![element; *len])
        }
    };
    Ok(value)
}
