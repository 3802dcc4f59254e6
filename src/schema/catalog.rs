//! In-memory schema catalog
//!
//! Parses `.msg` and `.srv` definition text into descriptors and serves
//! them through [`SchemaRegistry`].

use crate::domain::ports::{
    FieldDescriptor, FieldType, MessageDescriptor, SchemaRegistry, ServiceDescriptor,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Separates request from response in a service definition
const SERVICE_SEPARATOR: &str = "---";

/// Registry backed by definitions registered at runtime
#[derive(Default)]
pub struct SchemaCatalog {
    messages: RwLock<HashMap<String, MessageDescriptor>>,
    services: RwLock<HashMap<String, ServiceDescriptor>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with `std_msgs/Header`
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        // Builtin text is static and known to parse
        let _ = catalog.register_message(
            "std_msgs/Header",
            "uint32 seq\ntime stamp\nstring frame_id\n",
        );
        catalog
    }

    /// Parse and register a message definition under `type_name`
    pub fn register_message(&self, type_name: &str, definition: &str) -> Result<()> {
        let (package, _) = split_type_name(type_name)?;
        let descriptor = MessageDescriptor {
            type_name: type_name.to_string(),
            fields: parse_fields(type_name, package, definition)?,
            definition: definition.to_string(),
        };
        debug!(type_name, fields = descriptor.fields.len(), "Registered message type");
        self.messages
            .write()
            .insert(type_name.to_string(), descriptor);
        Ok(())
    }

    /// Parse and register a service definition under `type_name`
    ///
    /// The request and response halves are named `<type>Request` and
    /// `<type>Response`.
    pub fn register_service(&self, type_name: &str, definition: &str) -> Result<()> {
        let (package, _) = split_type_name(type_name)?;

        let mut request_text = String::new();
        let mut response_text = String::new();
        let mut in_response = false;
        for line in definition.lines() {
            if !in_response && line.trim() == SERVICE_SEPARATOR {
                in_response = true;
                continue;
            }
            let target = if in_response {
                &mut response_text
            } else {
                &mut request_text
            };
            target.push_str(line);
            target.push('\n');
        }
        if !in_response {
            return Err(Error::SchemaDefinition {
                type_name: type_name.to_string(),
                reason: format!("missing '{}' separator", SERVICE_SEPARATOR),
            });
        }

        let request_name = format!("{}Request", type_name);
        let response_name = format!("{}Response", type_name);
        let descriptor = ServiceDescriptor {
            type_name: type_name.to_string(),
            request: MessageDescriptor {
                fields: parse_fields(&request_name, package, &request_text)?,
                type_name: request_name,
                definition: request_text,
            },
            response: MessageDescriptor {
                fields: parse_fields(&response_name, package, &response_text)?,
                type_name: response_name,
                definition: response_text,
            },
        };

        debug!(
            type_name,
            request_fields = descriptor.request.fields.len(),
            response_fields = descriptor.response.fields.len(),
            "Registered service type"
        );
        self.services
            .write()
            .insert(type_name.to_string(), descriptor);
        Ok(())
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }
}

impl SchemaRegistry for SchemaCatalog {
    fn resolve_message(&self, type_name: &str) -> Result<MessageDescriptor> {
        self.messages
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    fn resolve_service(&self, type_name: &str) -> Result<ServiceDescriptor> {
        self.services
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownType {
                type_name: type_name.to_string(),
            })
    }
}

/// Split `package/Type` into its two halves
pub fn split_type_name(type_name: &str) -> Result<(&str, &str)> {
    match type_name.split_once('/') {
        Some((package, name))
            if !package.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((package, name))
        }
        _ => Err(Error::InvalidTypeName {
            type_name: type_name.to_string(),
        }),
    }
}

fn parse_fields(type_name: &str, package: &str, definition: &str) -> Result<Vec<FieldDescriptor>> {
    let mut fields = Vec::new();

    for raw in definition.lines() {
        let line = match raw.split_once('#') {
            Some((code, _)) => code,
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(type_token), Some(name_token)) = (parts.next(), parts.next()) else {
            return Err(Error::SchemaDefinition {
                type_name: type_name.to_string(),
                reason: format!("malformed field '{}'", line),
            });
        };
        // Constants: `int32 FOO=1` or `int32 FOO = 1`
        if name_token.contains('=') || parts.next().is_some_and(|t| t.starts_with('=')) {
            continue;
        }

        let field_type = parse_field_type(type_token, package).map_err(|reason| {
            Error::SchemaDefinition {
                type_name: type_name.to_string(),
                reason,
            }
        })?;
        fields.push(FieldDescriptor {
            name: name_token.to_string(),
            field_type,
        });
    }

    Ok(fields)
}

fn parse_field_type(token: &str, package: &str) -> std::result::Result<FieldType, String> {
    if let Some((element, rest)) = token.split_once('[') {
        let len = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated array type '{}'", token))?;
        let len = if len.is_empty() {
            None
        } else {
            Some(
                len.parse::<usize>()
                    .map_err(|_| format!("invalid array length in '{}'", token))?,
            )
        };
        return Ok(FieldType::Array {
            element: Box::new(parse_field_type(element, package)?),
            len,
        });
    }

    let field_type = match token {
        "bool" => FieldType::Bool,
        "int8" | "byte" => FieldType::Int8,
        "uint8" | "char" => FieldType::Uint8,
        "int16" => FieldType::Int16,
        "uint16" => FieldType::Uint16,
        "int32" => FieldType::Int32,
        "uint32" => FieldType::Uint32,
        "int64" => FieldType::Int64,
        "uint64" => FieldType::Uint64,
        "float32" => FieldType::Float32,
        "float64" => FieldType::Float64,
        "string" => FieldType::String,
        "time" => FieldType::Time,
        "duration" => FieldType::Duration,
        "Header" => FieldType::Message("std_msgs/Header".to_string()),
        qualified if qualified.contains('/') => FieldType::Message(qualified.to_string()),
        bare => FieldType::Message(format!("{}/{}", package, bare)),
    };
    Ok(field_type)
}
