//! Logical column types and their derivation from JSON schema.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar types a record field can declare.
///
/// Declaration order is the precedence order used when a union has to be
/// collapsed onto a single primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirbyteProtocolType {
    String,
    Number,
    Integer,
    Boolean,
    TimestampWithTimezone,
    TimestampWithoutTimezone,
    TimeWithTimezone,
    TimeWithoutTimezone,
    Date,
    Unknown,
}

impl AirbyteProtocolType {
    /// Resolve a primitive from a JSON schema node.
    ///
    /// Looks at `$ref` first (well-known Airbyte type definitions), then at
    /// `type` refined by `format` and `airbyte_type`.
    fn from_json(schema: &Value) -> Self {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return Self::from_ref(reference);
        }

        let Some(type_name) = schema.get("type").and_then(Value::as_str) else {
            return AirbyteProtocolType::Unknown;
        };
        Self::from_type_name(type_name, schema)
    }

    fn from_type_name(type_name: &str, schema: &Value) -> Self {
        let format = schema.get("format").and_then(Value::as_str);
        let airbyte_type = schema.get("airbyte_type").and_then(Value::as_str);

        match type_name {
            "string" => match format {
                Some("date-time") => match airbyte_type {
                    Some("timestamp_without_timezone") => {
                        AirbyteProtocolType::TimestampWithoutTimezone
                    }
                    _ => AirbyteProtocolType::TimestampWithTimezone,
                },
                Some("date") => AirbyteProtocolType::Date,
                Some("time") => match airbyte_type {
                    Some("time_without_timezone") => AirbyteProtocolType::TimeWithoutTimezone,
                    _ => AirbyteProtocolType::TimeWithTimezone,
                },
                _ => AirbyteProtocolType::String,
            },
            "number" => match airbyte_type {
                Some("integer") => AirbyteProtocolType::Integer,
                _ => AirbyteProtocolType::Number,
            },
            "integer" => AirbyteProtocolType::Integer,
            "boolean" => AirbyteProtocolType::Boolean,
            _ => AirbyteProtocolType::Unknown,
        }
    }

    fn from_ref(reference: &str) -> Self {
        match reference.rsplit('/').next().unwrap_or(reference) {
            "String" | "BinaryData" => AirbyteProtocolType::String,
            "Number" => AirbyteProtocolType::Number,
            "Integer" => AirbyteProtocolType::Integer,
            "Boolean" => AirbyteProtocolType::Boolean,
            "TimestampWithTimezone" => AirbyteProtocolType::TimestampWithTimezone,
            "TimestampWithoutTimezone" => AirbyteProtocolType::TimestampWithoutTimezone,
            "TimeWithTimezone" => AirbyteProtocolType::TimeWithTimezone,
            "TimeWithoutTimezone" => AirbyteProtocolType::TimeWithoutTimezone,
            "Date" => AirbyteProtocolType::Date,
            _ => AirbyteProtocolType::Unknown,
        }
    }
}

/// Logical type of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum AirbyteType {
    Primitive(AirbyteProtocolType),
    /// Object with ordered named properties.
    Struct(IndexMap<String, AirbyteType>),
    Array(Box<AirbyteType>),
    /// Several admissible types (`"type": [...]`).
    Union(Vec<AirbyteType>),
    /// A `oneOf` schema. Stored as JSON.
    UnsupportedOneOf(Vec<AirbyteType>),
}

impl AirbyteType {
    pub const UNKNOWN: AirbyteType = AirbyteType::Primitive(AirbyteProtocolType::Unknown);

    /// Collapse a union onto a single concrete type.
    ///
    /// Precedence is `Array`, then `Struct`, then primitives in declaration
    /// order. Non-union types are returned as is.
    pub fn choose_type(&self) -> AirbyteType {
        let AirbyteType::Union(options) = self else {
            return self.clone();
        };

        if options.is_empty() {
            return AirbyteType::UNKNOWN;
        }

        if let Some(array) = options.iter().find(|t| matches!(t, AirbyteType::Array(_))) {
            return array.clone();
        }
        if let Some(object) = options.iter().find(|t| matches!(t, AirbyteType::Struct(_))) {
            return object.clone();
        }

        options
            .iter()
            .filter_map(|t| match t {
                AirbyteType::Primitive(p) => Some(*p),
                _ => None,
            })
            .min()
            .map(AirbyteType::Primitive)
            .unwrap_or(AirbyteType::UNKNOWN)
    }

    /// Whether this type is (or, for a union, contains) a struct.
    pub fn is_struct_like(&self) -> bool {
        match self {
            AirbyteType::Struct(_) => true,
            AirbyteType::Union(options) => options.iter().any(|t| matches!(t, AirbyteType::Struct(_))),
            _ => false,
        }
    }

    /// Derive a type from a JSON schema node.
    pub fn from_json_schema(schema: &Value) -> AirbyteType {
        if let Some(options) = schema.get("oneOf").and_then(Value::as_array) {
            return AirbyteType::UnsupportedOneOf(
                options.iter().map(AirbyteType::from_json_schema).collect(),
            );
        }

        match schema.get("type") {
            Some(Value::String(type_name)) => Self::from_single_type(type_name, schema),
            Some(Value::Array(type_names)) => {
                let options: Vec<AirbyteType> = type_names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|t| *t != "null")
                    .map(|t| Self::from_single_type(t, schema))
                    .collect();
                match options.len() {
                    1 => options.into_iter().next().unwrap_or(AirbyteType::UNKNOWN),
                    _ => AirbyteType::Union(options),
                }
            }
            _ => AirbyteType::Primitive(AirbyteProtocolType::from_json(schema)),
        }
    }

    fn from_single_type(type_name: &str, schema: &Value) -> AirbyteType {
        match type_name {
            "object" => {
                let properties = schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, prop)| (name.clone(), AirbyteType::from_json_schema(prop)))
                            .collect()
                    })
                    .unwrap_or_default();
                AirbyteType::Struct(properties)
            }
            "array" => {
                let items = match schema.get("items") {
                    Some(items) if items.is_object() => AirbyteType::from_json_schema(items),
                    _ => AirbyteType::UNKNOWN,
                };
                AirbyteType::Array(Box::new(items))
            }
            other => AirbyteType::Primitive(AirbyteProtocolType::from_type_name(other, schema)),
        }
    }
}
