use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// --- Field Types ---

/// Primitive value types a field (or an array field's elements) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Int32,
    Int64,
    Float,
    Bool,
    /// `[lat, lng]` pair of floats.
    Geopoint,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::Geopoint => "geopoint",
        }
    }

    /// Type name with its indefinite article, for error messages ("an int32").
    pub fn described(&self) -> &'static str {
        match self {
            ScalarType::String => "a string",
            ScalarType::Int32 => "an int32",
            ScalarType::Int64 => "an int64",
            ScalarType::Float => "a float",
            ScalarType::Bool => "a bool",
            ScalarType::Geopoint => "a geopoint",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a schema field.
///
/// Written in schemas as `string`, `int32[]`, `auto`, `string*`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Scalar(ScalarType),
    Array(ScalarType),
    /// Type is inferred from each value.
    Auto,
    /// `string*`: a string, or an array of strings when the value is an array.
    StringAuto,
}

impl FieldType {
    /// Single valued int32, int64 or float.
    pub fn is_numeric_scalar(&self) -> bool {
        matches!(self, FieldType::Scalar(scalar) if scalar.is_numeric())
    }
}

impl FromStr for FieldType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scalar = |name: &str| match name {
            "string" => Some(ScalarType::String),
            "int32" => Some(ScalarType::Int32),
            "int64" => Some(ScalarType::Int64),
            "float" => Some(ScalarType::Float),
            "bool" => Some(ScalarType::Bool),
            "geopoint" => Some(ScalarType::Geopoint),
            _ => None,
        };
        let field_type = match s {
            "auto" => Some(FieldType::Auto),
            "string*" => Some(FieldType::StringAuto),
            _ => match s.strip_suffix("[]") {
                Some(element) => scalar(element).map(FieldType::Array),
                None => scalar(s).map(FieldType::Scalar),
            },
        };
        field_type.ok_or_else(|| DomainError::UnknownFieldType(s.to_string()))
    }
}

impl TryFrom<String> for FieldType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(scalar) => write!(f, "{}", scalar),
            FieldType::Array(scalar) => write!(f, "{}[]", scalar),
            FieldType::Auto => f.write_str("auto"),
            FieldType::StringAuto => f.write_str("string*"),
        }
    }
}

// --- Field Descriptor ---

/// Suffix marking a field name as a wildcard pattern (`tags_.*`, `.*`).
pub const WILDCARD_SUFFIX: &str = ".*";

/// Describes a single field within a collection schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")] // Map 'type' JSON key to 'field_type' field
    pub field_type: FieldType,
    /// Optional fields may be absent from (or null in) a document.
    #[serde(default)]
    pub optional: bool,
    /// Set by `CollectionSchema::build` on the default sorting field's descriptor.
    #[serde(skip)]
    pub is_default_sorting_field: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            is_default_sorting_field: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Transient descriptor for a field the schema does not declare,
    /// typed by the collection's fallback field type.
    pub fn dynamic(name: &str, field_type: FieldType) -> Self {
        Self::new(name, field_type).optional()
    }

    pub fn is_pattern(&self) -> bool {
        self.name.ends_with(WILDCARD_SUFFIX)
    }

    /// Prefix matched by a wildcard descriptor; `None` for plain fields.
    pub fn pattern_prefix(&self) -> Option<&str> {
        self.name.strip_suffix(WILDCARD_SUFFIX)
    }
}

// --- Type Inference ---

/// Infers the concrete type of a value held by an `auto` field.
///
/// Integers that fit an `i64` infer as `int64`; other numbers infer as
/// `float`. Arrays infer from their elements: a numeric array holding any
/// non-int64 number is `float[]`, anything else follows the first
/// element. Nulls, objects, nested arrays and empty arrays are not inferable.
pub fn infer_field_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Array(items) => {
            let first = items.first()?;
            let element = infer_scalar(first)?;
            let widened = match element {
                ScalarType::Int64 if items.iter().any(|item| !fits_int64(item)) => {
                    ScalarType::Float
                }
                other => other,
            };
            Some(FieldType::Array(widened))
        }
        other => infer_scalar(other).map(FieldType::Scalar),
    }
}

fn infer_scalar(value: &Value) -> Option<ScalarType> {
    match value {
        Value::String(_) => Some(ScalarType::String),
        Value::Bool(_) => Some(ScalarType::Bool),
        Value::Number(n) if n.is_i64() => Some(ScalarType::Int64),
        Value::Number(_) => Some(ScalarType::Float),
        _ => None,
    }
}

fn fits_int64(value: &Value) -> bool {
    !value.is_number() || value.is_i64()
}
