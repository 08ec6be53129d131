use crate::field::ScalarType;
use thiserror::Error;

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Unknown field type: '{0}'")]
    UnknownFieldType(String),
    #[error("Unknown dirty values policy: '{0}'")]
    UnknownDirtyValues(String),
    #[error("Unknown index operation: '{0}'")]
    UnknownOperation(String),
}

// --- Validation Errors ---

/// Request-scoped failure produced while admitting a document.
///
/// Every variant names the offending field so the message can be surfaced
/// to the client as is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error(
        "Field `{0}` has been declared as a default sorting field, but is not found in the document."
    )]
    MissingDefaultSortingField(String),
    #[error("Default sorting field `{0}` must be a single valued numerical field.")]
    InvalidDefaultSortingField(String),
    #[error("Field `{0}` has been declared in the schema, but is not found in the document.")]
    MissingField(String),
    #[error("Field `{0}` is not declared in the schema and no fallback field type is configured.")]
    UnknownField(String),
    #[error("Field `{field}` must be {}.", .expected.described())]
    InvalidType { field: String, expected: ScalarType },
    #[error("Field `{field}` must be an array of {expected}.")]
    InvalidArrayElement { field: String, expected: ScalarType },
    #[error("Field `{0}` must be an array.")]
    NotAnArray(String),
    #[error("Field `{field}` must be {}.", geopoint_shape(.array))]
    InvalidGeopoint { field: String, array: bool },
    #[error("Field `{0}` has a geopoint outside latitude [-90, 90] or longitude [-180, 180].")]
    GeopointOutOfRange(String),
    #[error("Field `{0}` must hold a scalar or an array of scalars to infer its type.")]
    UninferableType(String),
}

fn geopoint_shape(array: &bool) -> &'static str {
    if *array {
        "an array of 2 element arrays: [[lat, lng], ...]"
    } else {
        "a 2 element array: [lat, lng]"
    }
}

impl ValidationError {
    /// Name of the field the failure is about.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingDefaultSortingField(field)
            | ValidationError::InvalidDefaultSortingField(field)
            | ValidationError::MissingField(field)
            | ValidationError::UnknownField(field)
            | ValidationError::NotAnArray(field)
            | ValidationError::GeopointOutOfRange(field)
            | ValidationError::UninferableType(field) => field,
            ValidationError::InvalidType { field, .. }
            | ValidationError::InvalidArrayElement { field, .. }
            | ValidationError::InvalidGeopoint { field, .. } => field,
        }
    }

    /// HTTP-style error code. Every validation failure is a client error.
    pub fn code(&self) -> u16 {
        400
    }
}
