//! Schema types and the ingestion-time document validator.
//!
//! Everything here is synchronous and free of I/O. Schemas are read-only
//! once built and can be shared across threads validating different documents.

pub mod coerce;
pub mod dispatch;
pub mod error;
pub mod field;
pub mod policy;
pub mod schema;
pub mod validator;

pub use dispatch::{ArrayCursor, FieldOutcome, Step, coerce_element};
pub use error::{DomainError, ValidationError};
pub use field::{FieldDescriptor, FieldType, ScalarType, infer_field_type};
pub use policy::{Conversion, DirtyValues, IndexOperation, Mismatch, Outcome, resolve};
pub use schema::{CollectionSchema, ID_FIELD, SchemaIndex};
pub use validator::validate_index_in_memory;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Document ID ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: String) -> Self {
        Self(id)
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
impl From<DocumentId> for String {
    fn from(doc_id: DocumentId) -> Self {
        doc_id.0
    }
}

// --- Document ---

/// A document admitted to a collection.
///
/// Only built from fields that passed [`validate_index_in_memory`], so every
/// value matches its field's declared type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    /// Internal sequence id assigned on first write, kept across updates.
    seq_id: u32,
    /// Document data stored as field name -> JSON Value pairs, in input order.
    fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: DocumentId, seq_id: u32, fields: Map<String, Value>) -> Self {
        Self { id, seq_id, fields }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn seq_id(&self) -> u32 {
        self.seq_id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Gets a specific field's value.
    pub fn get_field_value(&self, field_name: &str) -> Option<&Value> {
        self.fields.get(field_name)
    }

    /// Applies a validated partial payload. `null` values unset the field.
    pub fn merge(&mut self, partial: Map<String, Value>) {
        for (name, value) in partial {
            if name == ID_FIELD {
                continue;
            }
            if value.is_null() {
                self.fields.shift_remove(&name);
            } else {
                self.fields.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn document_accessors() {
        let id = DocumentId::new("prod1".to_string());
        let doc = Document::new(
            id.clone(),
            3,
            fields(json!({"name": "Test Product", "price": 99.99})),
        );
        assert_eq!(doc.id(), &id);
        assert_eq!(doc.seq_id(), 3);
        assert_eq!(doc.fields().len(), 2);
        assert_eq!(doc.get_field_value("name").unwrap(), &json!("Test Product"));
        assert_eq!(String::from(id), "prod1");
    }

    #[test]
    fn merge_overwrites_and_unsets() {
        let mut doc = Document::new(
            DocumentId::new("p".to_string()),
            1,
            fields(json!({"name": "Old", "price": 1, "stock": 4})),
        );
        doc.merge(fields(json!({"price": 2, "stock": null, "color": "red", "id": "other"})));
        assert_eq!(
            doc.fields(),
            &fields(json!({"name": "Old", "price": 2, "color": "red"}))
        );
        assert_eq!(doc.id().as_str(), "p");
    }
}
