use crate::error::{DomainError, ValidationError};
use crate::field::{FieldDescriptor, FieldType};
use crate::policy::{DirtyValues, IndexOperation};
use crate::validator::validate_index_in_memory;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Name of the reserved document identifier key.
pub const ID_FIELD: &str = "id";

// --- Schema Index ---

/// Read-only lookup from field name to descriptor.
///
/// Plain fields resolve by exact name. Fields the schema does not declare
/// resolve to the wildcard descriptor with the longest matching prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaIndex {
    exact: BTreeMap<String, FieldDescriptor>,
    // Prefix -> wildcard descriptor
    patterns: BTreeMap<String, FieldDescriptor>,
}

impl SchemaIndex {
    pub fn new(fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        let mut index = Self::default();
        for field in fields {
            index.insert(field);
        }
        index
    }

    fn insert(&mut self, field: FieldDescriptor) {
        match field.pattern_prefix() {
            Some(prefix) => {
                self.patterns.insert(prefix.to_string(), field);
            }
            None => {
                self.exact.insert(field.name.clone(), field);
            }
        }
    }

    /// Exact lookup, then longest-prefix wildcard lookup.
    pub fn lookup(&self, name: &str) -> Option<&FieldDescriptor> {
        self.exact.get(name).or_else(|| self.lookup_pattern(name))
    }

    fn lookup_pattern(&self, name: &str) -> Option<&FieldDescriptor> {
        if self.patterns.is_empty() {
            return None;
        }
        // Walk prefixes from longest to shortest, on char boundaries.
        name.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(name.len()))
            .rev()
            .find_map(|end| self.patterns.get(&name[..end]))
    }

    /// Declared fields a complete document must carry.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.exact
            .values()
            .filter(|field| !field.optional && field.name != ID_FIELD)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- Collection Schema ---

/// Represents the schema for a collection (index).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionSchema {
    /// The unique name of the collection. Should follow specific naming rules (e.g., alphanumeric).
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    /// Numeric field used as the default sort key. Empty when none is configured.
    #[serde(default)]
    pub default_sorting_field: String,
    /// Type given to fields the schema does not declare. `None` (or `""` in JSON)
    /// rejects undeclared fields.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub fallback_field_type: Option<FieldType>,
    /// Collection default for the dirty values policy, used when a request sets none.
    #[serde(default)]
    pub dirty_values: Option<DirtyValues>,

    // Internal index for faster lookups
    #[serde(skip)] // Don't serialize/deserialize this helper field
    field_index: SchemaIndex,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<FieldType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
            ..Self::default()
        }
    }

    pub fn with_default_sorting_field(mut self, field: impl Into<String>) -> Self {
        self.default_sorting_field = field.into();
        self
    }

    pub fn with_fallback_field_type(mut self, field_type: FieldType) -> Self {
        self.fallback_field_type = Some(field_type);
        self
    }

    pub fn with_dirty_values(mut self, dirty_values: DirtyValues) -> Self {
        self.dirty_values = Some(dirty_values);
        self
    }

    /// Validates the schema and precomputes the lookup index.
    pub fn build(mut self) -> Result<Self, DomainError> {
        // Basic validation
        if self.name.trim().is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DomainError::InvalidSchema(
                "Collection name must be non-empty and contain only ASCII alphanumeric characters or underscores.".to_string()
            ));
        }
        if self.fields.is_empty() {
            return Err(DomainError::InvalidSchema(
                "Schema must contain at least one field.".to_string(),
            ));
        }

        let mut field_names = HashSet::new();
        for field in &mut self.fields {
            if field.name.trim().is_empty() {
                return Err(DomainError::InvalidSchema(
                    "Field names cannot be empty.".to_string(),
                ));
            }
            if !field_names.insert(field.name.clone()) {
                return Err(DomainError::InvalidSchema(format!(
                    "Duplicate field name found: '{}'",
                    field.name
                )));
            }
            // Ensure 'id' field is not defined manually (reserved)
            if field.name == ID_FIELD {
                return Err(DomainError::InvalidSchema(
                    "'id' is a reserved field name and cannot be defined in the schema."
                        .to_string(),
                ));
            }
            field.is_default_sorting_field = field.name == self.default_sorting_field;
        }

        if !self.default_sorting_field.is_empty() {
            let sorting_field = self
                .fields
                .iter()
                .find(|field| field.is_default_sorting_field)
                .ok_or_else(|| {
                    DomainError::InvalidSchema(format!(
                        "Default sorting field is defined as '{}' but is not found in the schema.",
                        self.default_sorting_field
                    ))
                })?;
            if sorting_field.is_pattern() || !sorting_field.field_type.is_numeric_scalar() {
                return Err(DomainError::InvalidSchema(format!(
                    "Default sorting field '{}' must be a single valued numerical field.",
                    sorting_field.name
                )));
            }
            if sorting_field.optional {
                return Err(DomainError::InvalidSchema(format!(
                    "Default sorting field '{}' cannot be an optional field.",
                    sorting_field.name
                )));
            }
        }

        self.field_index = SchemaIndex::new(self.fields.iter().cloned());
        Ok(self)
    }

    /// The lookup index built by `build()`. Empty if the schema was never built.
    pub fn index(&self) -> &SchemaIndex {
        &self.field_index
    }

    /// Gets a field descriptor by name, falling back to wildcard fields.
    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index.lookup(name)
    }

    /// Policy for a write: the request's choice, else the collection default, else `fallback`.
    pub fn effective_dirty_values(
        &self,
        requested: Option<DirtyValues>,
        fallback: DirtyValues,
    ) -> DirtyValues {
        requested.or(self.dirty_values).unwrap_or(fallback)
    }

    /// Validates a document against this schema; see [`validate_index_in_memory`].
    pub fn validate(
        &self,
        document: &mut Map<String, Value>,
        seq_id: u32,
        op: IndexOperation,
        dirty_values: DirtyValues,
    ) -> Result<u32, ValidationError> {
        validate_index_in_memory(
            document,
            seq_id,
            &self.default_sorting_field,
            &self.field_index,
            op,
            self.fallback_field_type.as_ref(),
            dirty_values,
        )
    }
}
