use crate::dispatch::{FieldOutcome, coerce_element};
use crate::error::ValidationError;
use crate::field::{FieldDescriptor, FieldType};
use crate::policy::{DirtyValues, IndexOperation};
use crate::schema::{ID_FIELD, SchemaIndex};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Checks a document against the schema and normalizes its values in place.
///
/// Returns `seq_id` when the document is admitted. Fields are processed in
/// document order and the first failure is returned immediately. The document
/// is NOT rolled back on failure: fields handled before the failing one stay
/// coerced or removed.
///
/// * `Delete` skips every check.
/// * `Create`/`Upsert` need the default sorting field and every required field;
///   undeclared fields fail unless a fallback type is given.
/// * `Update`/`Emplace` only check the fields present; undeclared fields are removed.
pub fn validate_index_in_memory(
    document: &mut Map<String, Value>,
    seq_id: u32,
    default_sorting_field: &str,
    schema: &SchemaIndex,
    op: IndexOperation,
    fallback_field_type: Option<&FieldType>,
    dirty_values: DirtyValues,
) -> Result<u32, ValidationError> {
    if op == IndexOperation::Delete {
        return Ok(seq_id);
    }

    let sorting_field = Some(default_sorting_field).filter(|name| !name.is_empty());
    if op.requires_complete_document() {
        if let Some(name) = sorting_field {
            if !document.contains_key(name) {
                return Err(ValidationError::MissingDefaultSortingField(
                    name.to_string(),
                ));
            }
        }
        if let Some(missing) = schema
            .required_fields()
            .find(|field| !document.contains_key(&field.name))
        {
            return Err(ValidationError::MissingField(missing.name.clone()));
        }
    }

    let field_names: Vec<String> = document.keys().cloned().collect();
    for field_name in field_names {
        if field_name == ID_FIELD {
            continue;
        }

        let dynamic;
        let descriptor = match (schema.lookup(&field_name), fallback_field_type) {
            (Some(descriptor), _) => descriptor,
            (None, Some(fallback)) => {
                dynamic = FieldDescriptor::dynamic(&field_name, *fallback);
                &dynamic
            }
            (None, None) if op.requires_complete_document() => {
                return Err(ValidationError::UnknownField(field_name));
            }
            (None, None) => {
                debug!(field = %field_name, %op, "Removing undeclared field from partial document");
                document.shift_remove(&field_name);
                continue;
            }
        };

        let Some(value) = document.get_mut(&field_name) else {
            continue;
        };

        if value.is_null() && descriptor.optional {
            // Partial writes keep the null so the merge can unset the field.
            if !op.is_partial() {
                document.shift_remove(&field_name);
            }
            continue;
        }

        match coerce_element(descriptor, &field_name, value, dirty_values)? {
            FieldOutcome::Unchanged => {}
            FieldOutcome::Rewritten => {
                trace!(field = %field_name, %dirty_values, "Field value rewritten");
            }
            FieldOutcome::Dropped => {
                debug!(field = %field_name, %dirty_values, "Dropping dirty field");
                document.shift_remove(&field_name);
            }
        }
    }

    if let Some(name) = sorting_field {
        match document.get(name) {
            Some(value) if value.is_number() => {}
            Some(_) => {
                return Err(ValidationError::InvalidDefaultSortingField(
                    name.to_string(),
                ));
            }
            None if op.requires_complete_document() => {
                return Err(ValidationError::MissingDefaultSortingField(
                    name.to_string(),
                ));
            }
            None => {}
        }
    }

    Ok(seq_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ScalarType;
    use crate::schema::CollectionSchema;
    use serde_json::json;

    const POLICIES: [DirtyValues; 4] = [
        DirtyValues::Reject,
        DirtyValues::Drop,
        DirtyValues::CoerceOrReject,
        DirtyValues::CoerceOrDrop,
    ];

    fn field(name: &str, field_type: &str) -> FieldDescriptor {
        FieldDescriptor::new(name, field_type.parse().unwrap())
    }

    fn create_test_schema() -> CollectionSchema {
        CollectionSchema::new(
            "companies",
            vec![
                field("company_name", "string"),
                field("num_employees", "int32"),
                field("revenue", "int64").optional(),
                field("rating", "float").optional(),
                field("public", "bool").optional(),
                field("hq", "geopoint").optional(),
                field("tags", "string[]").optional(),
                field("scores", "int32[]").optional(),
            ],
        )
        .with_default_sorting_field("num_employees")
        .build()
        .expect("Failed to build test schema")
    }

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("test document must be an object, got {other}"),
        }
    }

    fn validate(
        schema: &CollectionSchema,
        document: &mut Map<String, Value>,
        op: IndexOperation,
        dirty_values: DirtyValues,
    ) -> Result<u32, ValidationError> {
        schema.validate(document, 7, op, dirty_values)
    }

    #[test]
    fn conforming_document_is_untouched_under_every_policy() {
        let schema = create_test_schema();
        let original = doc(json!({
            "id": "c1",
            "company_name": "Stark Industries",
            "num_employees": 5215,
            "revenue": 8_000_000_000i64,
            "rating": 4,
            "public": true,
            "hq": [34.05, -118.24],
            "tags": ["defense", "energy"],
            "scores": [1, 2, 3]
        }));
        for policy in POLICIES {
            for op in [IndexOperation::Create, IndexOperation::Upsert, IndexOperation::Update] {
                let mut document = original.clone();
                assert_eq!(validate(&schema, &mut document, op, policy), Ok(7));
                assert_eq!(document, original);
                assert_eq!(
                    serde_json::to_string(&document).unwrap(),
                    serde_json::to_string(&original).unwrap()
                );
            }
        }
    }

    #[test]
    fn reject_fails_and_leaves_field_uncoerced() {
        let schema = create_test_schema();
        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": 10,
            "rating": "4.5"
        }));
        let err = validate(
            &schema,
            &mut document,
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Field `rating` must be a float.");
        assert_eq!(err.field(), "rating");
        assert_eq!(document["rating"], json!("4.5"));
    }

    #[test]
    fn fail_fast_keeps_earlier_mutations() {
        let schema = create_test_schema();
        let mut document = doc(json!({
            "company_name": 99,
            "num_employees": 10,
            "public": "nope",
            "tags": [1]
        }));
        let err = validate(
            &schema,
            &mut document,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidType {
                field: "public".to_string(),
                expected: ScalarType::Bool
            }
        );
        // Processed before the failure: coerced. After it: untouched.
        assert_eq!(document["company_name"], json!("99"));
        assert_eq!(document["tags"], json!([1]));
    }

    #[test]
    fn drop_removes_mismatching_fields() {
        let schema = create_test_schema();
        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": 10,
            "rating": "4.5",
            "public": true
        }));
        assert_eq!(
            validate(
                &schema,
                &mut document,
                IndexOperation::Create,
                DirtyValues::Drop
            ),
            Ok(7)
        );
        assert!(!document.contains_key("rating"));
        let keys: Vec<&String> = document.keys().collect();
        assert_eq!(keys, vec!["company_name", "num_employees", "public"]);
    }

    #[test]
    fn coercion_is_idempotent() {
        let schema = create_test_schema();
        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": "42",
            "scores": ["1", 2.0]
        }));
        validate(
            &schema,
            &mut document,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();
        assert_eq!(document["num_employees"], json!(42));
        assert_eq!(document["scores"], json!([1, 2]));

        let coerced = document.clone();
        for policy in POLICIES {
            validate(&schema, &mut document, IndexOperation::Create, policy).unwrap();
            assert_eq!(document, coerced);
        }
    }

    #[test]
    fn geopoint_boundary() {
        let schema = create_test_schema();
        let base = json!({"company_name": "Acme", "num_employees": 1});

        let mut document = doc(base.clone());
        document.insert("hq".to_string(), json!([90.0, 0.0]));
        assert!(validate(&schema, &mut document, IndexOperation::Create, DirtyValues::Reject).is_ok());

        for policy in [DirtyValues::Reject, DirtyValues::CoerceOrReject] {
            let mut document = doc(base.clone());
            document.insert("hq".to_string(), json!([90.0001, 0.0]));
            assert_eq!(
                validate(&schema, &mut document, IndexOperation::Create, policy),
                Err(ValidationError::GeopointOutOfRange("hq".to_string()))
            );
        }

        let mut document = doc(base);
        document.insert("hq".to_string(), json!([90.0001, 0.0]));
        assert!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrDrop)
                .is_ok()
        );
        assert!(!document.contains_key("hq"));
    }

    #[test]
    fn delete_skips_payload_checks() {
        let schema = create_test_schema();
        let mut document = doc(json!({"whatever": {"deeply": ["nested"]}}));
        let original = document.clone();
        for policy in POLICIES {
            assert_eq!(
                validate(&schema, &mut document, IndexOperation::Delete, policy),
                Ok(7)
            );
        }
        assert_eq!(document, original);
    }

    #[test]
    fn unknown_field_fails_create_but_not_update() {
        let schema = create_test_schema();
        let payload = json!({
            "company_name": "Acme",
            "num_employees": 10,
            "ceo": "Wile E."
        });

        let mut document = doc(payload.clone());
        assert_eq!(
            validate(
                &schema,
                &mut document,
                IndexOperation::Create,
                DirtyValues::CoerceOrDrop
            ),
            Err(ValidationError::UnknownField("ceo".to_string()))
        );

        let mut document = doc(payload);
        assert_eq!(
            validate(
                &schema,
                &mut document,
                IndexOperation::Update,
                DirtyValues::Reject
            ),
            Ok(7)
        );
        assert!(!document.contains_key("ceo"));
    }

    #[test]
    fn fallback_type_admits_undeclared_fields() {
        let schema = create_test_schema().with_fallback_field_type(FieldType::StringAuto);
        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": 10,
            "ceo": 7,
            "aliases": ["acme", 1]
        }));
        validate(
            &schema,
            &mut document,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();
        assert_eq!(document["ceo"], json!("7"));
        assert_eq!(document["aliases"], json!(["acme", "1"]));
    }

    #[test]
    fn default_sorting_field_checks() {
        let schema = create_test_schema();

        let mut document = doc(json!({"company_name": "Acme"}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Upsert, DirtyValues::CoerceOrReject),
            Err(ValidationError::MissingDefaultSortingField(
                "num_employees".to_string()
            ))
        );

        // Partial documents only check it when present.
        let mut document = doc(json!({"company_name": "Acme"}));
        assert!(
            validate(&schema, &mut document, IndexOperation::Update, DirtyValues::Reject).is_ok()
        );

        // Dropping the sorting field cannot produce a complete document.
        let mut document = doc(json!({"company_name": "Acme", "num_employees": "many"}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrDrop),
            Err(ValidationError::MissingDefaultSortingField(
                "num_employees".to_string()
            ))
        );

        // A coercible string is fine once coerced.
        let mut document = doc(json!({"company_name": "Acme", "num_employees": "12"}));
        assert!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrReject)
                .is_ok()
        );
        assert_eq!(document["num_employees"], json!(12));
    }

    #[test]
    fn sorting_field_must_be_numeric_without_schema_declaration() {
        let schema = SchemaIndex::new(vec![field(".*", "auto")]);
        let mut document = doc(json!({"points": "high"}));
        assert_eq!(
            validate_index_in_memory(
                &mut document,
                1,
                "points",
                &schema,
                IndexOperation::Create,
                None,
                DirtyValues::CoerceOrReject
            ),
            Err(ValidationError::InvalidDefaultSortingField(
                "points".to_string()
            ))
        );
    }

    #[test]
    fn required_fields_must_be_present_for_complete_documents() {
        let schema = create_test_schema();
        let mut document = doc(json!({"num_employees": 3}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrReject),
            Err(ValidationError::MissingField("company_name".to_string()))
        );
        let mut document = doc(json!({"num_employees": 3}));
        assert!(
            validate(&schema, &mut document, IndexOperation::Emplace, DirtyValues::Reject).is_ok()
        );
    }

    #[test]
    fn nulls_on_optional_fields() {
        let schema = create_test_schema();
        let payload = json!({"company_name": "Acme", "num_employees": 1, "rating": null});

        let mut document = doc(payload.clone());
        validate(&schema, &mut document, IndexOperation::Create, DirtyValues::Reject).unwrap();
        assert!(!document.contains_key("rating"));

        let mut document = doc(payload);
        validate(&schema, &mut document, IndexOperation::Update, DirtyValues::Reject).unwrap();
        assert_eq!(document["rating"], Value::Null);

        let mut document = doc(json!({"company_name": null, "num_employees": 1}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrReject),
            Err(ValidationError::InvalidType {
                field: "company_name".to_string(),
                expected: ScalarType::String
            })
        );
    }

    #[test]
    fn id_key_is_not_validated() {
        let schema = create_test_schema();
        let mut document = doc(json!({"id": 12, "company_name": "Acme", "num_employees": 1}));
        validate(&schema, &mut document, IndexOperation::Create, DirtyValues::Reject).unwrap();
        assert_eq!(document["id"], json!(12));
    }

    #[test]
    fn wildcard_descriptors_apply_to_matching_fields() {
        let schema = CollectionSchema::new(
            "events",
            vec![field("title", "string"), field("count_.*", "int32")],
        )
        .build()
        .unwrap();
        let mut document = doc(json!({"title": "launch", "count_views": "10", "count_likes": "x"}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrReject),
            Err(ValidationError::InvalidType {
                field: "count_likes".to_string(),
                expected: ScalarType::Int32
            })
        );
        assert_eq!(document["count_views"], json!(10));
    }

    #[test]
    fn dropped_required_field_is_not_an_error() {
        let schema = create_test_schema();
        let mut document = doc(json!({"company_name": null, "num_employees": 1}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::Drop),
            Ok(7)
        );
        assert_eq!(document, doc(json!({"num_employees": 1})));
    }

    #[test]
    fn partial_update_may_drop_the_sorting_field() {
        let schema = create_test_schema();
        let mut document = doc(json!({"num_employees": "many", "rating": "4.5"}));
        assert_eq!(
            validate(
                &schema,
                &mut document,
                IndexOperation::Update,
                DirtyValues::CoerceOrDrop
            ),
            Ok(7)
        );
        assert_eq!(document, doc(json!({"rating": 4.5})));
    }

    #[test]
    fn int64_string_overflow_is_unconvertible() {
        let schema = create_test_schema();
        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": 1,
            "revenue": "9223372036854775808"
        }));
        assert_eq!(
            validate(
                &schema,
                &mut document,
                IndexOperation::Create,
                DirtyValues::CoerceOrReject
            ),
            Err(ValidationError::InvalidType {
                field: "revenue".to_string(),
                expected: ScalarType::Int64
            })
        );

        let mut document = doc(json!({
            "company_name": "Acme",
            "num_employees": 1,
            "revenue": "9223372036854775807"
        }));
        validate(&schema, &mut document, IndexOperation::Create, DirtyValues::CoerceOrReject)
            .unwrap();
        assert_eq!(document["revenue"], json!(i64::MAX));
    }

    #[test]
    fn auto_fields_accept_integers_beyond_int64() {
        let schema = CollectionSchema::new(
            "metrics",
            vec![field("name", "string"), field(".*", "auto")],
        )
        .build()
        .unwrap();
        let mut document = doc(json!({"name": "bytes", "big": u64::MAX}));
        assert_eq!(
            validate(&schema, &mut document, IndexOperation::Create, DirtyValues::Reject),
            Ok(7)
        );
        assert_eq!(document["big"], json!(u64::MAX));
    }
}
