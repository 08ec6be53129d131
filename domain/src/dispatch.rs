//! Routes a field value to the coercer matching its declared type.

use crate::coerce::{
    coerce_bool, coerce_float, coerce_geopoint, coerce_int32, coerce_int64, coerce_string,
};
use crate::error::ValidationError;
use crate::field::{FieldDescriptor, FieldType, ScalarType, infer_field_type};
use crate::policy::{Conversion, DirtyValues, Mismatch, Outcome, resolve};
use serde_json::Value;
use tracing::trace;

/// What happened to a whole field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    Unchanged,
    /// The value, or some of its elements, were coerced or removed.
    Rewritten,
    /// The field must be removed from the document.
    Dropped,
}

// --- Array Cursor ---

/// Result of moving an [`ArrayCursor`] past its current element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advanced,
    /// The current element was erased; the cursor already points at its successor.
    ElementRemoved,
}

/// Cursor over an array that may erase elements while iterating.
#[derive(Debug)]
pub struct ArrayCursor<'a> {
    items: &'a mut Vec<Value>,
    position: usize,
}

impl<'a> ArrayCursor<'a> {
    pub fn new(items: &'a mut Vec<Value>) -> Self {
        Self { items, position: 0 }
    }

    /// Element under the cursor, `None` once past the end.
    pub fn current(&mut self) -> Option<&mut Value> {
        self.items.get_mut(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn advance(&mut self) -> Step {
        self.position += 1;
        Step::Advanced
    }

    pub fn remove_current(&mut self) -> Step {
        if self.position < self.items.len() {
            self.items.remove(self.position);
        }
        Step::ElementRemoved
    }
}

// --- Dispatch ---

/// Coerces the value of one document field according to its descriptor.
///
/// `field_name` is the name used in the document, which differs from
/// `descriptor.name` for wildcard matches. A dropped outcome leaves the
/// value untouched; removing it from the document is up to the caller.
pub fn coerce_element(
    descriptor: &FieldDescriptor,
    field_name: &str,
    value: &mut Value,
    dirty_values: DirtyValues,
) -> Result<FieldOutcome, ValidationError> {
    match descriptor.field_type {
        FieldType::Scalar(scalar) => coerce_single(scalar, field_name, value, dirty_values),
        FieldType::Array(element) => coerce_array(element, field_name, value, dirty_values),
        FieldType::Auto => coerce_inferred(field_name, value, dirty_values),
        FieldType::StringAuto => {
            if value.is_array() {
                coerce_array(ScalarType::String, field_name, value, dirty_values)
            } else {
                coerce_single(ScalarType::String, field_name, value, dirty_values)
            }
        }
    }
}

/// Runs the coercer for `scalar` on a single value.
pub fn coerce_scalar(scalar: ScalarType, value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    match scalar {
        ScalarType::String => coerce_string(value, dirty_values),
        ScalarType::Int32 => coerce_int32(value, dirty_values),
        ScalarType::Int64 => coerce_int64(value, dirty_values),
        ScalarType::Float => coerce_float(value, dirty_values),
        ScalarType::Bool => coerce_bool(value, dirty_values),
        ScalarType::Geopoint => coerce_geopoint(value, dirty_values),
    }
}

fn coerce_single(
    scalar: ScalarType,
    field_name: &str,
    value: &mut Value,
    dirty_values: DirtyValues,
) -> Result<FieldOutcome, ValidationError> {
    match coerce_scalar(scalar, value, dirty_values) {
        Outcome::Unchanged => Ok(FieldOutcome::Unchanged),
        Outcome::Coerced => {
            trace!(field = %field_name, to = %scalar, "Coerced field value");
            Ok(FieldOutcome::Rewritten)
        }
        Outcome::Dropped => Ok(FieldOutcome::Dropped),
        Outcome::Failed(mismatch) => Err(failure(field_name, scalar, false, mismatch)),
    }
}

fn coerce_array(
    element: ScalarType,
    field_name: &str,
    value: &mut Value,
    dirty_values: DirtyValues,
) -> Result<FieldOutcome, ValidationError> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            return match resolve(&Conversion::Unconvertible(Mismatch::NotArray), dirty_values) {
                Outcome::Dropped => Ok(FieldOutcome::Dropped),
                _ => Err(ValidationError::NotAnArray(field_name.to_string())),
            };
        }
    };

    let mut rewritten = false;
    let mut cursor = ArrayCursor::new(items);
    while let Some(item) = cursor.current() {
        let step = match coerce_scalar(element, item, dirty_values) {
            Outcome::Unchanged => cursor.advance(),
            Outcome::Coerced => {
                rewritten = true;
                cursor.advance()
            }
            Outcome::Dropped => {
                trace!(field = %field_name, position = cursor.position(), "Dropping array element");
                cursor.remove_current()
            }
            Outcome::Failed(mismatch) => {
                return Err(failure(field_name, element, true, mismatch));
            }
        };
        rewritten |= step == Step::ElementRemoved;
    }

    Ok(if rewritten {
        FieldOutcome::Rewritten
    } else {
        FieldOutcome::Unchanged
    })
}

fn coerce_inferred(
    field_name: &str,
    value: &mut Value,
    dirty_values: DirtyValues,
) -> Result<FieldOutcome, ValidationError> {
    if matches!(value, Value::Array(items) if items.is_empty()) {
        return Ok(FieldOutcome::Unchanged);
    }
    match infer_field_type(value) {
        Some(FieldType::Scalar(scalar)) => coerce_single(scalar, field_name, value, dirty_values),
        Some(FieldType::Array(element)) => coerce_array(element, field_name, value, dirty_values),
        // Inference only yields concrete types.
        Some(FieldType::Auto | FieldType::StringAuto) | None => {
            match resolve(&Conversion::Unconvertible(Mismatch::Uninferable), dirty_values) {
                Outcome::Dropped => Ok(FieldOutcome::Dropped),
                _ => Err(ValidationError::UninferableType(field_name.to_string())),
            }
        }
    }
}

fn failure(field_name: &str, scalar: ScalarType, in_array: bool, mismatch: Mismatch) -> ValidationError {
    let field = field_name.to_string();
    match (scalar, mismatch) {
        (_, Mismatch::GeopointRange) => ValidationError::GeopointOutOfRange(field),
        (ScalarType::Geopoint, _) => ValidationError::InvalidGeopoint {
            field,
            array: in_array,
        },
        (_, Mismatch::NotArray) => ValidationError::NotAnArray(field),
        (_, Mismatch::Uninferable) => ValidationError::UninferableType(field),
        (expected, _) if in_array => ValidationError::InvalidArrayElement { field, expected },
        (expected, _) => ValidationError::InvalidType { field, expected },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, field_type: &str) -> FieldDescriptor {
        FieldDescriptor::new(name, field_type.parse().unwrap())
    }

    #[test]
    fn cursor_erases_without_skipping() {
        let mut items = vec![json!(1), json!(2), json!(3), json!(4)];
        let mut cursor = ArrayCursor::new(&mut items);
        let mut visited = Vec::new();
        while let Some(item) = cursor.current() {
            let n = item.as_i64().unwrap();
            visited.push(n);
            if n % 2 == 0 {
                assert_eq!(cursor.remove_current(), Step::ElementRemoved);
            } else {
                assert_eq!(cursor.advance(), Step::Advanced);
            }
        }
        assert_eq!(visited, vec![1, 2, 3, 4]);
        assert_eq!(items, vec![json!(1), json!(3)]);
    }

    #[test]
    fn consecutive_erasures_keep_the_cursor_in_place() {
        let mut items = vec![json!("a"), json!("b"), json!("c")];
        let mut cursor = ArrayCursor::new(&mut items);
        while cursor.current().is_some() {
            cursor.remove_current();
        }
        assert_eq!(cursor.position(), 0);
        assert!(items.is_empty());
    }

    #[test]
    fn array_partial_drop_preserves_order() {
        let mut value = json!([1, "x", 3]);
        let outcome = coerce_element(
            &descriptor("ints", "int32[]"),
            "ints",
            &mut value,
            DirtyValues::CoerceOrDrop,
        );
        assert_eq!(outcome, Ok(FieldOutcome::Rewritten));
        assert_eq!(value, json!([1, 3]));
    }

    #[test]
    fn array_drops_adjacent_bad_elements() {
        let mut value = json!(["a", "b", 2, "c", "d", 5]);
        coerce_element(
            &descriptor("ints", "int64[]"),
            "ints",
            &mut value,
            DirtyValues::Drop,
        )
        .unwrap();
        assert_eq!(value, json!([2, 5]));
    }

    #[test]
    fn array_coerces_and_drops_in_one_pass() {
        let mut value = json!(["7", "seven", 8.0, null, 9]);
        coerce_element(
            &descriptor("ints", "int32[]"),
            "ints",
            &mut value,
            DirtyValues::CoerceOrDrop,
        )
        .unwrap();
        assert_eq!(value, json!([7, 8, 9]));
    }

    #[test]
    fn array_can_be_emptied() {
        let mut value = json!(["x", "y"]);
        let outcome = coerce_element(
            &descriptor("flags", "bool[]"),
            "flags",
            &mut value,
            DirtyValues::CoerceOrDrop,
        );
        assert_eq!(outcome, Ok(FieldOutcome::Rewritten));
        assert_eq!(value, json!([]));
    }

    #[test]
    fn array_element_failure_rejects_the_field() {
        let mut value = json!([1, "x", 3]);
        let err = coerce_element(
            &descriptor("ints", "int32[]"),
            "ints",
            &mut value,
            DirtyValues::CoerceOrReject,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidArrayElement {
                field: "ints".to_string(),
                expected: ScalarType::Int32
            }
        );
    }

    #[test]
    fn scalar_for_array_field() {
        let mut value = json!("solo");
        assert_eq!(
            coerce_element(
                &descriptor("tags", "string[]"),
                "tags",
                &mut value,
                DirtyValues::CoerceOrReject
            ),
            Err(ValidationError::NotAnArray("tags".to_string()))
        );
        assert_eq!(
            coerce_element(
                &descriptor("tags", "string[]"),
                "tags",
                &mut value,
                DirtyValues::Drop
            ),
            Ok(FieldOutcome::Dropped)
        );
    }

    #[test]
    fn geopoint_fields() {
        let mut value = json!([48.85, 2.35]);
        assert_eq!(
            coerce_element(
                &descriptor("loc", "geopoint"),
                "loc",
                &mut value,
                DirtyValues::Reject
            ),
            Ok(FieldOutcome::Unchanged)
        );

        let mut value = json!([48.85]);
        assert_eq!(
            coerce_element(
                &descriptor("loc", "geopoint"),
                "loc",
                &mut value,
                DirtyValues::CoerceOrReject
            ),
            Err(ValidationError::InvalidGeopoint {
                field: "loc".to_string(),
                array: false
            })
        );

        let mut value = json!([[48.85, 2.35], [91, 0], ["1", "2"]]);
        coerce_element(
            &descriptor("locs", "geopoint[]"),
            "locs",
            &mut value,
            DirtyValues::CoerceOrDrop,
        )
        .unwrap();
        assert_eq!(value, json!([[48.85, 2.35], [1.0, 2.0]]));

        let mut value = json!([[48.85, 2.35], [91, 0]]);
        assert_eq!(
            coerce_element(
                &descriptor("locs", "geopoint[]"),
                "locs",
                &mut value,
                DirtyValues::CoerceOrReject
            ),
            Err(ValidationError::GeopointOutOfRange("locs".to_string()))
        );
    }

    #[test]
    fn auto_fields_infer_then_coerce() {
        let auto = descriptor(".*", "auto");
        let mut value = json!([1, "2", "three"]);
        coerce_element(&auto, "mixed", &mut value, DirtyValues::CoerceOrDrop).unwrap();
        assert_eq!(value, json!([1, 2]));

        let mut value = json!("plain");
        assert_eq!(
            coerce_element(&auto, "plain", &mut value, DirtyValues::Reject),
            Ok(FieldOutcome::Unchanged)
        );

        let mut value = json!({"nested": 1});
        assert_eq!(
            coerce_element(&auto, "obj", &mut value, DirtyValues::CoerceOrReject),
            Err(ValidationError::UninferableType("obj".to_string()))
        );
        assert_eq!(
            coerce_element(&auto, "obj", &mut value, DirtyValues::CoerceOrDrop),
            Ok(FieldOutcome::Dropped)
        );

        let mut value = json!([]);
        assert_eq!(
            coerce_element(&auto, "empty", &mut value, DirtyValues::Reject),
            Ok(FieldOutcome::Unchanged)
        );
    }

    #[test]
    fn string_auto_follows_value_shape() {
        let string_auto = descriptor("label_.*", "string*");
        let mut value = json!(12);
        coerce_element(&string_auto, "label_a", &mut value, DirtyValues::CoerceOrReject).unwrap();
        assert_eq!(value, json!("12"));

        let mut value = json!([1, true, "x"]);
        coerce_element(&string_auto, "label_b", &mut value, DirtyValues::CoerceOrReject).unwrap();
        assert_eq!(value, json!(["1", "true", "x"]));
    }
}
