use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// --- Operation Kind ---

/// Ingestion intent of a write. Governs which completeness checks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    #[default]
    Create,
    Upsert,
    Update,
    Emplace,
    Delete,
}

impl IndexOperation {
    /// Create and upsert carry the whole document.
    pub fn requires_complete_document(&self) -> bool {
        matches!(self, IndexOperation::Create | IndexOperation::Upsert)
    }

    /// Update and emplace may carry only the fields being changed.
    pub fn is_partial(&self) -> bool {
        matches!(self, IndexOperation::Update | IndexOperation::Emplace)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexOperation::Create => "create",
            IndexOperation::Upsert => "upsert",
            IndexOperation::Update => "update",
            IndexOperation::Emplace => "emplace",
            IndexOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(IndexOperation::Create),
            "upsert" => Ok(IndexOperation::Upsert),
            "update" => Ok(IndexOperation::Update),
            "emplace" => Ok(IndexOperation::Emplace),
            "delete" => Ok(IndexOperation::Delete),
            other => Err(DomainError::UnknownOperation(other.to_string())),
        }
    }
}

// --- Dirty Values Policy ---

/// What to do with a value whose type does not match its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyValues {
    /// Fail the document.
    Reject,
    /// Silently remove the value.
    Drop,
    /// Try to convert; fail the document if conversion is impossible.
    #[default]
    CoerceOrReject,
    /// Try to convert; remove the value if conversion is impossible.
    CoerceOrDrop,
}

impl DirtyValues {
    pub fn coerces(&self) -> bool {
        matches!(self, DirtyValues::CoerceOrReject | DirtyValues::CoerceOrDrop)
    }

    pub fn drops(&self) -> bool {
        matches!(self, DirtyValues::Drop | DirtyValues::CoerceOrDrop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DirtyValues::Reject => "reject",
            DirtyValues::Drop => "drop",
            DirtyValues::CoerceOrReject => "coerce_or_reject",
            DirtyValues::CoerceOrDrop => "coerce_or_drop",
        }
    }
}

impl fmt::Display for DirtyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirtyValues {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(DirtyValues::Reject),
            "drop" => Ok(DirtyValues::Drop),
            "coerce_or_reject" => Ok(DirtyValues::CoerceOrReject),
            "coerce_or_drop" => Ok(DirtyValues::CoerceOrDrop),
            _ => Err(DomainError::UnknownDirtyValues(s.to_string())),
        }
    }
}

// --- Conversion Results ---

/// Why a value does not fit its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Wrong runtime type.
    Type,
    /// Array field holding a non-array value.
    NotArray,
    /// Geopoint that is not a 2 element array of numbers.
    GeopointShape,
    /// Geopoint with latitude or longitude out of range.
    GeopointRange,
    /// `auto` field whose value type cannot be inferred.
    Uninferable,
}

/// Result of attempting to convert a value to a target type.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Already of the target type.
    Exact,
    /// Convertible; carries the converted value.
    Converted(Value),
    Unconvertible(Mismatch),
}

/// What happened to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// Rewritten in place with the converted value.
    Coerced,
    /// Must be removed from its document or array.
    Dropped,
    Failed(Mismatch),
}

/// Applies the dirty values policy to a conversion attempt.
///
/// Shared by every coercer so the four policies behave identically for all types.
pub fn resolve(conversion: &Conversion, policy: DirtyValues) -> Outcome {
    let mismatch = match conversion {
        Conversion::Exact => return Outcome::Unchanged,
        Conversion::Converted(_) if policy.coerces() => return Outcome::Coerced,
        Conversion::Converted(_) => Mismatch::Type,
        Conversion::Unconvertible(mismatch) => *mismatch,
    };
    if policy.drops() {
        Outcome::Dropped
    } else {
        Outcome::Failed(mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const POLICIES: [DirtyValues; 4] = [
        DirtyValues::Reject,
        DirtyValues::Drop,
        DirtyValues::CoerceOrReject,
        DirtyValues::CoerceOrDrop,
    ];

    #[test]
    fn resolve_table() {
        let converted = Conversion::Converted(json!(42));
        let unconvertible = Conversion::Unconvertible(Mismatch::Type);

        assert_eq!(
            resolve(&converted, DirtyValues::Reject),
            Outcome::Failed(Mismatch::Type)
        );
        assert_eq!(resolve(&converted, DirtyValues::Drop), Outcome::Dropped);
        assert_eq!(
            resolve(&converted, DirtyValues::CoerceOrReject),
            Outcome::Coerced
        );
        assert_eq!(
            resolve(&converted, DirtyValues::CoerceOrDrop),
            Outcome::Coerced
        );

        assert_eq!(
            resolve(&unconvertible, DirtyValues::Reject),
            Outcome::Failed(Mismatch::Type)
        );
        assert_eq!(resolve(&unconvertible, DirtyValues::Drop), Outcome::Dropped);
        assert_eq!(
            resolve(&unconvertible, DirtyValues::CoerceOrReject),
            Outcome::Failed(Mismatch::Type)
        );
        assert_eq!(
            resolve(&unconvertible, DirtyValues::CoerceOrDrop),
            Outcome::Dropped
        );
    }

    #[test]
    fn range_failures_keep_their_reason() {
        let out_of_range = Conversion::Unconvertible(Mismatch::GeopointRange);
        assert_eq!(
            resolve(&out_of_range, DirtyValues::CoerceOrReject),
            Outcome::Failed(Mismatch::GeopointRange)
        );
    }

    #[test]
    fn names_parse_and_serialize() {
        assert_eq!(
            "coerce_or_drop".parse::<DirtyValues>(),
            Ok(DirtyValues::CoerceOrDrop)
        );
        assert_eq!("REJECT".parse::<DirtyValues>(), Ok(DirtyValues::Reject));
        assert!("maybe".parse::<DirtyValues>().is_err());
        assert_eq!(
            serde_json::to_value(DirtyValues::CoerceOrReject).unwrap(),
            json!("coerce_or_reject")
        );
        assert_eq!("emplace".parse::<IndexOperation>(), Ok(IndexOperation::Emplace));
        assert_eq!(
            serde_json::from_value::<IndexOperation>(json!("upsert")).unwrap(),
            IndexOperation::Upsert
        );
        assert!(IndexOperation::Upsert.requires_complete_document());
        assert!(IndexOperation::Emplace.is_partial());
        assert!(!IndexOperation::Delete.is_partial());
    }

    proptest! {
        #[test]
        fn exact_values_are_never_touched(index in 0usize..4) {
            prop_assert_eq!(resolve(&Conversion::Exact, POLICIES[index]), Outcome::Unchanged);
        }

        #[test]
        fn drop_policies_never_fail(index in 0usize..4, converted in any::<bool>()) {
            let policy = POLICIES[index];
            let conversion = if converted {
                Conversion::Converted(json!(1))
            } else {
                Conversion::Unconvertible(Mismatch::Type)
            };
            let outcome = resolve(&conversion, policy);
            if policy.drops() {
                prop_assert!(!matches!(outcome, Outcome::Failed(_)));
            } else {
                prop_assert!(outcome != Outcome::Dropped);
            }
            prop_assert_eq!(outcome == Outcome::Coerced, policy.coerces() && converted);
        }
    }
}
