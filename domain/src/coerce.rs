//! Scalar coercers.
//!
//! Each coercer checks one value against a primitive type and, when the
//! policy allows it, rewrites the value in place. Conversion rules live in
//! the `to_*` functions; policy handling is shared through [`resolve`].

use crate::policy::{Conversion, DirtyValues, Mismatch, Outcome, resolve};
use serde_json::{Number, Value};

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

pub fn coerce_string(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_string)
}

pub fn coerce_int32(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_int32)
}

pub fn coerce_int64(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_int64)
}

pub fn coerce_float(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_float)
}

pub fn coerce_bool(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_bool)
}

pub fn coerce_geopoint(value: &mut Value, dirty_values: DirtyValues) -> Outcome {
    apply(value, dirty_values, to_geopoint)
}

fn apply(value: &mut Value, dirty_values: DirtyValues, convert: fn(&Value) -> Conversion) -> Outcome {
    let conversion = convert(value);
    let outcome = resolve(&conversion, dirty_values);
    if let (Outcome::Coerced, Conversion::Converted(converted)) = (outcome, conversion) {
        *value = converted;
    }
    outcome
}

// --- Conversions ---

pub fn to_string(value: &Value) -> Conversion {
    match value {
        Value::String(_) => Conversion::Exact,
        // Floats render as their shortest round-trip form ("1e-300", "2.5").
        Value::Number(n) => Conversion::Converted(Value::String(n.to_string())),
        Value::Bool(b) => Conversion::Converted(Value::String(b.to_string())),
        _ => Conversion::Unconvertible(Mismatch::Type),
    }
}

pub fn to_int32(value: &Value) -> Conversion {
    to_integer(value, i64::from(i32::MIN), i64::from(i32::MAX))
}

pub fn to_int64(value: &Value) -> Conversion {
    to_integer(value, i64::MIN, i64::MAX)
}

fn to_integer(value: &Value, min: i64, max: i64) -> Conversion {
    let in_range = |i: i64| (min..=max).contains(&i);
    let converted = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return if in_range(i) {
                    Conversion::Exact
                } else {
                    Conversion::Unconvertible(Mismatch::Type)
                };
            }
            // `max as f64 + 1.0` is exact for both widths: 2^31 and 2^63.
            n.as_f64()
                .filter(|f| n.is_f64() && f.fract() == 0.0)
                .filter(|f| *f >= min as f64 && *f < max as f64 + 1.0)
                .map(|f| f as i64)
        }
        Value::String(s) => s.parse::<i64>().ok().filter(|i| in_range(*i)),
        _ => None,
    };
    match converted {
        Some(i) => Conversion::Converted(Value::from(i)),
        None => Conversion::Unconvertible(Mismatch::Type),
    }
}

pub fn to_float(value: &Value) -> Conversion {
    match value {
        Value::Number(_) => Conversion::Exact,
        Value::String(s) => match parse_float(s) {
            Some(n) => Conversion::Converted(Value::Number(n)),
            None => Conversion::Unconvertible(Mismatch::Type),
        },
        _ => Conversion::Unconvertible(Mismatch::Type),
    }
}

fn parse_float(s: &str) -> Option<Number> {
    // f64::from_str also accepts "inf" and "NaN"; from_f64 rejects non-finite results.
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

pub fn to_bool(value: &Value) -> Conversion {
    match value {
        Value::Bool(_) => Conversion::Exact,
        Value::String(s) if s == "true" => Conversion::Converted(Value::Bool(true)),
        Value::String(s) if s == "false" => Conversion::Converted(Value::Bool(false)),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Conversion::Converted(Value::Bool(false)),
            Some(1) => Conversion::Converted(Value::Bool(true)),
            _ => Conversion::Unconvertible(Mismatch::Type),
        },
        _ => Conversion::Unconvertible(Mismatch::Type),
    }
}

pub fn to_geopoint(value: &Value) -> Conversion {
    let pair = match value {
        Value::Array(pair) if pair.len() == 2 => pair,
        _ => return Conversion::Unconvertible(Mismatch::GeopointShape),
    };
    if let (Some(lat), Some(lng)) = (pair[0].as_f64(), pair[1].as_f64()) {
        return if in_geo_range(lat, lng) {
            Conversion::Exact
        } else {
            Conversion::Unconvertible(Mismatch::GeopointRange)
        };
    }

    let coordinate = |v: &Value| match to_float(v) {
        Conversion::Exact => v.as_f64(),
        Conversion::Converted(converted) => converted.as_f64(),
        Conversion::Unconvertible(_) => None,
    };
    match (coordinate(&pair[0]), coordinate(&pair[1])) {
        (Some(lat), Some(lng)) if in_geo_range(lat, lng) => {
            Conversion::Converted(Value::Array(vec![Value::from(lat), Value::from(lng)]))
        }
        (Some(_), Some(_)) => Conversion::Unconvertible(Mismatch::GeopointRange),
        _ => Conversion::Unconvertible(Mismatch::GeopointShape),
    }
}

fn in_geo_range(lat: f64, lng: f64) -> bool {
    (LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&lat)
        && (LONGITUDE_RANGE.0..=LONGITUDE_RANGE.1).contains(&lng)
}
