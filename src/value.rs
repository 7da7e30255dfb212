//! The dynamic value model produced by decoding and consumed by encoding.
//!
//! Generalizes `bitcraft::assembly::Value` (`I64`/`U64`/`Array` only) to the
//! full closed set needed for structs, strings, choices and unions.

use std::collections::BTreeMap;

/// A decoded (or to-be-encoded) value. Structs use a `BTreeMap` so that
/// field order in `Debug`/`PartialEq` output is stable, the same choice
/// `bitcraft::schema::Schema::parse` makes for its own return type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt(u64),
    Int(i64),
    /// Bit-field widths above 32 bits, per spec §3.3. `u128` covers the
    /// full closed width range (1..=64 bits) with headroom to spare, so no
    /// arbitrary-precision dependency is needed.
    BigUInt(u128),
    BigInt(i128),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    Str(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    /// A discriminated-union / inline-choice value: `type_name` is the
    /// synthetic tag of §4.E.6, `value` is the decoded payload (itself
    /// usually a `Struct`).
    Variant {
        type_name: String,
        value: Box<Value>,
    },
}

impl Value {
    /// Best-effort conversion to a signed 128-bit integer, used by the
    /// expression evaluator and by computed-field arithmetic. Floats and
    /// composite values have no integer form.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::UInt(v) => Some(*v as i128),
            Value::Int(v) => Some(*v as i128),
            Value::BigUInt(v) => Some(*v as i128),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            Value::BigUInt(v) => u64::try_from(*v).ok(),
            Value::BigInt(v) if *v >= 0 => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_u64().map(|v| v as usize)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            Value::Variant { value, .. } => value.as_struct(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The concrete type name of a value, used by `same_index<T>` /
    /// `first<T>` / `last<T>` selectors and by `sum_of_type_sizes`.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Value::Variant { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// Get a field from a struct-shaped value (struct or variant payload).
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_struct().and_then(|fields| fields.get(name))
    }
}
