//! Self-describing argument and result encoding.
//!
//! A payload is a JSON array holding one value per declared parameter (or
//! result). Every value is checked against the declared [`ValueType`] before
//! it is encoded and after it is decoded, so a payload that does not match
//! the target's schema never reaches the target or the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a single argument or result value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum ValueType {
    /// Unit value, encoded as `null`.
    Null,
    /// Boolean.
    Bool,
    /// Unsigned integer up to 64 bits.
    Nat,
    /// Unsigned 8-bit integer.
    Nat8,
    /// Unsigned 32-bit integer.
    Nat32,
    /// Unsigned 64-bit integer.
    Nat64,
    /// Signed integer up to 64 bits.
    Int,
    /// UTF-8 text.
    Text,
    /// Principal in textual form.
    Principal,
    /// Byte string, encoded as an array of bytes.
    Blob,
    /// Optional value, encoded as `null` when absent.
    Opt(Box<ValueType>),
    /// Homogeneous sequence.
    Vec(Box<ValueType>),
    /// Fixed-arity heterogeneous sequence.
    Tuple(Vec<ValueType>),
    /// Named fields, encoded as an object.
    Record(Vec<Field>),
    /// Accepts any value.
    Reserved,
}

/// Named field of a [`ValueType::Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub ty: ValueType,
}

impl Field {
    /// Build a record field.
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl ValueType {
    /// `opt T`.
    pub fn opt(inner: ValueType) -> Self {
        Self::Opt(Box::new(inner))
    }

    /// `vec T`.
    pub fn vec(inner: ValueType) -> Self {
        Self::Vec(Box::new(inner))
    }

    fn name(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool => "bool".to_owned(),
            Self::Nat => "nat".to_owned(),
            Self::Nat8 => "nat8".to_owned(),
            Self::Nat32 => "nat32".to_owned(),
            Self::Nat64 => "nat64".to_owned(),
            Self::Int => "int".to_owned(),
            Self::Text => "text".to_owned(),
            Self::Principal => "principal".to_owned(),
            Self::Blob => "blob".to_owned(),
            Self::Opt(inner) => format!("opt {}", inner.name()),
            Self::Vec(inner) => format!("vec {}", inner.name()),
            Self::Tuple(items) => format!("tuple({})", items.len()),
            Self::Record(_) => "record".to_owned(),
            Self::Reserved => "reserved".to_owned(),
        }
    }
}

/// Errors raised when a payload does not match its declared schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer is not valid JSON.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The payload is not an argument sequence.
    #[error("payload is not a value sequence")]
    NotASequence,

    /// Wrong number of values.
    #[error("expected {expected} values, found {found}")]
    Arity {
        /// Declared count.
        expected: usize,
        /// Count in the payload.
        found: usize,
    },

    /// A value does not have its declared type.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Location of the value, e.g. `$0.map[1]`.
        path: String,
        /// Declared type.
        expected: String,
        /// JSON shape actually found.
        found: String,
    },

    /// A record carries a field its type does not declare.
    #[error("unknown field `{field}` at {path}")]
    UnknownField {
        /// Location of the record.
        path: String,
        /// Offending field name.
        field: String,
    },
}

/// Encode `values` as a payload typed by `types`.
///
/// # Errors
///
/// Returns [`CodecError`] if the arity or any value does not match.
pub fn encode(types: &[ValueType], values: &[Value]) -> Result<Vec<u8>, CodecError> {
    check_sequence(types, values)?;
    serde_json::to_vec(values).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode a payload typed by `types`.
///
/// # Errors
///
/// Returns [`CodecError`] if the buffer is malformed or does not match.
pub fn decode(types: &[ValueType], bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    let parsed: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let Value::Array(values) = parsed else {
        return Err(CodecError::NotASequence);
    };
    check_sequence(types, &values)?;
    Ok(values)
}

/// Check a payload against `types` and return its canonical encoding.
///
/// # Errors
///
/// Returns [`CodecError`] on any schema mismatch.
pub fn recode(types: &[ValueType], bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let values = decode(types, bytes)?;
    encode(types, &values)
}

/// Collapse decoded results the way a typed caller sees them: no values is
/// `null`, one value is returned as is, several become an array.
pub fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

fn check_sequence(types: &[ValueType], values: &[Value]) -> Result<(), CodecError> {
    if types.len() != values.len() {
        return Err(CodecError::Arity {
            expected: types.len(),
            found: values.len(),
        });
    }
    for (idx, (ty, value)) in types.iter().zip(values).enumerate() {
        check_value(ty, value, &format!("${idx}"))?;
    }
    Ok(())
}

fn check_value(ty: &ValueType, value: &Value, path: &str) -> Result<(), CodecError> {
    let ok = match ty {
        ValueType::Reserved => true,
        ValueType::Null => value.is_null(),
        ValueType::Bool => value.is_boolean(),
        ValueType::Nat | ValueType::Nat64 => value.as_u64().is_some(),
        ValueType::Nat8 => value.as_u64().is_some_and(|n| n <= u64::from(u8::MAX)),
        ValueType::Nat32 => value.as_u64().is_some_and(|n| n <= u64::from(u32::MAX)),
        ValueType::Int => value.as_i64().is_some(),
        ValueType::Text => value.is_string(),
        ValueType::Principal => value.as_str().is_some_and(|s| !s.is_empty()),
        ValueType::Blob => value.as_array().is_some_and(|bytes| {
            bytes
                .iter()
                .all(|b| b.as_u64().is_some_and(|n| n <= u64::from(u8::MAX)))
        }),
        ValueType::Opt(inner) => {
            return if value.is_null() {
                Ok(())
            } else {
                check_value(inner, value, path)
            };
        }
        ValueType::Vec(inner) => {
            let Some(items) = value.as_array() else {
                return Err(mismatch(ty, value, path));
            };
            for (idx, item) in items.iter().enumerate() {
                check_value(inner, item, &format!("{path}[{idx}]"))?;
            }
            return Ok(());
        }
        ValueType::Tuple(types) => {
            let Some(items) = value.as_array() else {
                return Err(mismatch(ty, value, path));
            };
            if items.len() != types.len() {
                return Err(mismatch(ty, value, path));
            }
            for (idx, (item_ty, item)) in types.iter().zip(items).enumerate() {
                check_value(item_ty, item, &format!("{path}.{idx}"))?;
            }
            return Ok(());
        }
        ValueType::Record(fields) => return check_record(ty, fields, value, path),
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(ty, value, path))
    }
}

fn check_record(
    ty: &ValueType,
    fields: &[Field],
    value: &Value,
    path: &str,
) -> Result<(), CodecError> {
    let Some(object) = value.as_object() else {
        return Err(mismatch(ty, value, path));
    };
    if let Some(extra) = object
        .keys()
        .find(|key| !fields.iter().any(|f| &f.name == *key))
    {
        return Err(CodecError::UnknownField {
            path: path.to_owned(),
            field: extra.clone(),
        });
    }
    for field in fields {
        let field_path = format!("{path}.{}", field.name);
        match object.get(&field.name) {
            Some(v) => check_value(&field.ty, v, &field_path)?,
            // Absent optional fields read as null.
            None if matches!(field.ty, ValueType::Opt(_) | ValueType::Reserved) => {}
            None => return Err(mismatch(&field.ty, &Value::Null, &field_path)),
        }
    }
    Ok(())
}

fn mismatch(ty: &ValueType, value: &Value, path: &str) -> CodecError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    CodecError::TypeMismatch {
        path: path.to_owned(),
        expected: ty.name(),
        found: found.to_owned(),
    }
}
