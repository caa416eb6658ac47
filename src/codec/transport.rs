use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use indexmap::IndexMap;

use crate::codec::value::{TypeDesc, Value};
use crate::connector::ConnectorKey;
use crate::error::CodecError;

/// Maps a native Rust type to its declared [`TypeDesc`] and to and from [`Value`].
///
/// State beans, RPC parameters and legacy variables are all converted through this trait,
/// the codec itself only ever sees [`Value`]s.
pub trait Transport: Sized {
    /// the declared type of this native type
    fn type_desc() -> TypeDesc;

    /// converts the native value into a [`Value`]
    fn to_value(&self) -> Value;

    /// converts a decoded [`Value`] back into the native type
    ///
    /// # Errors
    /// returns a [`CodecError`] when the value has the wrong shape
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

fn mismatch(expected: &str, found: &Value) -> CodecError {
    CodecError::UnsupportedType(format!("{} from {}", expected, found.kind()))
}

impl Transport for String {
    fn type_desc() -> TypeDesc {
        TypeDesc::String
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::String(s) | Value::Enum(s) => Ok(s),
            Value::Char(c) => Ok(c.to_string()),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl Transport for bool {
    fn type_desc() -> TypeDesc {
        TypeDesc::Boolean
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl Transport for i8 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Byte
    }

    fn to_value(&self) -> Value {
        Value::Byte(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value
            .as_i64()
            .and_then(|i| i8::try_from(i).ok())
            .ok_or_else(|| mismatch("i8", &value))
    }
}

impl Transport for i32 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .ok_or_else(|| mismatch("i32", &value))
    }
}

impl Transport for i64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Long
    }

    fn to_value(&self) -> Value {
        Value::Long(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value.as_i64().ok_or_else(|| mismatch("i64", &value))
    }
}

impl Transport for f32 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value
            .as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| mismatch("f32", &value))
    }
}

impl Transport for f64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Double
    }

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl Transport for char {
    fn type_desc() -> TypeDesc {
        TypeDesc::Char
    }

    fn to_value(&self) -> Value {
        Value::Char(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Char(c) => Ok(c),
            Value::String(ref s) => s.chars().next().ok_or_else(|| mismatch("char", &value)),
            other => Err(mismatch("char", &other)),
        }
    }
}

impl Transport for ConnectorKey {
    fn type_desc() -> TypeDesc {
        TypeDesc::Connector
    }

    fn to_value(&self) -> Value {
        Value::Connector(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        value.as_connector().ok_or_else(|| mismatch("connector", &value))
    }
}

impl Transport for serde_json::Value {
    fn type_desc() -> TypeDesc {
        TypeDesc::Json
    }

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Json(json) => Ok(json),
            Value::Null => Ok(serde_json::Value::Null),
            other => Err(mismatch("json", &other)),
        }
    }
}

impl Transport for Value {
    fn type_desc() -> TypeDesc {
        TypeDesc::UidlValue
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(value)
    }
}

impl<T: Transport> Transport for Option<T> {
    fn type_desc() -> TypeDesc {
        T::type_desc()
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn into_elements(expected: &str, value: Value) -> Result<Vec<Value>, CodecError> {
    match value {
        Value::List(items) | Value::Set(items) | Value::Array(items) => Ok(items),
        other => Err(mismatch(expected, &other)),
    }
}

impl<T: Transport> Transport for Vec<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::list(T::type_desc())
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Transport::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        into_elements("Vec", value)?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: Transport> Transport for Box<[T]> {
    fn type_desc() -> TypeDesc {
        TypeDesc::array(T::type_desc())
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(Transport::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Vec::<T>::from_value(value).map(Vec::into_boxed_slice)
    }
}

impl<T: Transport + Ord> Transport for BTreeSet<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::set(T::type_desc())
    }

    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(Transport::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        into_elements("BTreeSet", value)?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

fn into_entries(expected: &str, value: Value) -> Result<Vec<(Value, Value)>, CodecError> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(mismatch(expected, &other)),
    }
}

impl<K: Transport + Ord, V: Transport> Transport for BTreeMap<K, V> {
    fn type_desc() -> TypeDesc {
        TypeDesc::map(K::type_desc(), V::type_desc())
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        into_entries("BTreeMap", value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: Transport + Hash + Eq, V: Transport> Transport for IndexMap<K, V> {
    fn type_desc() -> TypeDesc {
        TypeDesc::map(K::type_desc(), V::type_desc())
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        into_entries("IndexMap", value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}
