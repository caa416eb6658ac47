use std::fmt;
use std::sync::Arc;

use crate::codec::bean::{BeanSchema, BeanValue, EnumSchema};
use crate::connector::ConnectorKey;
use crate::error::CodecError;

/// transport type tag of strings
pub const VTYPE_STRING: &str = "s";
/// transport type tag of booleans
pub const VTYPE_BOOLEAN: &str = "b";
/// transport type tag of 32 bit integers
pub const VTYPE_INTEGER: &str = "i";
/// transport type tag of 64 bit integers
pub const VTYPE_LONG: &str = "l";
/// transport type tag of 32 bit floats
pub const VTYPE_FLOAT: &str = "f";
/// transport type tag of 64 bit floats
pub const VTYPE_DOUBLE: &str = "d";
/// transport type tag of connector references
pub const VTYPE_CONNECTOR: &str = "c";
/// transport type tag of string arrays
pub const VTYPE_STRINGARRAY: &str = "S";
/// transport type tag of untyped object arrays
pub const VTYPE_ARRAY: &str = "a";
/// transport type tag of maps
pub const VTYPE_MAP: &str = "m";
/// transport type tag of lists
pub const VTYPE_LIST: &str = "L";
/// transport type tag of sets
pub const VTYPE_SET: &str = "q";
/// transport type tag of null
pub const VTYPE_NULL: &str = "n";

/// The statically declared type of a value: a state property, an RPC parameter or a
/// collection element. The declared type selects the encode/decode path, the runtime
/// [`Value`] supplies the data.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    /// the "no value" type, only `null` is valid
    Void,
    /// UTF-8 string
    String,
    /// boolean
    Boolean,
    /// 32 bit integer
    Integer,
    /// 64 bit integer
    Long,
    /// 32 bit float
    Float,
    /// 64 bit float
    Double,
    /// a single character, sent as a one character string
    Char,
    /// a signed byte
    Byte,
    /// reference to a connector, sent as its id
    Connector,
    /// legacy string array
    StringArray,
    /// legacy untyped object array, elements are self-describing
    ObjectArray,
    /// ordered collection, `None` when the element type is not declared
    List(Option<Box<TypeDesc>>),
    /// set, `None` when the element type is not declared
    Set(Option<Box<TypeDesc>>),
    /// map with declared key and value types, `None` when they are not declared
    Map(Option<(Box<TypeDesc>, Box<TypeDesc>)>),
    /// fixed length typed array
    Array(Box<TypeDesc>),
    /// enumeration, sent as the variant name
    Enum(Arc<EnumSchema>),
    /// bean with a declared property set
    Bean(Arc<BeanSchema>),
    /// a self-describing `[tag, value]` pair
    UidlValue,
    /// raw JSON passed through untouched
    Json,
}

impl TypeDesc {
    /// a list with the given element type
    pub fn list(element: TypeDesc) -> TypeDesc {
        TypeDesc::List(Some(Box::new(element)))
    }

    /// a set with the given element type
    pub fn set(element: TypeDesc) -> TypeDesc {
        TypeDesc::Set(Some(Box::new(element)))
    }

    /// a map with the given key and value types
    pub fn map(key: TypeDesc, value: TypeDesc) -> TypeDesc {
        TypeDesc::Map(Some((Box::new(key), Box::new(value))))
    }

    /// a fixed length array with the given element type
    pub fn array(element: TypeDesc) -> TypeDesc {
        TypeDesc::Array(Box::new(element))
    }

    /// the transport type tag of internal types, `None` for custom types
    pub fn transport_type(&self) -> Option<&'static str> {
        let tag = match self {
            TypeDesc::Void => VTYPE_NULL,
            TypeDesc::String => VTYPE_STRING,
            TypeDesc::Boolean => VTYPE_BOOLEAN,
            TypeDesc::Integer => VTYPE_INTEGER,
            TypeDesc::Long => VTYPE_LONG,
            TypeDesc::Float => VTYPE_FLOAT,
            TypeDesc::Double => VTYPE_DOUBLE,
            TypeDesc::Connector => VTYPE_CONNECTOR,
            TypeDesc::StringArray => VTYPE_STRINGARRAY,
            TypeDesc::ObjectArray => VTYPE_ARRAY,
            TypeDesc::List(_) => VTYPE_LIST,
            TypeDesc::Set(_) => VTYPE_SET,
            TypeDesc::Map(_) => VTYPE_MAP,
            _ => return None,
        };
        Some(tag)
    }

    /// resolves a transport type tag received from the client
    pub fn from_transport_type(tag: &str) -> Option<TypeDesc> {
        let desc = match tag {
            VTYPE_NULL => TypeDesc::Void,
            VTYPE_STRING => TypeDesc::String,
            VTYPE_BOOLEAN => TypeDesc::Boolean,
            VTYPE_INTEGER => TypeDesc::Integer,
            VTYPE_LONG => TypeDesc::Long,
            VTYPE_FLOAT => TypeDesc::Float,
            VTYPE_DOUBLE => TypeDesc::Double,
            VTYPE_CONNECTOR => TypeDesc::Connector,
            VTYPE_STRINGARRAY => TypeDesc::StringArray,
            VTYPE_ARRAY => TypeDesc::ObjectArray,
            VTYPE_MAP => TypeDesc::Map(None),
            VTYPE_LIST => TypeDesc::List(None),
            VTYPE_SET => TypeDesc::Set(None),
            _ => return None,
        };
        Some(desc)
    }

    /// internal types are the fixed vocabulary accepted when decoding is restricted
    pub fn is_internal(&self) -> bool {
        matches!(self, TypeDesc::UidlValue) || self.transport_type().is_some()
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::List(Some(e)) => write!(f, "List<{}>", e),
            TypeDesc::Set(Some(e)) => write!(f, "Set<{}>", e),
            TypeDesc::Map(Some((k, v))) => write!(f, "Map<{}, {}>", k, v),
            TypeDesc::Array(e) => write!(f, "{}[]", e),
            TypeDesc::Enum(schema) => f.write_str(schema.name()),
            TypeDesc::Bean(schema) => f.write_str(schema.name()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A native server-side value, before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// absence of a value
    Null,
    /// string
    String(String),
    /// boolean
    Boolean(bool),
    /// 32 bit integer
    Integer(i32),
    /// 64 bit integer
    Long(i64),
    /// 32 bit float
    Float(f32),
    /// 64 bit float
    Double(f64),
    /// character
    Char(char),
    /// signed byte
    Byte(i8),
    /// reference to a connector of the same UI
    Connector(ConnectorKey),
    /// ordered collection
    List(Vec<Value>),
    /// set, kept in insertion order so encoding stays deterministic
    Set(Vec<Value>),
    /// fixed length array
    Array(Vec<Value>),
    /// map, kept in insertion order
    Map(Vec<(Value, Value)>),
    /// enum variant name
    Enum(String),
    /// bean with declared properties
    Bean(BeanValue),
    /// raw JSON
    Json(serde_json::Value),
}

impl Value {
    /// a short name of the runtime kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::Byte(_) => "byte",
            Value::Connector(_) => "connector",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Enum(_) => "enum",
            Value::Bean(_) => "bean",
            Value::Json(_) => "json",
        }
    }

    /// `true` for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// the declared type a self-describing element of this value implies.
    ///
    /// Nested collections and maps carry no element type information and fail.
    pub fn infer_type(&self) -> Result<TypeDesc, CodecError> {
        let desc = match self {
            Value::Null => TypeDesc::Void,
            Value::String(_) => TypeDesc::String,
            Value::Boolean(_) => TypeDesc::Boolean,
            Value::Integer(_) => TypeDesc::Integer,
            Value::Long(_) => TypeDesc::Long,
            Value::Float(_) => TypeDesc::Float,
            Value::Double(_) => TypeDesc::Double,
            Value::Char(_) => TypeDesc::Char,
            Value::Byte(_) => TypeDesc::Byte,
            Value::Connector(_) => TypeDesc::Connector,
            Value::Enum(_) => TypeDesc::String,
            Value::Bean(bean) => TypeDesc::Bean(bean.schema().clone()),
            Value::Json(_) => TypeDesc::Json,
            Value::List(_) => return Err(CodecError::MissingGenerics("List")),
            Value::Set(_) => return Err(CodecError::MissingGenerics("Set")),
            Value::Array(_) => return Err(CodecError::MissingGenerics("Array")),
            Value::Map(_) => return Err(CodecError::MissingGenerics("Map")),
        };
        Ok(desc)
    }

    /// the string content of a string or enum value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// the content of a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// any integral value widened to `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            Value::Byte(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// any numeric value widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    /// the referenced connector
    pub fn as_connector(&self) -> Option<ConnectorKey> {
        match self {
            Value::Connector(key) => Some(*key),
            _ => None,
        }
    }

    /// the elements of a list, set or array
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) | Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<ConnectorKey> for Value {
    fn from(key: ConnectorKey) -> Self {
        Value::Connector(key)
    }
}
