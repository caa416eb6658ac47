//! Encoding of server-side values into the JSON wire representation, decoding of client
//! payloads back into values, and structural diffing of bean state against a reference.
//!
//! The codec is driven by the declared [`TypeDesc`] of the value being processed. Internal
//! types carry a one letter transport tag (see the `VTYPE_*` constants) so that they can be
//! sent self-described as a `[tag, value]` pair.

use std::borrow::Cow;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{Map, Number, Value as Json};

use crate::connector::ConnectorKey;
use crate::error::CodecError;

pub use self::bean::{
    Bean, BeanSchema, BeanSchemaBuilder, BeanValue, EnumSchema, PropertyDesc, PropertyKind,
};
pub use self::transport::Transport;
pub use self::value::*;

mod bean;
mod transport;
mod value;

/// lazily built schema storage used by [`bean!`](crate::bean)
pub type SchemaCell = OnceCell<Arc<BeanSchema>>;
/// lazily built schema storage used by [`transport_enum!`](crate::transport_enum)
pub type EnumCell = OnceCell<Arc<EnumSchema>>;

static STRING_TYPE: TypeDesc = TypeDesc::String;

/// The view of a connector tree the codec needs to resolve connector references.
pub trait ConnectorResolver {
    /// the id of a registered connector, `None` when the connector has no id yet
    fn connector_id(&self, connector: ConnectorKey) -> Option<&str>;

    /// the registered connector with the given id
    fn find_connector(&self, id: &str) -> Option<ConnectorKey>;

    /// `true` for component connectors (as opposed to extensions and the root)
    fn is_component(&self, connector: ConnectorKey) -> bool;

    /// visibility as the client sees it
    fn is_visible(&self, connector: ConnectorKey) -> bool;
}

/// the outcome of encoding one value
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeResult {
    /// the complete encoding
    pub encoded: Json,
    /// for beans, the properties that differ from the reference
    pub diff: Option<Json>,
}

impl EncodeResult {
    fn new(encoded: Json) -> Self {
        EncodeResult {
            encoded,
            diff: None,
        }
    }

    /// the diff if one was computed, else the full encoding
    pub fn diff_or_value(&self) -> &Json {
        self.diff.as_ref().unwrap_or(&self.encoded)
    }
}

/// Encodes `value` as declared by `value_type`.
///
/// `reference` is the previously sent encoding, used only for beans to compute the diff.
///
/// # Errors
/// returns a [`CodecError`] when a collection or map lacks its element types or a value
/// does not fit its declaration
pub fn encode(
    value: &Value,
    reference: Option<&Json>,
    value_type: &TypeDesc,
    resolver: &dyn ConnectorResolver,
) -> Result<EncodeResult, CodecError> {
    let encoded = match value {
        Value::Null => Json::Null,
        Value::String(s) => Json::String(s.clone()),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Long(l) => Json::from(*l),
        Value::Float(f) => float_json(f64::from(*f)),
        Value::Double(d) => float_json(*d),
        Value::Char(c) => Json::String(c.to_string()),
        Value::Byte(b) => Json::from(*b),
        Value::Enum(name) => Json::String(name.clone()),
        Value::Json(json) => json.clone(),
        Value::Connector(key) => encode_connector(*key, resolver),
        Value::List(items) | Value::Set(items) | Value::Array(items) => {
            encode_elements(collection_element(value_type), items, resolver)?
        }
        Value::Map(entries) => encode_map(value_type, entries, resolver)?,
        Value::Bean(bean) => return encode_bean(bean, reference, resolver),
    };
    Ok(EncodeResult::new(encoded))
}

/// encodes a value without a declared type, as a self-describing element would be
pub fn encode_untyped(
    value: &Value,
    resolver: &dyn ConnectorResolver,
) -> Result<Json, CodecError> {
    let value_type = value.infer_type()?;
    Ok(encode(value, None, &value_type, resolver)?.encoded)
}

/// Encodes `value` as a self-describing `[tag, value]` pair, the way clients send
/// legacy variable changes.
///
/// # Errors
/// returns [`CodecError::UnsupportedType`] for values without a transport tag
pub fn encode_uidl_value(
    value: &Value,
    resolver: &dyn ConnectorResolver,
) -> Result<Json, CodecError> {
    let (tag, value_type) = match value {
        Value::Null => (VTYPE_NULL, TypeDesc::Void),
        Value::String(_) | Value::Enum(_) | Value::Char(_) => (VTYPE_STRING, TypeDesc::String),
        Value::Boolean(_) => (VTYPE_BOOLEAN, TypeDesc::Boolean),
        Value::Integer(_) | Value::Byte(_) => (VTYPE_INTEGER, TypeDesc::Integer),
        Value::Long(_) => (VTYPE_LONG, TypeDesc::Long),
        Value::Float(_) => (VTYPE_FLOAT, TypeDesc::Float),
        Value::Double(_) => (VTYPE_DOUBLE, TypeDesc::Double),
        Value::Connector(_) => (VTYPE_CONNECTOR, TypeDesc::Connector),
        Value::List(_) => (VTYPE_LIST, TypeDesc::List(None)),
        Value::Set(_) => (VTYPE_SET, TypeDesc::Set(None)),
        Value::Array(_) => (VTYPE_ARRAY, TypeDesc::ObjectArray),
        Value::Map(_) => (VTYPE_MAP, TypeDesc::map(TypeDesc::String, TypeDesc::UidlValue)),
        other => return Err(CodecError::UnsupportedType(other.kind().to_string())),
    };
    let encoded = match value {
        // elements of self-describing containers are themselves self-describing
        Value::List(items) | Value::Set(items) | Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| encode_uidl_value(item, resolver))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => {
            let mut object = Map::new();
            for (k, v) in entries {
                let key = k
                    .as_str()
                    .ok_or_else(|| CodecError::UnsupportedType(format!("{} map key", k.kind())))?;
                object.insert(key.to_string(), encode_uidl_value(v, resolver)?);
            }
            Json::Object(object)
        }
        other => encode(other, None, &value_type, resolver)?.encoded,
    };
    Ok(Json::Array(vec![Json::String(tag.to_string()), encoded]))
}

fn float_json(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}

fn encode_connector(key: ConnectorKey, resolver: &dyn ConnectorResolver) -> Json {
    if resolver.is_component(key) && !resolver.is_visible(key) {
        return Json::Null;
    }
    match resolver.connector_id(key) {
        Some(id) => Json::String(id.to_string()),
        None => Json::Null,
    }
}

fn collection_element(declared: &TypeDesc) -> Option<&TypeDesc> {
    match declared {
        TypeDesc::List(Some(e)) | TypeDesc::Set(Some(e)) | TypeDesc::Array(e) => Some(e),
        TypeDesc::StringArray => Some(&STRING_TYPE),
        _ => None,
    }
}

fn encode_elements(
    element_type: Option<&TypeDesc>,
    items: &[Value],
    resolver: &dyn ConnectorResolver,
) -> Result<Json, CodecError> {
    let mut encoded = Vec::with_capacity(items.len());
    for item in items {
        let item_type = match element_type {
            Some(t) if !matches!(t, TypeDesc::UidlValue) => Cow::Borrowed(t),
            _ => Cow::Owned(item.infer_type()?),
        };
        encoded.push(encode(item, None, &item_type, resolver)?.encoded);
    }
    Ok(Json::Array(encoded))
}

fn encode_map(
    declared: &TypeDesc,
    entries: &[(Value, Value)],
    resolver: &dyn ConnectorResolver,
) -> Result<Json, CodecError> {
    // the client decodes an empty map from an empty array whatever the key type
    if entries.is_empty() {
        return Ok(Json::Array(Vec::new()));
    }
    let (key_type, value_type) = match declared {
        TypeDesc::Map(Some((k, v))) => (k.as_ref(), v.as_ref()),
        _ => return Err(CodecError::MissingGenerics("Map")),
    };

    match key_type {
        TypeDesc::String => {
            let mut object = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::String(s) | Value::Enum(s) => s.clone(),
                    Value::Char(c) => c.to_string(),
                    other => {
                        return Err(CodecError::UnsupportedType(format!(
                            "{} key in Map<String, _>",
                            other.kind()
                        )))
                    }
                };
                object.insert(key, encode_child(v, value_type, resolver)?);
            }
            Ok(Json::Object(object))
        }
        TypeDesc::Connector => {
            let mut object = Map::new();
            for (k, v) in entries {
                let key = match k.as_connector() {
                    Some(key) => key,
                    None => {
                        return Err(CodecError::UnsupportedType(format!(
                            "{} key in Map<Connector, _>",
                            k.kind()
                        )))
                    }
                };
                if !resolver.is_visible(key) {
                    continue;
                }
                if let Some(id) = resolver.connector_id(key) {
                    object.insert(id.to_string(), encode_child(v, value_type, resolver)?);
                }
            }
            Ok(Json::Object(object))
        }
        _ => {
            let mut keys = Vec::with_capacity(entries.len());
            let mut values = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                keys.push(encode_child(k, key_type, resolver)?);
                values.push(encode_child(v, value_type, resolver)?);
            }
            Ok(Json::Array(vec![Json::Array(keys), Json::Array(values)]))
        }
    }
}

fn encode_child(
    value: &Value,
    declared: &TypeDesc,
    resolver: &dyn ConnectorResolver,
) -> Result<Json, CodecError> {
    if matches!(declared, TypeDesc::UidlValue) {
        return encode_untyped(value, resolver);
    }
    Ok(encode(value, None, declared, resolver)?.encoded)
}

fn encode_bean(
    bean: &BeanValue,
    reference: Option<&Json>,
    resolver: &dyn ConnectorResolver,
) -> Result<EncodeResult, CodecError> {
    let reference = reference.and_then(Json::as_object);
    let mut encoded = Map::new();
    let mut diff = Map::new();

    for property in bean.schema().properties() {
        let field_value = bean.get(&property.name).unwrap_or(&Value::Null);
        let field_reference = reference
            .and_then(|r| r.get(&property.name))
            .filter(|r| !r.is_null());

        let result = encode(field_value, field_reference, &property.type_desc, resolver)?;
        if !json_equals(&result.encoded, field_reference) {
            diff.insert(property.name.clone(), result.diff_or_value().clone());
        }
        encoded.insert(property.name.clone(), result.encoded);
    }

    Ok(EncodeResult {
        encoded: Json::Object(encoded),
        diff: Some(Json::Object(diff)),
    })
}

/// Structural equality of an encoding and a reference, where a missing reference equals `null`.
///
/// Primitive values are also considered equal when their string forms are, so a reference
/// holding `"5"` equals an encoding of `5`.
pub fn json_equals(encoded: &Json, reference: Option<&Json>) -> bool {
    let reference = match reference {
        None | Some(Json::Null) => return encoded.is_null(),
        Some(r) => r,
    };
    if encoded == reference {
        return true;
    }
    match (encoded, reference) {
        (Json::Object(_), _) | (_, Json::Object(_)) | (Json::Array(_), _) | (_, Json::Array(_)) => {
            false
        }
        (Json::Null, _) => false,
        _ => string_form(encoded) == string_form(reference),
    }
}

fn string_form(json: &Json) -> Cow<'_, str> {
    match json {
        Json::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Decodes `json` into a value of `target`, dispatching between internal and custom types.
///
/// # Errors
/// returns a [`CodecError`] when `json` does not match `target`
pub fn decode_internal_or_custom(
    target: &TypeDesc,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    if target.is_internal() {
        decode_internal(target, false, json, resolver)
    } else {
        decode_custom(target, json, resolver)
    }
}

/// Decodes one of the internal (transport tagged) types.
///
/// With `restrict` set, nested values are decoded as self-describing `[tag, value]`
/// pairs regardless of any declared element type, so only internal types are reachable.
///
/// # Errors
/// returns a [`CodecError`] when `json` does not match `target`
pub fn decode_internal(
    target: &TypeDesc,
    restrict: bool,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match target {
        TypeDesc::Void => Err(CodecError::NonNullForNullType),
        TypeDesc::UidlValue => decode_uidl_value(json, resolver),
        TypeDesc::List(_) => Ok(Value::List(decode_elements(target, restrict, json, resolver)?)),
        TypeDesc::Set(_) => Ok(Value::Set(decode_elements(target, restrict, json, resolver)?)),
        TypeDesc::ObjectArray => Ok(Value::Array(decode_elements(
            &TypeDesc::List(None),
            true,
            json,
            resolver,
        )?)),
        TypeDesc::StringArray => {
            let items = json
                .as_array()
                .ok_or_else(|| CodecError::malformed("string array", json))?;
            Ok(Value::Array(
                items
                    .iter()
                    .map(|item| Value::String(string_form(item).into_owned()))
                    .collect(),
            ))
        }
        TypeDesc::Map(_) => decode_map(target, restrict, json, resolver),
        TypeDesc::Connector => {
            let id = string_form(json);
            Ok(resolver
                .find_connector(&id)
                .map(Value::Connector)
                .unwrap_or(Value::Null))
        }
        TypeDesc::String => Ok(Value::String(string_form(json).into_owned())),
        TypeDesc::Boolean => {
            let b = match json {
                Json::Bool(b) => *b,
                other => string_form(other).eq_ignore_ascii_case("true"),
            };
            Ok(Value::Boolean(b))
        }
        TypeDesc::Integer => parse_primitive(json, VTYPE_INTEGER).map(Value::Integer),
        TypeDesc::Long => parse_primitive(json, VTYPE_LONG).map(Value::Long),
        TypeDesc::Float => parse_primitive(json, VTYPE_FLOAT).map(Value::Float),
        TypeDesc::Double => parse_primitive(json, VTYPE_DOUBLE).map(Value::Double),
        other => Err(CodecError::UnsupportedType(other.to_string())),
    }
}

fn parse_primitive<T: std::str::FromStr>(
    json: &Json,
    transport_type: &'static str,
) -> Result<T, CodecError> {
    let form = string_form(json);
    form.trim().parse().map_err(|_| CodecError::Parse {
        value: form.into_owned(),
        transport_type,
    })
}

fn decode_uidl_value(json: &Json, resolver: &dyn ConnectorResolver) -> Result<Value, CodecError> {
    let pair = match json.as_array() {
        Some(pair) if pair.len() == 2 => pair,
        _ => return Err(CodecError::malformed("[tag, value] pair", json)),
    };
    let tag = pair[0]
        .as_str()
        .ok_or_else(|| CodecError::malformed("transport type tag", &pair[0]))?;
    let target = TypeDesc::from_transport_type(tag)
        .ok_or_else(|| CodecError::UnsupportedType(format!("transport type {:?}", tag)))?;
    decode_internal(&target, true, &pair[1], resolver)
}

fn decode_elements(
    target: &TypeDesc,
    restrict: bool,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Vec<Value>, CodecError> {
    let items = json
        .as_array()
        .ok_or_else(|| CodecError::malformed("array", json))?;
    let element_type = match target {
        TypeDesc::List(Some(e)) | TypeDesc::Set(Some(e)) if !restrict => Some(e.as_ref()),
        _ => None,
    };
    items
        .iter()
        .map(|item| decode_parametrized(element_type, item, resolver))
        .collect()
}

fn decode_parametrized(
    declared: Option<&TypeDesc>,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    match declared {
        Some(t) => decode_internal_or_custom(t, json, resolver),
        None => decode_internal(&TypeDesc::UidlValue, true, json, resolver),
    }
}

fn decode_map(
    target: &TypeDesc,
    restrict: bool,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    if let Some(items) = json.as_array() {
        if items.is_empty() {
            return Ok(Value::Map(Vec::new()));
        }
    }

    let declared = match target {
        TypeDesc::Map(Some((k, v))) if !restrict => Some((k.as_ref(), v.as_ref())),
        _ => None,
    };

    match declared {
        Some((TypeDesc::String, value_type)) => {
            let object = json
                .as_object()
                .ok_or_else(|| CodecError::malformed("object", json))?;
            object
                .iter()
                .map(|(k, v)| {
                    Ok((
                        Value::String(k.clone()),
                        decode_internal_or_custom(value_type, v, resolver)?,
                    ))
                })
                .collect::<Result<_, _>>()
                .map(Value::Map)
        }
        Some((TypeDesc::Connector, value_type)) => {
            let object = json
                .as_object()
                .ok_or_else(|| CodecError::malformed("object", json))?;
            object
                .iter()
                .map(|(k, v)| {
                    let key = resolver
                        .find_connector(k)
                        .map(Value::Connector)
                        .unwrap_or(Value::Null);
                    Ok((key, decode_internal_or_custom(value_type, v, resolver)?))
                })
                .collect::<Result<_, _>>()
                .map(Value::Map)
        }
        Some((key_type, value_type)) => {
            let parts = match json.as_array() {
                Some(parts) if parts.len() == 2 => parts,
                _ => return Err(CodecError::malformed("[[keys], [values]]", json)),
            };
            let keys = parts[0]
                .as_array()
                .ok_or_else(|| CodecError::malformed("key array", &parts[0]))?;
            let values = parts[1]
                .as_array()
                .ok_or_else(|| CodecError::malformed("value array", &parts[1]))?;
            if keys.len() != values.len() {
                return Err(CodecError::malformed(
                    format!("{} values", keys.len()),
                    &parts[1],
                ));
            }
            keys.iter()
                .zip(values)
                .map(|(k, v)| {
                    Ok((
                        decode_internal_or_custom(key_type, k, resolver)?,
                        decode_internal_or_custom(value_type, v, resolver)?,
                    ))
                })
                .collect::<Result<_, _>>()
                .map(Value::Map)
        }
        // restricted or undeclared maps are string maps of self-describing values
        None => {
            let object = json
                .as_object()
                .ok_or_else(|| CodecError::malformed("object", json))?;
            object
                .iter()
                .map(|(k, v)| Ok((Value::String(k.clone()), decode_uidl_value(v, resolver)?)))
                .collect::<Result<_, _>>()
                .map(Value::Map)
        }
    }
}

fn decode_custom(
    target: &TypeDesc,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match target {
        TypeDesc::Byte => parse_primitive(json, "byte").map(Value::Byte),
        TypeDesc::Char => string_form(json)
            .chars()
            .next()
            .map(Value::Char)
            .ok_or_else(|| CodecError::malformed("a character", json)),
        TypeDesc::Json => Ok(Value::Json(json.clone())),
        TypeDesc::Array(element) => {
            let items = json
                .as_array()
                .ok_or_else(|| CodecError::malformed("array", json))?;
            items
                .iter()
                .map(|item| decode_internal_or_custom(element, item, resolver))
                .collect::<Result<_, _>>()
                .map(Value::Array)
        }
        TypeDesc::Enum(schema) => {
            let name = json
                .as_str()
                .ok_or_else(|| CodecError::malformed(schema.name().to_string(), json))?;
            if !schema.has_variant(name) {
                return Err(CodecError::UnknownVariant {
                    enumeration: schema.name().to_string(),
                    name: name.to_string(),
                });
            }
            Ok(Value::Enum(name.to_string()))
        }
        TypeDesc::Bean(schema) => decode_bean(schema, json, resolver),
        other => Err(CodecError::UnsupportedType(other.to_string())),
    }
}

fn decode_bean(
    schema: &Arc<BeanSchema>,
    json: &Json,
    resolver: &dyn ConnectorResolver,
) -> Result<Value, CodecError> {
    let object = json
        .as_object()
        .ok_or_else(|| CodecError::malformed(schema.name().to_string(), json))?;
    let mut bean = BeanValue::new(schema.clone());
    for property in schema.properties() {
        let encoded = object
            .get(&property.name)
            .ok_or_else(|| CodecError::MissingProperty {
                bean: schema.name().to_string(),
                property: property.name.clone(),
            })?;
        let decoded = decode_internal_or_custom(&property.type_desc, encoded, resolver)?;
        bean.set(property.name.clone(), decoded);
    }
    Ok(Value::Bean(bean))
}

/// A resolver for values that contain no connector references.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConnectors;

impl ConnectorResolver for NoConnectors {
    fn connector_id(&self, _connector: ConnectorKey) -> Option<&str> {
        None
    }

    fn find_connector(&self, _id: &str) -> Option<ConnectorKey> {
        None
    }

    fn is_component(&self, _connector: ConnectorKey) -> bool {
        false
    }

    fn is_visible(&self, _connector: ConnectorKey) -> bool {
        false
    }
}
