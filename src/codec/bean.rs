use std::sync::Arc;

use indexmap::IndexMap;

use crate::codec::value::{TypeDesc, Value};
use crate::error::CodecError;

/// how a bean property is declared, accessor declared properties are serialized first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// declared through a getter/setter pair
    Accessor,
    /// declared as a public field
    Field,
}

/// one declared property of a bean
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDesc {
    /// the property name, also its JSON key
    pub name: String,
    /// the declared type of the property
    pub type_desc: TypeDesc,
    /// how the property was declared
    pub kind: PropertyKind,
}

/// The explicit property schema of a bean type.
///
/// Properties are kept in serialization order: accessor declared properties first,
/// then field declared properties, each group in declaration order.
#[derive(Debug, PartialEq)]
pub struct BeanSchema {
    name: String,
    properties: Vec<PropertyDesc>,
}

impl BeanSchema {
    /// starts a schema for the bean type named `name`
    pub fn builder(name: impl Into<String>) -> BeanSchemaBuilder {
        BeanSchemaBuilder {
            name: name.into(),
            accessors: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// the bean type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// all properties in serialization order
    pub fn properties(&self) -> &[PropertyDesc] {
        &self.properties
    }

    /// looks up a property by name
    pub fn property(&self, name: &str) -> Option<&PropertyDesc> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// builder of a [`BeanSchema`]
#[derive(Debug)]
pub struct BeanSchemaBuilder {
    name: String,
    accessors: Vec<PropertyDesc>,
    fields: Vec<PropertyDesc>,
}

impl BeanSchemaBuilder {
    /// declares a public field property
    pub fn field(mut self, name: impl Into<String>, type_desc: TypeDesc) -> Self {
        self.fields.push(PropertyDesc {
            name: name.into(),
            type_desc,
            kind: PropertyKind::Field,
        });
        self
    }

    /// declares an accessor property
    pub fn accessor(mut self, name: impl Into<String>, type_desc: TypeDesc) -> Self {
        self.accessors.push(PropertyDesc {
            name: name.into(),
            type_desc,
            kind: PropertyKind::Accessor,
        });
        self
    }

    /// finishes the schema
    ///
    /// # Errors
    /// returns [`CodecError::DuplicateProperty`] when two properties share a name
    pub fn build(self) -> Result<Arc<BeanSchema>, CodecError> {
        let mut properties = self.accessors;
        properties.extend(self.fields);
        for (i, property) in properties.iter().enumerate() {
            if properties[..i].iter().any(|p| p.name == property.name) {
                return Err(CodecError::DuplicateProperty {
                    bean: self.name,
                    property: property.name.clone(),
                });
            }
        }
        Ok(Arc::new(BeanSchema {
            name: self.name,
            properties,
        }))
    }

    /// finishes a schema whose property names are unique by construction, as the ones
    /// generated by [`bean!`](crate::bean)
    ///
    /// # Panics
    /// panics when two properties share a name
    pub fn build_static(self) -> Arc<BeanSchema> {
        match self.build() {
            Ok(schema) => schema,
            Err(e) => panic!("invalid bean declaration: {}", e),
        }
    }
}

/// A bean instance: its schema and the current property values.
#[derive(Debug, Clone, PartialEq)]
pub struct BeanValue {
    schema: Arc<BeanSchema>,
    properties: IndexMap<String, Value>,
}

impl BeanValue {
    /// an instance of `schema` with every property unset (null)
    pub fn new(schema: Arc<BeanSchema>) -> Self {
        BeanValue {
            schema,
            properties: IndexMap::new(),
        }
    }

    /// sets a property and returns the bean
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// sets a property
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }

    /// the value of a property, `None` when it was never set
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// removes a property from the bean, returning [`Value::Null`] when it was not set
    pub fn take(&mut self, name: &str) -> Value {
        self.properties.shift_remove(name).unwrap_or(Value::Null)
    }

    /// the schema of this bean
    pub fn schema(&self) -> &Arc<BeanSchema> {
        &self.schema
    }
}

/// The declared variants of an enumeration.
#[derive(Debug, PartialEq, Eq)]
pub struct EnumSchema {
    name: String,
    variants: Vec<String>,
}

impl EnumSchema {
    /// a schema of the enum `name` with the given variant names
    pub fn new(name: impl Into<String>, variants: &[&str]) -> Self {
        EnumSchema {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// the enum type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// returns `true` if `variant` is declared
    pub fn has_variant(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v == variant)
    }
}

/// A native type with an explicit bean schema. Usually implemented with [`bean!`](crate::bean).
pub trait Bean: Sized {
    /// the schema shared by every instance
    fn schema() -> Arc<BeanSchema>;

    /// captures the current property values
    fn to_bean(&self) -> BeanValue;

    /// rebuilds the native value from decoded properties
    ///
    /// # Errors
    /// fails when a property value does not convert to the native field type
    fn from_bean(bean: BeanValue) -> Result<Self, CodecError>;
}

/// Declares a struct together with its [`Bean`] schema and [`Transport`](crate::codec::Transport)
/// conversions. Every field type must implement `Transport`.
///
/// ```ignore
/// uidl::bean! {
///     #[derive(Debug, Default, Clone)]
///     pub struct LabelState {
///         pub caption: Option<String>,
///         pub width: i32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! bean {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty, )*
        }

        impl $crate::codec::Bean for $name {
            fn schema() -> ::std::sync::Arc<$crate::codec::BeanSchema> {
                static SCHEMA: $crate::codec::SchemaCell = $crate::codec::SchemaCell::new();
                SCHEMA
                    .get_or_init(|| {
                        $crate::codec::BeanSchema::builder(stringify!($name))
                            $( .field(
                                stringify!($field),
                                <$ty as $crate::codec::Transport>::type_desc(),
                            ) )*
                            .build_static()
                    })
                    .clone()
            }

            fn to_bean(&self) -> $crate::codec::BeanValue {
                $crate::codec::BeanValue::new(<Self as $crate::codec::Bean>::schema())
                    $( .with(
                        stringify!($field),
                        $crate::codec::Transport::to_value(&self.$field),
                    ) )*
            }

            #[allow(unused_mut, unused_variables)]
            fn from_bean(
                mut bean: $crate::codec::BeanValue,
            ) -> ::std::result::Result<Self, $crate::CodecError> {
                Ok($name {
                    $( $field: <$ty as $crate::codec::Transport>::from_value(
                        bean.take(stringify!($field)),
                    )?, )*
                })
            }
        }

        impl $crate::codec::Transport for $name {
            fn type_desc() -> $crate::codec::TypeDesc {
                $crate::codec::TypeDesc::Bean(<Self as $crate::codec::Bean>::schema())
            }

            fn to_value(&self) -> $crate::codec::Value {
                $crate::codec::Value::Bean(<Self as $crate::codec::Bean>::to_bean(self))
            }

            fn from_value(
                value: $crate::codec::Value,
            ) -> ::std::result::Result<Self, $crate::CodecError> {
                match value {
                    $crate::codec::Value::Bean(bean) => {
                        <Self as $crate::codec::Bean>::from_bean(bean)
                    }
                    other => Err($crate::CodecError::UnsupportedType(format!(
                        "{} from {}",
                        stringify!($name),
                        other.kind()
                    ))),
                }
            }
        }
    };
}

/// Declares a fieldless enum that is transported by variant name.
///
/// ```ignore
/// uidl::transport_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq)]
///     pub enum Alignment { Left, Center, Right }
/// }
/// ```
#[macro_export]
macro_rules! transport_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )*
        }

        impl $crate::codec::Transport for $name {
            fn type_desc() -> $crate::codec::TypeDesc {
                static SCHEMA: $crate::codec::EnumCell = $crate::codec::EnumCell::new();
                $crate::codec::TypeDesc::Enum(
                    SCHEMA
                        .get_or_init(|| {
                            ::std::sync::Arc::new($crate::codec::EnumSchema::new(
                                stringify!($name),
                                &[$( stringify!($variant) ),*],
                            ))
                        })
                        .clone(),
                )
            }

            fn to_value(&self) -> $crate::codec::Value {
                let name = match self {
                    $( $name::$variant => stringify!($variant), )*
                };
                $crate::codec::Value::Enum(name.to_string())
            }

            fn from_value(
                value: $crate::codec::Value,
            ) -> ::std::result::Result<Self, $crate::CodecError> {
                let name = match value {
                    $crate::codec::Value::Enum(name) | $crate::codec::Value::String(name) => name,
                    other => {
                        return Err($crate::CodecError::UnsupportedType(format!(
                            "{} from {}",
                            stringify!($name),
                            other.kind()
                        )))
                    }
                };
                $(
                    if name == stringify!($variant) {
                        return Ok($name::$variant);
                    }
                )*
                Err($crate::CodecError::UnknownVariant {
                    enumeration: stringify!($name).to_string(),
                    name,
                })
            }
        }
    };
}
