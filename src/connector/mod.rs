//! The server-side connector tree.
//!
//! Every UI owns an arena of connectors addressed by [`ConnectorKey`]. A connector is either
//! the UI root, a component (possibly a container of child components) or an extension of
//! another connector. Connectors carry a lazily created [`SharedState`], a queue of pending
//! client RPC invocations and, optionally, a [`ConnectorLogic`] implementing application
//! behaviour.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;

use crate::codec::{Transport, TypeDesc, Value};
use crate::communication::paint_target::PaintTarget;
use crate::error::{CodecError, Result, UidlError};
use crate::layout::LayoutInfo;
use crate::rpc::{ClientMethodInvocation, ServerRpc};

pub use self::tracker::ConnectorTracker;
pub use self::ui::{AllChildren, Ui};

mod tracker;
mod ui;

slotmap::new_key_type! {
    /// handle of a connector inside the arena of its UI
    pub struct ConnectorKey;
}

/// Static description of a connector type.
///
/// Types form a single inheritance chain through `parent`. The type name is what the client
/// maps to a client-side implementation, `scripts` and `styles` are dependencies the client
/// loads before the first connector of the type is created.
#[derive(Debug)]
pub struct ConnectorType {
    /// the fully qualified type name
    pub name: &'static str,
    /// the super type, if any
    pub parent: Option<&'static ConnectorType>,
    /// script dependencies
    pub scripts: &'static [&'static str],
    /// style sheet dependencies
    pub styles: &'static [&'static str],
}

impl ConnectorType {
    /// a type without super type or dependencies
    pub const fn new(name: &'static str) -> Self {
        ConnectorType {
            name,
            parent: None,
            scripts: &[],
            styles: &[],
        }
    }

    /// sets the super type
    pub const fn extends(self, parent: &'static ConnectorType) -> Self {
        ConnectorType {
            parent: Some(parent),
            ..self
        }
    }

    /// sets the script dependencies
    pub const fn with_scripts(self, scripts: &'static [&'static str]) -> Self {
        ConnectorType { scripts, ..self }
    }

    /// sets the style sheet dependencies
    pub const fn with_styles(self, styles: &'static [&'static str]) -> Self {
        ConnectorType { styles, ..self }
    }

    /// this type followed by all of its super types
    pub fn hierarchy(&'static self) -> impl Iterator<Item = &'static ConnectorType> {
        std::iter::successors(Some(self), |t| t.parent)
    }
}

impl PartialEq for ConnectorType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ConnectorType {}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// the role of a connector in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    /// the root of a UI
    Root,
    /// a component, which may also be a container
    Component,
    /// an extension attached to another connector
    Extension,
}

/// The shared state of a connector.
///
/// Implemented for every [`Transport`] type with a default value, in practice for structs
/// declared with [`bean!`](crate::bean).
pub trait SharedState: Any + Send {
    /// the declared type used to encode the state
    fn state_type(&self) -> TypeDesc;

    /// the current value of the state
    fn to_value(&self) -> Value;

    /// the value of a freshly created state, the reference of the first diff
    fn default_value(&self) -> Value;

    /// overwrites one property of the state
    ///
    /// # Errors
    /// fails when the state has no such property or the value does not fit it
    fn set_property(&mut self, name: &str, value: Value) -> std::result::Result<(), CodecError>;

    /// returns `true` if the state declares a property named `name`
    fn has_property(&self, name: &str) -> bool;

    /// upcast for downcasting to the concrete state type
    fn as_any(&self) -> &dyn Any;

    /// mutable upcast for downcasting to the concrete state type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> SharedState for T
where
    T: Transport + Default + Any + Send,
{
    fn state_type(&self) -> TypeDesc {
        T::type_desc()
    }

    fn to_value(&self) -> Value {
        Transport::to_value(self)
    }

    fn default_value(&self) -> Value {
        Transport::to_value(&T::default())
    }

    fn set_property(&mut self, name: &str, value: Value) -> std::result::Result<(), CodecError> {
        let mut bean = match Transport::to_value(self) {
            Value::Bean(bean) => bean,
            other => {
                return Err(CodecError::UnsupportedType(format!(
                    "property {} of {}",
                    name,
                    other.kind()
                )))
            }
        };
        if bean.schema().property(name).is_none() {
            return Err(CodecError::UnsupportedType(format!(
                "{} has no property {}",
                bean.schema().name(),
                name
            )));
        }
        bean.set(name, value);
        *self = T::from_value(Value::Bean(bean))?;
        Ok(())
    }

    fn has_property(&self, name: &str) -> bool {
        match T::type_desc() {
            TypeDesc::Bean(schema) => schema.property(name).is_some(),
            _ => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Application behaviour of a connector. Every method is an optional capability with a
/// default that declares the capability absent.
///
/// While a method runs, the logic is taken out of its connector so it can receive the
/// whole [`Ui`] mutably.
pub trait ConnectorLogic: Send {
    /// called for every dirty visible connector before its state is encoded
    fn before_client_response(&mut self, _ui: &mut Ui, _connector: ConnectorKey, _initial: bool) {}

    /// legacy components paint their content into the `changes` section
    fn is_legacy(&self) -> bool {
        false
    }

    /// paints the legacy content of the connector
    ///
    /// # Errors
    /// a failure aborts the whole response
    fn paint(
        &mut self,
        _ui: &Ui,
        _connector: ConnectorKey,
        _target: &mut PaintTarget,
    ) -> Result<()> {
        Ok(())
    }

    /// variable owners accept legacy variable changes
    fn is_variable_owner(&self) -> bool {
        false
    }

    /// whether the owner currently accepts variable changes
    fn is_owner_enabled(&self) -> bool {
        true
    }

    /// whether the owner refuses uploads and other modifications
    fn is_read_only(&self) -> bool {
        false
    }

    /// applies the coalesced variable changes sent for this connector
    ///
    /// # Errors
    /// the error is routed through the error handler chain
    fn change_variables(
        &mut self,
        _ui: &mut Ui,
        _connector: ConnectorKey,
        _variables: IndexMap<String, Value>,
    ) -> Result<()> {
        Err(UidlError::VariableChange(
            "connector does not accept variable changes".to_string(),
        ))
    }

    /// the field error handler of the connector. Returns `true` when the error was handled.
    ///
    /// # Errors
    /// a failing handler is reported to the session error handler together with the
    /// original error
    fn handle_error(
        &mut self,
        _ui: &mut Ui,
        _connector: ConnectorKey,
        _error: &UidlError,
    ) -> Result<bool> {
        Ok(false)
    }

    /// size information for layout validation
    fn layout(&self) -> Option<LayoutInfo> {
        None
    }
}

fn new_state<S: SharedState + Default>() -> Box<dyn SharedState> {
    Box::new(S::default())
}

pub(crate) struct ConnectorNode {
    pub(crate) id: Option<String>,
    pub(crate) kind: ConnectorKind,
    pub(crate) connector_type: &'static ConnectorType,
    pub(crate) parent: Option<ConnectorKey>,
    pub(crate) extensions: Vec<ConnectorKey>,
    /// child components, `None` for connectors that are not containers
    pub(crate) children: Option<Vec<ConnectorKey>>,
    /// children the container currently does not render
    pub(crate) hidden_children: HashSet<ConnectorKey>,
    pub(crate) visible: bool,
    pub(crate) enabled: bool,
    pub(crate) state: Option<Box<dyn SharedState>>,
    pub(crate) state_factory: fn() -> Box<dyn SharedState>,
    pub(crate) pending_invocations: Vec<ClientMethodInvocation>,
    pub(crate) logic: Option<Box<dyn ConnectorLogic>>,
    pub(crate) rpc: IndexMap<String, Box<dyn ServerRpc>>,
}

impl ConnectorNode {
    pub(crate) fn new<S: SharedState + Default>(
        kind: ConnectorKind,
        connector_type: &'static ConnectorType,
        container: bool,
    ) -> Self {
        ConnectorNode {
            id: None,
            kind,
            connector_type,
            parent: None,
            extensions: Vec::new(),
            children: if container { Some(Vec::new()) } else { None },
            hidden_children: HashSet::new(),
            visible: true,
            enabled: true,
            state: None,
            state_factory: new_state::<S>,
            pending_invocations: Vec::new(),
            logic: None,
            rpc: IndexMap::new(),
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut dyn SharedState {
        let factory = self.state_factory;
        &mut **self.state.get_or_insert_with(factory)
    }

    /// a printable identity: the id once registered, else the type name
    pub(crate) fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("{} ({})", self.connector_type.name, id),
            None => self.connector_type.name.to_string(),
        }
    }
}

impl fmt::Debug for ConnectorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("type", &self.connector_type.name)
            .field("parent", &self.parent)
            .field("visible", &self.visible)
            .field("enabled", &self.enabled)
            .finish()
    }
}
