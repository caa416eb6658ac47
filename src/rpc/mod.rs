//! Client RPC queueing (server to client) and the inbound invocation model (client to server).

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::codec::{self, Transport, TypeDesc, Value};
use crate::connector::{ConnectorKey, Ui};
use crate::error::{Result, UidlError};

pub use self::burst::{
    parse_invocations, split_bursts, unescape_burst, VAR_BURST_SEPARATOR, VAR_ESCAPE_CHARACTER,
};

mod burst;

/// interface name of legacy variable change invocations
pub const LEGACY_VARIABLE_INTERFACE: &str = "com.vaadin.shared.ui.VariableOwner";
/// method name of legacy variable change invocations
pub const LEGACY_VARIABLE_METHOD: &str = "changeVariables";

/// A queued invocation of a client side method.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMethodInvocation {
    /// the connector whose client side counterpart is invoked
    pub connector: ConnectorKey,
    /// the RPC interface name
    pub interface: String,
    /// the method name
    pub method: String,
    /// the argument values
    pub parameters: Vec<Value>,
    /// the declared argument types, driving the encoding of `parameters`
    pub parameter_types: Vec<TypeDesc>,
    pub(crate) sequence: u64,
}

impl ClientMethodInvocation {
    /// an invocation that has not been queued yet
    pub fn new(
        connector: ConnectorKey,
        interface: impl Into<String>,
        method: impl Into<String>,
        parameters: Vec<Value>,
        parameter_types: Vec<TypeDesc>,
    ) -> Self {
        ClientMethodInvocation {
            connector,
            interface: interface.into(),
            method: method.into(),
            parameters,
            parameter_types,
            sequence: 0,
        }
    }

    /// the position of this invocation in the total order of invocations of its UI
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Records client RPC invocations of one interface on one connector.
///
/// ```ignore
/// ui.client_rpc(label, "com.example.LabelClientRpc")
///     .call("highlight")
///     .arg(&3i32)
///     .arg(&"red".to_string())
///     .send()?;
/// ```
pub struct ClientRpcRecorder<'a> {
    ui: &'a mut Ui,
    connector: ConnectorKey,
    interface: String,
}

impl<'a> ClientRpcRecorder<'a> {
    pub(crate) fn new(ui: &'a mut Ui, connector: ConnectorKey, interface: String) -> Self {
        ClientRpcRecorder {
            ui,
            connector,
            interface,
        }
    }

    /// starts an invocation of `method`
    pub fn call(&mut self, method: impl Into<String>) -> ClientRpcCall<'_, 'a> {
        ClientRpcCall {
            recorder: self,
            method: method.into(),
            parameters: Vec::new(),
            parameter_types: Vec::new(),
        }
    }
}

/// one invocation being recorded by a [`ClientRpcRecorder`]
pub struct ClientRpcCall<'r, 'a> {
    recorder: &'r mut ClientRpcRecorder<'a>,
    method: String,
    parameters: Vec<Value>,
    parameter_types: Vec<TypeDesc>,
}

impl ClientRpcCall<'_, '_> {
    /// appends an argument typed by its [`Transport`] implementation
    pub fn arg<T: Transport>(mut self, value: &T) -> Self {
        self.parameters.push(value.to_value());
        self.parameter_types.push(T::type_desc());
        self
    }

    /// appends an argument with an explicit declared type
    pub fn arg_value(mut self, value: Value, type_desc: TypeDesc) -> Self {
        self.parameters.push(value);
        self.parameter_types.push(type_desc);
        self
    }

    /// Queues the invocation and marks the connector dirty.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when the connector no longer exists
    pub fn send(self) -> Result<()> {
        let recorder = self.recorder;
        let invocation = ClientMethodInvocation::new(
            recorder.connector,
            recorder.interface.clone(),
            self.method,
            self.parameters,
            self.parameter_types,
        );
        recorder.ui.push_invocation(recorder.connector, invocation)
    }
}

/// The server side implementation of one RPC interface of a connector.
pub trait ServerRpc: Send {
    /// the declared parameter types of `method`, `None` when the method does not exist
    fn parameter_types(&self, method: &str) -> Option<Vec<TypeDesc>>;

    /// invokes `method` with decoded parameters
    ///
    /// # Errors
    /// the error is routed through the error handler chain
    fn invoke(
        &mut self,
        ui: &mut Ui,
        connector: ConnectorKey,
        method: &str,
        parameters: Vec<Value>,
    ) -> Result<()>;
}

type RpcHandler = Box<dyn FnMut(&mut Ui, ConnectorKey, Vec<Value>) -> Result<()> + Send>;

/// A [`ServerRpc`] built from closures, one per method.
#[derive(Default)]
pub struct RpcInterface {
    methods: HashMap<String, (Vec<TypeDesc>, RpcHandler)>,
}

impl RpcInterface {
    /// an interface without methods
    pub fn new() -> Self {
        RpcInterface::default()
    }

    /// adds a method with the given declared parameter types
    pub fn method<F>(
        mut self,
        name: impl Into<String>,
        parameter_types: Vec<TypeDesc>,
        handler: F,
    ) -> Self
    where
        F: FnMut(&mut Ui, ConnectorKey, Vec<Value>) -> Result<()> + Send + 'static,
    {
        self.methods
            .insert(name.into(), (parameter_types, Box::new(handler)));
        self
    }
}

impl fmt::Debug for RpcInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcInterface")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServerRpc for RpcInterface {
    fn parameter_types(&self, method: &str) -> Option<Vec<TypeDesc>> {
        self.methods.get(method).map(|(types, _)| types.clone())
    }

    fn invoke(
        &mut self,
        ui: &mut Ui,
        connector: ConnectorKey,
        method: &str,
        parameters: Vec<Value>,
    ) -> Result<()> {
        match self.methods.get_mut(method) {
            Some((_, handler)) => handler(ui, connector, parameters),
            None => Err(UidlError::StringErr(format!("no such method {}", method))),
        }
    }
}

/// An invocation received from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodInvocation {
    /// a call of a server RPC method; parameters are decoded when the target is known
    ServerRpc {
        /// the target connector id
        connector_id: String,
        /// the RPC interface name
        interface: String,
        /// the method name
        method: String,
        /// the undecoded parameters
        parameters: Vec<Json>,
    },
    /// the coalesced legacy variable changes of consecutive invocations for one connector
    LegacyVariables {
        /// the target connector id
        connector_id: String,
        /// the changed variables in arrival order, later changes overwrite earlier ones
        variables: IndexMap<String, Value>,
    },
}

impl MethodInvocation {
    /// the target connector id
    pub fn connector_id(&self) -> &str {
        match self {
            MethodInvocation::ServerRpc { connector_id, .. }
            | MethodInvocation::LegacyVariables { connector_id, .. } => connector_id,
        }
    }

    /// returns `true` for the window close notification `{close: true}` a client sends
    /// after its connector was already removed
    pub fn is_legacy_close(&self) -> bool {
        match self {
            MethodInvocation::LegacyVariables { variables, .. } => {
                variables.len() == 1 && variables.get("close") == Some(&Value::Boolean(true))
            }
            _ => false,
        }
    }
}

/// Drains the RPC queues of `connectors` and merges them into one list ordered by the
/// sequence in which the invocations were recorded.
pub fn collect_pending_rpc_calls(
    ui: &mut Ui,
    connectors: &[ConnectorKey],
) -> Vec<ClientMethodInvocation> {
    let mut pending: Vec<ClientMethodInvocation> = Vec::new();
    for connector in connectors {
        let queued = ui.retrieve_pending_rpc_calls(*connector);
        if queued.is_empty() {
            continue;
        }
        if pending.is_empty() {
            pending = queued;
            continue;
        }

        let old = std::mem::take(&mut pending);
        pending.reserve(old.len() + queued.len());
        let mut old = old.into_iter().peekable();
        let mut queued = queued.into_iter().peekable();
        loop {
            let take_old = match (old.peek(), queued.peek()) {
                (Some(o), Some(q)) => o.sequence <= q.sequence,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_old { old.next() } else { queued.next() };
            pending.extend(next);
        }
    }
    pending
}

/// Encodes one invocation as `[connectorId, interface, method, [parameters]]`.
///
/// # Errors
/// returns a codec error when a parameter can not be encoded
pub fn encode_invocation(ui: &Ui, invocation: &ClientMethodInvocation) -> Result<Json> {
    let connector_id = ui.connector_id(invocation.connector).unwrap_or_default();
    let mut parameters = Vec::with_capacity(invocation.parameters.len());
    for (i, parameter) in invocation.parameters.iter().enumerate() {
        let encoded = match invocation.parameter_types.get(i) {
            Some(declared) => codec::encode(parameter, None, declared, ui)?.encoded,
            None => codec::encode_untyped(parameter, ui)?,
        };
        parameters.push(encoded);
    }
    Ok(Json::Array(vec![
        Json::String(connector_id.to_string()),
        Json::String(invocation.interface.clone()),
        Json::String(invocation.method.clone()),
        Json::Array(parameters),
    ]))
}
