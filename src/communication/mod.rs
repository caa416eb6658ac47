//! Request handling: applying the bursts of a UIDL request to the connector tree and
//! answering with the changes that followed.
//!
//! A request is handled under the session lock from start to finish:
//!
//! 1. the payload is split into bursts, the first of which carries the security key,
//! 2. each further burst is parsed into invocations that are dispatched to server RPC
//!    implementations or legacy variable owners,
//! 3. the response is assembled from the dirty connectors (see [`write_uidl_response`]),
//! 4. connectors that left the tree are dropped from the tracker.
//!
//! Client side problems such as invocations for connectors that no longer exist are
//! logged and skipped; they never fail the request.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::codec::{self, Value};
use crate::connector::{ConnectorKey, Ui};
use crate::error::{Result, UidlError};
use crate::rpc::{parse_invocations, split_bursts, unescape_burst, MethodInvocation};
use crate::session::{ErrorEvent, ErrorHandler, Session, SessionState};
use crate::transport::{
    write_critical_notification, UidlRequest, UidlResponse, WrappedSession, JSON_CONTENT_TYPE,
    JSON_PREFIX,
};

use self::locale::LocaleQueue;
use self::paint_target::TypeTagTable;
use self::resources::ConnectorResources;

pub use self::paint::{write_uidl_response, PaintOptions};

mod locale;
mod paint;
pub mod paint_target;
pub mod resources;

/// request parameter naming the UI a request is for
pub const UI_ID_PARAMETER: &str = "v-uiId";
/// request parameter asking for a full repaint
pub const REPAINT_ALL_PARAMETER: &str = "repaintAll";
/// request parameter asking for a layout analysis, honoured with a full repaint
pub const ANALYZE_LAYOUTS_PARAMETER: &str = "analyzeLayouts";
/// request parameter naming a connector to highlight, honoured with a full repaint
pub const HIGHLIGHT_CONNECTOR_PARAMETER: &str = "highlightComponent";
/// request parameter naming the theme the client renders with
pub const THEME_PARAMETER: &str = "theme";
/// request parameter carrying the client version
pub const WIDGETSET_VERSION_PARAMETER: &str = "wsver";
/// the session attribute and response key of the anti-forgery token
pub const SECURITY_KEY: &str = "Vaadin-Security-Key";

/// The connector types one client has received mappings for.
#[derive(Debug, Default)]
pub struct ClientCache {
    types: HashSet<&'static str>,
}

impl ClientCache {
    /// Records `type_name` as known to the client. Returns `true` if it was not known yet.
    pub fn cache(&mut self, type_name: &'static str) -> bool {
        self.types.insert(type_name)
    }

    /// forgets every type, the client is about to be repainted from scratch
    pub fn clear(&mut self) {
        self.types.clear();
    }
}

/// Communication state shared by the UIs of a session.
#[derive(Debug)]
pub struct CommunicationManager {
    type_tags: TypeTagTable,
    client_caches: HashMap<u32, ClientCache>,
    connector_resources: ConnectorResources,
    locales: LocaleQueue,
    timeout_interval: Option<u64>,
    write_security_token: bool,
}

impl CommunicationManager {
    pub(crate) fn new(session_locale: &str) -> Self {
        CommunicationManager {
            type_tags: TypeTagTable::new(),
            client_caches: HashMap::new(),
            connector_resources: ConnectorResources::new(),
            locales: LocaleQueue::new(session_locale),
            timeout_interval: None,
            write_security_token: false,
        }
    }

    /// the client cache of a UI
    pub fn client_cache(&mut self, ui_id: u32) -> &mut ClientCache {
        self.client_caches.entry(ui_id).or_default()
    }

    pub(crate) fn remove_client_cache(&mut self, ui_id: u32) {
        self.client_caches.remove(&ui_id);
    }

    /// queues the data of `locale` for the next response
    pub fn require_locale(&mut self, locale: &str) {
        self.locales.require(locale);
    }

    /// the resources dependencies were registered under
    pub fn connector_resources(&self) -> &ConnectorResources {
        &self.connector_resources
    }

    /// the session wide type tags
    pub fn type_tags(&self) -> &TypeTagTable {
        &self.type_tags
    }
}

/// The anti-forgery token of a session, created on first use.
pub fn security_key(session: &mut WrappedSession) -> String {
    if let Some(key) = session.attribute(SECURITY_KEY) {
        return key.to_string();
    }
    let key = Uuid::new_v4().to_string();
    session.set_attribute(SECURITY_KEY, key.clone());
    key
}

/// Handles one UIDL request: applies the client's changes and writes the response.
///
/// A request for a UI that does not exist is answered with an empty response. When the
/// client and server are found to be out of sync the out of sync notification is sent,
/// or, with that notification disabled, a full repaint.
///
/// # Errors
/// returns [`UidlError::ServiceUnavailable`] when the session lock is not acquired in time,
/// [`UidlError::SecurityViolation`] when the security key does not match,
/// [`UidlError::Communication`] or [`UidlError::VersionMismatch`] for corrupted bursts and
/// [`UidlError::Paint`] when the response can not be serialized
#[instrument(skip(session, request, response), fields(session = %session.id()))]
pub fn handle_uidl_request(
    session: &Session,
    request: &mut dyn UidlRequest,
    response: &mut dyn UidlResponse,
) -> Result<()> {
    let repaint_all = request.parameter(REPAINT_ALL_PARAMETER).is_some();
    let options = PaintOptions {
        repaint_all,
        analyze_layouts: repaint_all && request.parameter(ANALYZE_LAYOUTS_PARAMETER).is_some(),
        highlight: request
            .parameter(HIGHLIGHT_CONNECTOR_PARAMETER)
            .filter(|_| repaint_all)
            .map(String::from),
    };
    let theme = request.parameter(THEME_PARAMETER).map(String::from);
    let client_version = request.parameter(WIDGETSET_VERSION_PARAMETER).map(String::from);
    let ui_id = request
        .parameter(UI_ID_PARAMETER)
        .and_then(|id| id.parse::<u32>().ok());

    let mut payload = String::new();
    if request.content_length() != Some(0) {
        request.body().read_to_string(&mut payload)?;
    }

    let mut guard = session.lock()?;
    let state = &mut *guard;
    state.start_request();
    let result = handle_locked(state, ui_id, theme, client_version, options, &payload, response);
    state.finish_request();
    result
}

fn handle_locked(
    state: &mut SessionState,
    ui_id: Option<u32>,
    theme: Option<String>,
    client_version: Option<String>,
    mut options: PaintOptions,
    payload: &str,
    response: &mut dyn UidlResponse,
) -> Result<()> {
    let ui_id = match ui_id.filter(|id| state.ui(*id).is_some()) {
        Some(id) => id,
        None => {
            warn!("could not find the ui the request is for, ignoring the request");
            return Ok(());
        }
    };
    if let Some(ui) = state.ui_mut(ui_id) {
        if theme.is_some() {
            ui.set_theme(theme);
        }
        ui.set_last_uidl_request_time(chrono::Utc::now().timestamp_millis());
    }

    if let Some(version) = client_version {
        if version != state.config.widgetset_version {
            warn!(
                "the client version {} does not match the server version {}, \
                 the application may not work",
                version, state.config.widgetset_version
            );
        }
    }

    if !handle_variables(state, ui_id, payload)? {
        let out_of_sync = &state.system_messages.out_of_sync;
        if out_of_sync.caption().is_some() || out_of_sync.message().is_some() {
            let notification = out_of_sync.clone();
            return write_critical_notification(response, &notification, None);
        }
        options.repaint_all = true;
    }

    response.set_content_type(JSON_CONTENT_TYPE);
    paint_after_variable_changes(state, ui_id, &options, response.writer())?;
    post_paint(state, ui_id);
    Ok(())
}

/// Applies the bursts of a request payload. Returns `false` if a burst could not be applied
/// and the client is out of sync.
///
/// The first burst is the security key. With anti-forgery protection enabled a payload of
/// just `init` asks for the key to be sent with the response, and any other payload whose
/// first burst is not the key is refused. Every burst except the last is followed by a
/// discarded full paint, so later bursts see a clean tree.
///
/// # Errors
/// returns [`UidlError::SecurityViolation`] on a key mismatch and the errors of
/// [`unescape_burst`]
pub fn handle_variables(state: &mut SessionState, ui_id: u32, payload: &str) -> Result<bool> {
    if payload.is_empty() {
        return Ok(true);
    }
    let bursts = split_bursts(payload);

    if state.config.xsrf_protection_enabled {
        if bursts.len() == 1 && bursts[0] == "init" {
            debug!("init request, the security key is sent with the response");
            state.communication.write_security_token = true;
            return Ok(true);
        }
        let expected = state.wrapped.attribute(SECURITY_KEY);
        if expected != Some(bursts[0]) {
            error!("security key mismatch");
            return Err(UidlError::SecurityViolation("Security key mismatch".to_string()));
        }
    }

    let mut success = true;
    for (i, burst) in bursts.iter().enumerate().skip(1) {
        let burst = unescape_burst(burst)?;
        success &= handle_burst(state, ui_id, &burst);

        if i < bursts.len() - 1 {
            let options = PaintOptions::repaint_all();
            paint_after_variable_changes(state, ui_id, &options, &mut io::sink())?;
        }
    }
    Ok(success)
}

/// Dispatches the invocations of one unescaped burst. Returns `false` when the burst is
/// malformed.
///
/// Which connectors are enabled is decided before the first invocation runs. Invocations
/// for unknown or disabled connectors are logged and skipped, failures of application code
/// go through the error handler chain of the target connector. An unknown connector means
/// the client is out of step, so the whole UI is sent again with the next response.
pub fn handle_burst(state: &mut SessionState, ui_id: u32, burst: &str) -> bool {
    let handler = state.error_handler();
    let ui = match state.ui_mut(ui_id) {
        Some(ui) => ui,
        None => {
            warn!("burst received for ui {} which does not exist", ui_id);
            return false;
        }
    };
    let invocations = match parse_invocations(ui, burst) {
        Ok(invocations) => invocations,
        Err(e) => {
            error!("unable to parse RPC call from the client: {}", e);
            return false;
        }
    };

    let enabled: HashSet<ConnectorKey> = ui
        .tracker()
        .registered()
        .filter(|c| ui.is_enabled(*c))
        .collect();

    let mut resync = false;
    for invocation in invocations {
        let connector = match ui.connector(invocation.connector_id()) {
            Some(connector) => connector,
            None => {
                warn!(
                    "RPC call received for connector {} but no such connector could be found, \
                     resynchronizing the client",
                    invocation.connector_id()
                );
                resync = true;
                continue;
            }
        };

        if !enabled.contains(&connector) {
            if invocation.is_legacy_close() {
                continue;
            }
            warn!(
                "Ignoring RPC call for disabled connector {}",
                describe_with_caption(ui, connector)
            );
            continue;
        }

        match invocation {
            MethodInvocation::ServerRpc {
                interface,
                method,
                parameters,
                ..
            } => dispatch_server_rpc(
                ui,
                connector,
                &interface,
                &method,
                &parameters,
                handler.as_ref(),
            ),
            MethodInvocation::LegacyVariables { variables, .. } => {
                change_variables(ui, connector, variables, handler.as_ref())
            }
        }
    }
    if resync {
        ui.mark_all_dirty();
    }
    true
}

fn describe_with_caption(ui: &Ui, connector: ConnectorKey) -> String {
    let type_name = ui.connector_type(connector).map_or("?", |t| t.name);
    let caption = ui
        .existing_state(connector)
        .map(|state| state.to_value())
        .and_then(|value| match value {
            Value::Bean(bean) => bean.get("caption").and_then(|c| c.as_str()).map(String::from),
            _ => None,
        });
    match caption {
        Some(caption) => format!("{}, caption={}", type_name, caption),
        None => type_name.to_string(),
    }
}

fn dispatch_server_rpc(
    ui: &mut Ui,
    connector: ConnectorKey,
    interface: &str,
    method: &str,
    parameters: &[Json],
    handler: &dyn ErrorHandler,
) {
    let outcome = ui.with_rpc(connector, interface, |rpc, ui| -> Result<()> {
        let rpc_error = |message: String| UidlError::Rpc {
            interface: interface.to_string(),
            method: method.to_string(),
            message,
        };
        let types = rpc
            .parameter_types(method)
            .ok_or_else(|| rpc_error("no such method".to_string()))?;
        if types.len() != parameters.len() {
            return Err(rpc_error(format!(
                "expected {} parameters, received {}",
                types.len(),
                parameters.len()
            )));
        }
        let mut decoded = Vec::with_capacity(parameters.len());
        for (declared, parameter) in types.iter().zip(parameters) {
            decoded.push(codec::decode_internal_or_custom(declared, parameter, &*ui)?);
        }
        rpc.invoke(ui, connector, method, decoded)
    });

    match outcome {
        None => warn!(
            "RPC call to {}.{} received for connector {} \
             but the connector does not implement the interface",
            interface,
            method,
            ui.connector_id(connector).unwrap_or("?")
        ),
        Some(Ok(())) => {}
        Some(Err(e)) => handle_change_variables_error(ui, Some(connector), e, handler),
    }
}

fn change_variables(
    ui: &mut Ui,
    connector: ConnectorKey,
    variables: IndexMap<String, Value>,
    handler: &dyn ErrorHandler,
) {
    let (is_owner, owner_enabled) = ui
        .logic(connector)
        .map_or((false, false), |logic| (logic.is_variable_owner(), logic.is_owner_enabled()));

    if !is_owner {
        let error = UidlError::VariableChange(format!(
            "received legacy variable change for {} ({}) which is not a variable owner, \
             the client sent the variables {:?}",
            ui.connector_type(connector).map_or("?", |t| t.name),
            ui.connector_id(connector).unwrap_or("?"),
            variables.keys().collect::<Vec<_>>()
        ));
        handle_change_variables_error(ui, Some(connector), error, handler);
        return;
    }
    if !owner_enabled {
        warn!(
            "ignoring variable change for disabled variable owner {}",
            ui.connector_id(connector).unwrap_or("?")
        );
        return;
    }

    let outcome = ui.with_logic(connector, |logic, ui| {
        logic.change_variables(ui, connector, variables)
    });
    if let Some(Err(e)) = outcome {
        handle_change_variables_error(ui, Some(connector), e, handler);
    }
}

/// Routes an error raised while applying client changes to `connector`: its own error
/// handler first, the session handler when that one does not handle it. A failing
/// connector handler is reported to the session handler together with the original error.
pub(crate) fn handle_change_variables_error(
    ui: &mut Ui,
    connector: Option<ConnectorKey>,
    error: UidlError,
    handler: &dyn ErrorHandler,
) {
    let connector_id = connector.and_then(|c| ui.connector_id(c)).map(String::from);
    let mut handled = false;
    if let Some(connector) = connector {
        match ui.with_logic(connector, |logic, ui| logic.handle_error(ui, connector, &error)) {
            Some(Ok(true)) => handled = true,
            Some(Ok(false)) | None => {}
            Some(Err(handler_error)) => handler.error(&ErrorEvent {
                error: &handler_error,
                connector_id: connector_id.as_deref(),
            }),
        }
    }
    if !handled {
        handler.error(&ErrorEvent {
            error: &error,
            connector_id: connector_id.as_deref(),
        });
    }
}

/// Writes the response to `out`: the anti-forgery prefix, the security key when it was
/// requested and the sections built by [`write_uidl_response`].
///
/// # Errors
/// returns the errors of [`write_uidl_response`] and IO errors of `out`
pub fn paint_after_variable_changes(
    state: &mut SessionState,
    ui_id: u32,
    options: &PaintOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let sections = write_uidl_response(state, ui_id, options)?;

    let mut message = Map::new();
    if state.config.xsrf_protection_enabled && state.communication.write_security_token {
        let key = security_key(&mut state.wrapped);
        message.insert(SECURITY_KEY.to_string(), Json::String(key));
        state.communication.write_security_token = false;
    }
    message.extend(sections);

    write!(out, "{}[", JSON_PREFIX)?;
    serde_json::to_writer(&mut *out, &Json::Object(message))?;
    write!(out, "]")?;
    out.flush()?;
    Ok(())
}

fn post_paint(state: &mut SessionState, ui_id: u32) {
    if let Some(ui) = state.ui_mut(ui_id) {
        ui.clean_connector_map();
    }
}

/// Records a heartbeat of a UI. Returns `false` when the UI does not exist, which the
/// transport answers with `403`.
///
/// # Errors
/// returns [`UidlError::ServiceUnavailable`] when the session lock is not acquired in time
pub fn handle_heartbeat(session: &Session, ui_id: u32) -> Result<bool> {
    let mut state = session.lock()?;
    match state.ui_mut(ui_id) {
        Some(ui) => {
            ui.set_last_heartbeat_timestamp(chrono::Utc::now().timestamp_millis());
            debug!("heartbeat for ui {}", ui_id);
            Ok(true)
        }
        None => {
            warn!("heartbeat received for ui {} which does not exist", ui_id);
            Ok(false)
        }
    }
}
