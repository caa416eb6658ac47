//! Connector types, states and session fixtures shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;

use uidl::rpc::RpcInterface;
use uidl::transport::JSON_PREFIX;
use uidl::{
    Configuration, ConnectorKey, ConnectorLogic, ConnectorType, ErrorEvent, ErrorHandler,
    Result, Session, SessionState, Ui, UidlError, Value, WrappedSession,
};

pub static ROOT: ConnectorType = ConnectorType::new("test.Root");
pub static LABEL: ConnectorType = ConnectorType::new("test.Label");
pub static BUTTON: ConnectorType = ConnectorType::new("test.Button");
pub static PANEL: ConnectorType = ConnectorType::new("test.Panel");
pub static FIELD: ConnectorType = ConnectorType::new("test.Field");
pub static HIGHLIGHT: ConnectorType = ConnectorType::new("test.Highlight");

pub const BUTTON_RPC: &str = "test.ButtonServerRpc";
pub const LABEL_CLIENT_RPC: &str = "test.LabelClientRpc";

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct RootState {
        pub caption: Option<String>,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct LabelState {
        pub caption: Option<String>,
        pub text: String,
        pub width: i32,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct ButtonState {
        pub caption: Option<String>,
        pub clicks: i32,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct FieldState {
        pub value: String,
        pub read_only: bool,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct HighlightState {
        pub color: String,
    }
}

/// Error handler remembering what reached it.
#[derive(Debug, Default, Clone)]
pub struct RecordingHandler {
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl ErrorHandler for RecordingHandler {
    fn error(&self, event: &ErrorEvent<'_>) {
        self.errors.lock().push(format!(
            "{}: {}",
            event.connector_id.unwrap_or("-"),
            event.error
        ));
    }
}

/// Field accepting legacy variable changes of `value`.
#[derive(Debug, Default)]
pub struct FieldLogic {
    pub read_only: bool,
    pub disabled: bool,
    pub handles_errors: bool,
    pub changes: Arc<Mutex<Vec<IndexMap<String, Value>>>>,
}

impl ConnectorLogic for FieldLogic {
    fn is_variable_owner(&self) -> bool {
        true
    }

    fn is_owner_enabled(&self) -> bool {
        !self.disabled
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn change_variables(
        &mut self,
        ui: &mut Ui,
        connector: ConnectorKey,
        variables: IndexMap<String, Value>,
    ) -> Result<()> {
        if let Some(Value::String(value)) = variables.get("value") {
            if value == "fail" {
                return Err(UidlError::VariableChange("refused value".to_string()));
            }
            if let Some(state) = ui.state_mut::<FieldState>(connector) {
                state.value = value.clone();
            }
        }
        self.changes.lock().push(variables);
        Ok(())
    }

    fn handle_error(&mut self, _ui: &mut Ui, _connector: ConnectorKey, _error: &UidlError) -> Result<bool> {
        Ok(self.handles_errors)
    }
}

/// The connectors of the fixture UI.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub root: ConnectorKey,
    pub panel: ConnectorKey,
    pub label: ConnectorKey,
    pub button: ConnectorKey,
    pub field: ConnectorKey,
}

/// Builds `root > panel > [label, button, field]` with a click RPC on the button that
/// counts clicks and updates the label text.
pub fn build_ui(ui: &mut Ui) -> Fixture {
    let root = ui.root();
    let panel = ui.create_container::<RootState>(&PANEL);
    let label = ui.create_component::<LabelState>(&LABEL);
    let button = ui.create_component::<ButtonState>(&BUTTON);
    let field = ui.create_component::<FieldState>(&FIELD);
    ui.add_component(root, panel).unwrap();
    ui.add_component(panel, label).unwrap();
    ui.add_component(panel, button).unwrap();
    ui.add_component(panel, field).unwrap();

    let clicks = RpcInterface::new()
        .method("click", vec![], move |ui: &mut Ui, button, _| {
            let clicks = match ui.state_mut::<ButtonState>(button) {
                Some(state) => {
                    state.clicks += 1;
                    state.clicks
                }
                None => return Ok(()),
            };
            if let Some(state) = ui.state_mut::<LabelState>(label) {
                state.text = format!("clicked {}", clicks);
            }
            Ok(())
        })
        .method(
            "resize",
            vec![uidl::TypeDesc::Integer],
            move |ui: &mut Ui, _button, parameters| {
                if let Some(Value::Integer(width)) = parameters.into_iter().next() {
                    if let Some(state) = ui.state_mut::<LabelState>(label) {
                        state.width = width;
                    }
                }
                Ok(())
            },
        )
        .method("explode", vec![], |_ui: &mut Ui, _button, _| {
            Err(UidlError::StringErr("boom".to_string()))
        });
    ui.register_rpc(button, BUTTON_RPC, Box::new(clicks)).unwrap();
    ui.set_logic(field, Box::new(FieldLogic::default())).unwrap();

    Fixture {
        root,
        panel,
        label,
        button,
        field,
    }
}

pub fn session_with(config: Configuration) -> Session {
    let timeout = config.deployment.session_timeout_secs;
    Session::new(
        config.deployment,
        config.system_messages,
        WrappedSession::new("test-session", timeout),
    )
}

pub fn session() -> Session {
    session_with(Configuration::default())
}

/// Creates the fixture UI in `state`, returning its id and connectors.
pub fn open_ui(state: &mut SessionState) -> (u32, Fixture) {
    let ui_id = state.create_ui::<RootState>(&ROOT).unwrap();
    let fixture = build_ui(state.ui_mut(ui_id).unwrap());
    (ui_id, fixture)
}

/// Strips the anti-hijacking prefix and the array around a response.
pub fn parse_response(body: &str) -> Json {
    let json = body
        .strip_prefix(JSON_PREFIX)
        .unwrap_or_else(|| panic!("response without prefix: {}", body));
    let mut array: Json = serde_json::from_str(json).unwrap();
    array[0].take()
}

/// the id the fixture connector has in `ui`
pub fn id_of(ui: &Ui, connector: ConnectorKey) -> String {
    ui.connector_id(connector).unwrap().to_string()
}
