use serde_json::json;

use uidl::rpc::{
    collect_pending_rpc_calls, encode_invocation, parse_invocations, split_bursts, unescape_burst,
    MethodInvocation, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, VAR_BURST_SEPARATOR,
    VAR_ESCAPE_CHARACTER,
};
use uidl::{TypeDesc, UidlError, Value};

mod common;
use common::*;

#[test]
fn payloads_split_into_bursts_without_trailing_empties() {
    let payload = format!("key{}[]{}", VAR_BURST_SEPARATOR, VAR_BURST_SEPARATOR);
    assert_eq!(split_bursts(&payload), vec!["key", "[]"]);
    assert_eq!(split_bursts(""), vec![""]);
}

#[test]
fn escaped_separators_are_restored() {
    let escaped = format!(
        "a{}{}b{}{}c",
        VAR_ESCAPE_CHARACTER,
        char::from_u32(VAR_BURST_SEPARATOR as u32 + 0x30).unwrap(),
        VAR_ESCAPE_CHARACTER,
        char::from_u32(VAR_ESCAPE_CHARACTER as u32 + 0x30).unwrap(),
    );
    let expected = format!("a{}b{}c", VAR_BURST_SEPARATOR, VAR_ESCAPE_CHARACTER);
    assert_eq!(unescape_burst(&escaped).unwrap(), expected);
    assert_eq!(unescape_burst("plain").unwrap(), "plain");
}

#[test]
fn broken_escapes_are_rejected() {
    let dangling = format!("abc{}", VAR_ESCAPE_CHARACTER);
    assert!(matches!(unescape_burst(&dangling), Err(UidlError::Communication(_))));

    let unknown = format!("a{}x", VAR_ESCAPE_CHARACTER);
    assert!(matches!(unescape_burst(&unknown), Err(UidlError::VersionMismatch)));
}

#[test]
fn legacy_changes_for_one_connector_are_coalesced() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui(ui_id).unwrap();
    let field = id_of(ui, f.field);
    let button = id_of(ui, f.button);

    let burst = json!([
        [field, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["value", ["s", "a"]]],
        [field, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["focus", ["b", true]]],
        [field, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["value", ["s", "b"]]],
        [button, BUTTON_RPC, "click", []],
        [field, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["value", ["s", "c"]]],
    ])
    .to_string();

    let invocations = parse_invocations(ui, &burst).unwrap();
    assert_eq!(invocations.len(), 3);
    match &invocations[0] {
        MethodInvocation::LegacyVariables { connector_id, variables } => {
            assert_eq!(connector_id, &field);
            let names: Vec<&str> = variables.keys().map(String::as_str).collect();
            assert_eq!(names, vec!["value", "focus"]);
            assert_eq!(variables["value"], Value::from("b"));
        }
        other => panic!("unexpected invocation {:?}", other),
    }
    assert!(matches!(
        &invocations[1],
        MethodInvocation::ServerRpc { method, .. } if method == "click"
    ));
    assert_eq!(invocations[2].connector_id(), field);
}

#[test]
fn malformed_bursts_are_rejected() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    let ui = state.ui(ui_id).unwrap();

    assert!(parse_invocations(ui, "not json").is_err());
    assert!(parse_invocations(ui, r#"{"a":1}"#).is_err());
    assert!(parse_invocations(ui, r#"[["1","i","m"]]"#).is_err());
    let wrong_arity = json!([["1", LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["value"]]]);
    assert!(matches!(
        parse_invocations(ui, &wrong_arity.to_string()),
        Err(UidlError::Communication(_))
    ));
    assert!(parse_invocations(ui, "[]").unwrap().is_empty());
}

#[test]
fn the_close_notification_is_recognized() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    let ui = state.ui(ui_id).unwrap();
    let burst = json!([["99", LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD, ["close", ["b", true]]]]);
    let invocations = parse_invocations(ui, &burst.to_string()).unwrap();
    assert!(invocations[0].is_legacy_close());
}

#[test]
fn pending_calls_are_merged_in_recording_order() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    ui.client_rpc(f.label, LABEL_CLIENT_RPC).call("first").send().unwrap();
    ui.client_rpc(f.button, LABEL_CLIENT_RPC).call("second").send().unwrap();
    ui.client_rpc(f.label, LABEL_CLIENT_RPC).call("third").send().unwrap();
    ui.client_rpc(f.field, LABEL_CLIENT_RPC).call("fourth").send().unwrap();

    let pending = collect_pending_rpc_calls(ui, &[f.field, f.button, f.label]);
    let methods: Vec<&str> = pending.iter().map(|i| i.method.as_str()).collect();
    assert_eq!(methods, vec!["first", "second", "third", "fourth"]);
    assert!(pending.windows(2).all(|w| w[0].sequence() < w[1].sequence()));

    assert!(ui.retrieve_pending_rpc_calls(f.label).is_empty());
    assert!(collect_pending_rpc_calls(ui, &[f.label]).is_empty());
}

#[test]
fn invocations_are_encoded_with_their_declared_types() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let label = id_of(ui, f.label);

    ui.client_rpc(f.label, LABEL_CLIENT_RPC)
        .call("highlight")
        .arg(&3i32)
        .arg(&"red".to_string())
        .arg_value(Value::Null, TypeDesc::String)
        .send()
        .unwrap();
    let pending = ui.retrieve_pending_rpc_calls(f.label);
    assert_eq!(pending.len(), 1);

    let encoded = encode_invocation(ui, &pending[0]).unwrap();
    assert_eq!(encoded, json!([label, LABEL_CLIENT_RPC, "highlight", [3, "red", null]]));
}

#[test]
fn recording_a_call_marks_the_connector_dirty() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    ui.tracker_mut().mark_all_clean();

    ui.client_rpc(f.button, LABEL_CLIENT_RPC).call("ping").send().unwrap();
    assert!(ui.tracker().is_dirty(f.button));
}
