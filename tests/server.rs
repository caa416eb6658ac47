use std::collections::BTreeMap;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value as Json};

use uidl::communication::{SECURITY_KEY, UI_ID_PARAMETER};
use uidl::rpc::VAR_BURST_SEPARATOR;
use uidl::transport::JSON_CONTENT_TYPE;
use uidl::{
    Configuration, MemorySessionStore, Reply, Request, Response, Result, SessionHandler,
    SessionState, SessionStore, SharedQueueThreadPool, ThreadPool, UiProvider, UidlClient,
    UidlServer, WrappedSession,
};

mod common;
use common::*;

struct FixtureApplication;

impl UiProvider for FixtureApplication {
    fn create_ui(&self, state: &mut SessionState) -> Result<u32> {
        Ok(open_ui(state).0)
    }
}

fn handler() -> (SessionHandler<MemorySessionStore>, MemorySessionStore) {
    let store = MemorySessionStore::new();
    let handler = SessionHandler::new(
        store.clone(),
        Configuration::default(),
        Arc::new(FixtureApplication),
    );
    (handler, store)
}

fn reply(response: Response) -> Reply {
    match response {
        Response::Ok(reply) => reply,
        Response::Err(e) => panic!("request failed: {}", e),
    }
}

fn init(handler: &SessionHandler<MemorySessionStore>, session: Option<&str>) -> (String, u32) {
    let reply = reply(handler.handle(Request::Init {
        session: session.map(String::from),
    }));
    let body: Json = serde_json::from_str(&reply.body).unwrap();
    (
        body["session"].as_str().unwrap().to_string(),
        body["uiId"].as_u64().unwrap() as u32,
    )
}

fn uidl(
    handler: &SessionHandler<MemorySessionStore>,
    session: &str,
    ui: u32,
    payload: &str,
) -> Reply {
    let mut parameters = BTreeMap::new();
    parameters.insert(UI_ID_PARAMETER.to_string(), ui.to_string());
    reply(handler.handle(Request::Uidl {
        session: session.to_string(),
        parameters,
        payload: payload.to_string(),
    }))
}

#[test]
fn init_opens_a_ui_in_a_new_session() {
    let (handler, store) = handler();
    let (session, ui) = init(&handler, None);
    assert_eq!(ui, 0);
    assert_eq!(handler.session_count(), 1);
    assert!(store.load(session.clone()).unwrap().is_some());

    let (same, second_ui) = init(&handler, Some(&session));
    assert_eq!(same, session);
    assert_eq!(second_ui, 1);
    assert_eq!(handler.session_count(), 1);
}

#[test]
fn stored_sessions_are_restored_on_init() {
    let (handler, store) = handler();
    let mut wrapped = WrappedSession::new("remembered", 600);
    wrapped.set_attribute("user", "bob");
    store
        .save("remembered".to_string(), wrapped.to_blob().unwrap())
        .unwrap();

    let (session, _) = init(&handler, Some("remembered"));
    assert_eq!(session, "remembered");
    let live = handler.session("remembered").unwrap();
    let state = live.lock().unwrap();
    assert_eq!(state.wrapped().attribute("user"), Some("bob"));
    assert_eq!(state.wrapped().max_inactive_interval(), 600);
}

#[test]
fn uidl_requests_are_answered_and_the_key_is_persisted() {
    let (handler, store) = handler();
    let (session, ui) = init(&handler, None);

    let reply = uidl(&handler, &session, ui, "init");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
    let key = parse_response(&reply.body)[SECURITY_KEY]
        .as_str()
        .unwrap()
        .to_string();

    let blob = store.load(session.clone()).unwrap().unwrap();
    let stored = WrappedSession::from_blob(&blob).unwrap();
    assert_eq!(stored.attribute(SECURITY_KEY), Some(key.as_str()));

    let button = {
        let live = handler.session(&session).unwrap();
        let state = live.lock().unwrap();
        let ui = state.ui(ui).unwrap();
        let panel = ui.children(ui.root())[0];
        let button = ui.children(panel)[1];
        assert_eq!(ui.connector_type(button), Some(&BUTTON));
        id_of(ui, button)
    };
    let payload = format!(
        "{}{}{}",
        key,
        VAR_BURST_SEPARATOR,
        json!([[button, BUTTON_RPC, "click", []]])
    );
    let reply = uidl(&handler, &session, ui, &payload);
    assert_eq!(parse_response(&reply.body)["state"][&button], json!({"clicks": 1}));
}

#[test]
fn security_violations_become_communication_errors() {
    let (handler, _) = handler();
    let (session, ui) = init(&handler, None);
    uidl(&handler, &session, ui, "init");

    let reply = uidl(&handler, &session, ui, &format!("forged{}[]", VAR_BURST_SEPARATOR));
    assert_eq!(reply.status, 200);
    let json = parse_response(&reply.body);
    assert_eq!(json["meta"]["appError"]["caption"], "Communication problem");
}

#[test]
fn heartbeats_for_unknown_uis_are_forbidden() {
    let (handler, _) = handler();
    let (session, ui) = init(&handler, None);
    let ok = reply(handler.handle(Request::Heartbeat {
        session: session.clone(),
        ui,
    }));
    assert_eq!(ok.status, 200);

    let forbidden = reply(handler.handle(Request::Heartbeat { session, ui: ui + 7 }));
    assert_eq!(forbidden.status, 403);
}

#[test]
fn unknown_sessions_are_told_they_expired() {
    let (handler, _) = handler();
    let reply = reply(handler.handle(Request::Heartbeat {
        session: "nobody".to_string(),
        ui: 0,
    }));
    let json = parse_response(&reply.body);
    assert_eq!(json["meta"]["appError"]["caption"], "Session Expired");
}

#[test]
fn close_forgets_the_session() {
    let (handler, store) = handler();
    let (session, ui) = init(&handler, None);
    let live = handler.session(&session).unwrap();

    let closed = reply(handler.handle(Request::Close {
        session: session.clone(),
    }));
    assert_eq!(closed.status, 200);
    assert_eq!(handler.session_count(), 0);
    assert!(store.is_empty());
    assert!(live.lock().unwrap().ui(ui).is_none());

    let again = reply(handler.handle(Request::Close { session }));
    assert_eq!(again.status, 200);
}

#[test]
fn uploads_are_routed_to_the_session() {
    let (handler, _) = handler();
    let (session, ui) = init(&handler, None);
    let reply = reply(handler.handle(Request::Upload {
        session,
        path: format!("UPLOAD/{}/999/file/key", ui),
        content_type: None,
        body: b"data".to_vec(),
    }));
    assert_eq!(reply.content_type.as_deref(), Some("text/html"));
    assert_eq!(reply.body, "<html><body>download handled</body></html>");
}

#[test]
fn malformed_upload_paths_become_communication_errors() {
    let (handler, _) = handler();
    let (session, _) = init(&handler, None);
    let reply = reply(handler.handle(Request::Upload {
        session,
        path: "elsewhere".to_string(),
        content_type: None,
        body: Vec::new(),
    }));
    let json = parse_response(&reply.body);
    assert_eq!(json["meta"]["appError"]["caption"], "Communication problem");
}

fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn connect(addr: &str) -> UidlClient {
    for _ in 0..100 {
        if TcpStream::connect(addr).is_ok() {
            return UidlClient::connect(addr).unwrap();
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server at {} did not start", addr);
}

#[test]
fn clients_talk_to_the_server_over_tcp() {
    let addr = free_address();
    let server = UidlServer::new(
        MemorySessionStore::new(),
        SharedQueueThreadPool::new(2).unwrap(),
        Configuration::default(),
        Arc::new(FixtureApplication),
    );
    let server_addr = addr.clone();
    thread::spawn(move || server.run(server_addr));

    let mut client = connect(&addr);
    let (session, ui) = client.init(None).unwrap();
    assert_eq!(ui, 0);

    let reply = client
        .uidl(&session, ui, BTreeMap::new(), "init".to_string())
        .unwrap();
    assert!(parse_response(&reply.body)[SECURITY_KEY].is_string());

    assert_eq!(client.heartbeat(&session, ui).unwrap(), 200);
    let uploaded = client
        .upload(&session, &format!("UPLOAD/{}/999/file/key", ui), None, b"data".to_vec())
        .unwrap();
    assert_eq!(uploaded.content_type.as_deref(), Some("text/html"));
    assert_eq!(client.heartbeat(&session, ui + 1).unwrap(), 403);

    let mut other = connect(&addr);
    let (same, second) = other.init(Some(session.clone())).unwrap();
    assert_eq!(same, session);
    assert_eq!(second, 1);

    client.close(&session).unwrap();
    let reply = other
        .uidl(&session, ui, BTreeMap::new(), String::new())
        .unwrap();
    assert_eq!(
        parse_response(&reply.body)["meta"]["appError"]["caption"],
        "Session Expired"
    );
}
