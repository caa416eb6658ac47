use std::io::Write;
use std::time::Duration;

use crossbeam::channel;
use crossbeam_utils::thread;
use serde_json::json;
use tempfile::NamedTempFile;

use uidl::transport::{critical_notification, write_error_response};
use uidl::{BufferedResponse, Configuration, SystemMessages, UidlError, WrappedSession};

mod common;
use common::*;

#[test]
fn a_held_lock_times_out_as_service_unavailable() {
    let mut config = Configuration::default();
    config.deployment.lock_timeout_ms = 100;
    let session = session_with(config);
    let (locked_tx, locked_rx) = channel::bounded(0);
    let (release_tx, release_rx) = channel::bounded::<()>(0);

    thread::scope(|s| {
        s.spawn(|_| {
            let _guard = session.lock().unwrap();
            locked_tx.send(()).unwrap();
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
        });

        locked_rx.recv().unwrap();
        match session.lock() {
            Err(UidlError::ServiceUnavailable { retry_after_ms }) => assert_eq!(retry_after_ms, 100),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("the lock should be held by the other thread"),
        }
        release_tx.send(()).unwrap();
    })
    .unwrap();

    assert!(session.lock().is_ok());
}

#[test]
fn busy_sessions_are_answered_with_retry_after() {
    let mut response = BufferedResponse::new();
    let busy = UidlError::ServiceUnavailable { retry_after_ms: 2500 };
    write_error_response(&mut response, &busy, &SystemMessages::default()).unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.header("Retry-After"), Some("3"));
    assert!(response.body().is_empty());
}

#[test]
fn request_failures_map_to_notifications() {
    let messages = SystemMessages::default();

    let mut response = BufferedResponse::new();
    write_error_response(&mut response, &UidlError::SessionExpired, &messages).unwrap();
    let json = parse_response(&response.body_text().unwrap());
    assert_eq!(json["meta"]["appError"]["caption"], "Session Expired");
    assert_eq!(json["meta"]["appError"]["details"], json!(null));

    let mut response = BufferedResponse::new();
    let forged = UidlError::SecurityViolation("Security key mismatch".to_string());
    write_error_response(&mut response, &forged, &messages).unwrap();
    let json = parse_response(&response.body_text().unwrap());
    assert_eq!(json["meta"]["appError"]["caption"], "Communication problem");

    let mut response = BufferedResponse::new();
    let failure = UidlError::StringErr("disk on fire".to_string());
    write_error_response(&mut response, &failure, &messages).unwrap();
    let json = parse_response(&response.body_text().unwrap());
    assert_eq!(json["meta"]["appError"]["caption"], "Internal error");
    assert_eq!(json["meta"]["appError"]["details"], "disk on fire");
    assert_eq!(response.status(), 200);
}

#[test]
fn critical_notifications_carry_empty_sections() {
    let body = critical_notification(Some("Title"), None, None, Some("/back"));
    let json = parse_response(&body);
    assert_eq!(json["changes"], json!([]));
    assert_eq!(json["resources"], json!({}));
    assert_eq!(json["locales"], json!([]));
    assert_eq!(
        json["meta"]["appError"],
        json!({"caption": "Title", "message": null, "details": null, "url": "/back"})
    );
}

#[test]
fn disabled_notifications_only_redirect() {
    let mut messages = SystemMessages::default();
    messages.session_expired.enabled = false;
    messages.session_expired.url = Some("/expired".to_string());
    let mut response = BufferedResponse::new();
    write_error_response(&mut response, &UidlError::SessionExpired, &messages).unwrap();
    let json = parse_response(&response.body_text().unwrap());
    assert_eq!(json["meta"]["appError"]["caption"], json!(null));
    assert_eq!(json["meta"]["appError"]["url"], "/expired");
}

#[test]
fn uis_missing_heartbeats_are_expired() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (stale, _) = open_ui(&mut state);
    let (fresh, _) = open_ui(&mut state);
    let now = chrono::Utc::now().timestamp_millis();
    state.ui_mut(stale).unwrap().set_last_heartbeat_timestamp(now - 931_000);

    assert_eq!(state.remove_expired_uis(now), vec![stale]);
    assert!(state.ui(stale).is_none());
    assert!(state.ui(fresh).is_some());
}

#[test]
fn closing_uis_are_expired() {
    let session = session();
    let (ui_id, _) = open_ui(&mut session.lock().unwrap());
    session.lock().unwrap().ui_mut(ui_id).unwrap().close();
    assert_eq!(session.remove_expired_uis().unwrap(), vec![ui_id]);
    assert_eq!(session.lock().unwrap().ui_ids().count(), 0);
}

#[test]
fn idle_uis_are_expired_only_when_configured() {
    let now = chrono::Utc::now().timestamp_millis();
    let idle_for = 1801 * 1000;

    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    state.ui_mut(ui_id).unwrap().set_last_uidl_request_time(now - idle_for);
    assert!(state.remove_expired_uis(now).is_empty());
    drop(state);

    let mut config = Configuration::default();
    config.deployment.close_idle_sessions = true;
    let session = session_with(config);
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    state.ui_mut(ui_id).unwrap().set_last_uidl_request_time(now - idle_for);
    assert_eq!(state.remove_expired_uis(now), vec![ui_id]);
}

#[test]
fn removing_a_ui_closes_it() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    let ui = state.remove_ui(ui_id).unwrap();
    assert!(ui.is_closing());
    assert!(state.remove_ui(ui_id).is_none());
}

#[test]
fn ui_ids_grow_per_session() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (first, _) = open_ui(&mut state);
    state.remove_ui(first);
    let (second, _) = open_ui(&mut state);
    assert_eq!(second, first + 1);
    assert_eq!(state.ui(second).unwrap().id(), second);
}

#[test]
fn the_session_exposes_its_configuration() {
    let mut config = Configuration::default();
    config.deployment.default_theme = Some("valo".to_string());
    config.deployment.default_locale = "fi_FI".to_string();
    let session = session_with(config);
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);

    assert_eq!(session.id(), "test-session");
    assert_eq!(state.locale(), "fi_FI");
    assert_eq!(state.ui(ui_id).unwrap().theme(), Some("valo"));
    assert_eq!(state.wrapped().max_inactive_interval(), 1800);
    assert_eq!(state.timings(), [0, 0]);
}

#[test]
fn wrapped_sessions_survive_a_blob_round_trip() {
    let mut wrapped = WrappedSession::new("abc", 60);
    wrapped.set_attribute("user", "alice");
    let restored = WrappedSession::from_blob(&wrapped.to_blob().unwrap()).unwrap();
    assert_eq!(restored, wrapped);
    assert_eq!(restored.attribute("user"), Some("alice"));

    wrapped.remove_attribute("user");
    assert_eq!(wrapped.attribute("user"), None);
    assert!(WrappedSession::from_blob(b"not json").is_err());
}

#[test]
fn configuration_files_only_name_what_they_change() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "deployment": {{ "xsrfProtectionEnabled": false, "heartbeatIntervalSecs": 60 }},
            "systemMessages": {{ "sessionExpired": {{ "url": "/expired.html" }} }}
        }}"#
    )
    .unwrap();

    let config = Configuration::load(file.path()).unwrap();
    assert!(!config.deployment.xsrf_protection_enabled);
    assert_eq!(config.deployment.heartbeat_interval_secs, 60);
    assert_eq!(config.deployment.heartbeat_timeout_secs(), 186);
    assert_eq!(config.deployment.lock_timeout_ms, 5000);
    assert_eq!(config.system_messages.session_expired.url(), Some("/expired.html"));
    assert_eq!(config.system_messages.session_expired.caption(), None);
    assert_eq!(config.system_messages.out_of_sync.caption(), Some("Out of sync"));
}

#[test]
fn malformed_configuration_files_are_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(Configuration::load(file.path()), Err(UidlError::Json(_))));
    assert!(matches!(
        Configuration::load(std::path::Path::new("/nonexistent/uidl.json")),
        Err(UidlError::Io(_))
    ));
}
