use serde_json::json;
use slotmap::SlotMap;

use uidl::upload::{shared, StreamVariable};
use uidl::{ConnectorKey, ConnectorTracker, UidlError};

fn keys(n: usize) -> Vec<ConnectorKey> {
    let mut arena: SlotMap<ConnectorKey, ()> = SlotMap::with_key();
    (0..n).map(|_| arena.insert(())).collect()
}

struct NullSink;

impl StreamVariable for NullSink {
    fn output_stream(&mut self) -> Option<Box<dyn std::io::Write + Send>> {
        Some(Box::new(std::io::sink()))
    }
}

#[test]
fn registration_marks_dirty_and_uninitialized() {
    let k = keys(1);
    let mut tracker = ConnectorTracker::new();
    tracker.register(k[0], "7").unwrap();
    assert_eq!(tracker.connector("7"), Some(k[0]));
    assert!(tracker.is_dirty(k[0]));
    assert!(!tracker.is_client_side_initialized(k[0]));
}

#[test]
fn an_id_can_not_be_registered_twice() {
    let k = keys(2);
    let mut tracker = ConnectorTracker::new();
    tracker.register(k[0], "1").unwrap();
    tracker.register(k[0], "1").unwrap();
    assert!(matches!(tracker.register(k[1], "1"), Err(UidlError::Tree(_))));
    assert!(matches!(tracker.unregister(k[1], "1"), Err(UidlError::Tree(_))));
    tracker.unregister(k[0], "1").unwrap();
    assert_eq!(tracker.connector("1"), None);
    assert!(!tracker.is_dirty(k[0]));
}

#[test]
fn marking_dirty_is_idempotent_and_ordered() {
    let k = keys(3);
    let mut tracker = ConnectorTracker::new();
    tracker.mark_dirty(k[2]);
    tracker.mark_dirty(k[0]);
    tracker.mark_dirty(k[2]);
    let dirty: Vec<ConnectorKey> = tracker.dirty_connectors().collect();
    assert_eq!(dirty, vec![k[2], k[0]]);

    tracker.mark_clean(k[2]);
    assert!(!tracker.is_dirty(k[2]));
    tracker.mark_all_clean();
    assert!(!tracker.has_dirty_connectors());
}

#[test]
fn writing_status_must_toggle() {
    let mut tracker = ConnectorTracker::new();
    assert!(tracker.set_writing_response(false).is_err());
    tracker.set_writing_response(true).unwrap();
    assert!(tracker.is_writing_response());
    assert!(tracker.set_writing_response(true).is_err());
    tracker.set_writing_response(false).unwrap();
}

#[test]
fn already_dirty_connectors_may_be_marked_while_writing() {
    let k = keys(1);
    let mut tracker = ConnectorTracker::new();
    tracker.mark_dirty(k[0]);
    tracker.set_writing_response(true).unwrap();
    tracker.mark_dirty(k[0]);
    tracker.set_writing_response(false).unwrap();
    assert!(tracker.is_dirty(k[0]));
}

#[test]
fn resetting_the_client_side_forgets_sent_state() {
    let k = keys(2);
    let mut tracker = ConnectorTracker::new();
    tracker.register(k[0], "0").unwrap();
    tracker.register(k[1], "1").unwrap();
    tracker.mark_client_side_initialized(k[0]);
    tracker.set_diff_state(k[0], json!({"a": 1}));

    assert!(tracker.is_client_side_initialized(k[0]));
    assert_eq!(tracker.diff_state(k[0]), Some(&json!({"a": 1})));

    tracker.mark_all_client_sides_uninitialized();
    assert!(!tracker.is_client_side_initialized(k[0]));
    assert_eq!(tracker.diff_state(k[0]), None);
}

#[test]
fn cleaning_drops_detached_connectors_and_resets_hidden_ones() {
    let k = keys(3);
    let mut tracker = ConnectorTracker::new();
    for (i, key) in k.iter().enumerate() {
        tracker.register(*key, &i.to_string()).unwrap();
        tracker.mark_client_side_initialized(*key);
        tracker.set_diff_state(*key, json!({}));
    }
    tracker.add_stream_variable(k[0], "file", shared(NullSink));

    let detached = k[0];
    let hidden = k[1];
    tracker.clean_connector_map(|c| c != detached, |c| c != hidden);

    assert!(!tracker.is_registered(detached));
    assert!(tracker.stream_variable(detached, "file").is_none());
    assert!(tracker.is_registered(hidden));
    assert!(!tracker.is_client_side_initialized(hidden));
    assert_eq!(tracker.diff_state(hidden), None);
    assert!(tracker.is_client_side_initialized(k[2]));
    assert!(tracker.diff_state(k[2]).is_some());
}

#[test]
fn stream_variables_keep_their_key_when_replaced() {
    let k = keys(1);
    let mut tracker = ConnectorTracker::new();
    let first = tracker.add_stream_variable(k[0], "file", shared(NullSink));
    let second = tracker.add_stream_variable(k[0], "file", shared(NullSink));
    assert_eq!(first, second);
    assert_eq!(tracker.seckey(k[0], "file"), Some(first.as_str()));
    let other = tracker.add_stream_variable(k[0], "other", shared(NullSink));
    assert_ne!(first, other);

    tracker.clean_stream_variable(k[0], "file");
    assert!(tracker.stream_variable(k[0], "file").is_none());
    assert!(tracker.stream_variable(k[0], "other").is_some());
}
