use uidl::{ConnectorKind, UidlError};

mod common;
use common::*;

#[test]
fn attaching_registers_ids_in_creation_order_and_marks_dirty() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui(ui_id).unwrap();

    assert_eq!(ui.connector_id(f.root), Some("0"));
    assert_eq!(ui.connector_id(f.panel), Some("1"));
    assert_eq!(ui.connector_id(f.label), Some("2"));
    for connector in [f.root, f.panel, f.label, f.button, f.field] {
        assert!(ui.tracker().is_registered(connector));
        assert!(ui.tracker().is_dirty(connector));
        assert!(!ui.tracker().is_client_side_initialized(connector));
    }
    assert_eq!(ui.kind(f.root), Some(ConnectorKind::Root));
    assert_eq!(ui.parent(f.label), Some(f.panel));
    assert_eq!(ui.depth(f.label), 2);
    assert_eq!(ui.children(f.panel), &[f.label, f.button, f.field]);
}

#[test]
fn connector_ids_are_unique_across_the_uis_of_a_session() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (first, _) = open_ui(&mut state);
    let (second, f) = open_ui(&mut state);
    assert_ne!(first, second);
    assert_eq!(state.ui(second).unwrap().connector_id(f.root), Some("5"));
}

#[test]
fn detached_connectors_are_unregistered_and_keep_their_id() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    let id = ui.connector_id(f.label).map(String::from);
    ui.remove_component(f.panel, f.label).unwrap();
    assert!(!ui.is_attached(f.label));
    assert!(!ui.tracker().is_registered(f.label));
    assert_eq!(ui.connector(id.as_deref().unwrap()), None);

    ui.add_component(f.root, f.label).unwrap();
    assert!(ui.tracker().is_registered(f.label));
    assert_eq!(ui.connector_id(f.label).map(String::from), id);
}

#[test]
fn moving_a_component_removes_it_from_its_old_container() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    ui.add_component(f.root, f.button).unwrap();
    assert_eq!(ui.parent(f.button), Some(f.root));
    assert!(!ui.children(f.panel).contains(&f.button));
    assert!(ui.tracker().is_registered(f.button));
}

#[test]
fn illegal_tree_operations_are_refused() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    let cycle = ui.add_component(f.panel, f.panel);
    assert!(matches!(cycle, Err(UidlError::Tree(_))));
    let not_a_container = ui.add_component(f.label, f.button);
    assert!(matches!(not_a_container, Err(UidlError::Tree(_))));
    let attached = ui.remove(f.label);
    assert!(matches!(attached, Err(UidlError::Tree(_))));
    let root = ui.root();
    assert!(matches!(ui.remove(root), Err(UidlError::Tree(_))));

    let extension = ui.create_extension::<HighlightState>(&HIGHLIGHT);
    assert!(matches!(ui.add_component(f.panel, extension), Err(UidlError::Tree(_))));
    ui.add_extension(f.label, extension).unwrap();
    let moved = ui.add_extension(f.button, extension);
    assert!(matches!(moved, Err(UidlError::Tree(_))));
}

#[test]
fn removed_extensions_are_detached_and_may_move() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    let extension = ui.create_extension::<HighlightState>(&HIGHLIGHT);
    ui.add_extension(f.label, extension).unwrap();
    assert_eq!(ui.extensions(f.label), &[extension]);
    ui.tracker_mut().mark_all_clean();

    ui.remove_extension(f.label, extension).unwrap();
    assert!(ui.extensions(f.label).is_empty());
    assert!(!ui.is_attached(extension));
    assert!(!ui.tracker().is_registered(extension));
    assert!(ui.tracker().is_dirty(f.label));

    // removing from a connector that does not own it changes nothing
    ui.remove_extension(f.button, extension).unwrap();

    ui.add_extension(f.button, extension).unwrap();
    assert_eq!(ui.parent(extension), Some(f.button));
    assert!(ui.tracker().is_registered(extension));
}

#[test]
fn server_rpc_interfaces_are_registered_per_connector() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui(ui_id).unwrap();

    assert!(ui.has_rpc(f.button, BUTTON_RPC));
    assert!(!ui.has_rpc(f.label, BUTTON_RPC));
    assert!(!ui.has_rpc(f.button, "test.Unknown"));
}

#[test]
fn removed_subtrees_leave_the_arena() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    ui.remove_component(f.root, f.panel).unwrap();
    ui.remove(f.panel).unwrap();
    assert!(!ui.contains(f.panel));
    assert!(!ui.contains(f.label));
    assert!(ui.logic(f.field).is_none());
}

#[test]
fn visibility_follows_the_ancestors() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let extension = ui.create_extension::<HighlightState>(&HIGHLIGHT);
    ui.add_extension(f.label, extension).unwrap();

    assert!(ui.is_visible(f.label));
    assert!(ui.is_visible(extension));

    ui.set_visible(f.panel, false).unwrap();
    for connector in [f.panel, f.label, f.button, extension] {
        assert!(!ui.is_visible(connector));
    }
    assert!(ui.visible_flag(f.label));

    ui.set_visible(f.panel, true).unwrap();
    ui.set_child_rendered(f.panel, f.label, false).unwrap();
    assert!(!ui.is_visible(f.label));
    assert!(!ui.is_visible(extension));
    assert!(ui.is_visible(f.button));
}

#[test]
fn detached_components_are_invisible_and_disabled() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, _) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let orphan = ui.create_component::<LabelState>(&LABEL);
    assert!(!ui.is_visible(orphan));
    assert!(!ui.is_enabled(orphan));
}

#[test]
fn disabling_a_container_disables_its_subtree() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();

    ui.set_enabled(f.panel, false).unwrap();
    assert!(!ui.is_enabled(f.button));
    assert!(ui.enabled_flag(f.button));
    ui.set_enabled(f.panel, true).unwrap();
    assert!(ui.is_enabled(f.button));

    ui.set_visible(f.button, false).unwrap();
    assert!(!ui.is_enabled(f.button));
}

uidl::bean! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct StyledState {
        pub enabled: String,
    }
}

#[test]
fn a_rejected_enabled_property_keeps_the_flag() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let styled = ui.create_component::<StyledState>(&LABEL);
    ui.add_component(f.panel, styled).unwrap();

    assert!(ui.set_enabled(styled, false).is_err());
    assert!(ui.enabled_flag(styled));
    assert!(ui.is_enabled(styled));
    assert_eq!(ui.state::<StyledState>(styled).unwrap().enabled, "");
}

#[test]
fn state_access_marks_dirty_only_when_mutable() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    ui.tracker_mut().mark_all_clean();

    assert_eq!(ui.state::<LabelState>(f.label).map(|s| s.width), Some(0));
    assert!(!ui.tracker().is_dirty(f.label));

    ui.state_mut::<LabelState>(f.label).unwrap().width = 10;
    assert!(ui.tracker().is_dirty(f.label));
    assert!(ui.state::<ButtonState>(f.label).is_none());
}

#[test]
fn state_properties_are_set_by_name() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    ui.tracker_mut().mark_all_clean();

    ui.set_caption(f.label, Some("Name")).unwrap();
    assert_eq!(ui.state::<LabelState>(f.label).unwrap().caption.as_deref(), Some("Name"));
    assert!(ui.tracker().is_dirty(f.label));

    let unknown = ui.set_state_property(f.label, "missing", uidl::Value::Null);
    assert!(matches!(unknown, Err(UidlError::Codec(_))));
    assert!(ui.set_caption(f.field, Some("x")).is_err());
}

#[test]
fn marking_dirty_recursively_reaches_extensions_and_children() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let extension = ui.create_extension::<HighlightState>(&HIGHLIGHT);
    ui.add_extension(f.button, extension).unwrap();
    ui.tracker_mut().mark_all_clean();

    ui.mark_as_dirty_recursive(f.panel);
    for connector in [f.panel, f.label, f.button, f.field, extension] {
        assert!(ui.tracker().is_dirty(connector));
    }
    assert!(!ui.tracker().is_dirty(f.root));
}
