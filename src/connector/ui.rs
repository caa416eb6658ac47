use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::codec::{ConnectorResolver, Value};
use crate::connector::{
    ConnectorKey, ConnectorKind, ConnectorLogic, ConnectorNode, ConnectorTracker, ConnectorType,
    SharedState,
};
use crate::error::{Result, UidlError};
use crate::rpc::{ClientMethodInvocation, ClientRpcRecorder, ServerRpc};

/// One browser window: the arena holding its connector tree, the tracker of that tree and
/// per-UI counters.
pub struct Ui {
    id: u32,
    nodes: SlotMap<ConnectorKey, ConnectorNode>,
    root: ConnectorKey,
    tracker: ConnectorTracker,
    connector_ids: Arc<AtomicU64>,
    invocation_sequence: u64,
    last_heartbeat: i64,
    last_request: i64,
    closing: bool,
    theme: Option<String>,
}

impl Ui {
    /// Creates a UI whose root connector has the type `root_type` and state `S`.
    ///
    /// Connector ids are drawn from `connector_ids`, which is shared by every UI of a session.
    pub fn new<S: SharedState + Default>(
        id: u32,
        root_type: &'static ConnectorType,
        connector_ids: Arc<AtomicU64>,
    ) -> Result<Self> {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(ConnectorNode::new::<S>(ConnectorKind::Root, root_type, true));
        let now = chrono::Utc::now().timestamp_millis();
        let mut ui = Ui {
            id,
            nodes,
            root,
            tracker: ConnectorTracker::new(),
            connector_ids,
            invocation_sequence: 0,
            last_heartbeat: now,
            last_request: now,
            closing: false,
            theme: None,
        };
        ui.attach(root)?;
        Ok(ui)
    }

    /// the id of this UI inside its session
    pub fn id(&self) -> u32 {
        self.id
    }

    /// the root connector
    pub fn root(&self) -> ConnectorKey {
        self.root
    }

    /// the tracker of this UI
    pub fn tracker(&self) -> &ConnectorTracker {
        &self.tracker
    }

    /// mutable access to the tracker of this UI
    pub fn tracker_mut(&mut self) -> &mut ConnectorTracker {
        &mut self.tracker
    }

    /// the theme the UI is rendered with
    pub fn theme(&self) -> Option<&str> {
        self.theme.as_deref()
    }

    /// sets the theme the UI is rendered with
    pub fn set_theme(&mut self, theme: Option<String>) {
        self.theme = theme;
    }

    /// creates a detached component with state `S`
    pub fn create_component<S: SharedState + Default>(
        &mut self,
        connector_type: &'static ConnectorType,
    ) -> ConnectorKey {
        self.nodes.insert(ConnectorNode::new::<S>(
            ConnectorKind::Component,
            connector_type,
            false,
        ))
    }

    /// creates a detached component container with state `S`
    pub fn create_container<S: SharedState + Default>(
        &mut self,
        connector_type: &'static ConnectorType,
    ) -> ConnectorKey {
        self.nodes.insert(ConnectorNode::new::<S>(
            ConnectorKind::Component,
            connector_type,
            true,
        ))
    }

    /// creates a detached extension with state `S`
    pub fn create_extension<S: SharedState + Default>(
        &mut self,
        connector_type: &'static ConnectorType,
    ) -> ConnectorKey {
        self.nodes.insert(ConnectorNode::new::<S>(
            ConnectorKind::Extension,
            connector_type,
            false,
        ))
    }

    /// installs the application behaviour of a connector
    pub fn set_logic(
        &mut self,
        connector: ConnectorKey,
        logic: Box<dyn ConnectorLogic>,
    ) -> Result<()> {
        self.node_mut(connector)?.logic = Some(logic);
        Ok(())
    }

    /// registers the server side implementation of an RPC interface for a connector
    pub fn register_rpc(
        &mut self,
        connector: ConnectorKey,
        interface: impl Into<String>,
        rpc: Box<dyn ServerRpc>,
    ) -> Result<()> {
        self.node_mut(connector)?.rpc.insert(interface.into(), rpc);
        Ok(())
    }

    /// returns `true` if the server side implements `interface` for `connector`
    pub fn has_rpc(&self, connector: ConnectorKey, interface: &str) -> bool {
        self.nodes
            .get(connector)
            .map(|n| n.rpc.contains_key(interface))
            .unwrap_or(false)
    }

    /// Runs `f` with the logic of `connector` taken out of the tree, so that it can
    /// receive the whole UI mutably. Returns `None` when the connector has no logic.
    pub fn with_logic<R, F>(&mut self, connector: ConnectorKey, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn ConnectorLogic, &mut Ui) -> R,
    {
        let mut logic = self.nodes.get_mut(connector)?.logic.take()?;
        let result = f(logic.as_mut(), self);
        if let Some(node) = self.nodes.get_mut(connector) {
            if node.logic.is_none() {
                node.logic = Some(logic);
            }
        }
        Some(result)
    }

    /// inspects the logic of `connector` without taking it out of the tree
    pub fn logic(&self, connector: ConnectorKey) -> Option<&dyn ConnectorLogic> {
        self.nodes.get(connector)?.logic.as_deref()
    }

    /// Runs `f` with the implementation of `interface` taken out of the tree. Returns
    /// `None` when the connector does not implement the interface.
    pub fn with_rpc<R, F>(&mut self, connector: ConnectorKey, interface: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn ServerRpc, &mut Ui) -> R,
    {
        let (interface, mut rpc) = {
            let node = self.nodes.get_mut(connector)?;
            let index = node.rpc.get_index_of(interface)?;
            node.rpc.shift_remove_index(index)?
        };
        let result = f(rpc.as_mut(), self);
        if let Some(node) = self.nodes.get_mut(connector) {
            node.rpc.entry(interface).or_insert(rpc);
        }
        Some(result)
    }

    fn node(&self, connector: ConnectorKey) -> Result<&ConnectorNode> {
        self.nodes
            .get(connector)
            .ok_or_else(|| UidlError::Tree(format!("unknown connector {:?}", connector)))
    }

    fn node_mut(&mut self, connector: ConnectorKey) -> Result<&mut ConnectorNode> {
        self.nodes
            .get_mut(connector)
            .ok_or_else(|| UidlError::Tree(format!("unknown connector {:?}", connector)))
    }

    /// returns `true` while `connector` is part of the arena
    pub fn contains(&self, connector: ConnectorKey) -> bool {
        self.nodes.contains_key(connector)
    }

    /// the id of `connector`, `None` until it is attached for the first time
    pub fn connector_id(&self, connector: ConnectorKey) -> Option<&str> {
        self.nodes.get(connector)?.id.as_deref()
    }

    /// the attached connector with the given id
    pub fn connector(&self, id: &str) -> Option<ConnectorKey> {
        self.tracker.connector(id)
    }

    /// the type of `connector`
    pub fn connector_type(&self, connector: ConnectorKey) -> Option<&'static ConnectorType> {
        self.nodes.get(connector).map(|n| n.connector_type)
    }

    /// the role of `connector`
    pub fn kind(&self, connector: ConnectorKey) -> Option<ConnectorKind> {
        self.nodes.get(connector).map(|n| n.kind)
    }

    /// the parent of `connector`
    pub fn parent(&self, connector: ConnectorKey) -> Option<ConnectorKey> {
        self.nodes.get(connector)?.parent
    }

    /// the child components of a container, empty for other connectors
    pub fn children(&self, connector: ConnectorKey) -> &[ConnectorKey] {
        self.nodes
            .get(connector)
            .and_then(|n| n.children.as_deref())
            .unwrap_or(&[])
    }

    /// the extensions of `connector`
    pub fn extensions(&self, connector: ConnectorKey) -> &[ConnectorKey] {
        self.nodes
            .get(connector)
            .map(|n| n.extensions.as_slice())
            .unwrap_or(&[])
    }

    /// all children of `connector`: its extensions followed by its child components
    pub fn all_children(&self, connector: ConnectorKey) -> AllChildren<'_> {
        AllChildren {
            inner: self
                .extensions(connector)
                .iter()
                .chain(self.children(connector).iter()),
        }
    }

    /// the number of ancestors of `connector`
    pub fn depth(&self, connector: ConnectorKey) -> usize {
        std::iter::successors(self.parent(connector), |p| self.parent(*p)).count()
    }

    /// returns `true` if `connector` is reachable from the root
    pub fn is_attached(&self, connector: ConnectorKey) -> bool {
        std::iter::successors(Some(connector), |c| self.parent(*c)).any(|c| c == self.root)
    }

    fn is_ancestor(&self, ancestor: ConnectorKey, connector: ConnectorKey) -> bool {
        std::iter::successors(Some(connector), |c| self.parent(*c)).any(|c| c == ancestor)
    }

    /// Changes the parent of `child`, detaching it from its old tree and attaching it
    /// into the new one when that is attached.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when `child` already has a different parent
    pub fn set_parent(&mut self, child: ConnectorKey, parent: Option<ConnectorKey>) -> Result<()> {
        let old = self.node(child)?.parent;
        if old == parent {
            return Ok(());
        }
        if parent.is_some() && old.is_some() {
            return Err(UidlError::Tree(format!(
                "{} already has a parent",
                self.node(child)?.describe()
            )));
        }
        if let Some(p) = parent {
            self.node(p)?;
        }

        if old.is_some() && self.is_attached(child) {
            self.detach(child)?;
        }
        self.node_mut(child)?.parent = parent;
        if let Some(p) = parent {
            if self.is_attached(p) {
                self.attach(child)?;
            }
        }
        Ok(())
    }

    fn ensure_id(&mut self, connector: ConnectorKey) -> Result<String> {
        let counter = self.connector_ids.clone();
        let node = self.node_mut(connector)?;
        let id = node
            .id
            .get_or_insert_with(|| counter.fetch_add(1, Ordering::SeqCst).to_string());
        Ok(id.clone())
    }

    fn attach(&mut self, connector: ConnectorKey) -> Result<()> {
        let id = self.ensure_id(connector)?;
        self.tracker.mark_dirty(connector);
        self.tracker.register(connector, &id)?;
        let children: Vec<ConnectorKey> = self.all_children(connector).collect();
        for child in children {
            self.attach(child)?;
        }
        Ok(())
    }

    fn detach(&mut self, connector: ConnectorKey) -> Result<()> {
        let children: Vec<ConnectorKey> = self.all_children(connector).collect();
        for child in children {
            self.detach(child)?;
        }
        if let Some(id) = self.node(connector)?.id.clone() {
            self.tracker.unregister(connector, &id)?;
        }
        Ok(())
    }

    /// Adds `child` to the container `container`, removing it from its previous container.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when `container` is not a container or when the addition
    /// would create a cycle
    pub fn add_component(&mut self, container: ConnectorKey, child: ConnectorKey) -> Result<()> {
        if self.node(container)?.children.is_none() {
            return Err(UidlError::Tree(format!(
                "{} can not contain components",
                self.node(container)?.describe()
            )));
        }
        if self.node(child)?.kind != ConnectorKind::Component {
            return Err(UidlError::Tree(format!(
                "{} is not a component",
                self.node(child)?.describe()
            )));
        }
        if self.is_ancestor(child, container) {
            return Err(UidlError::Tree(
                "a component can not be added inside itself".to_string(),
            ));
        }
        if let Some(old) = self.node(child)?.parent {
            if old == container {
                return Ok(());
            }
            match self.node(old)?.kind {
                ConnectorKind::Extension => {
                    return Err(UidlError::Tree("content already has a parent".to_string()))
                }
                _ => self.remove_component(old, child)?,
            }
        }

        if let Some(children) = self.node_mut(container)?.children.as_mut() {
            children.push(child);
        }
        self.set_parent(child, Some(container))?;
        self.mark_as_dirty(container);
        Ok(())
    }

    /// removes `child` from `container`, leaving it detached
    pub fn remove_component(&mut self, container: ConnectorKey, child: ConnectorKey) -> Result<()> {
        if self.node(child)?.parent != Some(container) {
            return Ok(());
        }
        self.set_parent(child, None)?;
        let node = self.node_mut(container)?;
        if let Some(children) = node.children.as_mut() {
            children.retain(|c| *c != child);
        }
        node.hidden_children.remove(&child);
        self.mark_as_dirty(container);
        Ok(())
    }

    /// Adds `extension` to `owner`.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when the extension already belongs to another owner
    pub fn add_extension(&mut self, owner: ConnectorKey, extension: ConnectorKey) -> Result<()> {
        let node = self.node(extension)?;
        if node.kind != ConnectorKind::Extension {
            return Err(UidlError::Tree(format!("{} is not an extension", node.describe())));
        }
        match node.parent {
            Some(p) if p == owner => return Ok(()),
            Some(_) => {
                return Err(UidlError::Tree(
                    "moving an extension from one parent to another is not supported".to_string(),
                ))
            }
            None => {}
        }
        self.node(owner)?;
        self.node_mut(owner)?.extensions.push(extension);
        self.set_parent(extension, Some(owner))?;
        self.mark_as_dirty(owner);
        Ok(())
    }

    /// removes `extension` from `owner`, leaving it detached
    pub fn remove_extension(&mut self, owner: ConnectorKey, extension: ConnectorKey) -> Result<()> {
        if self.node(extension)?.parent != Some(owner) {
            return Ok(());
        }
        self.set_parent(extension, None)?;
        self.node_mut(owner)?.extensions.retain(|e| *e != extension);
        self.mark_as_dirty(owner);
        Ok(())
    }

    /// Drops a detached connector and its whole subtree from the arena.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] for the root and for connectors that still have a parent
    pub fn remove(&mut self, connector: ConnectorKey) -> Result<()> {
        let node = self.node(connector)?;
        if connector == self.root || node.parent.is_some() {
            return Err(UidlError::Tree(format!(
                "{} must be detached before it is removed",
                node.describe()
            )));
        }
        let mut pending = vec![connector];
        while let Some(key) = pending.pop() {
            pending.extend(self.all_children(key));
            self.nodes.remove(key);
        }
        Ok(())
    }

    /// Controls whether `container` renders `child`. A child that is not rendered is
    /// invisible to the client even when its own visibility flag is set.
    pub fn set_child_rendered(
        &mut self,
        container: ConnectorKey,
        child: ConnectorKey,
        rendered: bool,
    ) -> Result<()> {
        let node = self.node_mut(container)?;
        let changed = if rendered {
            node.hidden_children.remove(&child)
        } else {
            node.hidden_children.insert(child)
        };
        if changed {
            self.mark_as_dirty(container);
            self.mark_as_dirty_recursive(child);
        }
        Ok(())
    }

    /// returns `true` if `container` renders `child`
    pub fn is_component_visible(&self, container: ConnectorKey, child: ConnectorKey) -> bool {
        self.nodes
            .get(container)
            .map(|n| !n.hidden_children.contains(&child))
            .unwrap_or(false)
    }

    /// Visibility as the client sees it: the root by its flag, a component by its flag,
    /// its container rendering it and the container being visible, anything else by the
    /// visibility of its parent.
    pub fn is_visible(&self, connector: ConnectorKey) -> bool {
        let node = match self.nodes.get(connector) {
            Some(node) => node,
            None => return false,
        };
        match node.kind {
            ConnectorKind::Root => node.visible,
            ConnectorKind::Component => match node.parent {
                _ if !node.visible => false,
                None => false,
                Some(parent) => {
                    self.is_component_visible(parent, connector) && self.is_visible(parent)
                }
            },
            ConnectorKind::Extension => match node.parent {
                None => false,
                Some(parent) => self.is_visible(parent),
            },
        }
    }

    /// Whether the connector accepts input from the client.
    pub fn is_enabled(&self, connector: ConnectorKey) -> bool {
        let node = match self.nodes.get(connector) {
            Some(node) => node,
            None => return false,
        };
        match node.kind {
            ConnectorKind::Root => node.enabled,
            ConnectorKind::Component => match node.parent {
                None => false,
                Some(parent) => {
                    node.visible
                        && node.enabled
                        && self.is_component_visible(parent, connector)
                        && self.is_visible(parent)
                        && self.is_enabled(parent)
                }
            },
            ConnectorKind::Extension => match node.parent {
                None => false,
                Some(parent) => self.is_enabled(parent),
            },
        }
    }

    /// the visibility flag of the connector itself
    pub fn visible_flag(&self, connector: ConnectorKey) -> bool {
        self.nodes.get(connector).map(|n| n.visible).unwrap_or(false)
    }

    /// Sets the visibility flag. The connector, its subtree and its parent are repainted.
    pub fn set_visible(&mut self, connector: ConnectorKey, visible: bool) -> Result<()> {
        let node = self.node_mut(connector)?;
        if node.visible == visible {
            return Ok(());
        }
        node.visible = visible;
        let parent = node.parent;
        if let Some(parent) = parent {
            self.mark_as_dirty(parent);
        }
        self.mark_as_dirty_recursive(connector);
        Ok(())
    }

    /// the enabled flag of the connector itself
    pub fn enabled_flag(&self, connector: ConnectorKey) -> bool {
        self.nodes.get(connector).map(|n| n.enabled).unwrap_or(false)
    }

    /// Sets the enabled flag and mirrors it into an `enabled` state property when the
    /// state declares one. The subtree is repainted.
    pub fn set_enabled(&mut self, connector: ConnectorKey, enabled: bool) -> Result<()> {
        let node = self.node_mut(connector)?;
        if node.enabled == enabled {
            return Ok(());
        }
        // the flag follows the state so a rejected property leaves both unchanged
        let state = node.state_mut();
        if state.has_property("enabled") {
            state.set_property("enabled", Value::Boolean(enabled))?;
        }
        node.enabled = enabled;
        self.mark_as_dirty_recursive(connector);
        Ok(())
    }

    /// Sets the `caption` property of the connector state.
    ///
    /// # Errors
    /// fails when the state declares no `caption`
    pub fn set_caption(&mut self, connector: ConnectorKey, caption: Option<&str>) -> Result<()> {
        let value = caption.map(Value::from).unwrap_or(Value::Null);
        self.set_state_property(connector, "caption", value)
    }

    /// Overwrites one property of the connector state and marks the connector dirty.
    pub fn set_state_property(
        &mut self,
        connector: ConnectorKey,
        name: &str,
        value: Value,
    ) -> Result<()> {
        self.node_mut(connector)?.state_mut().set_property(name, value)?;
        self.mark_as_dirty(connector);
        Ok(())
    }

    /// The state of `connector`, created on first access. Reading does not mark the
    /// connector dirty.
    pub fn state<S: SharedState>(&mut self, connector: ConnectorKey) -> Option<&S> {
        let node = self.nodes.get_mut(connector)?;
        node.state_mut().as_any().downcast_ref::<S>()
    }

    /// Mutable state of `connector`, created on first access. The connector is marked dirty.
    pub fn state_mut<S: SharedState>(&mut self, connector: ConnectorKey) -> Option<&mut S> {
        if !self.nodes.contains_key(connector) {
            return None;
        }
        self.tracker.mark_dirty(connector);
        let node = self.nodes.get_mut(connector)?;
        node.state_mut().as_any_mut().downcast_mut::<S>()
    }

    /// the state of `connector` as a trait object, created on first access
    pub fn shared_state(&mut self, connector: ConnectorKey) -> Option<&dyn SharedState> {
        let node = self.nodes.get_mut(connector)?;
        Some(node.state_mut())
    }

    pub(crate) fn existing_state(&self, connector: ConnectorKey) -> Option<&dyn SharedState> {
        self.nodes.get(connector)?.state.as_deref()
    }

    /// marks `connector` dirty
    pub fn mark_as_dirty(&mut self, connector: ConnectorKey) {
        if self.nodes.contains_key(connector) {
            self.tracker.mark_dirty(connector);
        }
    }

    /// marks `connector` and its whole subtree dirty
    pub fn mark_as_dirty_recursive(&mut self, connector: ConnectorKey) {
        let mut pending = vec![connector];
        while let Some(key) = pending.pop() {
            self.mark_as_dirty(key);
            pending.extend(self.all_children(key));
        }
    }

    /// marks every connector reachable from the root dirty
    pub fn mark_all_dirty(&mut self) {
        debug!("marking all connectors of ui {} dirty", self.id);
        self.mark_as_dirty_recursive(self.root);
    }

    /// a recorder of client RPC invocations of `interface` on `connector`
    pub fn client_rpc(
        &mut self,
        connector: ConnectorKey,
        interface: impl Into<String>,
    ) -> ClientRpcRecorder<'_> {
        ClientRpcRecorder::new(self, connector, interface.into())
    }

    pub(crate) fn push_invocation(
        &mut self,
        connector: ConnectorKey,
        mut invocation: ClientMethodInvocation,
    ) -> Result<()> {
        self.invocation_sequence += 1;
        invocation.sequence = self.invocation_sequence;
        self.node_mut(connector)?.pending_invocations.push(invocation);
        self.mark_as_dirty(connector);
        Ok(())
    }

    /// takes the queued client RPC invocations of `connector`, leaving the queue empty
    pub fn retrieve_pending_rpc_calls(
        &mut self,
        connector: ConnectorKey,
    ) -> Vec<ClientMethodInvocation> {
        self.nodes
            .get_mut(connector)
            .map(|n| std::mem::take(&mut n.pending_invocations))
            .unwrap_or_default()
    }

    /// Drops the tracker book-keeping of detached and invisible connectors.
    pub fn clean_connector_map(&mut self) {
        let registered: Vec<ConnectorKey> = self.tracker.registered().collect();
        let attached: HashSet<ConnectorKey> = registered
            .iter()
            .copied()
            .filter(|c| self.is_attached(*c))
            .collect();
        let visible: HashSet<ConnectorKey> = registered
            .iter()
            .copied()
            .filter(|c| self.is_visible(*c))
            .collect();
        self.tracker
            .clean_connector_map(|c| attached.contains(&c), |c| visible.contains(&c));
    }

    /// the time of the last heartbeat, in milliseconds since the epoch
    pub fn last_heartbeat_timestamp(&self) -> i64 {
        self.last_heartbeat
    }

    /// records a heartbeat
    pub fn set_last_heartbeat_timestamp(&mut self, millis: i64) {
        self.last_heartbeat = millis;
    }

    /// the time of the last UIDL request, in milliseconds since the epoch
    pub fn last_uidl_request_time(&self) -> i64 {
        self.last_request
    }

    /// records a UIDL request
    pub fn set_last_uidl_request_time(&mut self, millis: i64) {
        self.last_request = millis;
    }

    /// returns `true` once the UI was closed
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// closes the UI, it is removed from the session on the next clean up
    pub fn close(&mut self) {
        if !self.closing {
            warn!("closing ui {}", self.id);
        }
        self.closing = true;
    }
}

impl ConnectorResolver for Ui {
    fn connector_id(&self, connector: ConnectorKey) -> Option<&str> {
        let id = Ui::connector_id(self, connector)?;
        match self.tracker.connector(id) {
            Some(registered) if registered == connector => Some(id),
            _ => None,
        }
    }

    fn find_connector(&self, id: &str) -> Option<ConnectorKey> {
        self.tracker.connector(id)
    }

    fn is_component(&self, connector: ConnectorKey) -> bool {
        self.kind(connector) == Some(ConnectorKind::Component)
    }

    fn is_visible(&self, connector: ConnectorKey) -> bool {
        Ui::is_visible(self, connector)
    }
}

/// Iterator over the extensions and then the child components of a connector.
/// Cloning the iterator restarts the walk from the clone's position.
#[derive(Clone)]
pub struct AllChildren<'a> {
    inner: std::iter::Chain<std::slice::Iter<'a, ConnectorKey>, std::slice::Iter<'a, ConnectorKey>>,
}

impl Iterator for AllChildren<'_> {
    type Item = ConnectorKey;

    fn next(&mut self) -> Option<ConnectorKey> {
        self.inner.next().copied()
    }
}
