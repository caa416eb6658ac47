use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as Json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::connector::ConnectorKey;
use crate::error::{Result, UidlError};
use crate::upload::SharedStreamVariable;

struct StreamEntry {
    variable: SharedStreamVariable,
    seckey: String,
}

/// Book-keeping of the connectors of one UI: the id registry, the dirty set, which
/// connectors the client has initialized, the last state sent for each connector and the
/// stream variables accepting uploads.
#[derive(Default)]
pub struct ConnectorTracker {
    connectors: HashMap<String, ConnectorKey>,
    dirty: IndexSet<ConnectorKey>,
    uninitialized: HashSet<ConnectorKey>,
    diff_states: HashMap<ConnectorKey, Json>,
    writing_response: bool,
    stream_variables: HashMap<ConnectorKey, IndexMap<String, StreamEntry>>,
}

impl ConnectorTracker {
    /// an empty tracker
    pub fn new() -> Self {
        ConnectorTracker::default()
    }

    /// Registers `connector` under `id` and marks it dirty and uninitialized.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when a different connector is registered under `id`
    pub fn register(&mut self, connector: ConnectorKey, id: &str) -> Result<()> {
        match self.connectors.get(id) {
            None => {
                self.connectors.insert(id.to_string(), connector);
                self.uninitialized.insert(connector);
                debug!("registered connector {}", id);
            }
            Some(existing) if *existing != connector => {
                return Err(UidlError::Tree(format!(
                    "a connector with id {} is already registered",
                    id
                )));
            }
            Some(_) => warn!("an already registered connector was registered again: {}", id),
        }
        self.dirty.insert(connector);
        Ok(())
    }

    /// Removes `connector` from the registry together with all of its book-keeping.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when another connector is registered under `id`
    pub fn unregister(&mut self, connector: ConnectorKey, id: &str) -> Result<()> {
        match self.connectors.get(id) {
            None => {
                warn!("tried to unregister {} which is not registered", id);
                return Ok(());
            }
            Some(existing) if *existing != connector => {
                return Err(UidlError::Tree(format!(
                    "the given connector with id {} is not the one that was registered for that id",
                    id
                )));
            }
            Some(_) => {}
        }
        self.connectors.remove(id);
        self.dirty.shift_remove(&connector);
        self.uninitialized.remove(&connector);
        self.diff_states.remove(&connector);
        self.stream_variables.remove(&connector);
        debug!("unregistered connector {}", id);
        Ok(())
    }

    /// the registered connector with the given id
    pub fn connector(&self, id: &str) -> Option<ConnectorKey> {
        self.connectors.get(id).copied()
    }

    /// returns `true` if `connector` is registered
    pub fn is_registered(&self, connector: ConnectorKey) -> bool {
        self.connectors.values().any(|c| *c == connector)
    }

    /// all registered connectors
    pub fn registered(&self) -> impl Iterator<Item = ConnectorKey> + '_ {
        self.connectors.values().copied()
    }

    /// Marks `connector` dirty. Marking is idempotent.
    ///
    /// Dirtying a clean connector while a response is being written is a bug in the
    /// calling code: the change would be lost.
    pub fn mark_dirty(&mut self, connector: ConnectorKey) {
        if self.writing_response && !self.dirty.contains(&connector) {
            error!(
                "a connector should not be marked as dirty while a response is being written: {:?}",
                connector
            );
            debug_assert!(false, "connector marked dirty while writing a response");
        }
        self.dirty.insert(connector);
    }

    /// removes `connector` from the dirty set
    pub fn mark_clean(&mut self, connector: ConnectorKey) {
        self.dirty.shift_remove(&connector);
    }

    /// empties the dirty set
    pub fn mark_all_clean(&mut self) {
        self.dirty.clear();
    }

    /// returns `true` if `connector` is in the dirty set
    pub fn is_dirty(&self, connector: ConnectorKey) -> bool {
        self.dirty.contains(&connector)
    }

    /// the dirty connectors in the order they were first marked
    pub fn dirty_connectors(&self) -> impl Iterator<Item = ConnectorKey> + '_ {
        self.dirty.iter().copied()
    }

    /// returns `true` if any connector is dirty
    pub fn has_dirty_connectors(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// returns `true` once the client has received the initial state of `connector`
    pub fn is_client_side_initialized(&self, connector: ConnectorKey) -> bool {
        !self.uninitialized.contains(&connector)
    }

    /// records that the client has received the initial state of `connector`
    pub fn mark_client_side_initialized(&mut self, connector: ConnectorKey) {
        self.uninitialized.remove(&connector);
    }

    /// forgets everything sent to the client, used when the client side was reset
    pub fn mark_all_client_sides_uninitialized(&mut self) {
        self.uninitialized.extend(self.connectors.values().copied());
        self.diff_states.clear();
    }

    /// the last state encoding sent for `connector`
    pub fn diff_state(&self, connector: ConnectorKey) -> Option<&Json> {
        self.diff_states.get(&connector)
    }

    /// stores the state encoding sent for `connector`
    pub fn set_diff_state(&mut self, connector: ConnectorKey, state: Json) {
        self.diff_states.insert(connector, state);
    }

    /// returns `true` while a response is being written
    pub fn is_writing_response(&self) -> bool {
        self.writing_response
    }

    /// Sets the response writing status.
    ///
    /// # Errors
    /// returns [`UidlError::Tree`] when the status does not change, which means a
    /// start or end of the writing phase was missed
    pub fn set_writing_response(&mut self, writing: bool) -> Result<()> {
        if self.writing_response == writing {
            return Err(UidlError::Tree(
                "the old writing status is the same as the new one".to_string(),
            ));
        }
        self.writing_response = writing;
        Ok(())
    }

    /// Drops the book-keeping of connectors that are no longer attached and resets the
    /// reference state of connectors the client can no longer see, so they are sent in
    /// full once they become visible again.
    pub fn clean_connector_map<A, V>(&mut self, is_attached: A, is_visible_to_client: V)
    where
        A: Fn(ConnectorKey) -> bool,
        V: Fn(ConnectorKey) -> bool,
    {
        let detached: Vec<String> = self
            .connectors
            .iter()
            .filter(|(_, key)| !is_attached(**key))
            .map(|(id, _)| id.clone())
            .collect();
        for id in detached {
            warn!(
                "clean_connector_map unregistered connector {}, \
                 it should have been unregistered when it was detached",
                id
            );
            if let Some(key) = self.connectors.remove(&id) {
                self.uninitialized.remove(&key);
                self.diff_states.remove(&key);
                self.dirty.shift_remove(&key);
            }
        }

        let hidden: Vec<ConnectorKey> = self
            .connectors
            .values()
            .copied()
            .filter(|key| !self.uninitialized.contains(key) && !is_visible_to_client(*key))
            .collect();
        for key in hidden {
            debug!("clean_connector_map removed state for {:?} as it is not visible", key);
            self.uninitialized.insert(key);
            self.diff_states.remove(&key);
        }

        let connectors = &self.connectors;
        self.stream_variables
            .retain(|key, _| connectors.values().any(|c| c == key));
    }

    /// Registers an upload sink under `name` for `connector` and returns its security key.
    /// Re-registering a name replaces the sink but keeps the key.
    pub fn add_stream_variable(
        &mut self,
        connector: ConnectorKey,
        name: &str,
        variable: SharedStreamVariable,
    ) -> String {
        let variables = self.stream_variables.entry(connector).or_default();
        match variables.get_mut(name) {
            Some(entry) => {
                entry.variable = variable;
                entry.seckey.clone()
            }
            None => {
                let seckey = Uuid::new_v4().to_string();
                variables.insert(
                    name.to_string(),
                    StreamEntry {
                        variable,
                        seckey: seckey.clone(),
                    },
                );
                seckey
            }
        }
    }

    /// the upload sink registered under `name` for `connector`
    pub fn stream_variable(
        &self,
        connector: ConnectorKey,
        name: &str,
    ) -> Option<SharedStreamVariable> {
        self.stream_variables
            .get(&connector)
            .and_then(|variables| variables.get(name))
            .map(|entry| entry.variable.clone())
    }

    /// the security key of the upload sink registered under `name` for `connector`
    pub fn seckey(&self, connector: ConnectorKey, name: &str) -> Option<&str> {
        self.stream_variables
            .get(&connector)
            .and_then(|variables| variables.get(name))
            .map(|entry| entry.seckey.as_str())
    }

    /// forgets the upload sink registered under `name` for `connector`
    pub fn clean_stream_variable(&mut self, connector: ConnectorKey, name: &str) {
        if let Some(variables) = self.stream_variables.get_mut(&connector) {
            variables.shift_remove(name);
            if variables.is_empty() {
                self.stream_variables.remove(&connector);
            }
        }
    }
}
