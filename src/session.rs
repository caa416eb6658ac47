//! A browser session: its UIs, the communication state shared by them and the lock that
//! serializes every request against the session.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::communication::CommunicationManager;
use crate::communication::resources::ThemeResources;
use crate::config::{DeploymentConfiguration, SystemMessages};
use crate::connector::{ConnectorType, SharedState, Ui};
use crate::error::{Result, UidlError};
use crate::layout::{LayoutValidator, RelativeSizeValidator};
use crate::transport::WrappedSession;

/// An error reported to the session error handler.
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    /// the error
    pub error: &'a UidlError,
    /// the id of the connector the error concerns, if any
    pub connector_id: Option<&'a str>,
}

/// The last resort for errors that application code did not handle.
pub trait ErrorHandler: Send + Sync {
    /// called once per unhandled error
    fn error(&self, event: &ErrorEvent<'_>);
}

/// Logs every error.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn error(&self, event: &ErrorEvent<'_>) {
        match event.connector_id {
            Some(id) => error!("unhandled error in connector {}: {}", id, event.error),
            None => error!("unhandled error: {}", event.error),
        }
    }
}

/// Everything the session lock protects.
pub struct SessionState {
    pub(crate) config: DeploymentConfiguration,
    pub(crate) system_messages: SystemMessages,
    pub(crate) wrapped: WrappedSession,
    pub(crate) uis: BTreeMap<u32, Ui>,
    next_ui_id: u32,
    connector_ids: Arc<AtomicU64>,
    pub(crate) communication: CommunicationManager,
    error_handler: Arc<dyn ErrorHandler>,
    pub(crate) layout_validator: Arc<dyn LayoutValidator>,
    pub(crate) theme_resources: Option<Arc<dyn ThemeResources>>,
    pub(crate) locale: String,
    request_start: Option<Instant>,
    last_request_ms: u64,
    total_request_ms: u64,
}

impl SessionState {
    fn new(
        config: DeploymentConfiguration,
        system_messages: SystemMessages,
        wrapped: WrappedSession,
    ) -> Self {
        let locale = config.default_locale.clone();
        SessionState {
            communication: CommunicationManager::new(&locale),
            config,
            system_messages,
            wrapped,
            uis: BTreeMap::new(),
            next_ui_id: 0,
            connector_ids: Arc::new(AtomicU64::new(0)),
            error_handler: Arc::new(DefaultErrorHandler),
            layout_validator: Arc::new(RelativeSizeValidator),
            theme_resources: None,
            locale,
            request_start: None,
            last_request_ms: 0,
            total_request_ms: 0,
        }
    }

    /// Creates a UI whose root has the type `root_type` and state `S`, returning its id.
    ///
    /// # Errors
    /// fails when the root can not be attached
    pub fn create_ui<S: SharedState + Default>(
        &mut self,
        root_type: &'static ConnectorType,
    ) -> Result<u32> {
        let id = self.next_ui_id;
        let mut ui = Ui::new::<S>(id, root_type, self.connector_ids.clone())?;
        ui.set_theme(self.config.default_theme.clone());
        self.next_ui_id += 1;
        self.uis.insert(id, ui);
        info!("created ui {} in session {}", id, self.wrapped.id());
        Ok(id)
    }

    /// the UI with the given id
    pub fn ui(&self, id: u32) -> Option<&Ui> {
        self.uis.get(&id)
    }

    /// the UI with the given id, mutably
    pub fn ui_mut(&mut self, id: u32) -> Option<&mut Ui> {
        self.uis.get_mut(&id)
    }

    /// the ids of the UIs of this session
    pub fn ui_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.uis.keys().copied()
    }

    /// Removes a UI together with its client cache.
    pub fn remove_ui(&mut self, id: u32) -> Option<Ui> {
        let mut ui = self.uis.remove(&id)?;
        ui.close();
        self.communication.remove_client_cache(id);
        Some(ui)
    }

    /// the deployment configuration of the session
    pub fn config(&self) -> &DeploymentConfiguration {
        &self.config
    }

    /// the notification texts of the session
    pub fn system_messages(&self) -> &SystemMessages {
        &self.system_messages
    }

    /// the persistent part of the session
    pub fn wrapped(&self) -> &WrappedSession {
        &self.wrapped
    }

    /// the persistent part of the session, mutably
    pub fn wrapped_mut(&mut self) -> &mut WrappedSession {
        &mut self.wrapped
    }

    /// the session error handler
    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        self.error_handler.clone()
    }

    /// replaces the session error handler
    pub fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.error_handler = handler;
    }

    /// replaces the validator run when the client asks for a layout analysis
    pub fn set_layout_validator(&mut self, validator: Arc<dyn LayoutValidator>) {
        self.layout_validator = validator;
    }

    /// sets where theme resources painted by legacy components are read from
    pub fn set_theme_resources(&mut self, resources: Arc<dyn ThemeResources>) {
        self.theme_resources = Some(resources);
    }

    /// the locale of the session
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Changes the locale of the session. The locale data is sent with the next response.
    pub fn set_locale(&mut self, locale: &str) {
        self.locale = locale.to_string();
        self.communication.require_locale(locale);
    }

    /// queues the data of `locale` for the next response
    pub fn require_locale(&mut self, locale: &str) {
        self.communication.require_locale(locale);
    }

    pub(crate) fn start_request(&mut self) {
        self.request_start = Some(Instant::now());
    }

    pub(crate) fn finish_request(&mut self) {
        if let Some(start) = self.request_start.take() {
            let elapsed = start.elapsed().as_millis() as u64;
            self.last_request_ms = elapsed;
            self.total_request_ms += elapsed;
        }
    }

    /// `[total request time, last request time]` of the session in milliseconds
    pub fn timings(&self) -> [u64; 2] {
        [self.total_request_ms, self.last_request_ms]
    }

    /// Closes and removes UIs that are closing, missed their heartbeats or, with idle
    /// session closing enabled, saw no UIDL request within the session timeout. Returns
    /// the ids of the removed UIs.
    pub fn remove_expired_uis(&mut self, now_millis: i64) -> Vec<u32> {
        let heartbeat_timeout = self.config.heartbeat_timeout_secs() as i64 * 1000;
        let request_timeout = if self.config.close_idle_sessions {
            let interval = self
                .config
                .heartbeat_interval_secs
                .max(self.wrapped.max_inactive_interval());
            Some(interval as i64 * 1000)
        } else {
            None
        };

        let expired: Vec<u32> = self
            .uis
            .iter()
            .filter(|(_, ui)| {
                ui.is_closing()
                    || now_millis - ui.last_heartbeat_timestamp() > heartbeat_timeout
                    || request_timeout.map_or(false, |timeout| {
                        now_millis - ui.last_uidl_request_time() > timeout
                    })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            debug!("removing expired ui {}", id);
            self.remove_ui(*id);
        }
        expired
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.wrapped.id())
            .field("uis", &self.uis.keys().collect::<Vec<_>>())
            .field("locale", &self.locale)
            .finish()
    }
}

/// A session and its lock.
///
/// Every request entry point takes the lock for the whole of its request scoped work and
/// passes the [`SessionState`] down. Waiting for the lock is bounded by the configured
/// lock timeout.
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
    lock_timeout: Duration,
}

impl Session {
    /// a session with no UIs
    pub fn new(
        config: DeploymentConfiguration,
        system_messages: SystemMessages,
        wrapped: WrappedSession,
    ) -> Self {
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
        Session {
            id: wrapped.id().to_string(),
            state: Mutex::new(SessionState::new(config, system_messages, wrapped)),
            lock_timeout,
        }
    }

    /// the session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Takes the session lock.
    ///
    /// # Errors
    /// returns [`UidlError::ServiceUnavailable`] when the lock is not acquired within the
    /// lock timeout
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        match self.state.try_lock_for(self.lock_timeout) {
            Some(guard) => Ok(guard),
            None => {
                warn!("timed out waiting for the session lock");
                Err(UidlError::ServiceUnavailable {
                    retry_after_ms: self.lock_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Expires UIs as [`SessionState::remove_expired_uis`] does, under the session lock.
    ///
    /// # Errors
    /// returns [`UidlError::ServiceUnavailable`] when the lock is not acquired in time
    pub fn remove_expired_uis(&self) -> Result<Vec<u32>> {
        let now = chrono::Utc::now().timestamp_millis();
        Ok(self.lock()?.remove_expired_uis(now))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
