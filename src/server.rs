use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Deserializer};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::command::{Reply, Request, Response};
use crate::communication::{handle_heartbeat, handle_uidl_request};
use crate::config::Configuration;
use crate::session::{Session, SessionState};
use crate::store::SessionStore;
use crate::thread_pool::ThreadPool;
use crate::transport::{
    write_error_response, BufferedRequest, BufferedResponse, UidlResponse, WrappedSession,
    JSON_CONTENT_TYPE,
};
use crate::upload::handle_file_upload;
use crate::{Result, UidlError};

/// Builds the initial UI of a session. This is where an application puts its components
/// into the tree.
pub trait UiProvider: Send + Sync {
    /// creates a UI in `state` and returns its id
    ///
    /// # Errors
    /// fails when the connector tree of the UI can not be built
    fn create_ui(&self, state: &mut SessionState) -> Result<u32>;
}

/// Handles [`Request`]s against the sessions of one deployment.
///
/// Sessions live in a concurrent registry; their persistent part is written to a
/// [`SessionStore`] after every request, and a session that is not in the registry is
/// restored from the store when a UI is opened for it. Clones share the registry.
pub struct SessionHandler<S: SessionStore> {
    store: S,
    config: Arc<Configuration>,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    provider: Arc<dyn UiProvider>,
}

impl<S: SessionStore> Clone for SessionHandler<S> {
    fn clone(&self) -> Self {
        SessionHandler {
            store: self.store.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            provider: self.provider.clone(),
        }
    }
}

impl<S: SessionStore> SessionHandler<S> {
    /// a handler without sessions
    pub fn new(store: S, config: Configuration, provider: Arc<dyn UiProvider>) -> Self {
        SessionHandler {
            store,
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
            provider,
        }
    }

    /// a live session
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|session| session.value().clone())
    }

    /// the number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles one request. Failures that the protocol answers, such as an expired session
    /// or a busy session lock, are written into the reply; only failures to produce a reply
    /// at all become [`Response::Err`].
    #[instrument(skip(self, request))]
    pub fn handle(&self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(reply) => Response::Ok(reply),
            Err(e) => {
                error!("failed to handle request: {}", e);
                Response::Err(format!("{}", e))
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Init { session } => self.init(session),
            Request::Uidl {
                session,
                parameters,
                payload,
            } => {
                let mut request = parameters
                    .iter()
                    .fold(BufferedRequest::new(), |request, (name, value)| {
                        request.with_parameter(name, value)
                    })
                    .with_body(payload);
                self.with_session(&session, |session, response| {
                    handle_uidl_request(session, &mut request, response)
                })
            }
            Request::Heartbeat { session, ui } => self.with_session(&session, |session, response| {
                if !handle_heartbeat(session, ui)? {
                    response.set_status(403);
                }
                Ok(())
            }),
            Request::Upload {
                session,
                path,
                content_type,
                body,
            } => {
                let mut request = BufferedRequest::new().with_path_info(&path).with_body(body);
                if let Some(content_type) = content_type {
                    request = request.with_header("Content-Type", &content_type);
                }
                self.with_session(&session, |session, response| {
                    handle_file_upload(session, &mut request, response)
                })
            }
            Request::Close { session } => self.close(&session),
        }
    }

    fn init(&self, id: Option<String>) -> Result<Reply> {
        let session = match id.as_deref().and_then(|id| self.session(id)) {
            Some(session) => session,
            None => {
                let wrapped = self.restore(id)?;
                let session = Arc::new(Session::new(
                    self.config.deployment.clone(),
                    self.config.system_messages.clone(),
                    wrapped,
                ));
                self.sessions
                    .insert(session.id().to_string(), session.clone());
                session
            }
        };

        let ui_id = {
            let mut state = session.lock()?;
            self.provider.create_ui(&mut state)?
        };
        self.persist(&session);
        info!("opened ui {} in session {}", ui_id, session.id());

        Ok(Reply {
            status: 200,
            headers: BTreeMap::new(),
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            body: json!({ "session": session.id(), "uiId": ui_id }).to_string(),
        })
    }

    fn restore(&self, id: Option<String>) -> Result<WrappedSession> {
        let timeout = self.config.deployment.session_timeout_secs;
        match id {
            Some(id) => match self.store.load(id.clone())? {
                Some(blob) => {
                    info!("restoring session {} from the store", id);
                    WrappedSession::from_blob(&blob)
                }
                None => Ok(WrappedSession::new(id, timeout)),
            },
            None => Ok(WrappedSession::new(Uuid::new_v4().to_string(), timeout)),
        }
    }

    fn with_session<F>(&self, id: &str, f: F) -> Result<Reply>
    where
        F: FnOnce(&Session, &mut BufferedResponse) -> Result<()>,
    {
        let messages = &self.config.system_messages;
        let session = match self.session(id) {
            Some(session) => session,
            None => {
                warn!("request for unknown session {}", id);
                let mut response = BufferedResponse::new();
                write_error_response(&mut response, &UidlError::SessionExpired, messages)?;
                return to_reply(&response);
            }
        };

        let mut response = BufferedResponse::new();
        if let Err(e) = f(&session, &mut response) {
            response = BufferedResponse::new();
            write_error_response(&mut response, &e, messages)?;
        }
        self.persist(&session);
        match session.remove_expired_uis() {
            Ok(expired) if !expired.is_empty() => {
                info!("expired uis {:?} of session {}", expired, id)
            }
            Ok(_) => {}
            Err(e) => debug!("skipped expiring uis of session {}: {}", id, e),
        }
        to_reply(&response)
    }

    fn persist(&self, session: &Session) {
        let blob = session
            .lock()
            .and_then(|state| state.wrapped().to_blob());
        match blob.and_then(|blob| self.store.save(session.id().to_string(), blob)) {
            Ok(()) => debug!("stored session {}", session.id()),
            Err(e) => error!("could not store session {}: {}", session.id(), e),
        }
    }

    fn close(&self, id: &str) -> Result<Reply> {
        if let Some((_, session)) = self.sessions.remove(id) {
            let mut state = session.lock()?;
            let ids: Vec<u32> = state.ui_ids().collect();
            for ui_id in ids {
                state.remove_ui(ui_id);
            }
        }
        if let Err(e) = self.store.remove(id.to_string()) {
            debug!("nothing stored for closed session {}: {}", id, e);
        }
        info!("closed session {}", id);
        Ok(Reply {
            status: 200,
            ..Reply::default()
        })
    }
}

fn to_reply(response: &BufferedResponse) -> Result<Reply> {
    Ok(Reply {
        status: response.status(),
        headers: response.headers().clone(),
        content_type: response.content_type().map(String::from),
        body: response.body_text()?,
    })
}

/// A TCP socket server in front of a [`SessionHandler`].
///
/// It listens for [`Request`]s on a [`SocketAddr`](std::net::SocketAddr) and serves every
/// connection on a thread of its [`ThreadPool`]. A connection carries any number of
/// requests, each answered with one [`Response`].
pub struct UidlServer<S: SessionStore, P: ThreadPool> {
    handler: SessionHandler<S>,
    pool: P,
}

impl<S: SessionStore, P: ThreadPool> UidlServer<S, P> {
    /// Create a new `UidlServer` using the given [`SessionStore`] and [`ThreadPool`]
    /// implementation.
    pub fn new(store: S, pool: P, config: Configuration, provider: Arc<dyn UiProvider>) -> Self {
        UidlServer {
            handler: SessionHandler::new(store, config, provider),
            pool,
        }
    }

    /// the handler the connections are served with
    pub fn handler(&self) -> &SessionHandler<S> {
        &self.handler
    }

    /// starts a server listening on the given address.
    ///
    /// # Errors
    /// returns [`UidlError::Io`] if the address can not be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let handler = self.handler.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(handler, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Reads [`Request`]s from `tcp` until the client hangs up, answering each with a
/// [`Response`].
fn serve<S: SessionStore>(handler: SessionHandler<S>, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let stream_reader = BufReader::new(&tcp);
    let mut stream_writer = BufWriter::new(&tcp);
    let req_reader = Deserializer::from_reader(stream_reader).into_iter::<Request>();

    let mut send_resp = move |resp: Response| -> Result<()> {
        serde_json::to_writer(&mut stream_writer, &resp)?;
        stream_writer.flush()?;
        debug!("Response sent to {}: {:?}", peer_addr, resp);
        Ok(())
    };

    for req in req_reader {
        let req = req?;
        debug!("Receive request from {}: {:?}", peer_addr, req);
        send_resp(handler.handle(req))?;
    }
    Ok(())
}
