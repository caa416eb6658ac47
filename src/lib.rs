#![warn(missing_docs)]
//! Server side state synchronization for a component based web UI.
//!
//! Every browser session owns one or more [`Ui`]s, each a tree of connectors: components,
//! containers and extensions that carry a shared state and optional application logic. The
//! client talks to the server with UIDL requests. A request carries bursts of RPC
//! invocations and legacy variable changes; the server applies them to the tree and answers
//! with everything that changed since the last response.
//!
//! ## Synchronization
//! - The [`ConnectorTracker`] of a UI remembers which connectors became dirty, which ones
//!   the client has already seen and the last state sent for each of them.
//! - The [`codec`] encodes values into the JSON wire representation, diffs bean state
//!   against the last sent state and decodes client payloads back into [`Value`]s.
//! - The [`rpc`] module queues client RPC calls and parses the invocations of a burst.
//! - The [`communication`] module dispatches invocations and assembles responses. A
//!   response is an object with the sections `changes`, `state`, `types`, `hierarchy`,
//!   `rpc`, `meta`, `resources`, `typeMappings`, `locales` and a few more, written after
//!   the anti-hijacking prefix `for(;;);`.
//! - The [`upload`] module streams file uploads into application sinks.
//!
//! ## Sessions
//! A [`Session`] serializes all requests against it with a lock that is waited for at most
//! the configured lock timeout. A request that times out is answered with `503`. The part
//! of a session that survives a restart, the [`WrappedSession`], is persisted by a
//! [`SessionStore`].
//!
//! ## Client / Server
//! [`UidlServer`] is a small TCP front end: it reads JSON encoded [`Request`]s, handles them
//! on a [`ThreadPool`] and answers with [`Response`]s. [`UidlClient`] is its counterpart, and
//! the `uidl-server` and `uidl-client` executables wrap both.

pub use client::UidlClient;
pub use codec::{Transport, TypeDesc, Value};
pub use command::{Reply, Request, Response};
pub use communication::{
    handle_burst, handle_heartbeat, handle_uidl_request, handle_variables, write_uidl_response,
    PaintOptions,
};
pub use config::{Configuration, DeploymentConfiguration, Notification, SystemMessages};
pub use connector::{
    ConnectorKey, ConnectorKind, ConnectorLogic, ConnectorTracker, ConnectorType, SharedState, Ui,
};
pub use error::{CodecError, Result, UidlError};
pub use server::{SessionHandler, UiProvider, UidlServer};
pub use session::{DefaultErrorHandler, ErrorEvent, ErrorHandler, Session, SessionState};
pub use store::{MemorySessionStore, SessionStore, SledSessionStore};
pub use thread_pool::{RayonThreadPool, SharedQueueThreadPool, ThreadPool};
pub use transport::{
    BufferedRequest, BufferedResponse, UidlRequest, UidlResponse, WrappedSession,
};
pub use upload::handle_file_upload;

mod client;
pub mod codec;
mod command;
pub mod communication;
pub mod config;
pub mod connector;
mod error;
pub mod layout;
pub mod rpc;
mod server;
pub mod session;
pub mod store;
pub mod thread_pool;
pub mod transport;
pub mod upload;
