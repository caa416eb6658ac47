use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The frames a client sends to a [`UidlServer`](crate::UidlServer). Each frame stands for
/// one request of a browser against its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// open a UI, in a new session unless `session` names a known one
    Init {
        /// the session to open the UI in
        session: Option<String>,
    },
    /// a UIDL request
    Uidl {
        /// the session id
        session: String,
        /// the query parameters, `v-uiId` among them
        parameters: BTreeMap<String, String>,
        /// the burst payload
        payload: String,
    },
    /// a heartbeat of a UI
    Heartbeat {
        /// the session id
        session: String,
        /// the id of the UI
        ui: u32,
    },
    /// a post to an upload target
    Upload {
        /// the session id
        session: String,
        /// the upload target path, `UPLOAD/<ui>/<connector>/<name>/<seckey>`
        path: String,
        /// the content type of the body, a multipart boundary when the body is multipart
        content_type: Option<String>,
        /// the raw body
        body: Vec<u8>,
    },
    /// invalidate a session
    Close {
        /// the session id
        session: String,
    },
}

/// What the server answered to a [`Request`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// the status code
    pub status: u16,
    /// the response headers
    pub headers: BTreeMap<String, String>,
    /// the content type of `body`
    pub content_type: Option<String>,
    /// the response body
    pub body: String,
}

/// The response to any [`Request`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// the request was handled, the reply may still carry an error status or notification
    Ok(Reply),
    /// the request could not be handled at all
    Err(String),
}
