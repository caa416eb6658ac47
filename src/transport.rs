//! The request/response abstraction the protocol handlers are written against, an
//! in-memory implementation of it, the persistent part of a session and the rendering of
//! critical notifications.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::config::{Notification, SystemMessages};
use crate::error::{Result, UidlError};

/// prefix of every JSON response, it keeps the response from being evaluated as a script
pub const JSON_PREFIX: &str = "for(;;);";
/// content type of UIDL responses and critical notifications
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// An incoming request.
pub trait UidlRequest {
    /// a query parameter
    fn parameter(&self, name: &str) -> Option<&str>;

    /// a header, looked up case-insensitively
    fn header(&self, name: &str) -> Option<&str>;

    /// the path below the application root
    fn path_info(&self) -> Option<&str>;

    /// the declared body length
    fn content_length(&self) -> Option<u64>;

    /// the request body
    fn body(&mut self) -> &mut dyn Read;
}

/// The response to an [`UidlRequest`].
pub trait UidlResponse {
    /// sets the status code, `200` unless changed
    fn set_status(&mut self, status: u16);

    /// sets a header
    fn set_header(&mut self, name: &str, value: &str);

    /// sets the content type of the body
    fn set_content_type(&mut self, content_type: &str);

    /// the body
    fn writer(&mut self) -> &mut dyn Write;
}

/// A request held in memory.
#[derive(Debug, Default)]
pub struct BufferedRequest {
    parameters: HashMap<String, String>,
    headers: HashMap<String, String>,
    path_info: Option<String>,
    content_length: Option<u64>,
    body: Cursor<Vec<u8>>,
}

impl BufferedRequest {
    /// an empty request
    pub fn new() -> Self {
        BufferedRequest::default()
    }

    /// adds a query parameter
    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(name.to_string(), value.to_string());
        self
    }

    /// adds a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// sets the path below the application root
    pub fn with_path_info(mut self, path: &str) -> Self {
        self.path_info = Some(path.to_string());
        self
    }

    /// sets the body, and with it the content length
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.content_length = Some(body.len() as u64);
        self.body = Cursor::new(body);
        self
    }
}

impl UidlRequest for BufferedRequest {
    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn body(&mut self) -> &mut dyn Read {
        &mut self.body
    }
}

/// A response collected in memory.
#[derive(Debug)]
pub struct BufferedResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        BufferedResponse {
            status: 200,
            headers: BTreeMap::new(),
            content_type: None,
            body: Vec::new(),
        }
    }
}

impl BufferedResponse {
    /// an empty `200` response
    pub fn new() -> Self {
        BufferedResponse::default()
    }

    /// the status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// a header set on the response
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// all headers set on the response
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// the content type
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// the body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// the body as text
    ///
    /// # Errors
    /// returns [`UidlError::Utf8`] for a body that is not UTF-8
    pub fn body_text(&self) -> Result<String> {
        Ok(String::from_utf8(self.body.clone())?)
    }
}

impl UidlResponse for BufferedResponse {
    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.body
    }
}

/// The part of a session that outlives the process: string attributes and the max inactive
/// interval. This is what session stores persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedSession {
    id: String,
    attributes: BTreeMap<String, String>,
    max_inactive_interval: u64,
}

impl WrappedSession {
    /// a fresh session expiring after `max_inactive_interval` seconds without requests
    pub fn new(id: impl Into<String>, max_inactive_interval: u64) -> Self {
        WrappedSession {
            id: id.into(),
            attributes: BTreeMap::new(),
            max_inactive_interval,
        }
    }

    /// the session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// an attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// sets an attribute
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    /// removes an attribute, returning its value
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// seconds of inactivity after which the session expires
    pub fn max_inactive_interval(&self) -> u64 {
        self.max_inactive_interval
    }

    /// changes the max inactive interval
    pub fn set_max_inactive_interval(&mut self, seconds: u64) {
        self.max_inactive_interval = seconds;
    }

    /// serializes the session into the blob stored by a
    /// [`SessionStore`](crate::store::SessionStore)
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// restores a session from a stored blob
    pub fn from_blob(blob: &[u8]) -> Result<WrappedSession> {
        Ok(serde_json::from_slice(blob)?)
    }
}

/// Renders a critical notification. The client shows the caption and message, if any,
/// and continues to `url`, reloading the application when it is `None`.
pub fn critical_notification(
    caption: Option<&str>,
    message: Option<&str>,
    details: Option<&str>,
    url: Option<&str>,
) -> String {
    let notification = json!({
        "changes": [],
        "meta": {
            "appError": {
                "caption": caption,
                "message": message,
                "details": details,
                "url": url,
            }
        },
        "resources": {},
        "locales": [],
    });
    format!("{}[{}]", JSON_PREFIX, notification)
}

/// Writes a critical notification as the whole response.
///
/// # Errors
/// returns an IO error when the response can not be written
pub fn write_critical_notification(
    response: &mut dyn UidlResponse,
    notification: &Notification,
    details: Option<&str>,
) -> Result<()> {
    response.set_content_type(JSON_CONTENT_TYPE);
    let body = critical_notification(
        notification.caption(),
        notification.message(),
        details,
        notification.url(),
    );
    let writer = response.writer();
    writer.write_all(body.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Answers a request that failed with `error`.
///
/// A busy session is answered with `503` and a `Retry-After` header, an expired session
/// with the session expired notification, rejected or corrupted requests with the
/// communication error notification and everything else with the internal error one.
///
/// # Errors
/// returns an IO error when the response can not be written
pub fn write_error_response(
    response: &mut dyn UidlResponse,
    error: &UidlError,
    messages: &SystemMessages,
) -> Result<()> {
    match error {
        UidlError::ServiceUnavailable { retry_after_ms } => {
            debug!("session busy, asking the client to retry in {} ms", retry_after_ms);
            let seconds = (retry_after_ms + 999) / 1000;
            response.set_status(503);
            response.set_header("Retry-After", &seconds.max(1).to_string());
            Ok(())
        }
        UidlError::SessionExpired => {
            write_critical_notification(response, &messages.session_expired, None)
        }
        UidlError::SecurityViolation(_)
        | UidlError::Communication(_)
        | UidlError::VersionMismatch => {
            error!("rejected request: {}", error);
            write_critical_notification(response, &messages.communication_error, None)
        }
        _ => {
            error!("request failed: {}", error);
            let details = error.to_string();
            write_critical_notification(response, &messages.internal_error, Some(&details))
        }
    }
}
