//! Streaming of uploaded files into application provided sinks.
//!
//! An upload sink is a [`StreamVariable`] registered for a connector under a name. The
//! registration yields a target URL of the form `app://UPLOAD/<ui>/<connector>/<name>/<key>`
//! that the client posts the file to, either as a `multipart/form-data` body or as a raw
//! XHR post. Copying the bytes happens outside the session lock; every callback of the
//! sink runs with the lock held.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::communication::handle_change_variables_error;
use crate::connector::{ConnectorKey, Ui};
use crate::error::{Result, UidlError};
use crate::session::Session;
use crate::transport::{UidlRequest, UidlResponse};

/// size of the chunks copied from the request into the sink
pub const MAX_UPLOAD_BUFFER_SIZE: usize = 4 * 1024;

/// path prefix of upload target URLs
pub const UPLOAD_URL_PREFIX: &str = "UPLOAD/";

const APP_PROTOCOL_PREFIX: &str = "app://";

/// a stream variable shared between the connector tracker and running uploads
pub type SharedStreamVariable = Arc<parking_lot::Mutex<dyn StreamVariable>>;

/// wraps a sink for registration with [`register_stream_variable`]
pub fn shared<S: StreamVariable + 'static>(variable: S) -> SharedStreamVariable {
    Arc::new(parking_lot::Mutex::new(variable))
}

/// Emitted before the first byte is copied.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingStartEvent {
    filename: String,
    mime_type: String,
    content_length: Option<u64>,
    disposed: bool,
}

impl StreamingStartEvent {
    fn new(filename: &str, mime_type: &str, content_length: Option<u64>) -> Self {
        StreamingStartEvent {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            content_length,
            disposed: false,
        }
    }

    /// the name of the uploaded file, without any path
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// the declared mime type
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// the declared length of the upload, when known
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// asks the framework to forget the stream variable once this upload completes
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    /// returns `true` when [`dispose`](Self::dispose) was called
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Emitted after every chunk when the sink listens to progress.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingProgressEvent {
    /// the name of the uploaded file
    pub filename: String,
    /// the declared mime type
    pub mime_type: String,
    /// the declared length of the upload, when known
    pub content_length: Option<u64>,
    /// the bytes copied so far
    pub bytes_received: u64,
}

/// Emitted when the whole upload was copied.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingEndEvent {
    /// the name of the uploaded file
    pub filename: String,
    /// the declared mime type
    pub mime_type: String,
    /// the bytes copied
    pub bytes_received: u64,
}

/// Emitted when an upload fails or is interrupted.
#[derive(Debug)]
pub struct StreamingErrorEvent<'a> {
    /// the name of the uploaded file
    pub filename: String,
    /// the declared mime type
    pub mime_type: String,
    /// the declared length of the upload, when known
    pub content_length: Option<u64>,
    /// the bytes copied before the failure
    pub bytes_received: u64,
    /// the failure, [`UidlError::UploadInterrupted`] when the sink asked to stop
    pub error: &'a UidlError,
}

/// An application sink for uploaded files.
pub trait StreamVariable: Send {
    /// the stream the upload is copied into, `None` refuses the upload
    fn output_stream(&mut self) -> Option<Box<dyn Write + Send>>;

    /// whether [`on_progress`](Self::on_progress) should be called after every chunk
    fn listen_progress(&self) -> bool {
        false
    }

    /// called after every chunk when listening to progress
    fn on_progress(&mut self, _ui: &mut Ui, _event: &StreamingProgressEvent) {}

    /// called before the copying starts
    fn streaming_started(&mut self, _ui: &mut Ui, _event: &mut StreamingStartEvent) {}

    /// called when the whole upload was copied
    fn streaming_finished(&mut self, _ui: &mut Ui, _event: &StreamingEndEvent) {}

    /// called when the upload failed or was interrupted
    fn streaming_failed(&mut self, _ui: &mut Ui, _event: &StreamingErrorEvent<'_>) {}

    /// polled after every chunk, `true` stops the upload
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Registers `variable` as the sink named `name` of `connector` and returns the URL the
/// client posts uploads to.
///
/// # Errors
/// returns [`UidlError::Tree`] when `connector` is not attached
pub fn register_stream_variable(
    ui: &mut Ui,
    connector: ConnectorKey,
    name: &str,
    variable: SharedStreamVariable,
) -> Result<String> {
    let connector_id = ui
        .tracker()
        .registered()
        .find(|c| *c == connector)
        .and_then(|c| ui.connector_id(c))
        .map(String::from)
        .ok_or_else(|| UidlError::Tree("stream variables need an attached connector".to_string()))?;
    let seckey = ui.tracker_mut().add_stream_variable(connector, name, variable);
    Ok(format!(
        "{}{}{}/{}/{}/{}",
        APP_PROTOCOL_PREFIX,
        UPLOAD_URL_PREFIX,
        ui.id(),
        connector_id,
        name,
        seckey
    ))
}

fn with_ui<R>(session: &Session, ui_id: u32, f: impl FnOnce(&mut Ui) -> R) -> Result<R> {
    let mut state = session.lock()?;
    let ui = state
        .ui_mut(ui_id)
        .ok_or_else(|| UidlError::Upload(format!("ui {} no longer exists", ui_id)))?;
    Ok(f(ui))
}

/// Copies `input` into the sink of `variable`.
///
/// Returns `true` when the sink disposed the registration in its start callback and the
/// variable should be forgotten.
///
/// # Errors
/// returns [`UidlError::Upload`] when the sink refuses the upload or copying fails, after
/// the sink was told through `streaming_failed`. An interruption requested by the sink is
/// reported to the sink but is not an error.
pub fn stream_to_receiver<R: Read>(
    session: &Session,
    ui_id: u32,
    variable: &SharedStreamVariable,
    mut input: R,
    filename: &str,
    mime_type: &str,
    content_length: Option<u64>,
) -> Result<bool> {
    let mut started = StreamingStartEvent::new(filename, mime_type, content_length);
    let mut total_bytes: u64 = 0;

    let mut copy = |started: &mut StreamingStartEvent, total_bytes: &mut u64| -> Result<()> {
        let (out, listen_progress) = with_ui(session, ui_id, |ui| {
            let mut sink = variable.lock();
            sink.streaming_started(ui, started);
            (sink.output_stream(), sink.listen_progress())
        })?;
        let mut out = out.ok_or_else(|| {
            UidlError::Upload("the stream variable provided no output stream".to_string())
        })?;

        let mut buffer = [0u8; MAX_UPLOAD_BUFFER_SIZE];
        loop {
            let read = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&buffer[..read])?;
            *total_bytes += read as u64;
            if listen_progress {
                let event = StreamingProgressEvent {
                    filename: filename.to_string(),
                    mime_type: mime_type.to_string(),
                    content_length,
                    bytes_received: *total_bytes,
                };
                with_ui(session, ui_id, |ui| variable.lock().on_progress(ui, &event))?;
            }
            if variable.lock().is_interrupted() {
                return Err(UidlError::UploadInterrupted);
            }
        }
        out.flush()?;
        drop(out);

        let event = StreamingEndEvent {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            bytes_received: *total_bytes,
        };
        with_ui(session, ui_id, |ui| variable.lock().streaming_finished(ui, &event))?;
        Ok(())
    };

    match copy(&mut started, &mut total_bytes) {
        Ok(()) => {
            debug!("upload of {} finished after {} bytes", filename, total_bytes);
            Ok(started.is_disposed())
        }
        Err(e) => {
            let interrupted = matches!(e, UidlError::UploadInterrupted);
            let event = StreamingErrorEvent {
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
                content_length,
                bytes_received: total_bytes,
                error: &e,
            };
            with_ui(session, ui_id, |ui| variable.lock().streaming_failed(ui, &event))?;
            if interrupted {
                debug!("upload of {} interrupted after {} bytes", filename, total_bytes);
                Ok(started.is_disposed())
            } else {
                Err(UidlError::Upload(e.to_string()))
            }
        }
    }
}

/// Strips any path a browser sent along with a file name.
pub fn remove_path(filename: &str) -> &str {
    match filename.rfind(|c| c == '/' || c == '\\') {
        Some(i) => &filename[i + 1..],
        None => filename,
    }
}

/// Reads from a multipart body until the boundary that ends the first part.
///
/// The boundary is matched against `CRLF--boundary`; the reader reports end of input right
/// before it. Input that ends before the boundary was found is an error.
pub struct MultipartInputStream<R> {
    inner: BufReader<R>,
    boundary: Vec<u8>,
    rescan: VecDeque<u8>,
    finished: bool,
}

impl<R: Read> MultipartInputStream<R> {
    /// wraps `inner`, which must be positioned at the first byte of the part's content
    pub fn new(inner: R, boundary: &str) -> Self {
        MultipartInputStream::from_buf_reader(BufReader::new(inner), boundary)
    }

    fn from_buf_reader(inner: BufReader<R>, boundary: &str) -> Self {
        let mut pattern = b"\r\n--".to_vec();
        pattern.extend_from_slice(boundary.as_bytes());
        MultipartInputStream {
            inner,
            boundary: pattern,
            rescan: VecDeque::new(),
            finished: false,
        }
    }

    fn next_raw(&mut self) -> io::Result<u8> {
        if let Some(b) = self.rescan.pop_front() {
            return Ok(b);
        }
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte)? {
            0 => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "the multipart stream ended unexpectedly",
            )),
            _ => Ok(byte[0]),
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.finished {
            return Ok(None);
        }
        let first = self.next_raw()?;
        if first != self.boundary[0] {
            return Ok(Some(first));
        }
        let mut matched = 1;
        while matched < self.boundary.len() {
            let next = self.next_raw()?;
            if next == self.boundary[matched] {
                matched += 1;
                continue;
            }
            // the candidate failed, everything after its first byte is examined again
            let mut retry: Vec<u8> = self.boundary[1..matched].to_vec();
            retry.push(next);
            for b in retry.into_iter().rev() {
                self.rescan.push_front(b);
            }
            return Ok(Some(first));
        }
        self.finished = true;
        Ok(None)
    }
}

impl<R: Read> Read for MultipartInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.next_byte()? {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

/// the file name and mime type announced in the headers of a multipart part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHeaders {
    /// the file name, with any path removed
    pub filename: String,
    /// the content type of the part
    pub mime_type: String,
    /// the number of bytes the header block took, including line ends
    pub consumed: u64,
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(UidlError::Upload(
            "the multipart stream ended before the file content".to_string(),
        ));
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    Ok(String::from_utf8(line)?)
}

/// Reads the headers of the first file field of a multipart body, leaving `reader` at the
/// first byte of the file content.
///
/// # Errors
/// returns [`UidlError::Upload`] when the body ends before the file content starts
pub fn read_multipart_headers<R: BufRead>(reader: &mut R) -> Result<MultipartHeaders> {
    let mut filename = "unknown".to_string();
    let mut mime_type = "application/octet-stream".to_string();
    let mut file_field_found = false;
    let mut consumed = 0u64;
    loop {
        let line = read_line(reader)?;
        consumed += line.len() as u64 + 2;
        if line.starts_with("Content-Disposition:")
            && line.find("filename=").map_or(false, |i| i > 0)
        {
            if let Some(raw) = line.split("filename=").last() {
                let mut chars = raw.chars();
                if let Some(quote) = chars.next() {
                    let rest = chars.as_str();
                    let end = rest.find(quote).unwrap_or(rest.len());
                    filename = remove_path(&rest[..end]).to_string();
                }
            }
            file_field_found = true;
        } else if file_field_found && line.is_empty() {
            break;
        } else if line.starts_with("Content-Type") {
            if let Some(value) = line.splitn(2, ": ").nth(1) {
                mime_type = value.to_string();
            }
        }
    }
    Ok(MultipartHeaders {
        filename,
        mime_type,
        consumed,
    })
}

/// the boundary parameter of a `multipart/form-data` content type
pub fn multipart_boundary(content_type: &str) -> Option<&str> {
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    let index = content_type.find("boundary=")?;
    let boundary = content_type[index + "boundary=".len()..]
        .split(';')
        .next()?
        .trim()
        .trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary)
    }
}

struct UploadTarget {
    ui_id: u32,
    connector_id: String,
    name: String,
    seckey: String,
}

fn parse_upload_path(path: &str) -> Option<UploadTarget> {
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix(UPLOAD_URL_PREFIX)?;
    let mut parts = path.splitn(4, '/');
    let ui_id = parts.next()?.parse().ok()?;
    let connector_id = parts.next()?.to_string();
    let name = parts.next()?.to_string();
    let seckey = parts.next()?.to_string();
    Some(UploadTarget {
        ui_id,
        connector_id,
        name,
        seckey,
    })
}

/// Handles a post to an upload target URL.
///
/// The security key in the URL must match the key issued when the sink was registered.
/// Uploads for connectors that are read-only or gone are refused; those failures and any
/// streaming error go through the error handler chain of the connector. The response is a
/// small HTML page.
///
/// # Errors
/// returns [`UidlError::SecurityViolation`] on a key mismatch and
/// [`UidlError::Communication`] for a malformed target path
pub fn handle_file_upload(
    session: &Session,
    request: &mut dyn UidlRequest,
    response: &mut dyn UidlResponse,
) -> Result<()> {
    let path = request.path_info().unwrap_or_default().to_string();
    let target = parse_upload_path(&path)
        .ok_or_else(|| UidlError::Communication(format!("malformed upload path {}", path)))?;

    let (connector, variable) = {
        let mut state = session.lock()?;
        let ui = match state.ui_mut(target.ui_id) {
            Some(ui) => ui,
            None => {
                warn!("upload received for ui {} which does not exist", target.ui_id);
                return send_upload_response(response);
            }
        };
        let connector = ui.connector(&target.connector_id);
        let registered = connector.and_then(|c| {
            let seckey = ui.tracker().seckey(c, &target.name)?;
            let variable = ui.tracker().stream_variable(c, &target.name)?;
            Some((seckey.to_string(), variable))
        });
        match registered {
            Some((seckey, variable)) => {
                if seckey != target.seckey {
                    error!("security key mismatch for upload to {}", path);
                    return Err(UidlError::SecurityViolation(
                        "upload security key mismatch".to_string(),
                    ));
                }
                (connector, variable)
            }
            None => {
                warn!(
                    "no stream variable {} registered for connector {}",
                    target.name, target.connector_id
                );
                return send_upload_response(response);
            }
        }
    };
    let connector = match connector {
        Some(connector) => connector,
        None => return send_upload_response(response),
    };

    let result = stream_upload(session, &target, connector, &variable, request);
    if let Err(e) = result {
        let mut state = session.lock()?;
        let handler = state.error_handler();
        if let Some(ui) = state.ui_mut(target.ui_id) {
            handle_change_variables_error(ui, Some(connector), e, handler.as_ref());
        }
    }
    send_upload_response(response)
}

fn stream_upload(
    session: &Session,
    target: &UploadTarget,
    connector: ConnectorKey,
    variable: &SharedStreamVariable,
    request: &mut dyn UidlRequest,
) -> Result<()> {
    let read_only = {
        let mut state = session.lock()?;
        let ui = state
            .ui_mut(target.ui_id)
            .ok_or_else(|| {
                UidlError::Upload("file upload ignored because the ui was closed".to_string())
            })?;
        if !ui.tracker().is_registered(connector) {
            return Err(UidlError::Upload(
                "file upload ignored because the connector for the stream variable was not found"
                    .to_string(),
            ));
        }
        ui.logic(connector).map_or(false, |logic| logic.is_read_only())
    };
    if read_only {
        return Err(UidlError::Upload(
            "file upload ignored because the component was read-only".to_string(),
        ));
    }

    let content_type = request.header("Content-Type").map(String::from);
    let content_length = request.content_length();
    let boundary = content_type.as_deref().and_then(multipart_boundary).map(String::from);

    let forget = match boundary {
        Some(boundary) => {
            let mut reader = BufReader::new(request.body());
            let headers = read_multipart_headers(&mut reader)?;
            let remaining = content_length.map(|length| {
                let trailer = boundary.len() as u64 + 2 + 2 * 2 + 2;
                length.saturating_sub(headers.consumed + trailer)
            });
            let part = MultipartInputStream::from_buf_reader(reader, &boundary);
            stream_to_receiver(
                session,
                target.ui_id,
                variable,
                part,
                &headers.filename,
                &headers.mime_type,
                remaining,
            )?
        }
        None => stream_to_receiver(
            session,
            target.ui_id,
            variable,
            request.body(),
            "unknown",
            "unknown",
            content_length,
        )?,
    };

    if forget {
        let mut state = session.lock()?;
        if let Some(ui) = state.ui_mut(target.ui_id) {
            ui.tracker_mut().clean_stream_variable(connector, &target.name);
        }
    }
    Ok(())
}

/// writes the fixed page answering every upload post
pub fn send_upload_response(response: &mut dyn UidlResponse) -> Result<()> {
    response.set_content_type("text/html");
    response
        .writer()
        .write_all(b"<html><body>download handled</body></html>")?;
    Ok(())
}
