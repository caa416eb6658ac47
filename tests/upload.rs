use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use uidl::upload::{
    multipart_boundary, read_multipart_headers, register_stream_variable, remove_path, shared,
    MultipartInputStream, StreamVariable, StreamingEndEvent, StreamingErrorEvent,
    StreamingProgressEvent, StreamingStartEvent,
};
use uidl::{handle_file_upload, BufferedRequest, BufferedResponse, Session, Ui, UidlError};

mod common;
use common::*;

const BOUNDARY: &str = "----uidlBoundary42";

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink whose disk is full.
struct FullDisk;

impl Write for FullDisk {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects uploads and the events announcing them.
#[derive(Default)]
struct Receiver {
    data: SharedBuffer,
    full_disk: bool,
    events: Arc<Mutex<Vec<String>>>,
    dispose: bool,
    interrupt: bool,
    progress: bool,
}

impl StreamVariable for Receiver {
    fn output_stream(&mut self) -> Option<Box<dyn Write + Send>> {
        if self.full_disk {
            return Some(Box::new(FullDisk));
        }
        Some(Box::new(self.data.clone()))
    }

    fn listen_progress(&self) -> bool {
        self.progress
    }

    fn on_progress(&mut self, _ui: &mut Ui, event: &StreamingProgressEvent) {
        self.events.lock().push(format!("progress {}", event.bytes_received));
    }

    fn streaming_started(&mut self, _ui: &mut Ui, event: &mut StreamingStartEvent) {
        self.events
            .lock()
            .push(format!("started {} {}", event.filename(), event.mime_type()));
        if self.dispose {
            event.dispose();
        }
    }

    fn streaming_finished(&mut self, _ui: &mut Ui, event: &StreamingEndEvent) {
        self.events.lock().push(format!("finished {}", event.bytes_received));
    }

    fn streaming_failed(&mut self, _ui: &mut Ui, event: &StreamingErrorEvent<'_>) {
        self.events.lock().push(format!("failed {}", event.error));
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
    }
}

fn multipart(filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"{f}\"\r\nContent-Type: text/plain\r\n\r\n",
        b = BOUNDARY,
        f = filename
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Registers `receiver` on the fixture field and returns the upload path.
fn register(session: &Session, receiver: Receiver) -> (u32, Fixture, String) {
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let url = register_stream_variable(ui, f.field, "file", shared(receiver)).unwrap();
    let path = url.strip_prefix("app://").unwrap().to_string();
    (ui_id, f, path)
}

fn upload(session: &Session, path: &str, body: Vec<u8>) -> uidl::Result<BufferedResponse> {
    let mut request = BufferedRequest::new()
        .with_path_info(path)
        .with_header(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .with_body(body);
    let mut response = BufferedResponse::new();
    handle_file_upload(session, &mut request, &mut response)?;
    Ok(response)
}

#[test]
fn registration_returns_the_upload_url() {
    let session = session();
    let mut state = session.lock().unwrap();
    let (ui_id, f) = open_ui(&mut state);
    let ui = state.ui_mut(ui_id).unwrap();
    let field = id_of(ui, f.field);

    let url = register_stream_variable(ui, f.field, "file", shared(Receiver::default())).unwrap();
    let seckey = ui.tracker().seckey(f.field, "file").unwrap().to_string();
    assert_eq!(url, format!("app://UPLOAD/{}/{}/file/{}", ui_id, field, seckey));

    let orphan = ui.create_component::<FieldState>(&FIELD);
    let refused = register_stream_variable(ui, orphan, "file", shared(Receiver::default()));
    assert!(matches!(refused, Err(UidlError::Tree(_))));
}

#[test]
fn a_multipart_upload_is_streamed_into_the_receiver() {
    let session = session();
    let receiver = Receiver::default();
    let data = receiver.data.clone();
    let events = receiver.events.clone();
    let (_, _, path) = register(&session, receiver);

    let content = b"first line\r\n--not the boundary\r\nlast line".to_vec();
    let response = upload(&session, &path, multipart("C:\\docs\\notes.txt", &content)).unwrap();

    assert_eq!(*data.0.lock(), content);
    assert_eq!(
        *events.lock(),
        vec![
            "started notes.txt text/plain".to_string(),
            format!("finished {}", content.len()),
        ]
    );
    assert_eq!(response.content_type(), Some("text/html"));
    assert_eq!(
        response.body_text().unwrap(),
        "<html><body>download handled</body></html>"
    );
}

#[test]
fn a_leading_slash_in_the_path_is_accepted() {
    let session = session();
    let receiver = Receiver::default();
    let data = receiver.data.clone();
    let (_, _, path) = register(&session, receiver);

    upload(&session, &format!("/{}", path), multipart("a.bin", b"xyz")).unwrap();
    assert_eq!(*data.0.lock(), b"xyz".to_vec());
}

#[test]
fn a_plain_body_is_uploaded_as_is() {
    let session = session();
    let receiver = Receiver::default();
    let data = receiver.data.clone();
    let events = receiver.events.clone();
    let (_, _, path) = register(&session, receiver);

    let mut request = BufferedRequest::new()
        .with_path_info(&path)
        .with_body(b"raw bytes".to_vec());
    let mut response = BufferedResponse::new();
    handle_file_upload(&session, &mut request, &mut response).unwrap();

    assert_eq!(*data.0.lock(), b"raw bytes".to_vec());
    assert_eq!(events.lock()[0], "started unknown unknown");
}

#[test]
fn a_wrong_security_key_is_refused() {
    let session = session();
    let receiver = Receiver::default();
    let data = receiver.data.clone();
    let (_, _, path) = register(&session, receiver);
    let forged = format!("{}x", path);

    let result = upload(&session, &forged, multipart("a.txt", b"data"));
    assert!(matches!(result, Err(UidlError::SecurityViolation(_))));
    assert!(data.0.lock().is_empty());
}

#[test]
fn a_malformed_path_is_a_communication_error() {
    let session = session();
    let result = upload(&session, "UPLOAD/x/y", multipart("a.txt", b"data"));
    assert!(matches!(result, Err(UidlError::Communication(_))));
}

#[test]
fn unknown_targets_are_answered_without_streaming() {
    let session = session();
    let (ui_id, _, _) = register(&session, Receiver::default());
    let response = upload(
        &session,
        &format!("UPLOAD/{}/999/file/key", ui_id),
        multipart("a.txt", b"data"),
    )
    .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), Some("text/html"));
}

#[test]
fn read_only_owners_refuse_uploads() {
    let session = session();
    let receiver = Receiver::default();
    let data = receiver.data.clone();
    let (ui_id, f, path) = register(&session, receiver);
    let handler = RecordingHandler::default();
    {
        let mut state = session.lock().unwrap();
        state.set_error_handler(Arc::new(handler.clone()));
        let logic = FieldLogic {
            read_only: true,
            ..FieldLogic::default()
        };
        state.ui_mut(ui_id).unwrap().set_logic(f.field, Box::new(logic)).unwrap();
    }

    let response = upload(&session, &path, multipart("a.txt", b"data")).unwrap();
    assert_eq!(response.status(), 200);
    assert!(data.0.lock().is_empty());
    let errors = handler.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("read-only"));
}

#[test]
fn a_disposed_registration_is_forgotten() {
    let session = session();
    let receiver = Receiver {
        dispose: true,
        ..Receiver::default()
    };
    let (ui_id, f, path) = register(&session, receiver);

    upload(&session, &path, multipart("a.txt", b"data")).unwrap();
    let state = session.lock().unwrap();
    let ui = state.ui(ui_id).unwrap();
    assert!(ui.tracker().stream_variable(f.field, "file").is_none());
}

#[test]
fn an_interrupted_upload_is_not_an_error() {
    let session = session();
    let receiver = Receiver {
        interrupt: true,
        ..Receiver::default()
    };
    let events = receiver.events.clone();
    let (ui_id, _, path) = register(&session, receiver);
    let handler = RecordingHandler::default();
    session
        .lock()
        .unwrap()
        .set_error_handler(Arc::new(handler.clone()));

    upload(&session, &path, multipart("a.txt", &[7u8; 10_000])).unwrap();
    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(events[1].starts_with("failed"));
    assert!(handler.errors.lock().is_empty());
    assert!(session.lock().unwrap().ui(ui_id).is_some());
}

#[test]
fn a_failing_receiver_stream_reaches_the_error_handler() {
    let session = session();
    let receiver = Receiver {
        full_disk: true,
        ..Receiver::default()
    };
    let events = receiver.events.clone();
    let (ui_id, f, path) = register(&session, receiver);
    let handler = RecordingHandler::default();
    session
        .lock()
        .unwrap()
        .set_error_handler(Arc::new(handler.clone()));

    let response = upload(&session, &path, multipart("a.txt", b"data")).unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), Some("text/html"));

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], "started a.txt text/plain");
    assert!(events[1].starts_with("failed"));
    assert!(events[1].contains("no space left on device"));

    let errors = handler.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("no space left on device"));
    let state = session.lock().unwrap();
    let ui = state.ui(ui_id).unwrap();
    assert!(ui.tracker().stream_variable(f.field, "file").is_some());
}

#[test]
fn progress_is_reported_per_chunk() {
    let session = session();
    let receiver = Receiver {
        progress: true,
        ..Receiver::default()
    };
    let events = receiver.events.clone();
    let (_, _, path) = register(&session, receiver);

    upload(&session, &path, multipart("a.txt", &[1u8; 5000])).unwrap();
    let events = events.lock();
    assert_eq!(events[1], "progress 4096");
    assert_eq!(events[2], "progress 5000");
    assert_eq!(events[3], "finished 5000");
}

#[test]
fn multipart_content_stops_at_the_boundary() {
    let body = b"abc\r\n--bo\r\n--boundX\r\n--boundary--\r\n";
    let mut content = Vec::new();
    MultipartInputStream::new(&body[..], "boundary")
        .read_to_end(&mut content)
        .unwrap();
    assert_eq!(content, b"abc\r\n--bo\r\n--boundX".to_vec());

    let truncated = b"abc\r\n--boun";
    let mut content = Vec::new();
    let result = MultipartInputStream::new(&truncated[..], "boundary").read_to_end(&mut content);
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
}

#[test]
fn multipart_headers_name_the_file() {
    let body = multipart("/home/user/photo.png", b"PNG");
    let mut reader = io::BufReader::new(&body[..]);
    let headers = read_multipart_headers(&mut reader).unwrap();
    assert_eq!(headers.filename, "photo.png");
    assert_eq!(headers.mime_type, "text/plain");

    let mut rest = String::new();
    reader.read_to_string(&mut rest).unwrap();
    assert!(rest.starts_with("PNG\r\n--"));
}

#[test]
fn boundaries_and_paths_are_parsed() {
    assert_eq!(
        multipart_boundary("multipart/form-data; boundary=\"abc\"; charset=UTF-8"),
        Some("abc")
    );
    assert_eq!(multipart_boundary("text/plain; boundary=abc"), None);
    assert_eq!(multipart_boundary("multipart/form-data"), None);
    assert_eq!(remove_path("C:\\a\\b.txt"), "b.txt");
    assert_eq!(remove_path("plain.txt"), "plain.txt");
}
