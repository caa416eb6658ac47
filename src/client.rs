use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};

use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::{Deserializer, Value as Json};

use crate::command::{Reply, Request, Response};
use crate::communication::UI_ID_PARAMETER;
use crate::{Result, UidlError};

/// `UidlClient` talks to a [`UidlServer`](crate::UidlServer) the way a browser talks to
/// its session: it opens a UI and then sends UIDL, heartbeat and upload requests for it.
pub struct UidlClient {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl UidlClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;

        Ok(UidlClient {
            reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
            writer: BufWriter::new(tcp_writer),
        })
    }

    /// Sends any request and waits for its reply.
    ///
    /// # Errors
    /// `Err<UidlError::StringErr>` if the server could not handle the request
    pub fn send(&mut self, req: Request) -> Result<Reply> {
        serde_json::to_writer(&mut self.writer, &req)?;
        self.writer.flush()?;

        match Response::deserialize(&mut self.reader)? {
            Response::Ok(reply) => Ok(reply),
            Response::Err(msg) => Err(UidlError::StringErr(msg)),
        }
    }

    /// Opens a UI, in `session` if the server knows it and in a new session otherwise.
    /// Returns the session id and the id of the UI.
    pub fn init(&mut self, session: Option<String>) -> Result<(String, u32)> {
        let reply = self.send(Request::Init { session })?;
        let body: Json = serde_json::from_str(&reply.body)?;
        let session = body["session"].as_str().map(String::from);
        let ui = body["uiId"].as_u64();
        match (session, ui) {
            (Some(session), Some(ui)) => Ok((session, ui as u32)),
            _ => Err(UidlError::StringErr(format!("malformed init reply: {}", reply.body))),
        }
    }

    /// sends a UIDL request with the given burst payload for a UI
    pub fn uidl(
        &mut self,
        session: &str,
        ui: u32,
        mut parameters: BTreeMap<String, String>,
        payload: String,
    ) -> Result<Reply> {
        parameters.insert(UI_ID_PARAMETER.to_string(), ui.to_string());
        self.send(Request::Uidl {
            session: session.to_string(),
            parameters,
            payload,
        })
    }

    /// sends a heartbeat for a UI, returning the status the server answered with
    pub fn heartbeat(&mut self, session: &str, ui: u32) -> Result<u16> {
        let reply = self.send(Request::Heartbeat {
            session: session.to_string(),
            ui,
        })?;
        Ok(reply.status)
    }

    /// posts `body` to an upload target
    pub fn upload(
        &mut self,
        session: &str,
        path: &str,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Result<Reply> {
        self.send(Request::Upload {
            session: session.to_string(),
            path: path.to_string(),
            content_type,
            body,
        })
    }

    /// invalidates a session
    pub fn close(&mut self, session: &str) -> Result<()> {
        self.send(Request::Close {
            session: session.to_string(),
        })?;
        Ok(())
    }
}
