//! Scripted in-process Rserve for tests.

use crate::connection::ConnectionConfig;
use bytes::{BufMut, BytesMut};
use rserve_protocol::command::error_response;
use rserve_protocol::{
    dt, read_message, write_message, Message, MessageHeader, ParamHeader, Rexp, ID_STRING_SIZE,
    RESP_OK,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Builds an identification string from `text`, padded with '-'.
pub fn id_string(text: &str) -> [u8; ID_STRING_SIZE] {
    let mut raw = [b'-'; ID_STRING_SIZE];
    raw[..text.len()].copy_from_slice(text.as_bytes());
    raw
}

/// Identification string of a server without authentication.
pub fn plain_id() -> [u8; ID_STRING_SIZE] {
    id_string("Rsrv0103QAP1\r\n\r\n")
}

/// One-connection server running `script` on a background thread.
pub struct MockServer {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub fn start<F>(script: F) -> Self
    where
        F: FnOnce(Peer) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            script(Peer { stream });
        });
        Self { port, handle }
    }

    /// Server that greets with `id` and then answers each request with
    /// `respond`, until the client goes away.
    pub fn serve<F>(id: [u8; ID_STRING_SIZE], mut respond: F) -> Self
    where
        F: FnMut(&mut Peer, Message) + Send + 'static,
    {
        Self::start(move |mut peer| {
            peer.send_id(&id);
            while let Some(request) = peer.try_read_request() {
                respond(&mut peer, request);
            }
        })
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::tcp("127.0.0.1", self.port)
            .with_read_timeout(Some(Duration::from_secs(5)))
    }

    /// Waits for the script to finish, propagating its panics.
    pub fn join(self) {
        self.handle.join().unwrap();
    }
}

/// Server side of the accepted connection.
pub struct Peer {
    pub stream: TcpStream,
}

impl Peer {
    pub fn send_id(&mut self, id: &[u8; ID_STRING_SIZE]) {
        self.stream.write_all(id).unwrap();
    }

    pub fn read_request(&mut self) -> Message {
        read_message(&mut self.stream).unwrap()
    }

    pub fn try_read_request(&mut self) -> Option<Message> {
        read_message(&mut self.stream).ok()
    }

    pub fn read_key(&mut self) -> [u8; 32] {
        let mut key = [0u8; 32];
        self.stream.read_exact(&mut key).unwrap();
        key
    }

    /// Writes a header announcing `payload.len()` bytes, then `payload`.
    pub fn reply(&mut self, command: u32, payload: &[u8]) {
        let header = MessageHeader::new(command, payload.len() as u32);
        let msg = Message::from_parts(header, bytes::Bytes::copy_from_slice(payload));
        write_message(&mut self.stream, &msg).unwrap();
    }

    /// Writes raw bytes, whatever they are.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn reply_ok(&mut self) {
        self.reply(RESP_OK, &[]);
    }

    pub fn reply_error(&mut self, status: u8) {
        self.reply(error_response(status), &[]);
    }

    pub fn reply_sexp(&mut self, value: &Rexp) {
        let mut buf = BytesMut::new();
        ParamHeader::new(dt::SEXP, value.storage_size()).put(&mut buf);
        value.store(&mut buf);
        self.reply(RESP_OK, &buf);
    }

    /// Replies with the session a detached evaluation creates.
    pub fn reply_session(&mut self, port: i32, key: &[u8; 32]) {
        let mut buf = BytesMut::new();
        ParamHeader::new(dt::INT, 4).put(&mut buf);
        buf.put_i32_le(port);
        ParamHeader::new(dt::BYTESTREAM, 32).put(&mut buf);
        buf.put_slice(key);
        self.reply(RESP_OK, &buf);
    }
}
