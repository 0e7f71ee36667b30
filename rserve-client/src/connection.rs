//! Connection management.
//!
//! A [`Connection`] owns one transport and drives the QAP1 state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking     -> Ready -> Disconnected
//!                            -> ResumingSession -> Ready
//! ```
//!
//! Any transport failure tears the connection down; there is no automatic
//! reconnection.

use crate::error::ClientError;
use crate::transport::{Endpoint, SocketOptions, Transport};
use rserve_protocol::codec::read_full;
use rserve_protocol::handshake::DEFAULT_SALT;
use rserve_protocol::{
    read_message, write_message, AuthMethods, IdString, Message, ServerErrorCode, DEFAULT_PORT,
    ID_STRING_SIZE,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Port value selecting a local socket in [`ConnectionConfig::new`].
pub const LOCAL_SOCKET_PORT: i32 = -1;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server endpoint.
    pub endpoint: Endpoint,
    /// Connection timeout (TCP only). `None` blocks until the OS gives up.
    pub connect_timeout: Option<Duration>,
    /// Socket read timeout.
    pub read_timeout: Option<Duration>,
    /// Socket write timeout.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl ConnectionConfig {
    /// Host and port; a port of [`LOCAL_SOCKET_PORT`] treats `host` as the
    /// path of a local socket.
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        let host = host.into();
        match u16::try_from(port) {
            Ok(port) => Self::tcp(host, port),
            Err(_) => Self::local(host),
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_endpoint(Endpoint::Tcp {
            host: host.into(),
            port,
        })
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::with_endpoint(Endpoint::Local(path.into()))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: None,
            write_timeout: None,
            nodelay: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Host name to pair with a detached session's port.
    pub fn host(&self) -> &str {
        match &self.endpoint {
            Endpoint::Tcp { host, .. } => host,
            Endpoint::Local(_) => "127.0.0.1",
        }
    }

    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            nodelay: self.nodelay,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::tcp("127.0.0.1", DEFAULT_PORT)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    ResumingSession,
    Ready,
    /// The server moved the session aside; the socket is still open but
    /// accepts no further requests.
    Detached,
}

/// A blocking connection to one Rserve instance.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    transport: Option<Transport>,
    state: ConnectionState,
    id: Option<IdString>,
    session_key: Option<[u8; 32]>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: None,
            state: ConnectionState::Disconnected,
            id: None,
            session_key: None,
        }
    }

    /// A connection that resumes a detached session instead of performing
    /// the ID handshake.
    pub fn resuming(config: ConnectionConfig, key: [u8; 32]) -> Self {
        let mut conn = Self::new(config);
        conn.session_key = Some(key);
        conn
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Parsed identification string (fresh connections only).
    pub fn id(&self) -> Option<&IdString> {
        self.id.as_ref()
    }

    /// Login methods the server requires.
    pub fn auth(&self) -> AuthMethods {
        self.id.as_ref().map(|id| id.auth).unwrap_or_default()
    }

    /// Salt for crypt logins.
    pub fn salt(&self) -> [u8; 2] {
        self.id.as_ref().map_or(DEFAULT_SALT, |id| id.salt)
    }

    /// Server protocol version, e.g. "0103".
    pub fn server_version(&self) -> Option<String> {
        self.id.as_ref().map(IdString::version_str)
    }

    /// Opens the transport and performs the handshake (or session resume).
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.transport.is_some() {
            self.disconnect();
        }
        tracing::debug!("Connecting to {}...", self.config.endpoint);
        self.state = ConnectionState::Connecting;
        let transport = match Transport::open(&self.config.endpoint, &self.config.socket_options()) {
            Ok(t) => t,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        self.transport = Some(transport);

        let result = match self.session_key {
            Some(key) => self.resume_session(&key),
            None => self.handshake(),
        };
        match result {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                tracing::debug!("Connected to {}", self.config.endpoint);
                Ok(())
            }
            Err(e) => {
                self.teardown(&e);
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<(), ClientError> {
        self.state = ConnectionState::Handshaking;
        let transport = self.transport.as_mut().ok_or(ClientError::NotConnected)?;
        let mut raw = [0u8; ID_STRING_SIZE];
        let n = read_full(transport, &mut raw)
            .map_err(|e| ClientError::HandshakeFailed(e.to_string()))?;
        if n < ID_STRING_SIZE {
            return Err(ClientError::HandshakeFailed(format!(
                "ID string truncated: got {} of {} bytes",
                n, ID_STRING_SIZE
            )));
        }
        let id = IdString::parse(&raw);
        tracing::debug!(
            "Server ID {} version {} auth {:?}",
            String::from_utf8_lossy(&id.family),
            id.version_str(),
            id.auth
        );
        id.check()?;
        self.id = Some(id);
        Ok(())
    }

    fn resume_session(&mut self, key: &[u8; 32]) -> Result<(), ClientError> {
        self.state = ConnectionState::ResumingSession;
        let transport = self.transport.as_mut().ok_or(ClientError::NotConnected)?;
        transport
            .write_all(key)
            .and_then(|_| transport.flush())
            .map_err(|e| ClientError::HandshakeFailed(format!("sending session key: {}", e)))?;
        let reply = read_message(transport)?;
        if reply.is_error() {
            return Err(ClientError::ServerError(ServerErrorCode::from(reply.status())));
        }
        tracing::debug!("Resumed session on {}", self.config.endpoint);
        Ok(())
    }

    /// Sends `msg` and reads exactly one reply.
    ///
    /// Transport and framing failures close the connection. A reply with
    /// the error bit set becomes [`ClientError::ServerError`] and leaves the
    /// connection usable.
    pub fn request(&mut self, msg: &Message) -> Result<Message, ClientError> {
        let reply = self.request_unframed(msg)?;
        if !reply.is_index_complete() {
            let err = ClientError::MalformedPacket(format!(
                "parameters do not fill the {}-byte payload",
                reply.payload_len()
            ));
            self.teardown(&err);
            return Err(err);
        }
        Ok(reply)
    }

    /// Like [`Connection::request`], for replies whose payload is raw data
    /// rather than a parameter list.
    pub fn request_unframed(&mut self, msg: &Message) -> Result<Message, ClientError> {
        if self.state != ConnectionState::Ready {
            return Err(ClientError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(ClientError::NotConnected)?;
        tracing::debug!(
            "request cmd={:#05x} len={}",
            msg.command(),
            msg.payload_len()
        );

        let reply = match write_message(transport, msg).and_then(|_| read_message(transport)) {
            Ok(reply) => reply,
            Err(e) => {
                let err = ClientError::from(e);
                self.teardown(&err);
                return Err(err);
            }
        };
        if reply.is_error() {
            let status = ServerErrorCode::from(reply.status());
            tracing::debug!("server error: {}", status);
            return Err(ClientError::ServerError(status));
        }
        Ok(reply)
    }

    /// Marks the connection as handed over to a detached session.
    pub(crate) fn mark_detached(&mut self) {
        self.state = ConnectionState::Detached;
    }

    /// Closes the transport. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            tracing::debug!("Disconnecting from {}", self.config.endpoint);
            transport.close();
        }
        self.state = ConnectionState::Disconnected;
    }

    fn teardown(&mut self, err: &ClientError) {
        tracing::warn!("Closing connection to {}: {}", self.config.endpoint, err);
        self.disconnect();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{id_string, plain_id, MockServer};
    use rserve_protocol::{Command, MessageHeader, Rexp, RESP_OK};
    use std::net::TcpListener;

    fn connect(server: &MockServer) -> Connection {
        let mut conn = Connection::new(server.config());
        conn.connect().unwrap();
        conn
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(
            config.endpoint,
            Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 6311
            }
        );
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert!(config.nodelay);
    }

    #[test]
    fn test_config_local_sentinel() {
        let config = ConnectionConfig::new("/var/run/rserve.sock", LOCAL_SOCKET_PORT);
        assert_eq!(
            config.endpoint,
            Endpoint::Local(PathBuf::from("/var/run/rserve.sock"))
        );
        assert_eq!(config.host(), "127.0.0.1");

        let config = ConnectionConfig::new("example.org", 6312)
            .with_read_timeout(Some(Duration::from_secs(3)))
            .with_nodelay(false);
        assert_eq!(config.host(), "example.org");
        assert_eq!(config.read_timeout, Some(Duration::from_secs(3)));
        assert!(!config.nodelay);
    }

    #[test]
    fn test_handshake_plain_server() {
        let server = MockServer::start(|mut peer| peer.send_id(&plain_id()));
        let conn = connect(&server);
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(!conn.auth().required());
        assert_eq!(conn.salt(), *b"..");
        assert_eq!(conn.server_version().as_deref(), Some("0103"));
        server.join();
    }

    #[test]
    fn test_handshake_auth_tokens() {
        let server =
            MockServer::start(|mut peer| peer.send_id(&id_string("Rsrv0103QAP1\r\n\r\nARptKxy-")));
        let conn = connect(&server);
        assert!(conn.auth().plain);
        assert!(!conn.auth().crypt);
        assert_eq!(conn.salt(), *b"xy");
        server.join();
    }

    #[test]
    fn test_handshake_invalid_id() {
        let server = MockServer::start(|mut peer| peer.send_id(&id_string("HTTP/1.1 200 OK")));
        let mut conn = Connection::new(server.config());
        let err = conn.connect().unwrap_err();
        assert_eq!(err.code(), -3);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.join();
    }

    #[test]
    fn test_handshake_newer_version() {
        let server = MockServer::start(|mut peer| peer.send_id(&id_string("Rsrv0104QAP1")));
        let mut conn = Connection::new(server.config());
        let err = conn.connect().unwrap_err();
        assert_eq!(err.code(), -4);
        assert!(!conn.is_connected());
        server.join();
    }

    #[test]
    fn test_handshake_truncated_id() {
        let server = MockServer::start(|mut peer| peer.send_raw(b"Rsrv0103QA"));
        let mut conn = Connection::new(server.config());
        let err = conn.connect().unwrap_err();
        assert!(matches!(err, ClientError::HandshakeFailed(_)));
        assert_eq!(err.code(), -2);
        server.join();
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut conn = Connection::new(ConnectionConfig::tcp("127.0.0.1", port));
        let err = conn.connect().unwrap_err();
        assert_eq!(err.code(), -1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_request_before_connect() {
        let mut conn = Connection::new(ConnectionConfig::default());
        let err = conn.request(&Message::empty(Command::CloseFile)).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn test_request_roundtrip() {
        let server = MockServer::serve(plain_id(), |peer, request| {
            assert_eq!(request.command(), Command::Eval.code());
            assert_eq!(request.param_str(0).unwrap(), Some("1+1"));
            peer.reply_sexp(&Rexp::doubles(&[2.0]));
        });
        let mut conn = connect(&server);
        let reply = conn.request(&Message::text(Command::Eval, "1+1")).unwrap();
        assert!(reply.is_ok());
        let value = reply.param_sexp(0).unwrap().unwrap();
        assert_eq!(value.root().doubles(), Some(vec![2.0]));
        conn.disconnect();
        server.join();
    }

    #[test]
    fn test_short_payload_closes_connection() {
        let server = MockServer::start(|mut peer| {
            peer.send_id(&plain_id());
            let _ = peer.read_request();
            peer.send_raw(&MessageHeader::new(RESP_OK, 100).encode());
            peer.send_raw(&[0u8; 10]);
        });
        let mut conn = connect(&server);
        let err = conn.request(&Message::text(Command::Eval, "x")).unwrap_err();
        assert_eq!(err.code(), -8);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let err = conn.request(&Message::text(Command::Eval, "x")).unwrap_err();
        assert_eq!(err.code(), -5);
        server.join();
    }

    #[test]
    fn test_peer_closed_before_reply() {
        let server = MockServer::start(|mut peer| {
            peer.send_id(&plain_id());
            let _ = peer.read_request();
        });
        let mut conn = connect(&server);
        let err = conn.request(&Message::empty(Command::CloseFile)).unwrap_err();
        assert!(matches!(err, ClientError::PeerClosed));
        assert!(!conn.is_connected());
        server.join();
    }

    #[test]
    fn test_unframed_parameters_close_connection() {
        let server = MockServer::start(|mut peer| {
            peer.send_id(&plain_id());
            let _ = peer.read_request();
            // one DT_INT claiming 8 bytes inside a 6-byte payload
            peer.reply(RESP_OK, &[1, 8, 0, 0, 0, 0]);
        });
        let mut conn = connect(&server);
        let err = conn.request(&Message::empty(Command::CloseFile)).unwrap_err();
        assert!(matches!(err, ClientError::MalformedPacket(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.join();
    }

    #[test]
    fn test_server_error_keeps_connection() {
        let server = MockServer::serve(plain_id(), |peer, _| peer.reply_error(0x45));
        let mut conn = connect(&server);
        let err = conn.request(&Message::text(Command::VoidEval, "stop()")).unwrap_err();
        assert_eq!(err.server_status(), Some(ServerErrorCode::REvaluation));
        assert_eq!(err.code(), -13);
        assert!(conn.is_connected());

        let err = conn.request(&Message::text(Command::VoidEval, "stop()")).unwrap_err();
        assert_eq!(err.server_status(), Some(ServerErrorCode::REvaluation));
        conn.disconnect();
        server.join();
    }

    #[test]
    fn test_disconnect_idempotent() {
        let server = MockServer::start(|mut peer| peer.send_id(&plain_id()));
        let mut conn = connect(&server);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.join();
    }

    #[test]
    fn test_resume_sends_key() {
        let key = [0x5a; 32];
        let server = MockServer::start(move |mut peer| {
            assert_eq!(peer.read_key(), key);
            peer.reply_ok();
        });
        let mut conn = Connection::resuming(server.config(), key);
        conn.connect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(conn.id().is_none());
        server.join();
    }

    #[test]
    fn test_resume_rejected() {
        let server = MockServer::start(|mut peer| {
            let _ = peer.read_key();
            peer.reply_error(0x51);
        });
        let mut conn = Connection::resuming(server.config(), [1; 32]);
        let err = conn.connect().unwrap_err();
        assert_eq!(err.server_status(), Some(ServerErrorCode::DetachFailed));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.join();
    }

    #[test]
    fn test_detached_refuses_requests() {
        let server = MockServer::start(|mut peer| peer.send_id(&plain_id()));
        let mut conn = connect(&server);
        conn.mark_detached();
        let err = conn.request(&Message::empty(Command::CloseFile)).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        server.join();
    }
}
