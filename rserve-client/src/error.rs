//! Client error types.
//!
//! Every error maps to a signed status code through [`ClientError::code`];
//! zero is reserved for success (see [`status_code`]).

use rserve_protocol::{ProtocolError, ServerErrorCode};
use std::io;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("invalid ID string: server family {0:?} is not Rsrv")]
    InvalidId(String),

    #[error("protocol not supported: version {version}, transport {transport}")]
    ProtocolNotSupported { version: String, transport: String },

    #[error("not connected")]
    NotConnected,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("send error: {0}")]
    Send(#[source] io::Error),

    #[error("out of memory: cannot allocate {0} bytes")]
    OutOfMemory(usize),

    #[error("operation unsupported: {0}")]
    Unsupported(&'static str),

    #[error("response does not contain a SEXP")]
    ResponseNotSexp,

    #[error("server error: {0}")]
    ServerError(ServerErrorCode),

    #[error("authentication method required by the server is not supported")]
    AuthUnsupported,
}

impl ClientError {
    /// Signed status code for this error (always negative).
    pub fn code(&self) -> i32 {
        match self {
            ClientError::ConnectFailed(_) => -1,
            ClientError::HandshakeFailed(_) => -2,
            ClientError::InvalidId(_) => -3,
            ClientError::ProtocolNotSupported { .. } => -4,
            ClientError::NotConnected => -5,
            ClientError::PeerClosed => -7,
            ClientError::MalformedPacket(_) => -8,
            ClientError::Send(_) => -9,
            ClientError::OutOfMemory(_) => -10,
            ClientError::Unsupported(_) => -11,
            ClientError::ResponseNotSexp => -12,
            ClientError::ServerError(_) => -13,
            ClientError::AuthUnsupported => -20,
        }
    }

    /// Whether the error was raised while connecting or moving bytes,
    /// rather than by the content of a delivered reply.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed(_)
                | ClientError::HandshakeFailed(_)
                | ClientError::InvalidId(_)
                | ClientError::ProtocolNotSupported { .. }
                | ClientError::NotConnected
                | ClientError::PeerClosed
                | ClientError::Send(_)
                | ClientError::OutOfMemory(_)
        )
    }

    /// Status reported by the server, if this is a server error.
    pub fn server_status(&self) -> Option<ServerErrorCode> {
        match self {
            ClientError::ServerError(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::PeerClosed => ClientError::PeerClosed,
            ProtocolError::Send(e) => ClientError::Send(e),
            ProtocolError::PayloadTooLarge(n) => ClientError::Send(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds the 32-bit length field", n),
            )),
            ProtocolError::OutOfMemory(n) => ClientError::OutOfMemory(n),
            ProtocolError::InvalidId(family) => {
                ClientError::InvalidId(String::from_utf8_lossy(&family).into_owned())
            }
            ProtocolError::UnsupportedProtocol { version, transport } => {
                ClientError::ProtocolNotSupported { version, transport }
            }
            other @ (ProtocolError::Truncated { .. }
            | ProtocolError::Io(_)
            | ProtocolError::BadParameter { .. }
            | ProtocolError::MalformedSexp { .. }
            | ProtocolError::InvalidUtf8) => ClientError::MalformedPacket(other.to_string()),
        }
    }
}

/// Collapses a result into a signed status: 0 on success, otherwise the
/// error's code.
pub fn status_code<T>(result: &Result<T, ClientError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_negative() {
        let errors = [
            ClientError::ConnectFailed(io::Error::from(io::ErrorKind::ConnectionRefused)),
            ClientError::HandshakeFailed("short".to_string()),
            ClientError::InvalidId("HTTP".to_string()),
            ClientError::ProtocolNotSupported {
                version: "0104".to_string(),
                transport: "QAP1".to_string(),
            },
            ClientError::NotConnected,
            ClientError::PeerClosed,
            ClientError::MalformedPacket("x".to_string()),
            ClientError::Send(io::Error::from(io::ErrorKind::BrokenPipe)),
            ClientError::OutOfMemory(1),
            ClientError::Unsupported("local sockets"),
            ClientError::ResponseNotSexp,
            ClientError::ServerError(ServerErrorCode::REvaluation),
            ClientError::AuthUnsupported,
        ];
        let mut codes: Vec<i32> = errors.iter().map(ClientError::code).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err: ClientError = ProtocolError::PeerClosed.into();
        assert_eq!(err.code(), -7);

        let err: ClientError = ProtocolError::Truncated {
            expected: 100,
            received: 10,
        }
        .into();
        assert_eq!(err.code(), -8);
        assert!(err.to_string().contains("100"));

        let err: ClientError = ProtocolError::Send(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert_eq!(err.code(), -9);

        let err: ClientError = ProtocolError::OutOfMemory(1 << 40).into();
        assert_eq!(err.code(), -10);

        let err: ClientError = ProtocolError::InvalidId(*b"HTTP").into();
        assert_eq!(err.code(), -3);

        let err: ClientError = ProtocolError::MalformedSexp {
            offset: 4,
            reason: "length overruns container",
        }
        .into();
        assert_eq!(err.code(), -8);
        assert!(!err.is_transport());
    }

    #[test]
    fn test_status_code() {
        let ok: Result<(), ClientError> = Ok(());
        assert_eq!(status_code(&ok), 0);
        let err: Result<(), ClientError> = Err(ClientError::ResponseNotSexp);
        assert_eq!(status_code(&err), -12);
    }

    #[test]
    fn test_server_status() {
        let err = ClientError::ServerError(ServerErrorCode::from(0x41));
        assert_eq!(err.server_status(), Some(ServerErrorCode::AuthFailed));
        assert!(err.to_string().contains("AUTH_FAILED"));
        assert!(!err.is_transport());
        assert_eq!(ClientError::NotConnected.server_status(), None);
    }
}
