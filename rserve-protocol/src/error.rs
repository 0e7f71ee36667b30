//! Protocol error types and Rserve status codes.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while framing, reading or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("truncated read: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("malformed parameter at offset {offset}: {reason}")]
    BadParameter { offset: usize, reason: &'static str },

    #[error("malformed SEXP at offset {offset}: {reason}")]
    MalformedSexp { offset: usize, reason: &'static str },

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("cannot allocate {0} bytes for payload")]
    OutOfMemory(usize),

    #[error("invalid ID string: expected family 'Rsrv', got {0:?}")]
    InvalidId([u8; 4]),

    #[error("unsupported protocol: version {version}, transport {transport}")]
    UnsupportedProtocol { version: String, transport: String },

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns whether the stream can no longer be trusted after this error.
    ///
    /// Decoding errors inside a completely read payload leave the stream
    /// aligned on the next message; everything else does not.
    pub fn is_framing(&self) -> bool {
        !matches!(
            self,
            ProtocolError::MalformedSexp { .. }
                | ProtocolError::BadParameter { .. }
                | ProtocolError::InvalidUtf8
        )
    }
}

/// Status codes reported by the server in bits 24..31 of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorCode {
    AuthFailed,
    ConnectionBroken,
    InvalidCommand,
    InvalidParameter,
    REvaluation,
    IoError,
    FileNotOpen,
    AccessDenied,
    UnsupportedCommand,
    UnknownCommand,
    DataOverflow,
    ObjectTooBig,
    OutOfMemory,
    ControlClosed,
    SessionBusy,
    DetachFailed,
    Disabled,
    Unavailable,
    CryptError,
    SecurityClose,
    Other(u8),
}

impl ServerErrorCode {
    /// Returns the raw status value.
    pub fn code(&self) -> u8 {
        match self {
            ServerErrorCode::AuthFailed => 0x41,
            ServerErrorCode::ConnectionBroken => 0x42,
            ServerErrorCode::InvalidCommand => 0x43,
            ServerErrorCode::InvalidParameter => 0x44,
            ServerErrorCode::REvaluation => 0x45,
            ServerErrorCode::IoError => 0x46,
            ServerErrorCode::FileNotOpen => 0x47,
            ServerErrorCode::AccessDenied => 0x48,
            ServerErrorCode::UnsupportedCommand => 0x49,
            ServerErrorCode::UnknownCommand => 0x4a,
            ServerErrorCode::DataOverflow => 0x4b,
            ServerErrorCode::ObjectTooBig => 0x4c,
            ServerErrorCode::OutOfMemory => 0x4d,
            ServerErrorCode::ControlClosed => 0x4e,
            ServerErrorCode::SessionBusy => 0x50,
            ServerErrorCode::DetachFailed => 0x51,
            ServerErrorCode::Disabled => 0x61,
            ServerErrorCode::Unavailable => 0x62,
            ServerErrorCode::CryptError => 0x63,
            ServerErrorCode::SecurityClose => 0x64,
            ServerErrorCode::Other(code) => *code,
        }
    }
}

impl From<u8> for ServerErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0x41 => ServerErrorCode::AuthFailed,
            0x42 => ServerErrorCode::ConnectionBroken,
            0x43 => ServerErrorCode::InvalidCommand,
            0x44 => ServerErrorCode::InvalidParameter,
            0x45 => ServerErrorCode::REvaluation,
            0x46 => ServerErrorCode::IoError,
            0x47 => ServerErrorCode::FileNotOpen,
            0x48 => ServerErrorCode::AccessDenied,
            0x49 => ServerErrorCode::UnsupportedCommand,
            0x4a => ServerErrorCode::UnknownCommand,
            0x4b => ServerErrorCode::DataOverflow,
            0x4c => ServerErrorCode::ObjectTooBig,
            0x4d => ServerErrorCode::OutOfMemory,
            0x4e => ServerErrorCode::ControlClosed,
            0x50 => ServerErrorCode::SessionBusy,
            0x51 => ServerErrorCode::DetachFailed,
            0x61 => ServerErrorCode::Disabled,
            0x62 => ServerErrorCode::Unavailable,
            0x63 => ServerErrorCode::CryptError,
            0x64 => ServerErrorCode::SecurityClose,
            other => ServerErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErrorCode::AuthFailed => write!(f, "AUTH_FAILED"),
            ServerErrorCode::ConnectionBroken => write!(f, "CONN_BROKEN"),
            ServerErrorCode::InvalidCommand => write!(f, "INV_CMD"),
            ServerErrorCode::InvalidParameter => write!(f, "INV_PAR"),
            ServerErrorCode::REvaluation => write!(f, "R_ERROR"),
            ServerErrorCode::IoError => write!(f, "IO_ERROR"),
            ServerErrorCode::FileNotOpen => write!(f, "NOT_OPEN"),
            ServerErrorCode::AccessDenied => write!(f, "ACCESS_DENIED"),
            ServerErrorCode::UnsupportedCommand => write!(f, "UNSUPPORTED_CMD"),
            ServerErrorCode::UnknownCommand => write!(f, "UNKNOWN_CMD"),
            ServerErrorCode::DataOverflow => write!(f, "DATA_OVERFLOW"),
            ServerErrorCode::ObjectTooBig => write!(f, "OBJECT_TOO_BIG"),
            ServerErrorCode::OutOfMemory => write!(f, "OUT_OF_MEM"),
            ServerErrorCode::ControlClosed => write!(f, "CTRL_CLOSED"),
            ServerErrorCode::SessionBusy => write!(f, "SESSION_BUSY"),
            ServerErrorCode::DetachFailed => write!(f, "DETACH_FAILED"),
            ServerErrorCode::Disabled => write!(f, "DISABLED"),
            ServerErrorCode::Unavailable => write!(f, "UNAVAILABLE"),
            ServerErrorCode::CryptError => write!(f, "CRYPT_ERROR"),
            ServerErrorCode::SecurityClose => write!(f, "SECURITY_CLOSE"),
            ServerErrorCode::Other(code) => write!(f, "STATUS_{:#04x}", code),
        }
    }
}
