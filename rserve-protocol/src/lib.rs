//! # rserve-protocol
//!
//! Wire protocol for Rserve (QAP1).
//!
//! This crate provides:
//! - Message framing: 16-byte header plus length-prefixed parameters
//! - Blocking message reader and writer over any `Read`/`Write`
//! - SEXP decoding into a shared-buffer node arena, and SEXP construction
//! - Parsing of the server identification string
//! - Command codes and server status codes

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod sexp;

pub use codec::{read_message, write_message};
pub use command::{cmd_status, Command, CMD_RESP, RESP_ERR, RESP_OK};
pub use error::{ProtocolError, ServerErrorCode};
pub use frame::{dt, xt, MessageHeader, ParamHeader, MAX_SHORT_LENGTH, MESSAGE_HEADER_SIZE};
pub use handshake::{AuthMethods, IdString, CLIENT_ID, ID_STRING_SIZE};
pub use message::{Message, MessageBuilder, Param};
pub use sexp::{ListEncoding, Rexp, Sexp, SexpKind};

/// Default Rserve TCP port.
pub const DEFAULT_PORT: u16 = 6311;
