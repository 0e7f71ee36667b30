//! # rserve-client
//!
//! Blocking client library for Rserve.
//!
//! This crate provides:
//! - TCP and Unix-domain socket transports with connect/read/write timeouts
//! - The connection state machine: ID handshake or detached-session resume
//! - Plaintext and (with the `crypt` feature) DES crypt login
//! - High-level API for evaluation, assignment, file transfer, session
//!   detach and server control
//!
//! ```no_run
//! use rserve_client::{Client, ConnectionConfig};
//!
//! let mut client = Client::new(ConnectionConfig::tcp("localhost", 6311));
//! client.connect()?;
//! let value = client.eval("1+1")?;
//! assert_eq!(value.root().doubles(), Some(vec![2.0]));
//! # Ok::<(), rserve_client::ClientError>(())
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod session;
pub mod transport;

#[cfg(test)]
mod mock;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, ConnectionState, LOCAL_SOCKET_PORT};
pub use error::{status_code, ClientError};
pub use session::Session;
pub use transport::Endpoint;

pub use rserve_protocol::{Rexp, Sexp, SexpKind, ServerErrorCode};
