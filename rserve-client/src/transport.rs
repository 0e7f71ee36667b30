//! Byte streams to an Rserve instance: TCP or a local (Unix-domain) socket.

use crate::error::ClientError;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    /// Unix-domain socket path.
    Local(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Local(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Socket options applied when opening a transport.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SocketOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub nodelay: bool,
}

/// An open stream.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Opens a stream to `endpoint`.
    pub(crate) fn open(endpoint: &Endpoint, opts: &SocketOptions) -> Result<Self, ClientError> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, opts.connect_timeout)
                    .map_err(ClientError::ConnectFailed)?;
                stream
                    .set_nodelay(opts.nodelay)
                    .and_then(|_| stream.set_read_timeout(opts.read_timeout))
                    .and_then(|_| stream.set_write_timeout(opts.write_timeout))
                    .map_err(ClientError::ConnectFailed)?;
                Ok(Transport::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Local(path) => {
                let stream = UnixStream::connect(path).map_err(ClientError::ConnectFailed)?;
                stream
                    .set_read_timeout(opts.read_timeout)
                    .and_then(|_| stream.set_write_timeout(opts.write_timeout))
                    .map_err(ClientError::ConnectFailed)?;
                Ok(Transport::Unix(stream))
            }
            #[cfg(not(unix))]
            Endpoint::Local(_) => Err(ClientError::Unsupported("local sockets")),
        }
    }

    /// Shuts down both directions. Errors are ignored; the peer may
    /// already be gone.
    pub(crate) fn close(&self) {
        let _ = match self {
            Transport::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port));
    };
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", host),
        )
    }))
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Transport::Unix(s) => s.flush(),
        }
    }
}
