//! High-level client API.

use crate::auth::login_text;
use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::error::ClientError;
use crate::session::Session;
use bytes::{BufMut, BytesMut};
use rserve_protocol::message::{bytes_param_size, sexp_param_size, text_param_size};
use rserve_protocol::{dt, Command, Message, MessageBuilder, ParamHeader, Rexp, RESP_OK};

/// Length of a detached session's key.
const SESSION_KEY_SIZE: usize = 32;

/// High-level client for Rserve.
#[derive(Debug)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
        }
    }

    /// Creates a client that resumes `session` on [`Client::connect`].
    pub fn resume(session: &Session) -> Self {
        Self::resume_with_config(session.connection_config(), session)
    }

    /// Like [`Client::resume`], with explicit socket settings. The endpoint
    /// of `config` is replaced by the session's.
    pub fn resume_with_config(mut config: ConnectionConfig, session: &Session) -> Self {
        config.endpoint = session.connection_config().endpoint;
        Self {
            conn: Connection::resuming(config, session.key),
        }
    }

    /// Connects to the server.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.conn.connect()
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Closes the connection.
    pub fn disconnect(&mut self) {
        self.conn.disconnect()
    }

    /// Returns the underlying connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn command(&mut self, cmd: Command) -> Result<(), ClientError> {
        self.conn.request(&Message::empty(cmd))?;
        Ok(())
    }

    fn text_command(&mut self, cmd: Command, text: &str) -> Result<(), ClientError> {
        self.conn.request(&Message::text(cmd, text))?;
        Ok(())
    }

    fn optional_text(cmd: Command, text: Option<&str>) -> Message {
        match text {
            Some(text) => Message::text(cmd, text),
            None => Message::empty(cmd),
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Logs in if the server asked for it; otherwise does nothing.
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), ClientError> {
        let auth = self.conn.auth();
        if !auth.required() {
            return Ok(());
        }
        let text = login_text(user, password, auth, self.conn.salt())?;
        tracing::debug!("Logging in as {}", user);
        self.text_command(Command::Login, &text)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluates `expr`, discarding the result.
    pub fn void_eval(&mut self, expr: &str) -> Result<(), ClientError> {
        self.text_command(Command::VoidEval, expr)
    }

    /// Evaluates `expr` and returns the result.
    pub fn eval(&mut self, expr: &str) -> Result<Rexp, ClientError> {
        let reply = self.conn.request(&Message::text(Command::Eval, expr))?;
        match reply.params() {
            [param] if param.type_code == dt::SEXP => {}
            _ => return Err(ClientError::ResponseNotSexp),
        }
        reply.param_sexp(0)?.ok_or(ClientError::ResponseNotSexp)
    }

    /// Binds `value` to the symbol `name` in the server's global
    /// environment.
    pub fn assign(&mut self, name: &str, value: &Rexp) -> Result<(), ClientError> {
        self.conn.request(&assign_message(name, value))?;
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Detaches the session, optionally evaluating `expr` first, and
    /// returns what is needed to resume it. The connection accepts no
    /// further requests afterwards.
    pub fn detached_eval(&mut self, expr: Option<&str>) -> Result<Session, ClientError> {
        let msg = Self::optional_text(Command::DetachedVoidEval, expr);
        let reply = self.conn.request(&msg)?;
        let session = parse_session(&reply, self.conn.config().host())?;
        tracing::debug!("Detached session, resume on port {}", session.port);
        self.conn.mark_detached();
        Ok(session)
    }

    /// Detaches the session without evaluating anything.
    pub fn detach(&mut self) -> Result<Session, ClientError> {
        self.detached_eval(None)
    }

    /// Asks the server to shut down, authenticating with `key` when given.
    pub fn shutdown(&mut self, key: Option<&str>) -> Result<(), ClientError> {
        self.conn
            .request(&Self::optional_text(Command::Shutdown, key))?;
        Ok(())
    }

    // =========================================================================
    // File operations
    // =========================================================================

    /// Opens a file on the server for reading.
    pub fn open_file(&mut self, name: &str) -> Result<(), ClientError> {
        self.text_command(Command::OpenFile, name)
    }

    /// Creates (or truncates) a file on the server for writing.
    pub fn create_file(&mut self, name: &str) -> Result<(), ClientError> {
        self.text_command(Command::CreateFile, name)
    }

    /// Reads up to `buf.len()` bytes from the open file. Returns the number
    /// of bytes read; 0 at end of file.
    pub fn read_file(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        let want = i32::try_from(buf.len()).unwrap_or(i32::MAX);
        let reply = self
            .conn
            .request_unframed(&Message::int(Command::ReadFile, want))?;
        let data = reply.payload();
        if data.len() > buf.len() {
            return Err(ClientError::MalformedPacket(format!(
                "server returned {} bytes for a {}-byte read",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Writes `data` to the open file.
    pub fn write_file(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.conn.request(&write_file_message(data))?;
        Ok(())
    }

    /// Closes the open file.
    pub fn close_file(&mut self) -> Result<(), ClientError> {
        self.command(Command::CloseFile)
    }

    /// Deletes a file on the server.
    pub fn remove_file(&mut self, name: &str) -> Result<(), ClientError> {
        self.text_command(Command::RemoveFile, name)
    }

    // =========================================================================
    // Server control
    // =========================================================================

    /// Evaluates `expr` in the server's main process.
    pub fn server_eval(&mut self, expr: &str) -> Result<(), ClientError> {
        self.text_command(Command::CtrlEval, expr)
    }

    /// Sources the R file at `path` in the server's main process.
    pub fn server_source(&mut self, path: &str) -> Result<(), ClientError> {
        self.text_command(Command::CtrlSource, path)
    }

    /// Shuts the server down through the control channel.
    pub fn server_shutdown(&mut self) -> Result<(), ClientError> {
        self.command(Command::CtrlShutdown)
    }

    /// Issues the site-specific status command. Returns whether the server
    /// answered with a plain OK; an error reply is returned as
    /// [`ClientError::ServerError`].
    pub fn query_custom_status(&mut self) -> Result<bool, ClientError> {
        let reply = self
            .conn
            .request(&Message::text(Command::CustomStatus, ""))?;
        Ok(reply.command() == RESP_OK)
    }
}

/// `CMD_setSEXP` with the symbol name and the value.
fn assign_message(name: &str, value: &Rexp) -> Message {
    let capacity = text_param_size(name) + sexp_param_size(value);
    MessageBuilder::with_capacity(Command::SetSexp, capacity)
        .string(name)
        .sexp(value)
        .build()
}

/// `CMD_writeFile` with an unpadded bytestream; the server writes exactly
/// the announced length.
fn write_file_message(data: &[u8]) -> Message {
    let mut buf = BytesMut::with_capacity(bytes_param_size(data.len()));
    ParamHeader::new(dt::BYTESTREAM, data.len()).put(&mut buf);
    buf.put_slice(data);
    Message::raw(Command::WriteFile, buf.freeze())
}

/// Port and key from a detach reply.
fn parse_session(reply: &Message, host: &str) -> Result<Session, ClientError> {
    let shape_ok = matches!(
        reply.params(),
        [port, key] if port.type_code == dt::INT
            && port.len() == 4
            && key.type_code == dt::BYTESTREAM
            && key.len() == SESSION_KEY_SIZE
    );
    if !shape_ok {
        return Err(ClientError::MalformedPacket(format!(
            "detach reply must carry a port and a {}-byte key",
            SESSION_KEY_SIZE
        )));
    }
    let port = reply
        .param_int(0)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ClientError::MalformedPacket("detach reply port out of range".into()))?;
    let key = reply
        .param_content(1)
        .and_then(|k| <[u8; SESSION_KEY_SIZE]>::try_from(k).ok())
        .ok_or_else(|| ClientError::MalformedPacket("detach reply key missing".into()))?;
    Ok(Session::new(host, port, key))
}
