//! QAP1 messages: a header plus a payload of length-prefixed parameters.

use crate::command::{cmd_status, Command, CMD_RESP, RESP_ERR, RESP_OK};
use crate::error::ProtocolError;
use crate::frame::{align4, dt, MessageHeader, ParamHeader};
use crate::sexp::Rexp;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ops::Range;

/// One entry of a message's parameter index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter type tag (`DT_*`, without flags).
    pub type_code: u8,
    /// Whether the large-length extension was used.
    pub large: bool,
    /// Offset of the parameter header within the payload.
    pub offset: usize,
    /// Content bytes within the payload.
    pub content: Range<usize>,
}

impl Param {
    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A complete QAP1 message.
#[derive(Debug, Clone)]
pub struct Message {
    header: MessageHeader,
    payload: Bytes,
    params: Vec<Param>,
    index_complete: bool,
}

impl Message {
    /// Creates a message from a header and payload, indexing its parameters.
    pub fn from_parts(header: MessageHeader, payload: Bytes) -> Self {
        let (params, index_complete) = index_params(&payload);
        Self {
            header,
            payload,
            params,
            index_complete,
        }
    }

    /// A message without payload.
    pub fn empty(cmd: Command) -> Self {
        Self::from_parts(MessageHeader::new(cmd.code(), 0), Bytes::new())
    }

    /// A message carrying one NUL-terminated, 4-byte aligned `DT_STRING`.
    pub fn text(cmd: Command, text: &str) -> Self {
        MessageBuilder::with_capacity(cmd, text_param_size(text))
            .string(text)
            .build()
    }

    /// A message carrying a single `DT_INT`.
    pub fn int(cmd: Command, value: i32) -> Self {
        MessageBuilder::with_capacity(cmd, 8).int(value).build()
    }

    /// A message carrying `data` wrapped in a `DT_BYTESTREAM` parameter.
    pub fn bytes(cmd: Command, data: &[u8]) -> Self {
        MessageBuilder::with_capacity(cmd, bytes_param_size(data.len()))
            .bytes(data)
            .build()
    }

    /// A message whose payload is sent verbatim (already framed parameters).
    pub fn raw(cmd: Command, payload: Bytes) -> Self {
        let header = MessageHeader::new(cmd.code(), payload.len() as u32);
        Self::from_parts(header, payload)
    }

    /// Starts building a message with several parameters.
    pub fn builder(cmd: Command) -> MessageBuilder {
        MessageBuilder::with_capacity(cmd, 0)
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// The command word (request command or response code).
    pub fn command(&self) -> u32 {
        self.header.command
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Parameter index built when the message was created or read.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Whether the parameter index covers the whole payload.
    pub fn is_index_complete(&self) -> bool {
        self.index_complete
    }

    /// Content bytes of parameter `index`.
    pub fn param_content(&self, index: usize) -> Option<&[u8]> {
        self.params
            .get(index)
            .map(|p| &self.payload[p.content.clone()])
    }

    /// Reads parameter `index` as a `DT_INT`.
    pub fn param_int(&self, index: usize) -> Option<i32> {
        let p = self.params.get(index)?;
        if p.type_code != dt::INT || p.len() < 4 {
            return None;
        }
        Some((&self.payload[p.content.start..p.content.start + 4]).get_i32_le())
    }

    /// Reads parameter `index` as a `DT_STRING` (up to the first NUL).
    pub fn param_str(&self, index: usize) -> Result<Option<&str>, ProtocolError> {
        let Some(p) = self.params.get(index) else {
            return Ok(None);
        };
        if p.type_code != dt::STRING {
            return Ok(None);
        }
        let content = &self.payload[p.content.clone()];
        let end = content.iter().position(|&b| b == 0).unwrap_or(content.len());
        std::str::from_utf8(&content[..end])
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Decodes parameter `index` as an encoded SEXP.
    pub fn param_sexp(&self, index: usize) -> Result<Option<Rexp>, ProtocolError> {
        match self.params.get(index) {
            Some(p) if p.type_code == dt::SEXP => {
                Rexp::parse(self.payload.clone(), p.content.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn is_response(&self) -> bool {
        self.header.command & CMD_RESP != 0
    }

    pub fn is_ok(&self) -> bool {
        self.header.command & RESP_OK == RESP_OK && !self.is_error()
    }

    pub fn is_error(&self) -> bool {
        self.header.command & RESP_ERR == RESP_ERR
    }

    /// Server status carried in bits 24..31 of a response.
    pub fn status(&self) -> u8 {
        cmd_status(self.header.command)
    }
}

/// Assembles a payload of several parameters into one buffer.
#[derive(Debug)]
pub struct MessageBuilder {
    command: u32,
    buf: BytesMut,
}

impl MessageBuilder {
    /// Creates a builder whose buffer is pre-sized to `capacity` bytes.
    pub fn with_capacity(cmd: Command, capacity: usize) -> Self {
        Self {
            command: cmd.code(),
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends a `DT_STRING` parameter.
    pub fn string(mut self, text: &str) -> Self {
        let padded = align4(text.len() + 1);
        ParamHeader::new(dt::STRING, padded).put(&mut self.buf);
        self.buf.put_slice(text.as_bytes());
        self.buf.put_bytes(0, padded - text.len());
        self
    }

    /// Appends a `DT_INT` parameter.
    pub fn int(mut self, value: i32) -> Self {
        ParamHeader::new(dt::INT, 4).put(&mut self.buf);
        self.buf.put_i32_le(value);
        self
    }

    /// Appends a `DT_BYTESTREAM` parameter, zero-padded to 4 bytes.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        let padded = align4(data.len());
        ParamHeader::new(dt::BYTESTREAM, padded).put(&mut self.buf);
        self.buf.put_slice(data);
        self.buf.put_bytes(0, padded - data.len());
        self
    }

    /// Appends a `DT_SEXP` parameter; its length comes from the value itself.
    pub fn sexp(mut self, value: &Rexp) -> Self {
        let size = value.storage_size();
        ParamHeader::new(dt::SEXP, size).put(&mut self.buf);
        value.store(&mut self.buf);
        self
    }

    pub fn build(self) -> Message {
        let payload = self.buf.freeze();
        let header = MessageHeader::new(self.command, payload.len() as u32);
        Message::from_parts(header, payload)
    }
}

/// Bytes occupied by a `DT_STRING` parameter for `text`.
pub fn text_param_size(text: &str) -> usize {
    let padded = align4(text.len() + 1);
    ParamHeader::size_for(padded) + padded
}

/// Bytes occupied by a `DT_BYTESTREAM` parameter of `len` bytes.
pub fn bytes_param_size(len: usize) -> usize {
    let padded = align4(len);
    ParamHeader::size_for(padded) + padded
}

/// Bytes occupied by a `DT_SEXP` parameter holding `value`.
pub fn sexp_param_size(value: &Rexp) -> usize {
    let size = value.storage_size();
    ParamHeader::size_for(size) + size
}

/// Walks `payload` parameter by parameter. Stops at the first header that
/// does not fit; the flag reports whether the walk reached the end exactly.
fn index_params(payload: &[u8]) -> (Vec<Param>, bool) {
    let mut params = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let header = match ParamHeader::read(payload, offset, payload.len()) {
            Ok(h) => h,
            Err(_) => return (params, false),
        };
        let start = offset + header.encoded_len();
        let end = match usize::try_from(header.length)
            .ok()
            .and_then(|len| start.checked_add(len))
        {
            Some(end) if end <= payload.len() => end,
            _ => return (params, false),
        };
        params.push(Param {
            type_code: header.type_code,
            large: header.large,
            offset,
            content: start..end,
        });
        offset = end;
    }
    (params, true)
}
