//! Blocking reader and writer for QAP1 messages.
//!
//! Both directions are all-or-nothing: any discrepancy between the requested
//! and the transferred byte count is reported as an error and the stream must
//! not be used again. Nothing here retries or resynchronizes.

use crate::error::ProtocolError;
use crate::frame::{MessageHeader, MESSAGE_HEADER_SIZE};
use crate::message::Message;
use bytes::Bytes;
use std::io::{self, Read, Write};

/// Reads into `buf` until it is full or the peer closes. Returns the number
/// of bytes read.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads one complete message.
///
/// A close before the first header byte is [`ProtocolError::PeerClosed`];
/// any other short read is [`ProtocolError::Truncated`].
pub fn read_message<R: Read + ?Sized>(reader: &mut R) -> Result<Message, ProtocolError> {
    let mut raw = [0u8; MESSAGE_HEADER_SIZE];
    let n = read_full(reader, &mut raw)?;
    if n == 0 {
        return Err(ProtocolError::PeerClosed);
    }
    if n < MESSAGE_HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            expected: MESSAGE_HEADER_SIZE,
            received: n,
        });
    }
    let header = MessageHeader::decode(&raw);
    tracing::trace!(
        "read header cmd={:#x} len={} dof={}",
        header.command,
        header.length,
        header.data_offset
    );

    if header.data_offset > 0 {
        let expected = u64::from(header.data_offset);
        let skipped = io::copy(&mut (&mut *reader).take(expected), &mut io::sink())?;
        if skipped < expected {
            return Err(ProtocolError::Truncated {
                expected: expected as usize,
                received: skipped as usize,
            });
        }
    }

    // Capacity is reserved up front but only filled as bytes arrive
    let len = header.length as usize;
    let mut payload = Vec::new();
    payload
        .try_reserve_exact(len)
        .map_err(|_| ProtocolError::OutOfMemory(len))?;
    let n = (&mut *reader)
        .take(u64::from(header.length))
        .read_to_end(&mut payload)?;
    if n < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            received: n,
        });
    }

    Ok(Message::from_parts(header, Bytes::from(payload)))
}

/// Writes `message` (header, then payload).
pub fn write_message<W: Write + ?Sized>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    let length = u32::try_from(message.payload_len())
        .map_err(|_| ProtocolError::PayloadTooLarge(message.payload_len() as u64))?;
    let mut header = *message.header();
    header.length = length;
    writer
        .write_all(&header.encode())
        .map_err(ProtocolError::Send)?;
    if message.payload_len() > 0 {
        writer
            .write_all(message.payload())
            .map_err(ProtocolError::Send)?;
    }
    writer.flush().map_err(ProtocolError::Send)?;
    tracing::trace!(
        "sent cmd={:#x} len={}",
        header.command,
        message.payload_len()
    );
    Ok(())
}
