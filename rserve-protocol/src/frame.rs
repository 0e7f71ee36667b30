//! Binary layout of QAP1 message headers and parameter headers.
//!
//! Message header (16 bytes, little-endian):
//!
//! ```text
//! +---------+---------+-------------+----------+
//! | command | length  | data_offset | reserved |
//! | 4 bytes | 4 bytes |   4 bytes   | 4 bytes  |
//! +---------+---------+-------------+----------+
//! ```
//!
//! Parameter / SEXP header (4 or 8 bytes, little-endian):
//!
//! ```text
//! bits 0..5   type tag
//! bit  6      large flag (a second word follows)
//! bit  7      has-attribute flag (SEXPs only)
//! bits 8..31  content length (low 24 bits)
//! [word 2]    content length bits 24..56 when large
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut};

/// Size of the fixed message header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Largest content length encoded without the large-length extension.
pub const MAX_SHORT_LENGTH: usize = 0x7f_ffff;

/// Parameter type tags (`DT_*`).
pub mod dt {
    pub const INT: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BYTESTREAM: u8 = 5;
    pub const SEXP: u8 = 10;
    pub const ARRAY: u8 = 11;
    /// Large-length flag.
    pub const LARGE: u8 = 0x40;
}

/// SEXP type tags (`XT_*`).
pub mod xt {
    pub const NULL: u8 = 0;
    pub const INT: u8 = 1;
    pub const DOUBLE: u8 = 2;
    pub const STR: u8 = 3;
    pub const LANG: u8 = 4;
    pub const SYM: u8 = 5;
    pub const BOOL: u8 = 6;
    pub const S4: u8 = 7;
    pub const VECTOR: u8 = 16;
    pub const LIST: u8 = 17;
    pub const CLOS: u8 = 18;
    pub const SYMNAME: u8 = 19;
    pub const LIST_NOTAG: u8 = 20;
    pub const LIST_TAG: u8 = 21;
    pub const LANG_NOTAG: u8 = 22;
    pub const LANG_TAG: u8 = 23;
    pub const VECTOR_EXP: u8 = 26;
    pub const VECTOR_STR: u8 = 27;
    pub const ARRAY_INT: u8 = 32;
    pub const ARRAY_DOUBLE: u8 = 33;
    pub const ARRAY_STR: u8 = 34;
    pub const ARRAY_BOOL_UA: u8 = 35;
    pub const ARRAY_BOOL: u8 = 36;
    pub const RAW: u8 = 37;
    pub const ARRAY_CPLX: u8 = 38;
    pub const UNKNOWN: u8 = 48;
    /// Large-length flag.
    pub const LARGE: u8 = 0x40;
    /// An attribute SEXP precedes the content.
    pub const HAS_ATTR: u8 = 0x80;
}

/// Mask selecting the 6-bit type tag.
pub const TYPE_MASK: u8 = 0x3f;

/// Rounds `len` up to the next multiple of 4.
pub fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Fixed header of every QAP1 message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Command (requests) or response code with status bits (responses).
    pub command: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Number of ignorable bytes between header and payload.
    pub data_offset: u32,
    /// Reserved, sent as zero.
    pub reserved: u32,
}

impl MessageHeader {
    pub fn new(command: u32, length: u32) -> Self {
        Self {
            command,
            length,
            data_offset: 0,
            reserved: 0,
        }
    }

    /// Encodes the header in wire order.
    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut out = [0u8; MESSAGE_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.command);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.data_offset);
        buf.put_u32_le(self.reserved);
        out
    }

    /// Decodes a header from wire order.
    pub fn decode(bytes: &[u8; MESSAGE_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            command: buf.get_u32_le(),
            length: buf.get_u32_le(),
            data_offset: buf.get_u32_le(),
            reserved: buf.get_u32_le(),
        }
    }
}

/// Decoded parameter or SEXP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamHeader {
    /// Type tag without flags.
    pub type_code: u8,
    /// Whether the large-length extension word is present.
    pub large: bool,
    /// Whether an attribute SEXP precedes the content (SEXP headers only).
    pub has_attr: bool,
    /// Content length in bytes.
    pub length: u64,
}

impl ParamHeader {
    /// Creates a header for `length` content bytes, choosing the large
    /// encoding when the length exceeds [`MAX_SHORT_LENGTH`].
    pub fn new(type_code: u8, length: usize) -> Self {
        Self {
            type_code: type_code & TYPE_MASK,
            large: length > MAX_SHORT_LENGTH,
            has_attr: false,
            length: length as u64,
        }
    }

    pub fn with_attr(mut self) -> Self {
        self.has_attr = true;
        self
    }

    /// Size of the encoded header (4 or 8 bytes).
    pub fn encoded_len(&self) -> usize {
        if self.large {
            8
        } else {
            4
        }
    }

    /// Returns the header size needed for `length` content bytes.
    pub fn size_for(length: usize) -> usize {
        if length > MAX_SHORT_LENGTH {
            8
        } else {
            4
        }
    }

    /// Writes the header in wire order.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        let mut tag = u32::from(self.type_code & TYPE_MASK);
        if self.large {
            tag |= u32::from(dt::LARGE);
        }
        if self.has_attr {
            tag |= u32::from(xt::HAS_ATTR);
        }
        buf.put_u32_le(tag | (((self.length & 0xff_ffff) as u32) << 8));
        if self.large {
            buf.put_u32_le((self.length >> 24) as u32);
        }
    }

    /// Reads the header at `offset`, never looking past `end`.
    pub fn read(buf: &[u8], offset: usize, end: usize) -> Result<Self, ProtocolError> {
        let end = end.min(buf.len());
        if offset.checked_add(4).map_or(true, |e| e > end) {
            return Err(ProtocolError::BadParameter {
                offset,
                reason: "header overruns buffer",
            });
        }
        let word = (&buf[offset..offset + 4]).get_u32_le();
        let flags = word as u8;
        let large = flags & dt::LARGE != 0;
        let mut length = u64::from(word >> 8);
        if large {
            if offset + 8 > end {
                return Err(ProtocolError::BadParameter {
                    offset,
                    reason: "large header overruns buffer",
                });
            }
            let high = (&buf[offset + 4..offset + 8]).get_u32_le();
            length |= u64::from(high) << 24;
        }
        Ok(Self {
            type_code: flags & TYPE_MASK,
            large,
            has_attr: flags & xt::HAS_ATTR != 0,
            length,
        })
    }
}
