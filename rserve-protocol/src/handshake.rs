//! The 32-byte identification string a server sends on connect.
//!
//! ```text
//! 0..4    protocol family   "Rsrv"
//! 4..8    version digits    e.g. "0103"
//! 8..12   transport         "QAP1"
//! 12..32  4-byte capability tokens: "ARuc" (crypt login required),
//!         "ARpt" (plaintext login required), "K" + 2 salt bytes,
//!         "----" filler
//! ```

use crate::error::ProtocolError;

/// Size of the identification string.
pub const ID_STRING_SIZE: usize = 32;

/// Protocol family, highest supported version and transport of this client.
pub const CLIENT_ID: &[u8; 12] = b"Rsrv0103QAP1";

/// Salt used for crypt logins when the server sends none.
pub const DEFAULT_SALT: [u8; 2] = *b"..";

/// Login methods the server requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthMethods {
    /// Salted crypt of the password ("ARuc").
    pub crypt: bool,
    /// Plaintext password ("ARpt").
    pub plain: bool,
}

impl AuthMethods {
    /// Whether any login is required.
    pub fn required(&self) -> bool {
        self.crypt || self.plain
    }
}

/// Parsed identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdString {
    pub family: [u8; 4],
    pub version: [u8; 4],
    pub transport: [u8; 4],
    pub auth: AuthMethods,
    pub salt: [u8; 2],
}

impl IdString {
    /// Splits the fixed fields and scans the capability tokens. Does not
    /// check compatibility; see [`IdString::check`].
    pub fn parse(raw: &[u8; ID_STRING_SIZE]) -> Self {
        let mut id = Self {
            family: field(raw, 0),
            version: field(raw, 4),
            transport: field(raw, 8),
            auth: AuthMethods::default(),
            salt: DEFAULT_SALT,
        };
        for token in raw[12..].chunks_exact(4) {
            match token {
                b"ARuc" => id.auth.crypt = true,
                b"ARpt" => id.auth.plain = true,
                [b'K', a, b, _] => id.salt = [*a, *b],
                _ => {}
            }
        }
        id
    }

    /// Rejects servers of another family, another transport, or a newer
    /// protocol version than [`CLIENT_ID`].
    pub fn check(&self) -> Result<(), ProtocolError> {
        if self.family[..] != CLIENT_ID[0..4] {
            return Err(ProtocolError::InvalidId(self.family));
        }
        if self.transport[..] != CLIENT_ID[8..12] || self.version[..] > CLIENT_ID[4..8] {
            return Err(ProtocolError::UnsupportedProtocol {
                version: String::from_utf8_lossy(&self.version).into_owned(),
                transport: String::from_utf8_lossy(&self.transport).into_owned(),
            });
        }
        Ok(())
    }

    /// Version digits as text.
    pub fn version_str(&self) -> String {
        String::from_utf8_lossy(&self.version).into_owned()
    }
}

fn field(raw: &[u8; ID_STRING_SIZE], at: usize) -> [u8; 4] {
    [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]
}
