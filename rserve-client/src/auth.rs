//! Login credentials.
//!
//! Servers announcing "ARuc" expect `user\ncrypt(password, salt)`; those
//! announcing only "ARpt" accept the password in the clear. DES crypt is
//! available when the crate is built with the `crypt` feature.

use crate::error::ClientError;
use rserve_protocol::AuthMethods;

/// Whether this build can answer crypt logins.
pub const CRYPT_SUPPORTED: bool = cfg!(feature = "crypt");

/// Builds the login text for the methods the server requires.
///
/// Prefers crypt when the server asks for it and the build supports it,
/// falls back to plaintext when the server accepts it, and otherwise
/// fails without producing anything to send.
pub(crate) fn login_text(
    user: &str,
    password: &str,
    auth: AuthMethods,
    salt: [u8; 2],
) -> Result<String, ClientError> {
    if auth.crypt && CRYPT_SUPPORTED {
        return Ok(format!("{}\n{}", user, crypt(password, salt)?));
    }
    if auth.plain {
        return Ok(format!("{}\n{}", user, password));
    }
    Err(ClientError::AuthUnsupported)
}

#[cfg(feature = "crypt")]
#[allow(deprecated)]
fn crypt(password: &str, salt: [u8; 2]) -> Result<String, ClientError> {
    let salt = std::str::from_utf8(&salt).map_err(|_| ClientError::AuthUnsupported)?;
    pwhash::unix_crypt::hash_with(salt, password).map_err(|e| {
        tracing::debug!("crypt failed: {}", e);
        ClientError::AuthUnsupported
    })
}

#[cfg(not(feature = "crypt"))]
fn crypt(_password: &str, _salt: [u8; 2]) -> Result<String, ClientError> {
    Err(ClientError::AuthUnsupported)
}
