//! Detached sessions.

use crate::connection::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// A detached server session that can be resumed from another connection.
///
/// Serializes with the key as 64 hex digits, so a session can be handed to
/// another process as YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Host of the connection that detached the session.
    pub host: String,
    /// Port the server listens on for the resume.
    pub port: u16,
    /// Authentication key to send on resume.
    #[serde(with = "hex_key")]
    pub key: [u8; 32],
}

impl Session {
    pub fn new(host: impl Into<String>, port: u16, key: [u8; 32]) -> Self {
        Self {
            host: host.into(),
            port,
            key,
        }
    }

    /// Configuration for the resuming connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::tcp(self.host.clone(), self.port)
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }
}

/// Serde module for the session key (hex string in text formats).
mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim()).map_err(serde::de::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::custom(format!("session key must be 32 bytes, got {}", bytes.len()))
        })
    }
}
