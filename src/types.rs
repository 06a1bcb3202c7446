//! Identifiers shared by the session store, selector, gateway and coordinator.
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TssError;

/// Longest sender address accepted by the address format check.
pub const MAX_ADDRESS_LEN: usize = 255;

/// Signing session identifier, assigned from a persisted counter starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        SessionId(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a key produced by a prior key-generation ceremony.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        KeyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity of a key-share holder (a validator).
///
/// The derived `Ord` compares the identity strings byte by byte, which is the total order
/// every node uses when laying out a committee.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw account address of a request sender. Hex encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Address(bytes.into())
    }

    pub fn from_hex(s: &str) -> Result<Self, TssError> {
        decode_hex(s)
            .map(Address)
            .map_err(|e| TssError::InvalidAddress(format!("sender: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks the address is non-empty, at most [`MAX_ADDRESS_LEN`] bytes and of one of the
    /// allowed lengths.
    pub fn verify_format(&self, allowed_lengths: &[usize]) -> Result<(), TssError> {
        if self.0.is_empty() {
            return Err(TssError::InvalidAddress("sender: empty address".into()));
        }
        if self.0.len() > MAX_ADDRESS_LEN {
            return Err(TssError::InvalidAddress(format!(
                "sender: address length {} exceeds maximum {}",
                self.0.len(),
                MAX_ADDRESS_LEN
            )));
        }
        if !allowed_lengths.contains(&self.0.len()) {
            return Err(TssError::InvalidAddress(format!(
                "sender: unexpected address length {}",
                self.0.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex(&s).map(Address).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.trim();
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}

/// `#[serde(with = "serde_hex")]` for binary fields.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(serde::de::Error::custom)
    }
}
