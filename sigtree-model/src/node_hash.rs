//! Tagged Merkle node hashes
//!
//! Tree nodes are committed to with either a short (SHA-256) or long
//! (SHA-512) digest depending on their vintage. Modeled as a closed tagged
//! variant with a single `check` operation rather than an open interface.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeHashError {
    #[error("invalid hex: {0}")]
    BadHex(String),

    #[error("unsupported digest length: {0} bytes")]
    BadLength(usize),
}

/// Hash of one Merkle tree node's raw JSON bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHash {
    Sha256([u8; 32]),
    Sha512([u8; 64]),
}

impl NodeHash {
    /// Recompute the digest over `payload` and compare.
    pub fn check(&self, payload: &[u8]) -> bool {
        match self {
            NodeHash::Sha256(expected) => {
                let got: [u8; 32] = Sha256::digest(payload).into();
                &got == expected
            }
            NodeHash::Sha512(expected) => {
                let got: [u8; 64] = Sha512::digest(payload).into();
                &got == expected
            }
        }
    }

    /// Parse from hex; digest flavor is inferred from the length.
    pub fn from_hex(hex_str: &str) -> Result<Self, NodeHashError> {
        let bytes = hex::decode(hex_str).map_err(|e| NodeHashError::BadHex(e.to_string()))?;
        match bytes.len() {
            32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(NodeHash::Sha256(arr))
            }
            64 => {
                let mut arr = [0u8; 64];
                arr.copy_from_slice(&bytes);
                Ok(NodeHash::Sha512(arr))
            }
            n => Err(NodeHashError::BadLength(n)),
        }
    }

    /// Short digest of `payload`, for building fixture trees.
    pub fn of_sha256(payload: &[u8]) -> Self {
        NodeHash::Sha256(Sha256::digest(payload).into())
    }

    /// Long digest of `payload`.
    pub fn of_sha512(payload: &[u8]) -> Self {
        NodeHash::Sha512(Sha512::digest(payload).into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            NodeHash::Sha256(b) => b,
            NodeHash::Sha512(b) => b,
        }
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHash::Sha256(_) => write!(f, "NodeHash::Sha256({})", self),
            NodeHash::Sha512(_) => write!(f, "NodeHash::Sha512({})", self),
        }
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeHash::from_hex(&s).map_err(D::Error::custom)
    }
}
