//! Key identifiers
//!
//! A `Kid` is a type-tagged byte string naming one key: a version byte, an
//! algorithm byte, the raw public key material, and a trailing terminator
//! byte. It is stable per key and maps 1:1 to the key's public material.
//!
//! `Fokid` is the legacy bridging union of an optional Kid and an optional
//! PGP-style fingerprint.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::Fingerprint;

/// Kid layout version understood by this engine.
pub const KID_VERSION: u8 = 0x01;

/// Trailing terminator byte.
pub const KID_SUFFIX: u8 = 0x0a;

/// Errors from parsing or constructing key identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KidError {
    #[error("kid too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported kid version: {0:#04x}")]
    BadVersion(u8),

    #[error("unknown key algorithm: {0:#04x}")]
    UnknownAlgo(u8),

    #[error("bad kid suffix: {0:#04x}")]
    BadSuffix(u8),

    #[error("invalid hex: {0}")]
    BadHex(String),

    #[error("wrong key material length for algorithm: {0} bytes")]
    BadMaterialLength(usize),
}

/// Key algorithm named by a Kid's tag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyAlgo {
    /// EdDSA signing key (32-byte public material)
    Eddsa,
    /// Curve25519 DH encryption key (32-byte public material)
    Dh,
}

impl KeyAlgo {
    pub fn tag(self) -> u8 {
        match self {
            KeyAlgo::Eddsa => 0x20,
            KeyAlgo::Dh => 0x21,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, KidError> {
        match tag {
            0x20 => Ok(KeyAlgo::Eddsa),
            0x21 => Ok(KeyAlgo::Dh),
            other => Err(KidError::UnknownAlgo(other)),
        }
    }
}

/// A key's binary identifier: `version || algo || material || suffix`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kid(Vec<u8>);

impl Kid {
    /// Build a Kid from an algorithm tag and raw public key material.
    pub fn assemble(algo: KeyAlgo, material: &[u8]) -> Result<Self, KidError> {
        if material.len() != 32 {
            return Err(KidError::BadMaterialLength(material.len()));
        }
        let mut bytes = Vec::with_capacity(material.len() + 3);
        bytes.push(KID_VERSION);
        bytes.push(algo.tag());
        bytes.extend_from_slice(material);
        bytes.push(KID_SUFFIX);
        Ok(Self(bytes))
    }

    /// Kid of an Ed25519 signing key from its 32-byte public material.
    pub fn from_eddsa(material: &[u8; 32]) -> Self {
        // Length is fixed by the array type, assemble cannot fail.
        Self::assemble(KeyAlgo::Eddsa, material).unwrap_or_else(|_| unreachable!())
    }

    /// Kid of a Curve25519 DH key from its 32-byte public material.
    pub fn from_dh(material: &[u8; 32]) -> Self {
        Self::assemble(KeyAlgo::Dh, material).unwrap_or_else(|_| unreachable!())
    }

    /// Parse a Kid from raw bytes, validating tag structure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KidError> {
        if bytes.len() < 4 {
            return Err(KidError::TooShort(bytes.len()));
        }
        if bytes[0] != KID_VERSION {
            return Err(KidError::BadVersion(bytes[0]));
        }
        KeyAlgo::from_tag(bytes[1])?;
        let last = bytes[bytes.len() - 1];
        if last != KID_SUFFIX {
            return Err(KidError::BadSuffix(last));
        }
        if bytes.len() - 3 != 32 {
            return Err(KidError::BadMaterialLength(bytes.len() - 3));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Parse from the lowercase hex wire form.
    pub fn from_hex(hex_str: &str) -> Result<Self, KidError> {
        let bytes = hex::decode(hex_str).map_err(|e| KidError::BadHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn algo(&self) -> KeyAlgo {
        // Validated at construction time.
        KeyAlgo::from_tag(self.0[1]).unwrap_or(KeyAlgo::Eddsa)
    }

    /// The raw public key material between the tag bytes and the suffix.
    pub fn material(&self) -> &[u8] {
        &self.0[2..self.0.len() - 1]
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kid({})", self)
    }
}

impl Serialize for Kid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Kid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Kid::from_hex(&s).map_err(D::Error::custom)
    }
}

/// "Fingerprint or Kid": the legacy union used where either identifier may
/// name a key. Equal iff at least one component matches and neither present
/// component mismatches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fokid {
    pub kid: Option<Kid>,
    pub fingerprint: Option<Fingerprint>,
}

impl Fokid {
    pub fn from_kid(kid: Kid) -> Self {
        Self {
            kid: Some(kid),
            fingerprint: None,
        }
    }

    pub fn from_fingerprint(fp: Fingerprint) -> Self {
        Self {
            kid: None,
            fingerprint: Some(fp),
        }
    }

    /// Union equality: one component must match, no present component may
    /// mismatch.
    pub fn matches(&self, other: &Fokid) -> bool {
        let mut matched = false;
        if let (Some(a), Some(b)) = (&self.kid, &other.kid) {
            if a != b {
                return false;
            }
            matched = true;
        }
        if let (Some(a), Some(b)) = (&self.fingerprint, &other.fingerprint) {
            if a != b {
                return false;
            }
            matched = true;
        }
        matched
    }
}

impl fmt::Display for Fokid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kid, &self.fingerprint) {
            (Some(kid), _) => write!(f, "{}", kid),
            (None, Some(fp)) => write!(f, "{}", fp),
            (None, None) => write!(f, "(empty fokid)"),
        }
    }
}
