//! Strong types for content-addressed identifiers
//!
//! Semantic newtypes for the fixed-size identifiers that flow through chain
//! verification, replacing raw `[u8; N]`. All of them travel as lowercase hex
//! on the wire, so serde goes through the hex form rather than raw bytes.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Macro to define fixed-size byte arrays with strong types.
///
/// Args:
/// - $name: The name of the struct (e.g., LinkId)
/// - $len: The size of the array (e.g., 32)
/// - $doc: Documentation string
/// - $derives: List of traits to derive
macro_rules! define_bytes {
    ($name:ident, $len:expr, $doc:expr, [$($derives:ident),*]) => {
        #[doc = $doc]
        #[derive(Clone, Copy, $($derives),*)]
        #[repr(transparent)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Returns the inner bytes as a slice.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a hex string.
            pub fn from_hex(hex_str: &str) -> Result<Self, String> {
                let bytes = hex::decode(hex_str)
                    .map_err(|e| format!("invalid hex: {}", e))?;
                if bytes.len() != $len {
                    return Err(format!(
                        "expected {} hex characters, got {}",
                        $len * 2,
                        hex_str.len()
                    ));
                }
                Ok(Self(bytes.try_into().map_err(|_| "internal error: length mismatch".to_string())?))
            }
        }

        // Standard Conversions
        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(wrapper: $name) -> [u8; $len] {
                wrapper.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = [u8; $len];
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        // Zero-allocation Hex formatting
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(self, f)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                fmt::Display::fmt(self, f)?;
                write!(f, ")")
            }
        }

        // Wire form is lowercase hex, not a byte array.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("{:x}", self))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(D::Error::custom)
            }
        }

        // TryFrom for slice parsing (for from_bytes)
        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;
            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                Ok(Self(<[u8; $len]>::try_from(slice)?))
            }
        }

        // TryFrom<Vec<u8>> for owned vector parsing
        impl TryFrom<Vec<u8>> for $name {
            type Error = Vec<u8>;
            fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
                if vec.len() != $len {
                    return Err(vec);
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&vec);
                Ok(Self(arr))
            }
        }
    };
}

// --- Type Definitions ---

define_bytes!(
    LinkId,
    32,
    "Content hash of one chain link's payload (SHA-256)",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl LinkId {
    pub const ZERO: LinkId = LinkId([0u8; 32]);

    /// Compute the id of a link from its exact payload bytes.
    pub fn hash_of(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }
}

define_bytes!(
    SigId,
    32,
    "Content hash of a signature body (SHA-256); derived, never chosen",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl SigId {
    /// The display suffix appended to the hex form in long-format contexts.
    pub const SUFFIX: u8 = 0x0f;

    /// Compute the id of a signature from its raw body bytes.
    pub fn hash_of(sig_body: &[u8]) -> Self {
        Self(Sha256::digest(sig_body).into())
    }

    /// Long format: hex digest plus the fixed format suffix.
    pub fn to_long_string(&self) -> String {
        format!("{:x}{:02x}", self, Self::SUFFIX)
    }
}

define_bytes!(
    Fingerprint,
    20,
    "20-byte key fingerprint (legacy bridging and pinned root signers)",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

define_bytes!(
    Uid,
    16,
    "16-byte user id; its hex form drives the Merkle path prefix walk",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

define_bytes!(
    DeviceId,
    16,
    "16-byte device id",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

/// Position of a link within one user's chain. The first link is seqno 1.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Seqno(pub u64);

impl Seqno {
    pub const ZERO: Seqno = Seqno(0);

    pub fn next(self) -> Seqno {
        Seqno(self.0 + 1)
    }

    pub fn prev(self) -> Option<Seqno> {
        self.0.checked_sub(1).map(Seqno)
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Seqno {
    fn from(n: u64) -> Self {
        Seqno(n)
    }
}

// --- Tests ---
