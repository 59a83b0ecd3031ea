//! Merkle tree verification
//!
//! The server periodically publishes a signed root summarizing every user's
//! chain tail. Verifying a user means checking that root's signature against
//! a pinned signer, walking a root-to-leaf proof down to the user's leaf, and
//! handing the endorsed tail to the chain loader.

mod client;
mod path;

pub use client::{MerkleClient, MerkleLookup};
pub use path::VerificationPath;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sigtree_model::{Fingerprint, LinkId, NodeHash, Seqno, SigId};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::transport::{FetchError, WireRoot};

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("root rollback: accepted seqno {last}, server served {got}")]
    Rollback { last: Seqno, got: Seqno },

    #[error("root signed by untrusted fingerprint {0}")]
    UntrustedSigner(Fingerprint),

    #[error("root signature envelope does not cover the served payload")]
    RootPayloadMismatch,

    #[error("server served a different root for already-accepted seqno {0}")]
    RootConflict(Seqno),

    #[error("node hash mismatch at path level {level}")]
    HashMismatchAtLevel { level: usize },

    #[error("path mismatch at level {level}: prefix {prefix:?}")]
    PathMismatch { level: usize, prefix: String },

    #[error("unsupported leaf version {0}")]
    UnsupportedLeafVersion(u64),

    #[error("proof ended without reaching a leaf")]
    NoLeafFound,

    #[error("path is for uid {got}, requested {requested}")]
    WrongUid {
        requested: sigtree_model::Uid,
        got: sigtree_model::Uid,
    },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("bad node json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("bad identifier in tree: {0}")]
    BadIdentifier(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// `(seqno, link id, sig id)` pointer into a sigchain. Serves both as the
/// Merkle leaf pointer and as the endorsed chain tail. Wire form is a bare
/// three-element array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleTriple {
    pub seqno: Seqno,
    pub link_id: LinkId,
    pub sig_id: SigId,
}

impl Serialize for MerkleTriple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.seqno, self.link_id, self.sig_id).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MerkleTriple {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (seqno, link_id, sig_id) = <(Seqno, LinkId, SigId)>::deserialize(deserializer)?;
        Ok(Self {
            seqno,
            link_id,
            sig_id,
        })
    }
}

/// Per-user leaf record. An all-empty leaf is the valid "no chain yet" state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MerkleUserLeaf {
    pub public: Option<MerkleTriple>,
    pub private: Option<MerkleTriple>,
    pub id_version: u64,
}

impl MerkleUserLeaf {
    pub fn is_empty(&self) -> bool {
        self.public.is_none() && self.private.is_none()
    }
}

/// The signed statement inside a root's payload string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootPayload {
    pub seqno: Seqno,
    pub ctime: u64,
    pub key: RootSignerSection,
    pub root: NodeHash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootSignerSection {
    pub fingerprint: Fingerprint,
}

/// One published tree snapshot: the parsed statement plus the exact served
/// bytes needed to re-check the signature.
#[derive(Clone, Debug)]
pub struct MerkleRoot {
    pub seqno: Seqno,
    pub ctime: u64,
    pub fingerprint: Fingerprint,
    pub root_hash: NodeHash,
    pub payload_json: String,
    pub sig: String,
}

impl MerkleRoot {
    /// Parse the served root. The signature is not checked here; the client
    /// does that against its pinned keyring.
    pub fn from_wire(wire: &WireRoot) -> Result<Self, MerkleError> {
        let payload: RootPayload = serde_json::from_str(&wire.payload_json)?;
        Ok(Self {
            seqno: payload.seqno,
            ctime: payload.ctime,
            fingerprint: payload.key.fingerprint,
            root_hash: payload.root,
            payload_json: wire.payload_json.clone(),
            sig: wire.sig.clone(),
        })
    }

    /// Serialize for the local root store.
    pub fn to_cache_bytes(&self) -> Vec<u8> {
        let wire = WireRoot {
            sig: self.sig.clone(),
            payload_json: self.payload_json.clone(),
        };
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}
