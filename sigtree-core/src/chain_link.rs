//! Chain links: one signed key-management statement
//!
//! A link is received from the server as `{payload_hash, sig, sig_id,
//! payload_json}` and becomes progressively verified in stages:
//! hash → payload → signature. Each stage sets an idempotent memo flag once
//! it has passed on this exact object, so repeat verification is a no-op.

use serde::{Deserialize, Serialize};
use sigtree_model::{ChainTime, DeviceId, Fingerprint, Fokid, Kid, LinkId, Seqno, SigId, Uid};
use thiserror::Error;

use crate::crypto::{fingerprint_of_kid, CryptoError, KeyPair, SigEnvelope};
use crate::transport::WireSig;

/// Errors from unpacking or verifying a single link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: LinkId, computed: LinkId },

    #[error("sig id mismatch: claimed {claimed}, computed {computed}")]
    SigIdMismatch { claimed: SigId, computed: SigId },

    #[error("signature envelope payload differs from stored payload")]
    PayloadMismatch,

    #[error("signing key does not match the link's claimed signer {claimed}")]
    FingerprintMismatch { claimed: Fokid },

    #[error("identity mismatch: link claims {claimed_name}/{claimed_uid}, chain owner is {name}/{uid}")]
    IdentityMismatch {
        claimed_name: String,
        claimed_uid: Uid,
        name: String,
        uid: Uid,
    },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("bad payload json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("bad identifier in link: {0}")]
    BadIdentifier(String),
}

// --- Typed payload ---

/// The signed statement carried by one link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkPayload {
    pub seqno: Seqno,
    pub prev: Option<LinkId>,
    /// Signer's wall clock, seconds since epoch.
    pub ctime: u64,
    /// Statement lifetime in seconds; 0 means unbounded.
    #[serde(default)]
    pub expire_in: u64,
    pub body: LinkBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkBody {
    pub key: SignerSection,
    #[serde(flatten)]
    pub detail: LinkDetail,
}

/// Who signed this link and on whose chain it claims to live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignerSection {
    pub uid: Uid,
    pub username: String,
    pub kid: Kid,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub eldest_kid: Option<Kid>,
}

impl SignerSection {
    pub fn fokid(&self) -> Fokid {
        Fokid {
            kid: Some(self.kid.clone()),
            fingerprint: self.fingerprint,
        }
    }
}

/// What the statement does.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkDetail {
    /// Genesis statement: the signing key declares itself eldest.
    Eldest,
    /// Grant co-equal signing authority to a new key.
    Sibkey(Delegation),
    /// Grant subordinate (typically encryption) authority to a new key.
    Subkey(Delegation),
    /// Withdraw previously granted authority.
    Revoke(Revocation),
    /// Update device metadata without touching key authority.
    Device { device: DeviceSection },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delegation {
    /// The key receiving authority.
    pub kid: Kid,
    /// For subkeys: the sibkey this key is subordinate to.
    #[serde(default)]
    pub parent_kid: Option<Kid>,
    #[serde(default)]
    pub device: Option<DeviceSection>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Revocation {
    #[serde(default)]
    pub sig_ids: Vec<SigId>,
    #[serde(default)]
    pub kids: Vec<Kid>,
}

/// Device metadata as carried on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceSection {
    pub id: DeviceId,
    #[serde(default)]
    pub kid: Option<Kid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: String,
}

/// Device type marking the deterministically-derived key set.
pub const DEVICE_TYPE_WEB: &str = "web";

// --- Cache record ---

/// On-disk shape of a link in the local store. `chain_verified` is honored on
/// load only when the recomputed hash matches the cache key.
#[derive(Serialize, Deserialize)]
struct CachedLink {
    payload_hash: LinkId,
    sig: String,
    sig_id: SigId,
    payload_json: String,
    chain_verified: bool,
}

// --- ChainLink ---

/// One signed statement in a user's history, with staged verification state.
#[derive(Clone, Debug)]
pub struct ChainLink {
    id: LinkId,
    sig_raw: String,
    sig_id: SigId,
    payload_json: String,
    payload: LinkPayload,

    hash_verified: bool,
    payload_verified: bool,
    sig_verified: bool,
    chain_verified: bool,
}

impl ChainLink {
    /// Parse a served link into typed fields. Nothing is trusted yet; the
    /// claimed hash and sig id are kept for the verify stages to check.
    pub fn unpack(wire: &WireSig) -> Result<Self, LinkError> {
        let id = LinkId::from_hex(&wire.payload_hash).map_err(LinkError::BadIdentifier)?;
        let sig_id = parse_sig_id(&wire.sig_id)?;
        let payload: LinkPayload = serde_json::from_str(&wire.payload_json)?;

        Ok(Self {
            id,
            sig_raw: wire.sig.clone(),
            sig_id,
            payload_json: wire.payload_json.clone(),
            payload,
            hash_verified: false,
            payload_verified: false,
            sig_verified: false,
            chain_verified: false,
        })
    }

    /// Recompute the content hash over the exact stored payload bytes.
    pub fn verify_hash(&mut self) -> Result<(), LinkError> {
        if self.hash_verified {
            return Ok(());
        }
        let computed = LinkId::hash_of(self.payload_json.as_bytes());
        if computed != self.id {
            return Err(LinkError::HashMismatch {
                claimed: self.id,
                computed,
            });
        }
        self.hash_verified = true;
        Ok(())
    }

    /// Confirm the signature envelope embeds exactly the stored payload, and
    /// that the served sig id is the derived one.
    pub fn verify_payload(&mut self) -> Result<(), LinkError> {
        if self.payload_verified {
            return Ok(());
        }
        let envelope = SigEnvelope::parse(&self.sig_raw)?;
        if envelope.payload != self.payload_json {
            return Err(LinkError::PayloadMismatch);
        }
        let computed = SigId::hash_of(self.sig_raw.as_bytes());
        if computed != self.sig_id {
            return Err(LinkError::SigIdMismatch {
                claimed: self.sig_id,
                computed,
            });
        }
        self.payload_verified = true;
        Ok(())
    }

    /// Verify the cryptographic signature under `key` and that the key is the
    /// link's claimed signer.
    pub fn verify_sig(&mut self, key: &ed25519_dalek::VerifyingKey) -> Result<(), LinkError> {
        if self.sig_verified {
            return Ok(());
        }
        let claimed = self.payload.body.key.fokid();
        let actual_kid = Kid::from_eddsa(key.as_bytes());
        let actual = Fokid {
            kid: Some(actual_kid.clone()),
            fingerprint: Some(fingerprint_of_kid(&actual_kid)),
        };
        if !claimed.matches(&actual) {
            return Err(LinkError::FingerprintMismatch { claimed });
        }

        let envelope = SigEnvelope::parse(&self.sig_raw)?;
        envelope.verify(&self.sig_raw, key)?;

        self.sig_verified = true;
        Ok(())
    }

    /// Enforce the link's embedded identity claim against the chain owner.
    pub fn check_name_and_uid(&self, name: &str, uid: &Uid) -> Result<(), LinkError> {
        let signer = &self.payload.body.key;
        if signer.username != name || &signer.uid != uid {
            return Err(LinkError::IdentityMismatch {
                claimed_name: signer.username.clone(),
                claimed_uid: signer.uid,
                name: name.to_string(),
                uid: *uid,
            });
        }
        Ok(())
    }

    /// All three verification stages in order.
    pub fn verify(&mut self, key: &ed25519_dalek::VerifyingKey) -> Result<(), LinkError> {
        self.verify_hash()?;
        self.verify_payload()?;
        self.verify_sig(key)
    }

    // --- Accessors ---

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn sig_id(&self) -> SigId {
        self.sig_id
    }

    pub fn seqno(&self) -> Seqno {
        self.payload.seqno
    }

    pub fn prev(&self) -> Option<LinkId> {
        self.payload.prev
    }

    pub fn ctime(&self) -> u64 {
        self.payload.ctime
    }

    /// Expiry of the statement; 0 means unbounded.
    pub fn etime(&self) -> u64 {
        if self.payload.expire_in == 0 {
            0
        } else {
            // Server-supplied lifetimes can be arbitrarily large; clamp
            // instead of wrapping the window shut.
            self.payload.ctime.saturating_add(self.payload.expire_in)
        }
    }

    pub fn chain_time(&self) -> ChainTime {
        ChainTime::new(self.payload.ctime, self.payload.seqno)
    }

    pub fn signer(&self) -> &SignerSection {
        &self.payload.body.key
    }

    pub fn detail(&self) -> &LinkDetail {
        &self.payload.body.detail
    }

    pub fn is_chain_verified(&self) -> bool {
        self.chain_verified
    }

    /// Mark the link as fully verified in its chain context. Only the chain
    /// verifier calls this, after linkage and identity checks passed.
    pub(crate) fn mark_chain_verified(&mut self) {
        self.chain_verified = true;
    }

    // --- Cache round trip ---

    /// Serialize for the local link store.
    pub fn to_cache_bytes(&self) -> Vec<u8> {
        let record = CachedLink {
            payload_hash: self.id,
            sig: self.sig_raw.clone(),
            sig_id: self.sig_id,
            payload_json: self.payload_json.clone(),
            chain_verified: self.chain_verified,
        };
        serde_json::to_vec(&record).unwrap_or_default()
    }

    /// Load from the local link store. The persisted `chain_verified` mark is
    /// honored only when the recomputed hash matches `expected_id`; anything
    /// else comes back unverified.
    pub fn from_cache_bytes(expected_id: &LinkId, bytes: &[u8]) -> Result<Self, LinkError> {
        let record: CachedLink = serde_json::from_slice(bytes)?;
        let mut link = Self::unpack(&WireSig {
            payload_hash: record.payload_hash.to_string(),
            sig: record.sig,
            sig_id: record.sig_id.to_long_string(),
            payload_json: record.payload_json,
        })?;
        let computed = LinkId::hash_of(link.payload_json.as_bytes());
        if record.chain_verified && computed == *expected_id && link.id == *expected_id {
            link.hash_verified = true;
            link.chain_verified = true;
        }
        Ok(link)
    }
}

fn parse_sig_id(raw: &str) -> Result<SigId, LinkError> {
    // Either the bare 32-byte digest or the long form with the format suffix.
    let trimmed = if raw.len() == 66 && raw.ends_with("0f") {
        &raw[..64]
    } else {
        raw
    };
    SigId::from_hex(trimmed).map_err(LinkError::BadIdentifier)
}

// --- Builder ---

/// Builds and signs one link, producing the wire form. Used by clients
/// producing statements and by tests building fixture chains.
pub struct LinkBuilder {
    seqno: Seqno,
    prev: Option<LinkId>,
    ctime: u64,
    expire_in: u64,
    uid: Uid,
    username: String,
    eldest_kid: Option<Kid>,
    detail: LinkDetail,
}

impl LinkBuilder {
    pub fn new(seqno: Seqno, uid: Uid, username: impl Into<String>) -> Self {
        Self {
            seqno,
            prev: None,
            ctime: 0,
            expire_in: 0,
            uid,
            username: username.into(),
            eldest_kid: None,
            detail: LinkDetail::Eldest,
        }
    }

    pub fn prev(mut self, prev: LinkId) -> Self {
        self.prev = Some(prev);
        self
    }

    pub fn ctime(mut self, ctime: u64) -> Self {
        self.ctime = ctime;
        self
    }

    pub fn expire_in(mut self, expire_in: u64) -> Self {
        self.expire_in = expire_in;
        self
    }

    pub fn eldest_kid(mut self, kid: Kid) -> Self {
        self.eldest_kid = Some(kid);
        self
    }

    pub fn eldest(mut self) -> Self {
        self.detail = LinkDetail::Eldest;
        self
    }

    pub fn sibkey(mut self, kid: Kid) -> Self {
        self.detail = LinkDetail::Sibkey(Delegation {
            kid,
            parent_kid: None,
            device: None,
        });
        self
    }

    pub fn subkey(mut self, kid: Kid, parent: Kid) -> Self {
        self.detail = LinkDetail::Subkey(Delegation {
            kid,
            parent_kid: Some(parent),
            device: None,
        });
        self
    }

    pub fn device(mut self, device: DeviceSection) -> Self {
        match &mut self.detail {
            LinkDetail::Sibkey(d) | LinkDetail::Subkey(d) => d.device = Some(device),
            _ => self.detail = LinkDetail::Device { device },
        }
        self
    }

    pub fn revoke_sig_ids(mut self, sig_ids: Vec<SigId>) -> Self {
        self.detail = LinkDetail::Revoke(Revocation {
            sig_ids,
            kids: Vec::new(),
        });
        self
    }

    pub fn revoke_kids(mut self, kids: Vec<Kid>) -> Self {
        self.detail = LinkDetail::Revoke(Revocation {
            sig_ids: Vec::new(),
            kids,
        });
        self
    }

    /// Sign with `signer` and emit the wire form the server would serve.
    pub fn sign(self, signer: &KeyPair) -> WireSig {
        let payload = LinkPayload {
            seqno: self.seqno,
            prev: self.prev,
            ctime: self.ctime,
            expire_in: self.expire_in,
            body: LinkBody {
                key: SignerSection {
                    uid: self.uid,
                    username: self.username,
                    kid: signer.kid(),
                    fingerprint: Some(signer.fingerprint()),
                    eldest_kid: self.eldest_kid,
                },
                detail: self.detail,
            },
        };
        // A payload of plain values serializes infallibly.
        let payload_json = serde_json::to_string(&payload).unwrap_or_default();
        let sig_raw = signer.sign_payload(&payload_json);

        WireSig {
            payload_hash: LinkId::hash_of(payload_json.as_bytes()).to_string(),
            sig_id: SigId::hash_of(sig_raw.as_bytes()).to_long_string(),
            sig: sig_raw,
            payload_json,
        }
    }
}
