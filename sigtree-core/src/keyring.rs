//! Pinned keyring of trusted tree signers
//!
//! The set of keys allowed to sign Merkle roots is pinned out of band at
//! construction time and never learned from the server. This is the system's
//! trust root: a root signed by any key outside this set is rejected no
//! matter what else checks out.

use std::collections::HashMap;

use ed25519_dalek::VerifyingKey;
use sigtree_model::{Fingerprint, Kid};

use crate::crypto::fingerprint_of_kid;

/// Immutable map from pinned fingerprints to root-signing keys.
#[derive(Clone, Default)]
pub struct TrustedKeyring {
    signers: HashMap<Fingerprint, VerifyingKey>,
}

impl TrustedKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a root-signing key. Its fingerprint is derived from the key
    /// itself, never supplied by the caller.
    pub fn pin(mut self, key: VerifyingKey) -> Self {
        let kid = Kid::from_eddsa(key.as_bytes());
        self.signers.insert(fingerprint_of_kid(&kid), key);
        self
    }

    /// Resolve a pinned signer by fingerprint.
    pub fn lookup_trusted_signer(&self, fingerprint: &Fingerprint) -> Option<&VerifyingKey> {
        self.signers.get(fingerprint)
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}
