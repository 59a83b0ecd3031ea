//! Signature envelopes and the Ed25519 primitive seam
//!
//! A signature travels as a small JSON envelope carrying the signing kid, the
//! exact payload string that was signed, and the detached Ed25519 signature
//! over the payload bytes. The envelope's own bytes are what a `SigId` is
//! derived from, so the id can be recomputed by anyone holding the envelope.
//!
//! The engine only verifies; signing support exists for clients producing
//! links and for fixture building in tests.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sigtree_model::{Fingerprint, KeyAlgo, Kid, KidError, SigId};
use thiserror::Error;

/// Errors from envelope parsing and signature verification
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed signature envelope: {0}")]
    BadEnvelope(#[from] serde_json::Error),

    #[error("invalid signature length: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("invalid hex in envelope: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("kid error: {0}")]
    Kid(#[from] KidError),

    #[error("kid does not name an EdDSA key")]
    NotASigningKey,

    #[error("envelope kid {got} does not match verifying key {expected}")]
    KidMismatch { expected: Kid, got: Kid },
}

/// One parsed signature envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigEnvelope {
    /// Kid of the signing key.
    pub kid: Kid,
    /// The exact payload string the signature covers.
    pub payload: String,
    /// Detached Ed25519 signature over the payload bytes, hex.
    pub sig: String,
}

impl SigEnvelope {
    /// Parse an envelope from its raw wire string.
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Verify the detached signature under `key`, checking that the envelope
    /// names that key's kid. Returns the derived id of the envelope bytes.
    pub fn verify(&self, raw: &str, key: &VerifyingKey) -> Result<SigId, CryptoError> {
        let expected_kid = Kid::from_eddsa(key.as_bytes());
        if self.kid != expected_kid {
            return Err(CryptoError::KidMismatch {
                expected: expected_kid,
                got: self.kid.clone(),
            });
        }

        let sig_bytes = hex::decode(&self.sig)?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidSignatureLength(v.len()))?;
        let signature = Signature::from_bytes(&sig_arr);

        key.verify(self.payload.as_bytes(), &signature)
            .map_err(|_| CryptoError::BadSignature)?;

        Ok(SigId::hash_of(raw.as_bytes()))
    }
}

/// Resolve the Ed25519 verifying key a kid carries in its material bytes.
pub fn verifying_key_from_kid(kid: &Kid) -> Result<VerifyingKey, CryptoError> {
    if kid.algo() != KeyAlgo::Eddsa {
        return Err(CryptoError::NotASigningKey);
    }
    let material: [u8; 32] = kid
        .material()
        .try_into()
        .map_err(|_| CryptoError::NotASigningKey)?;
    VerifyingKey::from_bytes(&material).map_err(|_| CryptoError::BadSignature)
}

/// Legacy-style fingerprint of a key: leading 20 bytes of SHA-256 over the kid.
pub fn fingerprint_of_kid(kid: &Kid) -> Fingerprint {
    let digest = Sha256::digest(kid.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    Fingerprint(out)
}

/// An Ed25519 keypair able to produce signature envelopes.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn kid(&self) -> Kid {
        Kid::from_eddsa(self.verifying_key().as_bytes())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of_kid(&self.kid())
    }

    /// Sign a payload string, producing the raw envelope wire string.
    pub fn sign_payload(&self, payload: &str) -> String {
        let signature = self.signing_key.sign(payload.as_bytes());
        let envelope = SigEnvelope {
            kid: self.kid(),
            payload: payload.to_string(),
            sig: hex::encode(signature.to_bytes()),
        };
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(&envelope).unwrap_or_default()
    }
}
