//! Merkle client: root acceptance and user lookup
//!
//! One client instance is shared process-wide across concurrent verification
//! sessions, so its root cache (last accepted seqno, set of already-verified
//! seqnos) sits behind locks. The anti-rollback floor is the max of the
//! in-memory last root and the persisted HEAD pointer, so it survives
//! process restarts.

use std::collections::HashSet;
use std::sync::RwLock;

use sigtree_model::{Seqno, Uid};

use super::{MerkleError, MerkleRoot, MerkleUserLeaf, VerificationPath};
use crate::context::VerifyContext;
use crate::crypto::SigEnvelope;
use crate::transport::fetch_merkle_path;

/// Result of a verified user lookup.
#[derive(Clone, Debug)]
pub struct MerkleLookup {
    pub root: MerkleRoot,
    pub leaf: MerkleUserLeaf,
    pub uid: Uid,
}

/// Fetches and verifies tree roots and proofs.
#[derive(Default)]
pub struct MerkleClient {
    last_root_seqno: RwLock<Option<Seqno>>,
    verified: RwLock<HashSet<Seqno>>,
}

impl MerkleClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the user's proof, verify the root and walk the path.
    pub fn lookup_user(&self, ctx: &VerifyContext, uid: Uid) -> Result<MerkleLookup, MerkleError> {
        let resp = fetch_merkle_path(ctx.api.as_ref(), uid, ctx.fetch_timeout)?;
        if resp.uid != uid {
            return Err(MerkleError::WrongUid {
                requested: uid,
                got: resp.uid,
            });
        }

        let root = MerkleRoot::from_wire(&resp.root)?;
        self.verify_root(ctx, &root)?;

        let path = VerificationPath {
            uid,
            root: root.clone(),
            steps: resp.path,
            id_version: resp.id_version,
        };
        let leaf = path.verify()?;

        Ok(MerkleLookup { root, leaf, uid })
    }

    /// Accept a root: anti-rollback against the persisted floor, signature
    /// under a pinned signer, then persist by seqno plus the HEAD pointer.
    /// Signature checks are memoized per seqno; the rollback check always
    /// runs.
    pub fn verify_root(&self, ctx: &VerifyContext, root: &MerkleRoot) -> Result<(), MerkleError> {
        let floor = self.rollback_floor(ctx)?;
        if let Some(last) = floor {
            if root.seqno < last {
                return Err(MerkleError::Rollback {
                    last,
                    got: root.seqno,
                });
            }
        }

        // A re-served seqno must carry the exact bytes accepted before;
        // anything else is the server rewriting history, not a cache hit.
        let cache_bytes = root.to_cache_bytes();
        if let Some(existing) = ctx.store.get_root(root.seqno)? {
            if existing != cache_bytes {
                return Err(MerkleError::RootConflict(root.seqno));
            }
        }

        let already_verified = self
            .verified
            .read()
            .map_err(|_| MerkleError::Internal("lock poisoned".into()))?
            .contains(&root.seqno);

        if !already_verified {
            let key = ctx
                .keyring
                .lookup_trusted_signer(&root.fingerprint)
                .ok_or(MerkleError::UntrustedSigner(root.fingerprint))?;

            let envelope = SigEnvelope::parse(&root.sig)?;
            if envelope.payload != root.payload_json {
                return Err(MerkleError::RootPayloadMismatch);
            }
            envelope.verify(&root.sig, key)?;

            self.verified
                .write()
                .map_err(|_| MerkleError::Internal("lock poisoned".into()))?
                .insert(root.seqno);
            tracing::info!(seqno = %root.seqno, "merkle root accepted");
        }

        ctx.store.put_root(root.seqno, &cache_bytes)?;
        ctx.store.set_head_root_seqno(root.seqno)?;

        let mut last = self
            .last_root_seqno
            .write()
            .map_err(|_| MerkleError::Internal("lock poisoned".into()))?;
        if last.map_or(true, |cur| root.seqno > cur) {
            *last = Some(root.seqno);
        }
        Ok(())
    }

    fn rollback_floor(&self, ctx: &VerifyContext) -> Result<Option<Seqno>, MerkleError> {
        let in_memory = *self
            .last_root_seqno
            .read()
            .map_err(|_| MerkleError::Internal("lock poisoned".into()))?;
        let persisted = ctx.store.head_root_seqno()?;
        Ok(match (in_memory, persisted) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        })
    }
}
